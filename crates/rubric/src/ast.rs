//! The small typed AST produced by desugaring.
//!
//! One tagged union, [`ExprKind`], wrapped with a location in [`Expr`]. Parents own
//! their children exclusively; installing a subtree is always a move. Every node
//! carries a real location except `EmptyTree` at sentinel positions.
//!
//! The variants deliberately form a much smaller core than the surface syntax:
//! everything the surface language writes with sugar (safe navigation, compound
//! assignment, interpolation, `case`, `for`) arrives here already lowered.

use crate::{
    global_state::GlobalState,
    intern::{NameRef, WellKnownName},
    loc::Loc,
    symbols::SymbolRef,
    types::Type,
};

/// A local variable: a name plus a disambiguating id.
///
/// User locals keep their UTF8 name with `unique_id == 0`; compiler temporaries use
/// Unique names. Three reserved sentinels exist: [`LocalVariable::none`],
/// [`LocalVariable::block_call`], and [`LocalVariable::final_return`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct LocalVariable {
    pub name: NameRef,
    pub unique_id: u32,
}

impl LocalVariable {
    pub fn new(name: NameRef) -> Self {
        Self { name, unique_id: 0 }
    }

    /// The "no variable" sentinel, used for unconditional block exits.
    pub fn none() -> Self {
        Self {
            name: NameRef::NO_NAME,
            unique_id: 0,
        }
    }

    /// The "call the block" pseudo-condition on loop headers of block bodies.
    pub fn block_call() -> Self {
        Self {
            name: WellKnownName::BlockCall.into(),
            unique_id: 0,
        }
    }

    /// The variable holding a method's synthesized final return.
    pub fn final_return() -> Self {
        Self {
            name: WellKnownName::FinalReturn.into(),
            unique_id: 0,
        }
    }

    pub fn exists(self) -> bool {
        self != Self::none()
    }

    pub fn show(self, gs: &GlobalState) -> String {
        if self.unique_id == 0 {
            gs.show_name(self.name)
        } else {
            format!("{}${}", gs.show_name(self.name), self.unique_id)
        }
    }
}

/// Which namespace an unresolved identifier lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum IdentKind {
    Local,
    Instance,
    Class,
    Global,
}

/// `Class` vs `Module` definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum ClassKind {
    Class,
    Module,
}

/// What flavor of type assertion a `Cast` node performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum CastKind {
    /// `cast`: trust the annotation, no check that the value conforms.
    Cast,
    /// `assert_type!`: statically require the value to conform.
    AssertType,
    /// `let`: conform and pin the variable from here on.
    Let,
}

/// Modifier bits on a method definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct DefFlags(u8);

impl DefFlags {
    pub const SELF_METHOD: Self = Self(1 << 0);
    pub const PRIVATE: Self = Self(1 << 1);
    pub const PROTECTED: Self = Self(1 << 2);

    #[must_use]
    pub fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn has(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// One `rescue Exc => e` arm after desugaring.
///
/// An arm with no exception expressions is left empty here; the CFG builder
/// supplies the `StandardError` default.
#[derive(Debug, Clone)]
pub struct RescueCase {
    pub loc: Loc,
    pub exceptions: Vec<Expr>,
    /// The binding target; `EmptyTree` when the source did not name one.
    pub var: Box<Expr>,
    pub body: Box<Expr>,
}

/// A block literal attached to a send.
#[derive(Debug, Clone)]
pub struct BlockNode {
    pub loc: Loc,
    pub args: Vec<Expr>,
    pub body: Box<Expr>,
}

/// An expression with its location.
#[derive(Debug, Clone)]
pub struct Expr {
    pub loc: Loc,
    pub kind: ExprKind,
}

impl Expr {
    pub fn new(loc: Loc, kind: ExprKind) -> Self {
        Self { loc, kind }
    }

    /// The `EmptyTree` sentinel. The only expression allowed to carry no location.
    pub fn empty() -> Self {
        Self {
            loc: Loc::NONE,
            kind: ExprKind::EmptyTree,
        }
    }

    pub fn is_empty_tree(&self) -> bool {
        matches!(self.kind, ExprKind::EmptyTree)
    }

    /// True for bare references whose re-evaluation has no effect, which lets
    /// desugar skip temporaries (the `&&`/`||` lowering).
    pub fn is_reference(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Local { .. } | ExprKind::UnresolvedIdent { .. } | ExprKind::SelfRef { .. }
        )
    }
}

/// The AST's tagged union. See module docs.
#[derive(Debug, Clone)]
pub enum ExprKind {
    EmptyTree,

    // ===== literals =====
    Nil,
    True,
    False,
    IntLit(i64),
    FloatLit(f64),
    StringLit(NameRef),
    SymbolLit(NameRef),
    /// `self`, annotated with the enclosing class symbol once named.
    SelfRef { owner: SymbolRef },

    // ===== references =====
    Local { var: LocalVariable },
    UnresolvedIdent { kind: IdentKind, name: NameRef },
    /// Constant reference before resolution; `scope` is `EmptyTree` for a lexical
    /// lookup, or a resolved/unresolved constant expression for `A::B`.
    UnresolvedConstant { scope: Box<Expr>, name: NameRef },
    /// Constant reference after resolution.
    ConstantLit { symbol: SymbolRef },
    /// Identifier resolved to a field, static-field, or global symbol. The CFG
    /// builder reads these through per-method alias locals.
    FieldRef { symbol: SymbolRef },

    // ===== structure =====
    /// Statements followed by the expression the sequence evaluates to.
    InsSeq { stats: Vec<Expr>, expr: Box<Expr> },
    Assign { lhs: Box<Expr>, rhs: Box<Expr> },
    If {
        cond: Box<Expr>,
        thenp: Box<Expr>,
        elsep: Box<Expr>,
    },
    While { cond: Box<Expr>, body: Box<Expr> },

    // ===== calls =====
    Send {
        recv: Box<Expr>,
        fun: NameRef,
        args: Vec<Expr>,
        block: Option<Box<BlockNode>>,
    },
    /// Placeholder meaning "forward the enclosing method's arguments to super".
    ZSuperArgs,

    // ===== definitions =====
    ClassDef {
        decl_loc: Loc,
        /// Filled by the namer; `SymbolRef::NONE` before that.
        symbol: SymbolRef,
        name: Box<Expr>,
        ancestors: Vec<Expr>,
        rhs: Vec<Expr>,
        kind: ClassKind,
    },
    MethodDef {
        decl_loc: Loc,
        /// Filled by the namer; `SymbolRef::NONE` before that.
        symbol: SymbolRef,
        name: NameRef,
        args: Vec<Expr>,
        body: Box<Expr>,
        flags: DefFlags,
    },

    // ===== argument wrappers =====
    RestArg { inner: Box<Expr> },
    KeywordArg { inner: Box<Expr> },
    OptionalArg { inner: Box<Expr>, default: Box<Expr> },
    BlockArgNode { inner: Box<Expr> },
    ShadowArg { inner: Box<Expr> },

    // ===== control =====
    Return { expr: Box<Expr> },
    Break { expr: Box<Expr> },
    Next { expr: Box<Expr> },
    Retry,
    Yield { args: Vec<Expr> },

    // ===== exceptions =====
    Rescue {
        body: Box<Expr>,
        cases: Vec<RescueCase>,
        else_body: Box<Expr>,
        ensure_body: Box<Expr>,
    },

    // ===== collections =====
    ArrayLit { elems: Vec<Expr> },
    /// Pair-aligned keys and values.
    HashLit { keys: Vec<Expr>, values: Vec<Expr> },

    // ===== type carriers =====
    Cast {
        expr: Box<Expr>,
        /// The annotation as written; the resolver turns it into `ty`.
        type_expr: Box<Expr>,
        /// Resolved type; `None` until the resolver runs.
        ty: Option<Type>,
        kind: CastKind,
    },
}

// ===== printers =====

impl Expr {
    /// Compact, stable text form used by golden tests.
    pub fn show(&self, gs: &GlobalState) -> String {
        let mut out = String::new();
        self.show_into(gs, false, 0, &mut out);
        out
    }

    /// Richer form with fully qualified symbol names.
    pub fn show_raw(&self, gs: &GlobalState) -> String {
        let mut out = String::new();
        self.show_into(gs, true, 0, &mut out);
        out
    }

    fn show_into(&self, gs: &GlobalState, raw: bool, indent: usize, out: &mut String) {
        let pad = "  ".repeat(indent);
        let symbol_name = |sym: SymbolRef| -> String {
            if raw {
                gs.show_symbol(sym)
            } else if sym.exists() {
                gs.show_name(gs.symbol(sym).name)
            } else {
                "<none>".to_owned()
            }
        };
        match &self.kind {
            ExprKind::EmptyTree => out.push_str(&format!("{pad}<emptyTree>\n")),
            ExprKind::Nil => out.push_str(&format!("{pad}nil\n")),
            ExprKind::True => out.push_str(&format!("{pad}true\n")),
            ExprKind::False => out.push_str(&format!("{pad}false\n")),
            ExprKind::IntLit(v) => out.push_str(&format!("{pad}Int({v})\n")),
            ExprKind::FloatLit(v) => out.push_str(&format!("{pad}Float({v})\n")),
            ExprKind::StringLit(name) => out.push_str(&format!("{pad}String(\"{}\")\n", gs.show_name(*name))),
            ExprKind::SymbolLit(name) => out.push_str(&format!("{pad}Symbol(:{})\n", gs.show_name(*name))),
            ExprKind::SelfRef { owner } => out.push_str(&format!("{pad}self({})\n", symbol_name(*owner))),
            ExprKind::Local { var } => out.push_str(&format!("{pad}Local({})\n", var.show(gs))),
            ExprKind::UnresolvedIdent { kind, name } => {
                let kind_text: &'static str = (*kind).into();
                out.push_str(&format!("{pad}UnresolvedIdent[{kind_text}]({})\n", gs.show_name(*name)));
            }
            ExprKind::UnresolvedConstant { scope, name } => {
                out.push_str(&format!("{pad}UnresolvedConstant({})\n", gs.show_name(*name)));
                if !scope.is_empty_tree() {
                    scope.show_into(gs, raw, indent + 1, out);
                }
            }
            ExprKind::ConstantLit { symbol } => {
                out.push_str(&format!("{pad}ConstantLit({})\n", symbol_name(*symbol)));
            }
            ExprKind::FieldRef { symbol } => {
                out.push_str(&format!("{pad}FieldRef({})\n", symbol_name(*symbol)));
            }
            ExprKind::InsSeq { stats, expr } => {
                out.push_str(&format!("{pad}InsSeq\n"));
                for stat in stats {
                    stat.show_into(gs, raw, indent + 1, out);
                }
                out.push_str(&format!("{pad}-> \n"));
                expr.show_into(gs, raw, indent + 1, out);
            }
            ExprKind::Assign { lhs, rhs } => {
                out.push_str(&format!("{pad}Assign\n"));
                lhs.show_into(gs, raw, indent + 1, out);
                rhs.show_into(gs, raw, indent + 1, out);
            }
            ExprKind::If { cond, thenp, elsep } => {
                out.push_str(&format!("{pad}If\n"));
                cond.show_into(gs, raw, indent + 1, out);
                thenp.show_into(gs, raw, indent + 1, out);
                elsep.show_into(gs, raw, indent + 1, out);
            }
            ExprKind::While { cond, body } => {
                out.push_str(&format!("{pad}While\n"));
                cond.show_into(gs, raw, indent + 1, out);
                body.show_into(gs, raw, indent + 1, out);
            }
            ExprKind::Send { recv, fun, args, block } => {
                out.push_str(&format!("{pad}Send({})\n", gs.show_name(*fun)));
                recv.show_into(gs, raw, indent + 1, out);
                for arg in args {
                    arg.show_into(gs, raw, indent + 1, out);
                }
                if let Some(block) = block {
                    out.push_str(&format!("{pad}  Block\n"));
                    for arg in &block.args {
                        arg.show_into(gs, raw, indent + 2, out);
                    }
                    block.body.show_into(gs, raw, indent + 2, out);
                }
            }
            ExprKind::ZSuperArgs => out.push_str(&format!("{pad}ZSuperArgs\n")),
            ExprKind::ClassDef {
                symbol,
                name,
                ancestors,
                rhs,
                kind,
                ..
            } => {
                let kind_text: &'static str = (*kind).into();
                out.push_str(&format!("{pad}ClassDef[{kind_text}]({})\n", symbol_name(*symbol)));
                if raw {
                    name.show_into(gs, raw, indent + 1, out);
                }
                for ancestor in ancestors {
                    out.push_str(&format!("{pad}  ancestor:\n"));
                    ancestor.show_into(gs, raw, indent + 2, out);
                }
                for stmt in rhs {
                    stmt.show_into(gs, raw, indent + 1, out);
                }
            }
            ExprKind::MethodDef {
                symbol,
                name,
                args,
                body,
                flags,
                ..
            } => {
                let self_marker = if flags.has(DefFlags::SELF_METHOD) { "self." } else { "" };
                let shown = if raw && symbol.exists() {
                    symbol_name(*symbol)
                } else {
                    format!("{self_marker}{}", gs.show_name(*name))
                };
                out.push_str(&format!("{pad}MethodDef({shown})\n"));
                for arg in args {
                    arg.show_into(gs, raw, indent + 1, out);
                }
                body.show_into(gs, raw, indent + 1, out);
            }
            ExprKind::RestArg { inner } => {
                out.push_str(&format!("{pad}RestArg\n"));
                inner.show_into(gs, raw, indent + 1, out);
            }
            ExprKind::KeywordArg { inner } => {
                out.push_str(&format!("{pad}KeywordArg\n"));
                inner.show_into(gs, raw, indent + 1, out);
            }
            ExprKind::OptionalArg { inner, default } => {
                out.push_str(&format!("{pad}OptionalArg\n"));
                inner.show_into(gs, raw, indent + 1, out);
                default.show_into(gs, raw, indent + 1, out);
            }
            ExprKind::BlockArgNode { inner } => {
                out.push_str(&format!("{pad}BlockArg\n"));
                inner.show_into(gs, raw, indent + 1, out);
            }
            ExprKind::ShadowArg { inner } => {
                out.push_str(&format!("{pad}ShadowArg\n"));
                inner.show_into(gs, raw, indent + 1, out);
            }
            ExprKind::Return { expr } => {
                out.push_str(&format!("{pad}Return\n"));
                expr.show_into(gs, raw, indent + 1, out);
            }
            ExprKind::Break { expr } => {
                out.push_str(&format!("{pad}Break\n"));
                expr.show_into(gs, raw, indent + 1, out);
            }
            ExprKind::Next { expr } => {
                out.push_str(&format!("{pad}Next\n"));
                expr.show_into(gs, raw, indent + 1, out);
            }
            ExprKind::Retry => out.push_str(&format!("{pad}Retry\n")),
            ExprKind::Yield { args } => {
                out.push_str(&format!("{pad}Yield\n"));
                for arg in args {
                    arg.show_into(gs, raw, indent + 1, out);
                }
            }
            ExprKind::Rescue {
                body,
                cases,
                else_body,
                ensure_body,
            } => {
                out.push_str(&format!("{pad}Rescue\n"));
                body.show_into(gs, raw, indent + 1, out);
                for case in cases {
                    out.push_str(&format!("{pad}  RescueCase\n"));
                    for exc in &case.exceptions {
                        exc.show_into(gs, raw, indent + 2, out);
                    }
                    case.var.show_into(gs, raw, indent + 2, out);
                    case.body.show_into(gs, raw, indent + 2, out);
                }
                if !else_body.is_empty_tree() {
                    out.push_str(&format!("{pad}  else:\n"));
                    else_body.show_into(gs, raw, indent + 2, out);
                }
                if !ensure_body.is_empty_tree() {
                    out.push_str(&format!("{pad}  ensure:\n"));
                    ensure_body.show_into(gs, raw, indent + 2, out);
                }
            }
            ExprKind::ArrayLit { elems } => {
                out.push_str(&format!("{pad}Array\n"));
                for elem in elems {
                    elem.show_into(gs, raw, indent + 1, out);
                }
            }
            ExprKind::HashLit { keys, values } => {
                out.push_str(&format!("{pad}Hash\n"));
                for (key, value) in keys.iter().zip(values) {
                    key.show_into(gs, raw, indent + 1, out);
                    value.show_into(gs, raw, indent + 1, out);
                }
            }
            ExprKind::Cast { expr, ty, kind, .. } => {
                let kind_text: &'static str = (*kind).into();
                let ty_text = ty.as_ref().map_or_else(|| "?".to_owned(), |t| t.show(gs));
                out.push_str(&format!("{pad}Cast[{kind_text}]({ty_text})\n"));
                expr.show_into(gs, raw, indent + 1, out);
            }
        }
    }
}
