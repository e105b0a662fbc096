//! Desugaring: surface parse tree to the small AST.
//!
//! Desugar is total: every parse node kind is either translated or reported as
//! unsupported and replaced by `EmptyTree`. All rewrites are local; nothing here
//! consults the symbol table. Surface sugar (safe navigation, compound assignment,
//! interpolation, `case`, `for`, splats, destructuring) lowers to the core
//! primitives: sequences, assignments, ifs, whiles, and sends.
//!
//! Constructs with no first-class expression form go through the `<Magic>`
//! receiver: `<call-with-splat>`, `<expand-splat>`, `<build-array>`,
//! `<build-hash>`, `<defined?>`.

use ahash::AHashMap;

use crate::{
    ast::{BlockNode, CastKind, ClassKind, DefFlags, Expr, ExprKind, IdentKind, LocalVariable, RescueCase},
    errors::{Error, classes},
    global_state::GlobalState,
    intern::{NameRef, UniqueNameKind, WellKnownName},
    loc::{FileRef, Loc, offset_to_line_col},
    parser::{Node, ResBody, WhenClause},
    symbols::SymbolRef,
};

/// Desugars one file's parse tree into the lifted top-level class definition.
pub fn desugar_file(gs: &mut GlobalState, file: FileRef, node: Option<Box<Node>>) -> Expr {
    let mut ctx = Desugar {
        gs,
        file,
        unique_counters: AHashMap::new(),
    };
    let body = match node {
        Some(node) => ctx.node2tree(*node),
        None => Expr::empty(),
    };
    lift_to_class_def(file, body)
}

/// Wraps the top-level expression in a synthetic `ClassDef` owned by `<root>`,
/// flattening an `InsSeq` into the class body.
fn lift_to_class_def(file: FileRef, body: Expr) -> Expr {
    if let ExprKind::ClassDef { symbol, .. } = &body.kind
        && *symbol == SymbolRef::ROOT
    {
        return body;
    }
    let loc = if body.loc.exists() {
        body.loc
    } else {
        Loc::new(file, 0, 0)
    };
    let rhs = match body.kind {
        ExprKind::EmptyTree => Vec::new(),
        ExprKind::InsSeq { stats, expr } => {
            let mut rhs = stats;
            rhs.push(*expr);
            rhs
        }
        _ => vec![body],
    };
    Expr::new(
        loc,
        ExprKind::ClassDef {
            decl_loc: loc,
            symbol: SymbolRef::ROOT,
            name: Box::new(Expr::empty()),
            ancestors: Vec::new(),
            rhs,
            kind: ClassKind::Class,
        },
    )
}

struct Desugar<'gs> {
    gs: &'gs mut GlobalState,
    file: FileRef,
    /// Per-file counters for generated names, so identical inputs produce
    /// identical temporaries no matter how files are scheduled across workers.
    unique_counters: AHashMap<NameRef, u32>,
}

impl Desugar<'_> {
    // ===== small constructors =====

    fn mk(loc: Loc, kind: ExprKind) -> Expr {
        Expr::new(loc, kind)
    }

    fn fresh_local(&mut self, base: WellKnownName) -> LocalVariable {
        let base: NameRef = base.into();
        let counter = self.unique_counters.entry(base).or_insert(1);
        let num = *counter;
        *counter += 1;
        let name = self.gs.enter_name_unique(UniqueNameKind::Desugar, base, num);
        LocalVariable::new(name)
    }

    fn local(loc: Loc, var: LocalVariable) -> Expr {
        Self::mk(loc, ExprKind::Local { var })
    }

    fn assign_local(loc: Loc, var: LocalVariable, rhs: Expr) -> Expr {
        Self::mk(
            loc,
            ExprKind::Assign {
                lhs: Box::new(Self::local(loc, var)),
                rhs: Box::new(rhs),
            },
        )
    }

    fn send(loc: Loc, recv: Expr, fun: NameRef, args: Vec<Expr>) -> Expr {
        Self::mk(
            loc,
            ExprKind::Send {
                recv: Box::new(recv),
                fun,
                args,
                block: None,
            },
        )
    }

    fn send_known(loc: Loc, recv: Expr, fun: WellKnownName, args: Vec<Expr>) -> Expr {
        Self::send(loc, recv, fun.into(), args)
    }

    fn magic(loc: Loc) -> Expr {
        Self::mk(loc, ExprKind::ConstantLit { symbol: SymbolRef::MAGIC })
    }

    fn ins_seq(loc: Loc, stats: Vec<Expr>, expr: Expr) -> Expr {
        if stats.is_empty() {
            expr
        } else {
            Self::mk(
                loc,
                ExprKind::InsSeq {
                    stats,
                    expr: Box::new(expr),
                },
            )
        }
    }

    fn string_lit(&mut self, loc: Loc, text: &str) -> Expr {
        let name = self.gs.enter_name_utf8(text);
        Self::mk(loc, ExprKind::StringLit(name))
    }

    fn unresolved_const(&mut self, loc: Loc, name: &str) -> Expr {
        let name = self.gs.enter_name_constant(name);
        Self::mk(
            loc,
            ExprKind::UnresolvedConstant {
                scope: Box::new(Expr::empty()),
                name,
            },
        )
    }

    fn report(&self, class: crate::errors::ErrorClass, loc: Loc, header: impl Into<String>) {
        self.gs.report(Error::new(class, loc, header));
    }

    fn unsupported(&mut self, loc: Loc, what: &str) -> Expr {
        self.report(
            classes::desugar::UNSUPPORTED_NODE,
            loc,
            format!("Unsupported node type `{what}`"),
        );
        Expr::empty()
    }

    // ===== the main translation =====

    #[expect(clippy::too_many_lines, reason = "one arm per surface node kind")]
    fn node2tree(&mut self, node: Node) -> Expr {
        match node {
            Node::Nil(loc) => Self::mk(loc, ExprKind::Nil),
            Node::True(loc) => Self::mk(loc, ExprKind::True),
            Node::False(loc) => Self::mk(loc, ExprKind::False),
            Node::SelfNode(loc) => Self::mk(loc, ExprKind::SelfRef { owner: SymbolRef::NONE }),
            Node::Integer { loc, value } => self.integer_lit(loc, &value),
            Node::Float { loc, value } => self.float_lit(loc, &value),
            Node::Str { loc, value } => self.string_lit(loc, &value),
            Node::Sym { loc, name } => {
                let name = self.gs.enter_name_utf8(&name);
                Self::mk(loc, ExprKind::SymbolLit(name))
            }
            Node::DStr { loc, parts } => self.desugar_dstr(loc, parts),
            Node::DSym { loc, parts } => {
                let folded = self.desugar_dstr(loc, parts);
                Self::send_known(loc, folded, WellKnownName::Intern, Vec::new())
            }
            Node::Regexp { loc, parts, options } => self.desugar_regexp(loc, parts, &options),
            Node::FileLit(loc) => {
                let path = self.gs.file(self.file).path.clone();
                self.string_lit(loc, &path)
            }
            Node::LineLit(loc) => {
                let line_ends = &self.gs.file(self.file).line_ends;
                let line = offset_to_line_col(line_ends, loc.begin).line;
                Self::mk(loc, ExprKind::IntLit(i64::from(line)))
            }

            Node::LVar { loc, name } => {
                let name = self.gs.enter_name_utf8(&name);
                Self::mk(
                    loc,
                    ExprKind::UnresolvedIdent {
                        kind: IdentKind::Local,
                        name,
                    },
                )
            }
            Node::IVar { loc, name } => {
                let name = self.gs.enter_name_utf8(&name);
                Self::mk(
                    loc,
                    ExprKind::UnresolvedIdent {
                        kind: IdentKind::Instance,
                        name,
                    },
                )
            }
            Node::CVar { loc, name } => {
                let name = self.gs.enter_name_utf8(&name);
                Self::mk(
                    loc,
                    ExprKind::UnresolvedIdent {
                        kind: IdentKind::Class,
                        name,
                    },
                )
            }
            Node::GVar { loc, name } => {
                let name = self.gs.enter_name_utf8(&name);
                Self::mk(
                    loc,
                    ExprKind::UnresolvedIdent {
                        kind: IdentKind::Global,
                        name,
                    },
                )
            }
            Node::Const { loc, scope, name } => {
                let scope = match scope {
                    Some(scope) => self.node2tree(*scope),
                    None => Expr::empty(),
                };
                let name = self.gs.enter_name_constant(&name);
                Self::mk(
                    loc,
                    ExprKind::UnresolvedConstant {
                        scope: Box::new(scope),
                        name,
                    },
                )
            }

            Node::Begin { loc, stmts } => self.desugar_begin(loc, stmts),

            Node::And { loc, left, right } => self.desugar_and(loc, *left, *right),
            Node::Or { loc, left, right } => self.desugar_or(loc, *left, *right),

            Node::Asgn { loc, target, value } => {
                let rhs = self.node2tree(*value);
                self.desugar_assign_target(loc, *target, rhs)
            }
            Node::OpAsgn { loc, target, op, value } => self.desugar_op_asgn(loc, *target, Some(op), *value),
            Node::AndAsgn { loc, target, value } => self.desugar_op_asgn(loc, *target, None, *value),
            Node::OrAsgn { loc, target, value } => {
                // Same temp discipline as `&&=`, branches swapped.
                self.desugar_or_asgn(loc, *target, *value)
            }
            Node::Masgn { loc, targets, value } => {
                let rhs = self.node2tree(*value);
                self.desugar_masgn(loc, targets, rhs)
            }
            Node::Splat { loc, value } => {
                // A splat outside call/masgn position evaluates to its array form.
                match value {
                    Some(inner) => {
                        let inner = self.node2tree(*inner);
                        Self::send_known(loc, inner, WellKnownName::ToA, Vec::new())
                    }
                    None => Expr::empty(),
                }
            }

            Node::Send {
                loc,
                recv,
                method,
                args,
            } => self.desugar_send(loc, recv.map(|r| *r), &method, args, None),
            Node::CSend {
                loc,
                recv,
                method,
                args,
            } => self.desugar_csend(loc, *recv, &method, args),
            Node::Block { loc, call, args, body } => self.desugar_block_node(loc, *call, args, body.map(|b| *b)),
            Node::BlockPass { loc, .. } => {
                // A bare `&expr` outside an argument list has no meaning.
                self.unsupported(loc, "block_pass")
            }
            Node::Super { loc, args } => {
                let self_ref = Self::mk(loc, ExprKind::SelfRef { owner: SymbolRef::NONE });
                let args = self.desugar_args(args);
                Self::send_known(loc, self_ref, WellKnownName::Super, args)
            }
            Node::ZSuper(loc) => {
                let self_ref = Self::mk(loc, ExprKind::SelfRef { owner: SymbolRef::NONE });
                let zsuper = Self::mk(loc, ExprKind::ZSuperArgs);
                Self::send_known(loc, self_ref, WellKnownName::Super, vec![zsuper])
            }
            Node::Yield { loc, args } => {
                let args = self.desugar_args(args);
                Self::mk(loc, ExprKind::Yield { args })
            }

            Node::If {
                loc,
                cond,
                then_branch,
                else_branch,
            } => {
                let cond = self.node2tree(*cond);
                let thenp = self.desugar_opt(then_branch);
                let elsep = self.desugar_opt(else_branch);
                Self::mk(
                    loc,
                    ExprKind::If {
                        cond: Box::new(cond),
                        thenp: Box::new(thenp),
                        elsep: Box::new(elsep),
                    },
                )
            }
            Node::While { loc, cond, body } => {
                let cond = self.node2tree(*cond);
                let body = self.desugar_opt(body);
                Self::mk(
                    loc,
                    ExprKind::While {
                        cond: Box::new(cond),
                        body: Box::new(body),
                    },
                )
            }
            Node::Until { loc, cond, body } => {
                let cond = self.node2tree(*cond);
                let negated = Self::send_known(cond.loc, cond, WellKnownName::Bang, Vec::new());
                let body = self.desugar_opt(body);
                Self::mk(
                    loc,
                    ExprKind::While {
                        cond: Box::new(negated),
                        body: Box::new(body),
                    },
                )
            }
            Node::WhilePost { loc, cond, body } => self.desugar_post_loop(loc, *cond, *body, false),
            Node::UntilPost { loc, cond, body } => self.desugar_post_loop(loc, *cond, *body, true),
            Node::For { loc, var, iter, body } => self.desugar_for(loc, *var, *iter, body.map(|b| *b)),
            Node::Case {
                loc,
                scrutinee,
                whens,
                else_branch,
            } => self.desugar_case(loc, scrutinee.map(|s| *s), whens, else_branch.map(|e| *e)),

            Node::Return { loc, value } => {
                let expr = self.desugar_opt(value);
                Self::mk(loc, ExprKind::Return { expr: Box::new(expr) })
            }
            Node::Break { loc, value } => {
                let expr = self.desugar_opt(value);
                Self::mk(loc, ExprKind::Break { expr: Box::new(expr) })
            }
            Node::Next { loc, value } => {
                let expr = self.desugar_opt(value);
                Self::mk(loc, ExprKind::Next { expr: Box::new(expr) })
            }
            Node::Retry(loc) => Self::mk(loc, ExprKind::Retry),

            Node::Rescue {
                loc,
                body,
                cases,
                else_branch,
            } => self.desugar_rescue(loc, body.map(|b| *b), cases, else_branch.map(|e| *e)),
            Node::Ensure {
                loc,
                body,
                ensure_body,
            } => self.desugar_ensure(loc, body.map(|b| *b), ensure_body.map(|e| *e)),

            Node::Class {
                loc,
                decl_loc,
                name,
                superclass,
                body,
            } => {
                let name = self.node2tree(*name);
                // Slot 0 is always the superclass position; `EmptyTree` stands for
                // "none declared". Mixins discovered by the namer append after it.
                let ancestors = match superclass {
                    Some(superclass) => vec![self.node2tree(*superclass)],
                    None => vec![Expr::empty()],
                };
                let rhs = self.desugar_body_stmts(body.map(|b| *b));
                Self::mk(
                    loc,
                    ExprKind::ClassDef {
                        decl_loc,
                        symbol: SymbolRef::NONE,
                        name: Box::new(name),
                        ancestors,
                        rhs,
                        kind: ClassKind::Class,
                    },
                )
            }
            Node::Module { loc, decl_loc, name, body } => {
                let name = self.node2tree(*name);
                let rhs = self.desugar_body_stmts(body.map(|b| *b));
                Self::mk(
                    loc,
                    ExprKind::ClassDef {
                        decl_loc,
                        symbol: SymbolRef::NONE,
                        name: Box::new(name),
                        ancestors: Vec::new(),
                        rhs,
                        kind: ClassKind::Module,
                    },
                )
            }
            Node::SClass {
                loc,
                decl_loc,
                expr,
                body,
            } => {
                // `class << self` becomes a nested class with the synthesized
                // `<singleton>` name; any other receiver is rejected.
                if !matches!(*expr, Node::SelfNode(_)) {
                    self.report(
                        classes::desugar::INVALID_SINGLETON_DEF,
                        expr.loc(),
                        "`class << EXPRESSION` is only supported for `class << self`",
                    );
                    return Expr::empty();
                }
                let singleton: &'static str = WellKnownName::Singleton.into();
                let name = self.unresolved_const(decl_loc, singleton);
                let rhs = self.desugar_body_stmts(body.map(|b| *b));
                Self::mk(
                    loc,
                    ExprKind::ClassDef {
                        decl_loc,
                        symbol: SymbolRef::NONE,
                        name: Box::new(name),
                        ancestors: Vec::new(),
                        rhs,
                        kind: ClassKind::Class,
                    },
                )
            }
            Node::Def {
                loc,
                decl_loc,
                name,
                args,
                body,
            } => self.desugar_def(loc, decl_loc, &name, args, body.map(|b| *b), DefFlags::default()),
            Node::Defs {
                loc,
                decl_loc,
                recv,
                name,
                args,
                body,
            } => {
                if !matches!(*recv, Node::SelfNode(_)) {
                    self.report(
                        classes::desugar::INVALID_SINGLETON_DEF,
                        recv.loc(),
                        "`def EXPRESSION.method` is only supported for `def self.method`",
                    );
                    return Expr::empty();
                }
                self.desugar_def(loc, decl_loc, &name, args, body.map(|b| *b), DefFlags::SELF_METHOD)
            }

            Node::Array { loc, elems } => self.desugar_array(loc, elems),
            Node::Hash { loc, pairs } => self.desugar_hash(loc, pairs),
            Node::Pair { loc, .. } => {
                // Pairs only make sense inside hash literals or keyword args.
                self.unsupported(loc, "pair")
            }
            Node::Kwsplat { loc, .. } => self.unsupported(loc, "kwsplat"),
            Node::IRange { loc, from, to } => self.desugar_range(loc, from, to, false),
            Node::ERange { loc, from, to } => self.desugar_range(loc, from, to, true),

            Node::Defined { loc, value } => {
                let arg = self.node2tree(*value);
                Self::send_known(loc, Self::magic(loc), WellKnownName::DefinedP, vec![arg])
            }

            // Formal arguments appear via desugar_formal_args, never bare.
            Node::Arg { loc, .. }
            | Node::OptArg { loc, .. }
            | Node::RestArg { loc, .. }
            | Node::KwArg { loc, .. }
            | Node::KwOptArg { loc, .. }
            | Node::KwRestArg { loc, .. }
            | Node::BlockArg { loc, .. }
            | Node::ShadowArg { loc, .. }
            | Node::Mlhs { loc, .. } => self.unsupported(loc, "argument"),

            Node::Preexe(loc) => self.unsupported(loc, "preexe"),
            Node::Postexe(loc) => self.unsupported(loc, "postexe"),
            Node::Undef { loc, .. } => self.unsupported(loc, "undef"),
            Node::Backref { loc, ref name } => {
                let what = format!("backref ({name})");
                self.unsupported(loc, &what)
            }
            Node::Redo(loc) => self.unsupported(loc, "redo"),
            Node::Missing(loc) => Self::mk(loc, ExprKind::EmptyTree),
        }
    }

    fn desugar_opt(&mut self, node: Option<Box<Node>>) -> Expr {
        match node {
            Some(node) => self.node2tree(*node),
            None => Expr::empty(),
        }
    }

    fn desugar_args(&mut self, args: Vec<Node>) -> Vec<Expr> {
        args.into_iter().map(|a| self.node2tree(a)).collect()
    }

    /// Flattens a class/module body into statement list form.
    fn desugar_body_stmts(&mut self, body: Option<Node>) -> Vec<Expr> {
        match body {
            None => Vec::new(),
            Some(Node::Begin { stmts, .. }) => stmts.into_iter().map(|s| self.node2tree(s)).collect(),
            Some(single) => vec![self.node2tree(single)],
        }
    }

    fn desugar_begin(&mut self, loc: Loc, stmts: Vec<Node>) -> Expr {
        let mut exprs: Vec<Expr> = stmts.into_iter().map(|s| self.node2tree(s)).collect();
        match exprs.len() {
            0 => Self::mk(loc, ExprKind::Nil),
            1 => exprs.pop().expect("len checked"),
            _ => {
                let last = exprs.pop().expect("len checked");
                Self::ins_seq(loc, exprs, last)
            }
        }
    }

    // ===== literals =====

    fn integer_lit(&mut self, loc: Loc, text: &str) -> Expr {
        match text.parse::<i64>() {
            Ok(value) => Self::mk(loc, ExprKind::IntLit(value)),
            Err(_) => {
                self.report(
                    classes::desugar::INTEGER_OUT_OF_RANGE,
                    loc,
                    format!("Unsupported integer literal: `{text}`"),
                );
                Self::mk(loc, ExprKind::IntLit(0))
            }
        }
    }

    fn float_lit(&mut self, loc: Loc, text: &str) -> Expr {
        match text.parse::<f64>() {
            Ok(value) if value.is_infinite() => {
                // An overflowing-but-parseable literal counts as out of range too.
                self.report(
                    classes::desugar::FLOAT_OUT_OF_RANGE,
                    loc,
                    format!("Unsupported float literal: `{text}`"),
                );
                Self::mk(loc, ExprKind::FloatLit(value))
            }
            Ok(value) => Self::mk(loc, ExprKind::FloatLit(value)),
            Err(_) => {
                self.report(
                    classes::desugar::FLOAT_OUT_OF_RANGE,
                    loc,
                    format!("Unsupported float literal: `{text}`"),
                );
                Self::mk(loc, ExprKind::FloatLit(f64::NAN))
            }
        }
    }

    // ===== boolean operators =====

    /// `a && b`: a reference is re-read; anything else evaluates once into a temp.
    fn desugar_and(&mut self, loc: Loc, left: Node, right: Node) -> Expr {
        let left = self.node2tree(left);
        let right = self.node2tree(right);
        if left.is_reference() {
            let cond = left.clone();
            Self::mk(
                loc,
                ExprKind::If {
                    cond: Box::new(cond),
                    thenp: Box::new(right),
                    elsep: Box::new(left),
                },
            )
        } else {
            let temp = self.fresh_local(WellKnownName::AndAnd);
            let bind = Self::assign_local(left.loc, temp, left);
            let if_expr = Self::mk(
                loc,
                ExprKind::If {
                    cond: Box::new(Self::local(loc, temp)),
                    thenp: Box::new(right),
                    elsep: Box::new(Self::local(loc, temp)),
                },
            );
            Self::ins_seq(loc, vec![bind], if_expr)
        }
    }

    /// `a || b`: symmetric to `&&` with the branches swapped.
    fn desugar_or(&mut self, loc: Loc, left: Node, right: Node) -> Expr {
        let left = self.node2tree(left);
        let right = self.node2tree(right);
        if left.is_reference() {
            let cond = left.clone();
            Self::mk(
                loc,
                ExprKind::If {
                    cond: Box::new(cond),
                    thenp: Box::new(left),
                    elsep: Box::new(right),
                },
            )
        } else {
            let temp = self.fresh_local(WellKnownName::OrOr);
            let bind = Self::assign_local(left.loc, temp, left);
            let if_expr = Self::mk(
                loc,
                ExprKind::If {
                    cond: Box::new(Self::local(loc, temp)),
                    thenp: Box::new(Self::local(loc, temp)),
                    elsep: Box::new(right),
                },
            );
            Self::ins_seq(loc, vec![bind], if_expr)
        }
    }

    // ===== assignment =====

    /// Plain assignment into any target form.
    fn desugar_assign_target(&mut self, loc: Loc, target: Node, rhs: Expr) -> Expr {
        match target {
            Node::LVar { loc: t_loc, name } | Node::Send { loc: t_loc, recv: None, method: name, .. } => {
                let name = self.gs.enter_name_utf8(&name);
                let lhs = Self::mk(
                    t_loc,
                    ExprKind::UnresolvedIdent {
                        kind: IdentKind::Local,
                        name,
                    },
                );
                Self::mk(
                    loc,
                    ExprKind::Assign {
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                )
            }
            Node::IVar { loc: t_loc, name } => self.ident_assign(loc, t_loc, IdentKind::Instance, &name, rhs),
            Node::CVar { loc: t_loc, name } => self.ident_assign(loc, t_loc, IdentKind::Class, &name, rhs),
            Node::GVar { loc: t_loc, name } => self.ident_assign(loc, t_loc, IdentKind::Global, &name, rhs),
            Node::Const { .. } => {
                let lhs = self.node2tree(target);
                Self::mk(
                    loc,
                    ExprKind::Assign {
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                )
            }
            Node::Send {
                loc: t_loc,
                recv: Some(recv),
                method,
                mut args,
            } => {
                // `r.m = v` becomes `r.m=(v)`; `r[i] = v` becomes `r.[]=(i, v)`.
                let recv = self.node2tree(*recv);
                let setter = if method == "[]" {
                    "[]=".to_owned()
                } else {
                    format!("{method}=")
                };
                let fun = self.gs.enter_name_utf8(&setter);
                let mut desugared: Vec<Expr> = Vec::with_capacity(args.len() + 1);
                for arg in args.drain(..) {
                    desugared.push(self.node2tree(arg));
                }
                desugared.push(rhs);
                Self::send(t_loc.join(loc), recv, fun, desugared)
            }
            _ => self.unsupported(loc, "assignment target"),
        }
    }

    fn ident_assign(&mut self, loc: Loc, t_loc: Loc, kind: IdentKind, name: &str, rhs: Expr) -> Expr {
        let name = self.gs.enter_name_utf8(name);
        let lhs = Self::mk(t_loc, ExprKind::UnresolvedIdent { kind, name });
        Self::mk(
            loc,
            ExprKind::Assign {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        )
    }

    /// `&&=` (`op == None`) and `op=` on every target form.
    fn desugar_op_asgn(&mut self, loc: Loc, target: Node, op: Option<String>, value: Node) -> Expr {
        match target {
            Node::Const { .. } => {
                self.report(
                    classes::desugar::NO_CONSTANT_REASSIGNMENT,
                    loc,
                    "Constant reassignment is not supported",
                );
                Expr::empty()
            }
            Node::Send {
                loc: t_loc,
                recv: Some(recv),
                method,
                args,
            } => {
                let rhs = self.node2tree(value);
                self.desugar_send_op_asgn(loc, t_loc, *recv, &method, args, op, rhs, false)
            }
            simple => {
                // Locals, ivars, gvars, cvars: read, combine, store back.
                let read = self.read_of_target(&simple);
                let rhs = self.node2tree(value);
                match op {
                    Some(op) => {
                        let fun = self.gs.enter_name_utf8(&op);
                        let combined = Self::send(loc, read, fun, vec![rhs]);
                        self.desugar_assign_target(loc, simple, combined)
                    }
                    None => {
                        // `a &&= b` is `if a then a = b else a end`.
                        let assign = self.desugar_assign_target(loc, simple, rhs);
                        Self::mk(
                            loc,
                            ExprKind::If {
                                cond: Box::new(read.clone()),
                                thenp: Box::new(assign),
                                elsep: Box::new(read),
                            },
                        )
                    }
                }
            }
        }
    }

    fn desugar_or_asgn(&mut self, loc: Loc, target: Node, value: Node) -> Expr {
        match target {
            Node::Const { .. } => {
                self.report(
                    classes::desugar::NO_CONSTANT_REASSIGNMENT,
                    loc,
                    "Constant reassignment is not supported",
                );
                Expr::empty()
            }
            Node::Send {
                loc: t_loc,
                recv: Some(recv),
                method,
                args,
            } => {
                let rhs = self.node2tree(value);
                self.desugar_send_op_asgn(loc, t_loc, *recv, &method, args, None, rhs, true)
            }
            simple => {
                let read = self.read_of_target(&simple);
                let rhs = self.node2tree(value);
                let assign = self.desugar_assign_target(loc, simple, rhs);
                Self::mk(
                    loc,
                    ExprKind::If {
                        cond: Box::new(read.clone()),
                        thenp: Box::new(read),
                        elsep: Box::new(assign),
                    },
                )
            }
        }
    }

    /// The read expression for a simple (non-send) assignment target.
    fn read_of_target(&mut self, target: &Node) -> Expr {
        match target {
            Node::LVar { loc, name } | Node::Send { loc, recv: None, method: name, .. } => {
                let name = self.gs.enter_name_utf8(name);
                Self::mk(
                    *loc,
                    ExprKind::UnresolvedIdent {
                        kind: IdentKind::Local,
                        name,
                    },
                )
            }
            Node::IVar { loc, name } => {
                let name = self.gs.enter_name_utf8(name);
                Self::mk(
                    *loc,
                    ExprKind::UnresolvedIdent {
                        kind: IdentKind::Instance,
                        name,
                    },
                )
            }
            Node::CVar { loc, name } => {
                let name = self.gs.enter_name_utf8(name);
                Self::mk(
                    *loc,
                    ExprKind::UnresolvedIdent {
                        kind: IdentKind::Class,
                        name,
                    },
                )
            }
            Node::GVar { loc, name } => {
                let name = self.gs.enter_name_utf8(name);
                Self::mk(
                    *loc,
                    ExprKind::UnresolvedIdent {
                        kind: IdentKind::Global,
                        name,
                    },
                )
            }
            other => Self::mk(other.loc(), ExprKind::EmptyTree),
        }
    }

    /// Compound assignment through a send target: evaluate the receiver and every
    /// index argument exactly once into temps, read, combine or short-circuit,
    /// then call the setter with the same temps plus the new value.
    #[expect(clippy::too_many_arguments, reason = "one call site per operator family")]
    fn desugar_send_op_asgn(
        &mut self,
        loc: Loc,
        t_loc: Loc,
        recv: Node,
        method: &str,
        args: Vec<Node>,
        op: Option<String>,
        rhs: Expr,
        or_form: bool,
    ) -> Expr {
        let mut stats = Vec::new();
        let recv_temp = self.fresh_local(WellKnownName::OpAsgnTemp);
        let recv_expr = self.node2tree(recv);
        stats.push(Self::assign_local(recv_expr.loc, recv_temp, recv_expr));

        let mut arg_temps = Vec::with_capacity(args.len());
        for arg in args {
            let temp = self.fresh_local(WellKnownName::OpAsgnTemp);
            let arg_expr = self.node2tree(arg);
            stats.push(Self::assign_local(arg_expr.loc, temp, arg_expr));
            arg_temps.push(temp);
        }

        let getter = self.gs.enter_name_utf8(method);
        let setter_text = if method == "[]" {
            "[]=".to_owned()
        } else {
            format!("{method}=")
        };
        let setter = self.gs.enter_name_utf8(&setter_text);

        let read_args: Vec<Expr> = arg_temps.iter().map(|&t| Self::local(loc, t)).collect();
        let read = Self::send(t_loc, Self::local(loc, recv_temp), getter, read_args.clone());
        let read_temp = self.fresh_local(WellKnownName::OpAsgnTemp);
        stats.push(Self::assign_local(t_loc, read_temp, read));

        let setter_call = |value: Expr| {
            let mut setter_args = read_args.clone();
            setter_args.push(value);
            Self::send(loc, Self::local(loc, recv_temp), setter, setter_args)
        };

        let result = match op {
            Some(op) => {
                let fun = self.gs.enter_name_utf8(&op);
                let combined = Self::send(loc, Self::local(loc, read_temp), fun, vec![rhs]);
                setter_call(combined)
            }
            None => {
                let write = setter_call(rhs);
                let (thenp, elsep) = if or_form {
                    (Self::local(loc, read_temp), write)
                } else {
                    (write, Self::local(loc, read_temp))
                };
                Self::mk(
                    loc,
                    ExprKind::If {
                        cond: Box::new(Self::local(loc, read_temp)),
                        thenp: Box::new(thenp),
                        elsep: Box::new(elsep),
                    },
                )
            }
        };
        Self::ins_seq(loc, stats, result)
    }

    /// Multiple assignment via `<expand-splat>`: see the masgn rules.
    fn desugar_masgn(&mut self, loc: Loc, targets: Vec<Node>, rhs: Expr) -> Expr {
        let splat_index = targets.iter().position(|t| matches!(t, Node::Splat { .. }));
        let n_before = splat_index.unwrap_or(targets.len());
        let n_after = splat_index.map_or(0, |i| targets.len() - i - 1);

        let temp = self.fresh_local(WellKnownName::DestructureArg);
        let expand = Self::send_known(
            loc,
            Self::magic(loc),
            WellKnownName::ExpandSplat,
            vec![
                rhs,
                Self::mk(loc, ExprKind::IntLit(i64::try_from(n_before).unwrap_or(i64::MAX))),
                Self::mk(loc, ExprKind::IntLit(i64::try_from(n_after).unwrap_or(i64::MAX))),
            ],
        );
        let mut stats = vec![Self::assign_local(loc, temp, expand)];

        let index_name = NameRef::from(WellKnownName::SquareBrackets);
        for (i, target) in targets.into_iter().enumerate() {
            let t_loc = target.loc();
            match target {
                Node::Splat { value, .. } => {
                    let Some(inner) = value else { continue };
                    // The splat receiver takes a slice. With no trailing targets
                    // the range runs inclusively to -1; otherwise its exclusive
                    // end sits one past the last `n_after` positions, e.g.
                    // `a, *b, c` slices `Range.new(1, -2, true)`.
                    let (right, exclusive) = if n_after == 0 {
                        (-1i64, false)
                    } else {
                        (-(i64::try_from(n_after + 1).unwrap_or(i64::MAX)), true)
                    };
                    let range_class = self.unresolved_const(t_loc, "Range");
                    let range = Self::send_known(
                        t_loc,
                        range_class,
                        WellKnownName::New,
                        vec![
                            Self::mk(t_loc, ExprKind::IntLit(i64::try_from(n_before).unwrap_or(i64::MAX))),
                            Self::mk(t_loc, ExprKind::IntLit(right)),
                            Self::mk(t_loc, if exclusive { ExprKind::True } else { ExprKind::False }),
                        ],
                    );
                    let slice = Self::send_known(t_loc, Self::local(t_loc, temp), WellKnownName::Slice, vec![range]);
                    stats.push(self.desugar_assign_target(t_loc, *inner, slice));
                }
                Node::Mlhs { targets: nested, .. } => {
                    let index = Self::index_for_position(i, n_before, n_after);
                    let read = Self::send(
                        t_loc,
                        Self::local(t_loc, temp),
                        index_name,
                        vec![Self::mk(t_loc, ExprKind::IntLit(index))],
                    );
                    stats.push(self.desugar_masgn(t_loc, nested, read));
                }
                target => {
                    let index = Self::index_for_position(i, n_before, n_after);
                    let read = Self::send(
                        t_loc,
                        Self::local(t_loc, temp),
                        index_name,
                        vec![Self::mk(t_loc, ExprKind::IntLit(index))],
                    );
                    stats.push(self.desugar_assign_target(t_loc, target, read));
                }
            }
        }
        Self::ins_seq(loc, stats, Self::local(loc, temp))
    }

    /// Positional index for a masgn target: positive before the splat, negative
    /// (from the end) after it.
    fn index_for_position(position: usize, n_before: usize, n_after: usize) -> i64 {
        if position < n_before {
            i64::try_from(position).unwrap_or(i64::MAX)
        } else {
            // position > splat index; count back from the end.
            let from_end = n_before + n_after + 1 - position;
            -(i64::try_from(from_end).unwrap_or(i64::MAX))
        }
    }

    // ===== sends =====

    /// The workhorse send lowering: cast detection, splat routing, block-pass
    /// conversion.
    fn desugar_send(
        &mut self,
        loc: Loc,
        recv: Option<Node>,
        method: &str,
        mut args: Vec<Node>,
        block: Option<BlockNode>,
    ) -> Expr {
        // `T.let(x, Type)` and friends become Cast nodes, not calls.
        if let Some(Node::Const { scope: None, name, .. }) = &recv
            && name == "T"
            && args.len() == 2
        {
            let kind = match method {
                "let" => Some(CastKind::Let),
                "cast" => Some(CastKind::Cast),
                "assert_type!" => Some(CastKind::AssertType),
                _ => None,
            };
            if let Some(kind) = kind {
                let type_node = args.pop().expect("len checked");
                let value_node = args.pop().expect("len checked");
                // `T.let(x, Type)` on a plain local re-binds the local, so the pin
                // attaches to `x` rather than to the statement temporary.
                let rebind = match (&value_node, kind) {
                    (Node::LVar { .. }, CastKind::Let) => Some(value_node.clone()),
                    _ => None,
                };
                let value = self.node2tree(value_node);
                let type_expr = self.node2tree(type_node);
                let cast = Self::mk(
                    loc,
                    ExprKind::Cast {
                        expr: Box::new(value),
                        type_expr: Box::new(type_expr),
                        ty: None,
                        kind,
                    },
                );
                return match rebind {
                    Some(lvar) => self.desugar_assign_target(loc, lvar, cast),
                    None => cast,
                };
            }
        }

        let recv_expr = match recv {
            Some(recv) => self.node2tree(recv),
            None => Self::mk(loc, ExprKind::SelfRef { owner: SymbolRef::NONE }),
        };

        // Pull out a `&block` argument; it becomes a real block.
        let block_pass = match args.last() {
            Some(Node::BlockPass { .. }) => {
                let Some(Node::BlockPass { value, .. }) = args.pop() else {
                    unreachable!("matched above");
                };
                Some(*value)
            }
            _ => None,
        };

        // Trailing keyword arguments collect into one hash argument.
        let first_pair = args
            .iter()
            .position(|a| matches!(a, Node::Pair { .. } | Node::Kwsplat { .. }));
        if let Some(first_pair) = first_pair
            && args[first_pair..]
                .iter()
                .all(|a| matches!(a, Node::Pair { .. } | Node::Kwsplat { .. }))
        {
            let pairs: Vec<Node> = args.split_off(first_pair);
            let pairs_loc = pairs
                .first()
                .map(Node::loc)
                .unwrap_or(loc)
                .join(pairs.last().map(Node::loc).unwrap_or(loc));
            args.push(Node::Hash {
                loc: pairs_loc,
                pairs,
            });
        }

        let has_splat = args.iter().any(|a| matches!(a, Node::Splat { .. }));
        let fun = self.gs.enter_name_utf8(method);

        if has_splat {
            // One canonical form for splat calls, via the Magic receiver.
            let args_array = self.desugar_array(loc, args);
            let mut magic_args = vec![
                recv_expr,
                Self::mk(loc, ExprKind::SymbolLit(fun)),
                args_array,
            ];
            if let Some(block_pass) = block_pass {
                magic_args.push(self.node2tree(block_pass));
            }
            let mut send = Self::send_known(loc, Self::magic(loc), WellKnownName::CallWithSplat, magic_args);
            if let Some(block) = block
                && let ExprKind::Send { block: slot, .. } = &mut send.kind
            {
                *slot = Some(Box::new(block));
            }
            return send;
        }

        let desugared_args = self.desugar_args(args);
        let block = match (block, block_pass) {
            (Some(block), _) => Some(block),
            (None, Some(pass)) => Some(self.block_pass_to_block(loc, pass)),
            (None, None) => None,
        };
        Self::mk(
            loc,
            ExprKind::Send {
                recv: Box::new(recv_expr),
                fun,
                args: desugared_args,
                block: block.map(Box::new),
            },
        )
    }

    /// `&:sym` and `&callable` become literal blocks.
    fn block_pass_to_block(&mut self, loc: Loc, pass: Node) -> BlockNode {
        match pass {
            Node::Sym { loc: sym_loc, name } => {
                // `&:sym` is `{ |t| t.sym }`.
                let temp = self.fresh_local(WellKnownName::BlockPassTemp);
                let fun = self.gs.enter_name_utf8(&name);
                let body = Self::send(sym_loc, Self::local(sym_loc, temp), fun, Vec::new());
                BlockNode {
                    loc,
                    args: vec![Self::local(loc, temp)],
                    body: Box::new(body),
                }
            }
            other => {
                // `&expr` is `{ |*args| Magic.callWithSplat(expr.to_proc, :call, args) }`.
                let other_loc = other.loc();
                let temp = self.fresh_local(WellKnownName::BlockPassTemp);
                let callable = self.node2tree(other);
                let to_proc = Self::send_known(other_loc, callable, WellKnownName::ToProc, Vec::new());
                let call_sym = Self::mk(other_loc, ExprKind::SymbolLit(WellKnownName::Call.into()));
                let body = Self::send_known(
                    other_loc,
                    Self::magic(other_loc),
                    WellKnownName::CallWithSplat,
                    vec![to_proc, call_sym, Self::local(other_loc, temp)],
                );
                let rest = Self::mk(
                    loc,
                    ExprKind::RestArg {
                        inner: Box::new(Self::local(loc, temp)),
                    },
                );
                BlockNode {
                    loc,
                    args: vec![rest],
                    body: Box::new(body),
                }
            }
        }
    }

    /// `a&.m(args)`: evaluate once, branch on `nil?`.
    ///
    /// Known deviation, preserved deliberately: because the test is a `nil?` send,
    /// user overrides of `nil?` change safe-navigation behavior.
    fn desugar_csend(&mut self, loc: Loc, recv: Node, method: &str, args: Vec<Node>) -> Expr {
        let temp = self.fresh_local(WellKnownName::CsendTemp);
        let recv_expr = self.node2tree(recv);
        let bind = Self::assign_local(recv_expr.loc, temp, recv_expr);
        let nil_check = Self::send_known(loc, Self::local(loc, temp), WellKnownName::NilP, Vec::new());
        let fun = self.gs.enter_name_utf8(method);
        let call_args = self.desugar_args(args);
        let call = Self::send(loc, Self::local(loc, temp), fun, call_args);
        let if_expr = Self::mk(
            loc,
            ExprKind::If {
                cond: Box::new(nil_check),
                thenp: Box::new(Self::mk(loc, ExprKind::Nil)),
                elsep: Box::new(call),
            },
        );
        Self::ins_seq(loc, vec![bind], if_expr)
    }

    /// A block literal attached to a call.
    ///
    /// Destructuring arguments (`|(a, b)|`) are replaced by fresh temps whose
    /// multiple assignment is prefixed onto the block body.
    fn desugar_block_node(&mut self, loc: Loc, call: Node, args: Vec<Node>, body: Option<Node>) -> Expr {
        let mut prefix: Vec<Expr> = Vec::new();
        let mut block_args: Vec<Expr> = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Node::Mlhs { loc: m_loc, targets } => {
                    let temp = self.fresh_local(WellKnownName::DestructureArg);
                    prefix.push(self.desugar_masgn(m_loc, targets, Self::local(m_loc, temp)));
                    block_args.push(Self::local(m_loc, temp));
                }
                other => block_args.push(self.desugar_formal_arg(other)),
            }
        }
        let body = self.desugar_opt(body.map(Box::new));
        let body = Self::ins_seq(loc, prefix, body);
        let block = BlockNode {
            loc,
            args: block_args,
            body: Box::new(body),
        };
        match call {
            Node::Send {
                loc: s_loc,
                recv,
                method,
                args,
            } => self.desugar_send(s_loc, recv.map(|r| *r), &method, args, Some(block)),
            Node::CSend {
                loc: s_loc,
                recv,
                method,
                args,
            } => {
                // Safe navigation with a block: lower the csend, then attach the
                // block to the inner call.
                let mut lowered = self.desugar_csend(s_loc, *recv, &method, args);
                attach_block_to_else_branch(&mut lowered, block);
                lowered
            }
            Node::Super { loc: s_loc, args } => {
                let self_ref = Self::mk(s_loc, ExprKind::SelfRef { owner: SymbolRef::NONE });
                let args = self.desugar_args(args);
                let mut send = Self::send_known(s_loc, self_ref, WellKnownName::Super, args);
                if let ExprKind::Send { block: slot, .. } = &mut send.kind {
                    *slot = Some(Box::new(block));
                }
                send
            }
            Node::ZSuper(s_loc) => {
                let self_ref = Self::mk(s_loc, ExprKind::SelfRef { owner: SymbolRef::NONE });
                let zsuper = Self::mk(s_loc, ExprKind::ZSuperArgs);
                let mut send = Self::send_known(s_loc, self_ref, WellKnownName::Super, vec![zsuper]);
                if let ExprKind::Send { block: slot, .. } = &mut send.kind {
                    *slot = Some(Box::new(block));
                }
                send
            }
            other => {
                let what = "block on non-call";
                let _ = other;
                self.unsupported(loc, what)
            }
        }
    }

    /// Formal argument nodes (def and block signatures) to AST argument wrappers.
    fn desugar_formal_args(&mut self, args: Vec<Node>) -> Vec<Expr> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            out.push(self.desugar_formal_arg(arg));
        }
        out
    }

    fn local_ident(&mut self, loc: Loc, name: &str) -> Expr {
        let name = self.gs.enter_name_utf8(name);
        Self::mk(
            loc,
            ExprKind::UnresolvedIdent {
                kind: IdentKind::Local,
                name,
            },
        )
    }

    fn desugar_formal_arg(&mut self, arg: Node) -> Expr {
        match arg {
            Node::Arg { loc, name } => self.local_ident(loc, &name),
            Node::OptArg { loc, name, default } => {
                let inner = self.local_ident(loc, &name);
                let default = self.node2tree(*default);
                Self::mk(
                    loc,
                    ExprKind::OptionalArg {
                        inner: Box::new(inner),
                        default: Box::new(default),
                    },
                )
            }
            Node::RestArg { loc, name } => {
                let inner = match name {
                    Some(name) => self.local_ident(loc, &name),
                    None => {
                        let temp = self.fresh_local(WellKnownName::DestructureArg);
                        Self::local(loc, temp)
                    }
                };
                Self::mk(loc, ExprKind::RestArg { inner: Box::new(inner) })
            }
            Node::KwArg { loc, name } => {
                let inner = self.local_ident(loc, &name);
                Self::mk(loc, ExprKind::KeywordArg { inner: Box::new(inner) })
            }
            Node::KwOptArg { loc, name, default } => {
                let inner = self.local_ident(loc, &name);
                let default = self.node2tree(*default);
                let keyword = Self::mk(loc, ExprKind::KeywordArg { inner: Box::new(inner) });
                Self::mk(
                    loc,
                    ExprKind::OptionalArg {
                        inner: Box::new(keyword),
                        default: Box::new(default),
                    },
                )
            }
            Node::KwRestArg { loc, name } => {
                let inner = match name {
                    Some(name) => self.local_ident(loc, &name),
                    None => {
                        let temp = self.fresh_local(WellKnownName::DestructureArg);
                        Self::local(loc, temp)
                    }
                };
                let keyword = Self::mk(loc, ExprKind::KeywordArg { inner: Box::new(inner) });
                Self::mk(loc, ExprKind::RestArg { inner: Box::new(keyword) })
            }
            Node::BlockArg { loc, name } => {
                let inner = self.local_ident(loc, &name);
                Self::mk(loc, ExprKind::BlockArgNode { inner: Box::new(inner) })
            }
            Node::ShadowArg { loc, name } => {
                let inner = self.local_ident(loc, &name);
                Self::mk(loc, ExprKind::ShadowArg { inner: Box::new(inner) })
            }
            other => {
                let loc = other.loc();
                self.unsupported(loc, "argument")
            }
        }
    }

    // ===== loops =====

    /// `body while cond` (post-condition): run once, test at the bottom.
    fn desugar_post_loop(&mut self, loc: Loc, cond: Node, body: Node, until: bool) -> Expr {
        let temp = self.fresh_local(WellKnownName::WhileTemp);
        let body_expr = self.node2tree(body);
        let bind = Self::assign_local(loc, temp, body_expr);
        let cond_expr = self.node2tree(cond);
        // while-post breaks when the condition goes false; until-post when true.
        let break_cond = if until {
            cond_expr
        } else {
            Self::send_known(loc, cond_expr, WellKnownName::Bang, Vec::new())
        };
        let brk = Self::mk(
            loc,
            ExprKind::Break {
                expr: Box::new(Self::local(loc, temp)),
            },
        );
        let check = Self::mk(
            loc,
            ExprKind::If {
                cond: Box::new(break_cond),
                thenp: Box::new(brk),
                elsep: Box::new(Expr::empty()),
            },
        );
        let loop_body = Self::ins_seq(loc, vec![bind], check);
        Self::mk(
            loc,
            ExprKind::While {
                cond: Box::new(Self::mk(loc, ExprKind::True)),
                body: Box::new(loop_body),
            },
        )
    }

    /// `for x in e; body; end` is `e.each { |t| x = t; body }`.
    fn desugar_for(&mut self, loc: Loc, var: Node, iter: Node, body: Option<Node>) -> Expr {
        let temp = self.fresh_local(WellKnownName::ForTemp);
        let assign = match var {
            Node::Mlhs { loc: m_loc, targets } => self.desugar_masgn(m_loc, targets, Self::local(m_loc, temp)),
            single => {
                let t_loc = single.loc();
                self.desugar_assign_target(t_loc, single, Self::local(t_loc, temp))
            }
        };
        let body_expr = self.desugar_opt(body.map(Box::new));
        let block_body = Self::ins_seq(loc, vec![assign], body_expr);
        let iter_expr = self.node2tree(iter);
        let block = BlockNode {
            loc,
            args: vec![Self::local(loc, temp)],
            body: Box::new(block_body),
        };
        let mut send = Self::send_known(loc, iter_expr, WellKnownName::Each, Vec::new());
        if let ExprKind::Send { block: slot, .. } = &mut send.kind {
            *slot = Some(Box::new(block));
        }
        send
    }

    // ===== case =====

    /// `case` lowers to nested ifs, testing `pattern === scrutinee` per clause.
    fn desugar_case(
        &mut self,
        loc: Loc,
        scrutinee: Option<Node>,
        whens: Vec<WhenClause>,
        else_branch: Option<Node>,
    ) -> Expr {
        let (scrutinee_stat, scrutinee_temp) = match scrutinee {
            Some(node) => {
                let temp = self.fresh_local(WellKnownName::CaseTemp);
                let expr = self.node2tree(node);
                (Some(Self::assign_local(expr.loc, temp, expr)), Some(temp))
            }
            None => (None, None),
        };

        let mut result = self.desugar_opt(else_branch.map(Box::new));
        for when in whens.into_iter().rev() {
            let WhenClause { loc: w_loc, patterns, body } = when;
            let mut cond: Option<Expr> = None;
            for pattern in patterns {
                let p_loc = pattern.loc();
                let test = match scrutinee_temp {
                    Some(temp) => {
                        let pat = self.node2tree(pattern);
                        Self::send_known(p_loc, pat, WellKnownName::TripleEq, vec![Self::local(p_loc, temp)])
                    }
                    None => self.node2tree(pattern),
                };
                cond = Some(match cond {
                    None => test,
                    Some(prev) => {
                        // Multiple patterns cascade through `or` on fresh temps.
                        let temp = self.fresh_local(WellKnownName::OrOr);
                        let bind = Self::assign_local(prev.loc, temp, prev);
                        let if_expr = Self::mk(
                            w_loc,
                            ExprKind::If {
                                cond: Box::new(Self::local(w_loc, temp)),
                                thenp: Box::new(Self::local(w_loc, temp)),
                                elsep: Box::new(test),
                            },
                        );
                        Self::ins_seq(w_loc, vec![bind], if_expr)
                    }
                });
            }
            let cond = cond.unwrap_or_else(Expr::empty);
            let body = self.desugar_opt(body);
            result = Self::mk(
                w_loc,
                ExprKind::If {
                    cond: Box::new(cond),
                    thenp: Box::new(body),
                    elsep: Box::new(result),
                },
            );
        }
        match scrutinee_stat {
            Some(stat) => Self::ins_seq(loc, vec![stat], result),
            None => result,
        }
    }

    // ===== exceptions =====

    fn desugar_rescue(
        &mut self,
        loc: Loc,
        body: Option<Node>,
        cases: Vec<ResBody>,
        else_branch: Option<Node>,
    ) -> Expr {
        let body = self.desugar_opt(body.map(Box::new));
        let mut rescue_cases = Vec::with_capacity(cases.len());
        for case in cases {
            let ResBody {
                loc: c_loc,
                exceptions,
                var,
                body,
            } = case;
            let exceptions = self.desugar_args(exceptions);
            let var = match var {
                Some(var) => self.read_of_target(&var),
                None => Expr::empty(),
            };
            let case_body = self.desugar_opt(body);
            rescue_cases.push(RescueCase {
                loc: c_loc,
                exceptions,
                var: Box::new(var),
                body: Box::new(case_body),
            });
        }
        let else_body = self.desugar_opt(else_branch.map(Box::new));
        Self::mk(
            loc,
            ExprKind::Rescue {
                body: Box::new(body),
                cases: rescue_cases,
                else_body: Box::new(else_body),
                ensure_body: Box::new(Expr::empty()),
            },
        )
    }

    /// `ensure` merges into a `Rescue` body when one is present, otherwise wraps
    /// the body in a case-less `Rescue`.
    fn desugar_ensure(&mut self, loc: Loc, body: Option<Node>, ensure_body: Option<Node>) -> Expr {
        let ensure_expr = self.desugar_opt(ensure_body.map(Box::new));
        let body_expr = self.desugar_opt(body.map(Box::new));
        match body_expr.kind {
            ExprKind::Rescue {
                body,
                cases,
                else_body,
                ensure_body: existing,
            } if existing.is_empty_tree() => Self::mk(
                loc,
                ExprKind::Rescue {
                    body,
                    cases,
                    else_body,
                    ensure_body: Box::new(ensure_expr),
                },
            ),
            _ => Self::mk(
                loc,
                ExprKind::Rescue {
                    body: Box::new(body_expr),
                    cases: Vec::new(),
                    else_body: Box::new(Expr::empty()),
                    ensure_body: Box::new(ensure_expr),
                },
            ),
        }
    }

    // ===== definitions =====

    fn desugar_def(
        &mut self,
        loc: Loc,
        decl_loc: Loc,
        name: &str,
        args: Vec<Node>,
        body: Option<Node>,
        flags: DefFlags,
    ) -> Expr {
        let fun = self.gs.enter_name_utf8(name);
        let args = self.desugar_formal_args(args);
        let body = self.desugar_opt(body.map(Box::new));
        Self::mk(
            loc,
            ExprKind::MethodDef {
                decl_loc,
                symbol: SymbolRef::NONE,
                name: fun,
                args,
                body: Box::new(body),
                flags,
            },
        )
    }

    // ===== collections =====

    /// Array literal; splats fold into `concat(x.to_a)` chains.
    fn desugar_array(&mut self, loc: Loc, elems: Vec<Node>) -> Expr {
        if !elems.iter().any(|e| matches!(e, Node::Splat { .. })) {
            let elems = self.desugar_args(elems);
            return Self::mk(loc, ExprKind::ArrayLit { elems });
        }
        let mut acc: Option<Expr> = None;
        let mut run: Vec<Expr> = Vec::new();
        let flush = |this: &mut Self, acc: Option<Expr>, run: &mut Vec<Expr>| -> Option<Expr> {
            let _ = this;
            if run.is_empty() {
                return acc;
            }
            let chunk = Self::mk(
                loc,
                ExprKind::ArrayLit {
                    elems: std::mem::take(run),
                },
            );
            Some(match acc {
                None => chunk,
                Some(acc) => Self::send_known(loc, acc, WellKnownName::Concat, vec![chunk]),
            })
        };
        for elem in elems {
            match elem {
                Node::Splat { loc: s_loc, value } => {
                    acc = flush(self, acc, &mut run);
                    let inner = match value {
                        Some(inner) => self.node2tree(*inner),
                        None => Expr::empty(),
                    };
                    let as_array = Self::send_known(s_loc, inner, WellKnownName::ToA, Vec::new());
                    acc = Some(match acc {
                        None => {
                            let empty = Self::mk(loc, ExprKind::ArrayLit { elems: Vec::new() });
                            Self::send_known(loc, empty, WellKnownName::Concat, vec![as_array])
                        }
                        Some(acc) => Self::send_known(loc, acc, WellKnownName::Concat, vec![as_array]),
                    });
                }
                other => run.push(self.node2tree(other)),
            }
        }
        flush(self, acc, &mut run).unwrap_or_else(|| Self::mk(loc, ExprKind::ArrayLit { elems: Vec::new() }))
    }

    /// Hash literal; `**splat` entries fold into `merge(x.to_h)` chains.
    fn desugar_hash(&mut self, loc: Loc, pairs: Vec<Node>) -> Expr {
        if !pairs.iter().any(|p| matches!(p, Node::Kwsplat { .. })) {
            let (keys, values) = self.desugar_pairs(pairs);
            return Self::mk(loc, ExprKind::HashLit { keys, values });
        }
        let mut acc: Option<Expr> = None;
        let mut run: Vec<Node> = Vec::new();
        for pair in pairs {
            match pair {
                Node::Kwsplat { loc: s_loc, value } => {
                    if !run.is_empty() {
                        let (keys, values) = self.desugar_pairs(std::mem::take(&mut run));
                        let chunk = Self::mk(loc, ExprKind::HashLit { keys, values });
                        acc = Some(match acc {
                            None => chunk,
                            Some(acc) => Self::send_known(loc, acc, WellKnownName::Merge, vec![chunk]),
                        });
                    }
                    let inner = self.node2tree(*value);
                    let as_hash = Self::send_known(s_loc, inner, WellKnownName::ToH, Vec::new());
                    acc = Some(match acc {
                        None => {
                            let empty = Self::mk(
                                loc,
                                ExprKind::HashLit {
                                    keys: Vec::new(),
                                    values: Vec::new(),
                                },
                            );
                            Self::send_known(loc, empty, WellKnownName::Merge, vec![as_hash])
                        }
                        Some(acc) => Self::send_known(loc, acc, WellKnownName::Merge, vec![as_hash]),
                    });
                }
                other => run.push(other),
            }
        }
        if !run.is_empty() {
            let (keys, values) = self.desugar_pairs(run);
            let chunk = Self::mk(loc, ExprKind::HashLit { keys, values });
            acc = Some(match acc {
                None => chunk,
                Some(acc) => Self::send_known(loc, acc, WellKnownName::Merge, vec![chunk]),
            });
        }
        acc.unwrap_or_else(|| {
            Self::mk(
                loc,
                ExprKind::HashLit {
                    keys: Vec::new(),
                    values: Vec::new(),
                },
            )
        })
    }

    fn desugar_pairs(&mut self, pairs: Vec<Node>) -> (Vec<Expr>, Vec<Expr>) {
        let mut keys = Vec::with_capacity(pairs.len());
        let mut values = Vec::with_capacity(pairs.len());
        for pair in pairs {
            match pair {
                Node::Pair { key, value, .. } => {
                    keys.push(self.node2tree(*key));
                    values.push(self.node2tree(*value));
                }
                other => {
                    let loc = other.loc();
                    self.unsupported(loc, "hash entry");
                }
            }
        }
        (keys, values)
    }

    fn desugar_range(&mut self, loc: Loc, from: Option<Box<Node>>, to: Option<Box<Node>>, exclusive: bool) -> Expr {
        let from = self.desugar_opt(from);
        let from = if from.is_empty_tree() {
            Self::mk(loc, ExprKind::Nil)
        } else {
            from
        };
        let to = self.desugar_opt(to);
        let to = if to.is_empty_tree() { Self::mk(loc, ExprKind::Nil) } else { to };
        let range_class = self.unresolved_const(loc, "Range");
        Self::send_known(
            loc,
            range_class,
            WellKnownName::New,
            vec![
                from,
                to,
                Self::mk(loc, if exclusive { ExprKind::True } else { ExprKind::False }),
            ],
        )
    }

    // ===== strings =====

    /// Interpolated strings fold by `concat`, coercing pieces through `to_s`.
    ///
    /// Preserved quirk: whether later pieces are wrapped in `to_s` is decided by
    /// inspecting the *first* piece, not the current one.
    fn desugar_dstr(&mut self, loc: Loc, parts: Vec<Node>) -> Expr {
        let mut iter = parts.into_iter();
        let Some(first) = iter.next() else {
            return self.string_lit(loc, "");
        };
        let first = self.node2tree(first);
        let first_is_string = matches!(first.kind, ExprKind::StringLit(_));
        let mut result = if first_is_string {
            first
        } else {
            Self::send_known(loc, first, WellKnownName::ToS, Vec::new())
        };
        for part in iter {
            let part_loc = part.loc();
            let mut piece = self.node2tree(part);
            if !first_is_string {
                piece = Self::send_known(part_loc, piece, WellKnownName::ToS, Vec::new());
            }
            result = Self::send_known(loc, result, WellKnownName::Concat, vec![piece]);
        }
        result
    }

    /// `/pat/flags` becomes `Regexp.new(pattern, flags)`.
    fn desugar_regexp(&mut self, loc: Loc, parts: Vec<Node>, options: &str) -> Expr {
        let pattern = self.desugar_dstr(loc, parts);
        let mut flags = 0i64;
        for c in options.chars() {
            flags |= match c {
                'i' => 1,
                'x' => 2,
                'm' => 4,
                // Encoding flags carry no meaning for the checker.
                'n' | 'e' | 's' | 'u' => 0,
                _ => 0,
            };
        }
        let regexp_class = self.unresolved_const(loc, "Regexp");
        Self::send_known(
            loc,
            regexp_class,
            WellKnownName::New,
            vec![pattern, Self::mk(loc, ExprKind::IntLit(flags))],
        )
    }
}

/// Attaches a block to the call in the else branch of a lowered csend.
fn attach_block_to_else_branch(lowered: &mut Expr, block: BlockNode) {
    let target = match &mut lowered.kind {
        ExprKind::InsSeq { expr, .. } => expr,
        _ => return,
    };
    if let ExprKind::If { elsep, .. } = &mut target.kind
        && let ExprKind::Send { block: slot, .. } = &mut elsep.kind
    {
        *slot = Some(Box::new(block));
    }
}
