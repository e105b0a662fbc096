//! Resolution: linking constants and type annotations to symbols.
//!
//! The resolver runs after naming, over all files together, and iterates to a
//! fixpoint because constants can reference classes defined later (in the same
//! file or another one). Each pass walks every tree, replacing resolvable
//! `UnresolvedConstant`s with `ConstantLit`s and installing superclass/mixin
//! relations; passes repeat while progress is made. Constants that never resolve
//! are assigned a synthesized stub symbol with a recorded error, so later phases
//! see a well-formed tree either way.
//!
//! The resolver is the one phase that mutates GlobalState after naming; the
//! pipeline runs it inside `with_unfrozen`.

use crate::{
    ast::{ClassKind, Expr, ExprKind, IdentKind},
    errors::{Error, classes},
    global_state::GlobalState,
    intern::{NameRef, WellKnownName},
    loc::Loc,
    symbols::{SymbolFlags, SymbolRef},
    types::Type,
};

/// Resolves every file's tree to a fixpoint, then stubs what remains.
pub fn run(gs: &mut GlobalState, trees: &mut [Expr]) {
    loop {
        let mut resolver = Resolver {
            gs,
            owner_stack: vec![SymbolRef::ROOT],
            progress: false,
            finalize: false,
        };
        for tree in trees.iter_mut() {
            resolver.walk(tree);
        }
        if !resolver.progress {
            break;
        }
    }
    // Final pass: anything still unresolved becomes a stub symbol with an error.
    let mut resolver = Resolver {
        gs,
        owner_stack: vec![SymbolRef::ROOT],
        progress: false,
        finalize: true,
    };
    for tree in trees.iter_mut() {
        resolver.walk(tree);
    }
}

struct Resolver<'gs> {
    gs: &'gs mut GlobalState,
    owner_stack: Vec<SymbolRef>,
    progress: bool,
    finalize: bool,
}

impl Resolver<'_> {
    fn owner(&self) -> SymbolRef {
        *self.owner_stack.last().expect("owner stack never empty")
    }

    /// The innermost class-ish owner, where instance variables live.
    fn field_owner(&self) -> SymbolRef {
        self.owner()
    }

    // ===== constant lookup =====

    /// Looks `name` up along the lexical owner chain.
    fn resolve_lexical(&self, name: NameRef) -> Option<SymbolRef> {
        for &owner in self.owner_stack.iter().rev() {
            if let Some(found) = self.gs.member(owner, name) {
                return Some(found);
            }
        }
        None
    }

    /// Attempts to resolve one constant expression in place. Returns the symbol
    /// when the node is (now) resolved.
    fn resolve_constant(&mut self, expr: &mut Expr) -> Option<SymbolRef> {
        match &mut expr.kind {
            ExprKind::ConstantLit { symbol } => Some(*symbol),
            ExprKind::UnresolvedConstant { scope, name } => {
                let name = *name;
                let resolved = if scope.is_empty_tree() {
                    self.resolve_lexical(name)
                } else {
                    let scope_sym = self.resolve_constant(scope)?;
                    self.gs.member(scope_sym, name)
                };
                match resolved {
                    Some(symbol) => {
                        expr.kind = ExprKind::ConstantLit { symbol };
                        self.progress = true;
                        Some(symbol)
                    }
                    None if self.finalize => {
                        let symbol = self.stub_constant(expr.loc, name);
                        expr.kind = ExprKind::ConstantLit { symbol };
                        Some(symbol)
                    }
                    None => None,
                }
            }
            _ => None,
        }
    }

    /// Enters a stub class under the `<todo sym>` owner and records the error.
    fn stub_constant(&mut self, loc: Loc, name: NameRef) -> SymbolRef {
        let shown = self.gs.show_name(name);
        self.gs.report(Error::new(
            classes::resolver::STUB_CONSTANT,
            loc,
            format!("Unable to resolve constant `{shown}`"),
        ));
        // Stubs dedupe by name under the `<todo sym>` owner, so repeated uses of
        // one missing constant share a symbol.
        match self.gs.member(SymbolRef::STUB, name) {
            Some(found) => found,
            None => self.gs.enter_class_symbol(SymbolRef::STUB, name, SymbolFlags::CLASS, loc),
        }
    }

    // ===== the walk =====

    fn walk(&mut self, expr: &mut Expr) {
        match &mut expr.kind {
            ExprKind::ClassDef { .. } => self.walk_class_def(expr),
            ExprKind::UnresolvedConstant { .. } => {
                self.resolve_constant(expr);
            }
            ExprKind::UnresolvedIdent { kind, name } => {
                let (owner, flags) = match kind {
                    IdentKind::Instance => (self.field_owner(), SymbolFlags::FIELD),
                    IdentKind::Class => (self.field_owner(), SymbolFlags::STATIC_FIELD),
                    // Locals were consumed by the namer; globals already rewritten.
                    IdentKind::Local | IdentKind::Global => return,
                };
                let symbol = self.gs.enter_field_symbol(owner, *name, flags, expr.loc);
                expr.kind = ExprKind::FieldRef { symbol };
            }
            ExprKind::MethodDef { args, body, .. } => {
                for arg in args.iter_mut() {
                    self.walk(arg);
                }
                self.walk(body);
            }
            ExprKind::Send { recv, args, block, .. } => {
                self.walk(recv);
                for arg in args.iter_mut() {
                    self.walk(arg);
                }
                if let Some(block) = block {
                    for arg in &mut block.args {
                        self.walk(arg);
                    }
                    self.walk(&mut block.body);
                }
            }
            ExprKind::InsSeq { stats, expr: last } => {
                for stat in stats.iter_mut() {
                    self.walk(stat);
                }
                self.walk(last);
            }
            ExprKind::Assign { lhs, rhs } => {
                self.walk(lhs);
                self.walk(rhs);
            }
            ExprKind::If { cond, thenp, elsep } => {
                self.walk(cond);
                self.walk(thenp);
                self.walk(elsep);
            }
            ExprKind::While { cond, body } => {
                self.walk(cond);
                self.walk(body);
            }
            ExprKind::Return { expr: e } | ExprKind::Break { expr: e } | ExprKind::Next { expr: e } => self.walk(e),
            ExprKind::Yield { args } => {
                for arg in args.iter_mut() {
                    self.walk(arg);
                }
            }
            ExprKind::Rescue {
                body,
                cases,
                else_body,
                ensure_body,
            } => {
                self.walk(body);
                for case in cases.iter_mut() {
                    for exc in case.exceptions.iter_mut() {
                        self.walk(exc);
                    }
                    self.walk(&mut case.var);
                    self.walk(&mut case.body);
                }
                self.walk(else_body);
                self.walk(ensure_body);
            }
            ExprKind::ArrayLit { elems } => {
                for elem in elems.iter_mut() {
                    self.walk(elem);
                }
            }
            ExprKind::HashLit { keys, values } => {
                for key in keys.iter_mut() {
                    self.walk(key);
                }
                for value in values.iter_mut() {
                    self.walk(value);
                }
            }
            ExprKind::Cast {
                expr: inner,
                type_expr,
                ty,
                ..
            } => {
                self.walk(inner);
                self.walk(type_expr);
                if ty.is_none() {
                    let resolved = self.resolve_type_expr(type_expr);
                    if let Some(resolved) = resolved {
                        *ty = Some(resolved);
                    } else if self.finalize {
                        self.gs.report(Error::new(
                            classes::infer::INCOMPLETE_TYPE,
                            type_expr.loc,
                            "Unsupported type annotation syntax",
                        ));
                        *ty = Some(Type::Untyped);
                    }
                }
            }
            ExprKind::RestArg { inner }
            | ExprKind::KeywordArg { inner }
            | ExprKind::BlockArgNode { inner }
            | ExprKind::ShadowArg { inner } => self.walk(inner),
            ExprKind::OptionalArg { inner, default } => {
                self.walk(inner);
                self.walk(default);
            }
            ExprKind::EmptyTree
            | ExprKind::Nil
            | ExprKind::True
            | ExprKind::False
            | ExprKind::IntLit(_)
            | ExprKind::FloatLit(_)
            | ExprKind::StringLit(_)
            | ExprKind::SymbolLit(_)
            | ExprKind::SelfRef { .. }
            | ExprKind::Local { .. }
            | ExprKind::ConstantLit { .. }
            | ExprKind::FieldRef { .. }
            | ExprKind::ZSuperArgs
            | ExprKind::Retry => {}
        }
    }

    fn walk_class_def(&mut self, expr: &mut Expr) {
        let ExprKind::ClassDef {
            symbol,
            ancestors,
            rhs,
            kind,
            ..
        } = &mut expr.kind
        else {
            unreachable!("caller matched ClassDef");
        };
        let class_sym = *symbol;
        let kind = *kind;

        // Resolve and install ancestors. Slot 0 of a class is the superclass
        // position; everything else is a mixin hoisted from `include`.
        for (index, ancestor) in ancestors.iter_mut().enumerate() {
            let is_superclass_slot = kind == ClassKind::Class && index == 0;
            if ancestor.is_empty_tree() {
                // No declared superclass: default to Object, once.
                if is_superclass_slot
                    && class_sym.exists()
                    && class_sym != SymbolRef::ROOT
                    && self.gs.symbol(class_sym).superclass.is_none()
                {
                    self.gs.symbol_mut(class_sym).superclass = Some(SymbolRef::OBJECT);
                }
                continue;
            }
            let Some(resolved) = self.resolve_constant(ancestor) else {
                continue;
            };
            if !class_sym.exists() {
                continue;
            }
            if is_superclass_slot {
                if self.gs.symbol(class_sym).superclass.is_none() {
                    self.gs.symbol_mut(class_sym).superclass = Some(resolved);
                }
            } else if !self.gs.symbol(class_sym).mixins.contains(&resolved) {
                self.gs.symbol_mut(class_sym).mixins.push(resolved);
            }
        }

        self.owner_stack.push(class_sym);
        for stmt in rhs.iter_mut() {
            self.define_attributes(stmt);
            self.walk(stmt);
        }
        self.owner_stack.pop();
    }

    /// `attr_reader :a` and friends enter accessor method symbols on the class.
    /// A fully recognized declaration is consumed; it has no runtime effect left
    /// for the checker to model.
    fn define_attributes(&mut self, stmt: &mut Expr) {
        let consumed = {
            let ExprKind::Send { recv, fun, args, .. } = &stmt.kind else {
                return;
            };
            if !matches!(recv.kind, ExprKind::SelfRef { .. }) {
                return;
            }
            let reader = *fun == NameRef::from(WellKnownName::AttrReader);
            let writer = *fun == NameRef::from(WellKnownName::AttrWriter);
            let accessor = *fun == NameRef::from(WellKnownName::AttrAccessor);
            if !reader && !writer && !accessor {
                return;
            }
            let owner = self.owner();
            let mut all_symbols = !args.is_empty();
            for arg in args {
                let ExprKind::SymbolLit(attr_name) = arg.kind else {
                    all_symbols = false;
                    continue;
                };
                if reader || accessor {
                    let existed = self.gs.member(owner, attr_name).is_some();
                    if !existed {
                        self.gs.enter_method_symbol(owner, attr_name, arg.loc);
                    }
                }
                if writer || accessor {
                    let setter_text = format!("{}=", self.gs.show_name(attr_name));
                    let setter = self.gs.enter_name_utf8(&setter_text);
                    let existed = self.gs.member(owner, setter).is_some();
                    if !existed {
                        let (method, _) = self.gs.enter_method_symbol(owner, setter, arg.loc);
                        let value_name = self.gs.enter_name_utf8("value");
                        self.gs
                            .enter_method_argument(method, value_name, SymbolFlags::default(), false, arg.loc);
                    }
                }
            }
            all_symbols
        };
        if consumed {
            *stmt = Expr::empty();
        }
    }

    // ===== type annotations =====

    /// Resolves a type-annotation expression into a `Type`. `None` means "not yet"
    /// (an unresolved constant that may resolve in a later pass).
    fn resolve_type_expr(&mut self, expr: &mut Expr) -> Option<Type> {
        match &mut expr.kind {
            ExprKind::ConstantLit { symbol } => {
                let sym = *symbol;
                if self.gs.symbol(sym).flags.is_class_or_module() {
                    Some(Type::Class(sym))
                } else {
                    Some(Type::Untyped)
                }
            }
            ExprKind::UnresolvedConstant { .. } => {
                let symbol = self.resolve_constant(expr)?;
                if self.gs.symbol(symbol).flags.is_class_or_module() {
                    Some(Type::Class(symbol))
                } else {
                    Some(Type::Untyped)
                }
            }
            ExprKind::Nil => Some(Type::nil()),
            ExprKind::Send { recv, fun, args, .. } => {
                // The `T.` combinators: nilable, any, all, untyped, noreturn.
                let is_t = match &recv.kind {
                    ExprKind::ConstantLit { symbol } => *symbol == SymbolRef::T_MODULE,
                    ExprKind::UnresolvedConstant { .. } => {
                        matches!(self.resolve_constant(recv), Some(sym) if sym == SymbolRef::T_MODULE)
                    }
                    _ => false,
                };
                if !is_t {
                    return if self.finalize { Some(Type::Untyped) } else { None };
                }
                let fun = *fun;
                if fun == NameRef::from(WellKnownName::Let) {
                    return if self.finalize { Some(Type::Untyped) } else { None };
                }
                let fun_text = self.gs.show_name(fun);
                match fun_text.as_str() {
                    "nilable" => {
                        let inner = args.first_mut().and_then(|a| self.resolve_type_expr(a))?;
                        Some(Type::Or(Box::new(Type::nil()), Box::new(inner)))
                    }
                    "any" => {
                        let mut parts = Vec::with_capacity(args.len());
                        for arg in args.iter_mut() {
                            parts.push(self.resolve_type_expr(arg)?);
                        }
                        parts
                            .into_iter()
                            .reduce(|a, b| Type::Or(Box::new(a), Box::new(b)))
                            .or(Some(Type::Untyped))
                    }
                    "all" => {
                        let mut parts = Vec::with_capacity(args.len());
                        for arg in args.iter_mut() {
                            parts.push(self.resolve_type_expr(arg)?);
                        }
                        parts
                            .into_iter()
                            .reduce(|a, b| Type::And(Box::new(a), Box::new(b)))
                            .or(Some(Type::Untyped))
                    }
                    "untyped" => Some(Type::Untyped),
                    "noreturn" => Some(Type::Bottom),
                    "anything" => Some(Type::Top),
                    _ => {
                        if self.finalize {
                            Some(Type::Untyped)
                        } else {
                            None
                        }
                    }
                }
            }
            _ => {
                if self.finalize {
                    Some(Type::Untyped)
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{desugar, errors::ErrorQueue, namer, parser};

    fn resolve_source(source: &str) -> (GlobalState, ErrorQueue, Expr) {
        let mut queue = ErrorQueue::new();
        let mut gs = GlobalState::new(&queue);
        let file = gs.enter_file("test.rb", source);
        let parsed = parser::parse_file(source, file);
        let mut tree = desugar::desugar_file(&mut gs, file, parsed.node);
        namer::run(&mut gs, &mut tree);
        let mut trees = [tree];
        run(&mut gs, &mut trees);
        let [tree] = trees;
        (gs, queue, tree)
    }

    #[test]
    fn forward_references_resolve_to_fixpoint() {
        let (gs, mut queue, tree) = resolve_source("class A < B\nend\nclass B\nend\n");
        let shown = tree.show_raw(&gs);
        assert!(!shown.contains("UnresolvedConstant"), "tree was:\n{shown}");
        assert!(queue.flush_all().is_empty(), "expected no errors");
    }

    #[test]
    fn missing_superclass_becomes_stub_with_error() {
        let (_, mut queue, _) = resolve_source("class A\nend\nclass C < Missing\nend\n");
        let errors = queue.flush_all();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].class, classes::resolver::STUB_CONSTANT);
        assert!(errors[0].header.contains("`Missing`"));
    }

    #[test]
    fn superclass_and_mixins_install_on_symbols() {
        let (gs, _, _) = resolve_source("module M\nend\nclass A\nend\nclass B < A\n  include M\nend\n");
        let a = gs.names_peek_constant("A").expect("A interned");
        let b = gs.names_peek_constant("B").expect("B interned");
        let m = gs.names_peek_constant("M").expect("M interned");
        let a_sym = gs.member(SymbolRef::ROOT, a).expect("A named");
        let b_sym = gs.member(SymbolRef::ROOT, b).expect("B named");
        let m_sym = gs.member(SymbolRef::ROOT, m).expect("M named");
        assert_eq!(gs.symbol(b_sym).superclass, Some(a_sym));
        assert!(gs.symbol(b_sym).mixins.contains(&m_sym));
        assert_eq!(gs.symbol(a_sym).superclass, Some(SymbolRef::OBJECT));
    }

    #[test]
    fn cast_annotations_resolve_to_types() {
        let (gs, _, tree) = resolve_source("def f(x)\n  y = T.let(x, Integer)\n  y\nend\n");
        let shown = tree.show(&gs);
        assert!(shown.contains("Cast[let](Integer)"), "tree was:\n{shown}");
    }
}
