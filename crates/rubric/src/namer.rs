//! Naming: creating symbols and binding locals.
//!
//! The namer walks each file's lifted AST and
//! * enters class/module symbols, squashing `A::B::C` paths into a chain,
//! * enters method and method-argument symbols (redefinitions are reported),
//! * hoists `include` calls with a single constant argument into the class's
//!   ancestor list,
//! * applies `private`/`protected`/`public`/`private_class_method` and
//!   `module_function` wrappers to method symbols,
//! * enters `alias_method` aliases,
//! * and rewrites local identifier reads/writes into concrete `Local` variables
//!   through a stack of scope frames.
//!
//! Global identifiers become field symbols under `<root>` here; instance and class
//! variables stay unresolved until the resolver, which knows final class shapes.

use ahash::AHashMap;

use crate::{
    ast::{BlockNode, DefFlags, Expr, ExprKind, IdentKind, LocalVariable},
    errors::{Error, ErrorSection, classes},
    global_state::GlobalState,
    intern::{NameRef, WellKnownName},
    loc::Loc,
    symbols::{SymbolFlags, SymbolRef, Visibility},
};

/// Runs the namer over one file's lifted class definition.
pub fn run(gs: &mut GlobalState, tree: &mut Expr) {
    let mut namer = Namer {
        gs,
        owner_stack: vec![SymbolRef::ROOT],
        scope_stack: Vec::new(),
        unique_counter: 0,
    };
    namer.walk(tree);
}

/// One local-variable scope. Method bodies start fresh; blocks inherit a copy of
/// the enclosing frame, and their arguments shadow by re-insertion.
#[derive(Debug, Default, Clone)]
struct Frame {
    locals: AHashMap<NameRef, LocalVariable>,
}

struct Namer<'gs> {
    gs: &'gs mut GlobalState,
    owner_stack: Vec<SymbolRef>,
    scope_stack: Vec<Frame>,
    /// Disambiguates shadowing locals; shared across the file so ids never collide
    /// within a method.
    unique_counter: u32,
}

/// Per-class-body state for visibility modifiers and `module_function`.
#[derive(Debug, Default, Clone, Copy)]
struct BodyState {
    default_visibility: Visibility,
    module_function: bool,
}

impl Namer<'_> {
    fn owner(&self) -> SymbolRef {
        *self.owner_stack.last().expect("owner stack never empty")
    }

    /// The class that `def` methods in the current owner land on.
    fn method_owner(&self) -> SymbolRef {
        self.owner()
    }

    // ===== locals =====

    fn current_frame_mut(&mut self) -> &mut Frame {
        self.scope_stack.last_mut().expect("scope stack never empty")
    }

    fn lookup_local(&self, name: NameRef) -> Option<LocalVariable> {
        self.scope_stack.last().and_then(|f| f.locals.get(&name).copied())
    }

    /// Finds or creates the local for `name` in the current frame.
    fn enter_local(&mut self, name: NameRef) -> LocalVariable {
        if let Some(var) = self.lookup_local(name) {
            return var;
        }
        let var = LocalVariable::new(name);
        self.current_frame_mut().locals.insert(name, var);
        var
    }

    /// Inserts a fresh, shadowing local for a block argument.
    fn enter_shadow_local(&mut self, name: NameRef) -> LocalVariable {
        let already_bound = self.lookup_local(name).is_some();
        let var = if already_bound {
            self.unique_counter += 1;
            LocalVariable {
                name,
                unique_id: self.unique_counter,
            }
        } else {
            LocalVariable::new(name)
        };
        self.current_frame_mut().locals.insert(name, var);
        var
    }

    // ===== the walk =====

    fn walk(&mut self, expr: &mut Expr) {
        match &mut expr.kind {
            ExprKind::ClassDef { .. } => self.walk_class_def(expr),
            ExprKind::MethodDef { .. } => {
                // A method definition outside a class body (shouldn't happen after
                // lifting, but harmless): name it against the current owner.
                let mut state = BodyState::default();
                self.walk_method_def(expr, &mut state);
            }
            ExprKind::UnresolvedIdent { kind, name } => match kind {
                IdentKind::Local => {
                    let var = self.enter_local(*name);
                    expr.kind = ExprKind::Local { var };
                }
                IdentKind::Global => {
                    let symbol =
                        self.gs
                            .enter_field_symbol(SymbolRef::ROOT, *name, SymbolFlags::FIELD, expr.loc);
                    expr.kind = ExprKind::FieldRef { symbol };
                }
                // Instance and class variables wait for the resolver.
                IdentKind::Instance | IdentKind::Class => {}
            },
            ExprKind::SelfRef { owner } => {
                if !owner.exists() {
                    *owner = self.owner();
                }
            }
            ExprKind::Send { recv, args, block, .. } => {
                self.walk(recv);
                for arg in args.iter_mut() {
                    self.walk(arg);
                }
                if let Some(block) = block {
                    self.walk_block(block);
                }
            }
            ExprKind::InsSeq { stats, expr: last } => {
                for stat in stats.iter_mut() {
                    self.walk(stat);
                }
                self.walk(last);
            }
            ExprKind::Assign { lhs, rhs } => {
                self.walk(rhs);
                self.walk(lhs);
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
            ExprKind::Cast { expr: inner, .. } => self.walk(inner),
            ExprKind::UnresolvedConstant { scope, .. } => self.walk(scope),
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
            | ExprKind::Local { .. }
            | ExprKind::ConstantLit { .. }
            | ExprKind::FieldRef { .. }
            | ExprKind::ZSuperArgs
            | ExprKind::Retry => {}
        }
    }

    fn walk_block(&mut self, block: &mut BlockNode) {
        // Blocks see the enclosing scope; their arguments shadow.
        let inherited = self
            .scope_stack
            .last()
            .cloned()
            .unwrap_or_default();
        self.scope_stack.push(inherited);
        for arg in &mut block.args {
            self.name_block_arg(arg);
        }
        self.walk(&mut block.body);
        self.scope_stack.pop();
    }

    /// Binds a block argument into the block's frame, rewriting the wrapped ident
    /// to a `Local`.
    fn name_block_arg(&mut self, arg: &mut Expr) {
        match &mut arg.kind {
            ExprKind::UnresolvedIdent {
                kind: IdentKind::Local,
                name,
            } => {
                let var = self.enter_shadow_local(*name);
                arg.kind = ExprKind::Local { var };
            }
            ExprKind::Local { var } => {
                // Desugar-synthesized temps arrive pre-bound.
                let var = *var;
                self.current_frame_mut().locals.insert(var.name, var);
            }
            ExprKind::RestArg { inner }
            | ExprKind::KeywordArg { inner }
            | ExprKind::BlockArgNode { inner }
            | ExprKind::ShadowArg { inner } => self.name_block_arg(inner),
            ExprKind::OptionalArg { inner, default } => {
                self.name_block_arg(inner);
                self.walk(default);
            }
            _ => {}
        }
    }

    // ===== class bodies =====

    fn walk_class_def(&mut self, expr: &mut Expr) {
        let ExprKind::ClassDef {
            decl_loc,
            symbol,
            name,
            ancestors,
            rhs,
            kind,
        } = &mut expr.kind
        else {
            unreachable!("caller matched ClassDef");
        };

        if !symbol.exists() {
            *symbol = self.name_class_path(name, *decl_loc, *kind);
        }
        let class_sym = *symbol;

        // Class bodies run with their own local scope and visibility state.
        self.owner_stack.push(class_sym);
        self.scope_stack.push(Frame::default());
        let mut state = BodyState::default();

        let mut index = 0;
        while index < rhs.len() {
            let remove = self.walk_class_stmt(&mut rhs[index], ancestors, &mut state);
            if remove {
                rhs.remove(index);
            } else {
                index += 1;
            }
        }

        self.scope_stack.pop();
        self.owner_stack.pop();
    }

    /// Handles one class-body statement. Returns true when the statement should be
    /// removed from the body (hoisted includes).
    fn walk_class_stmt(&mut self, stmt: &mut Expr, ancestors: &mut Vec<Expr>, state: &mut BodyState) -> bool {
        // Recognize `include`, visibility wrappers, `module_function` and
        // `alias_method` before generic traversal.
        if let ExprKind::Send {
            recv,
            fun,
            args,
            block,
        } = &mut stmt.kind
            && matches!(recv.kind, ExprKind::SelfRef { .. })
        {
            let fun = *fun;
            if fun == NameRef::from(WellKnownName::Include) {
                return self.handle_include(stmt.loc, args, block.is_some(), ancestors);
            }
            if fun == NameRef::from(WellKnownName::ModuleFunction) && args.is_empty() && block.is_none() {
                state.module_function = true;
                *stmt = Expr::empty();
                return false;
            }
            let visibility = if fun == NameRef::from(WellKnownName::Private) {
                Some(Visibility::Private)
            } else if fun == NameRef::from(WellKnownName::Protected) {
                Some(Visibility::Protected)
            } else if fun == NameRef::from(WellKnownName::Public) {
                Some(Visibility::Public)
            } else {
                None
            };
            if let Some(visibility) = visibility {
                if args.is_empty() {
                    state.default_visibility = visibility;
                    *stmt = Expr::empty();
                    return false;
                }
                if args.len() == 1
                    && matches!(args[0].kind, ExprKind::MethodDef { .. })
                {
                    let mut inner = args.pop().expect("len checked");
                    self.walk_method_def(&mut inner, state);
                    if let ExprKind::MethodDef { symbol, .. } = &inner.kind
                        && symbol.exists()
                    {
                        self.gs.symbol_mut(*symbol).visibility = visibility;
                    }
                    *stmt = inner;
                    return false;
                }
                // `private :sym` forms adjust already-entered methods.
                let all_symbols = args.iter().all(|a| matches!(a.kind, ExprKind::SymbolLit(_)));
                for arg in args.iter() {
                    if let ExprKind::SymbolLit(method_name) = arg.kind
                        && let Some(found) = self.gs.member(self.method_owner(), method_name)
                    {
                        self.gs.symbol_mut(found).visibility = visibility;
                    }
                }
                if all_symbols {
                    *stmt = Expr::empty();
                }
                return false;
            }
            if fun == NameRef::from(WellKnownName::PrivateClassMethod)
                && args.len() == 1
                && matches!(args[0].kind, ExprKind::MethodDef { .. })
            {
                let mut inner = args.pop().expect("len checked");
                self.walk_method_def(&mut inner, state);
                if let ExprKind::MethodDef { symbol, .. } = &inner.kind
                    && symbol.exists()
                {
                    self.gs.symbol_mut(*symbol).visibility = Visibility::Private;
                }
                *stmt = inner;
                return false;
            }
            if fun == NameRef::from(WellKnownName::ModuleFunction)
                && args.len() == 1
                && matches!(args[0].kind, ExprKind::MethodDef { .. })
            {
                let mut inner = args.pop().expect("len checked");
                let saved = state.module_function;
                state.module_function = true;
                self.walk_method_def(&mut inner, state);
                state.module_function = saved;
                *stmt = inner;
                return false;
            }
            if fun == NameRef::from(WellKnownName::AliasMethod) {
                let loc = stmt.loc;
                if self.handle_alias_method(loc, args) {
                    *stmt = Expr::empty();
                    return false;
                }
            }
        }

        match &mut stmt.kind {
            ExprKind::MethodDef { .. } => {
                self.walk_method_def(stmt, state);
            }
            _ => self.walk(stmt),
        }
        false
    }

    /// `include Foo`: hoist well-formed includes into the ancestor list.
    fn handle_include(&mut self, loc: Loc, args: &mut Vec<Expr>, has_block: bool, ancestors: &mut Vec<Expr>) -> bool {
        if has_block {
            self.gs.report(Error::new(
                classes::namer::INCLUDE_PASSED_BLOCK,
                loc,
                "`include` can not be passed a block",
            ));
            return false;
        }
        if args.len() != 1 {
            self.gs.report(Error::new(
                classes::namer::INCLUDE_MULTIPLE_PARAM,
                loc,
                format!("`include` must be passed exactly one argument, got {}", args.len()),
            ));
            return false;
        }
        if !matches!(
            args[0].kind,
            ExprKind::UnresolvedConstant { .. } | ExprKind::ConstantLit { .. }
        ) {
            self.gs.report(Error::new(
                classes::namer::INCLUDE_NOT_CONSTANT,
                loc,
                "`include` must be passed a constant literal",
            ));
            return false;
        }
        ancestors.push(args.pop().expect("len checked"));
        true
    }

    /// `alias_method :to, :from` enters `to` as an alias whose result type points
    /// at `from`. Returns whether the call was well-formed and consumed.
    fn handle_alias_method(&mut self, loc: Loc, args: &[Expr]) -> bool {
        let [to, from] = args else {
            return false;
        };
        let (ExprKind::SymbolLit(to_name), ExprKind::SymbolLit(from_name)) = (&to.kind, &from.kind) else {
            return false;
        };
        let owner = self.method_owner();
        let (from_sym, _) = match self.gs.member(owner, *from_name) {
            Some(existing) => (existing, true),
            None => self.gs.enter_method_symbol(owner, *from_name, loc),
        };
        let (alias_sym, _) = self.gs.enter_method_symbol(owner, *to_name, loc);
        self.gs.symbol_mut(alias_sym).result_type = Some(crate::types::Type::Alias(from_sym));
        true
    }

    // ===== class paths and methods =====

    /// Squashes a constant path (`A::B::C`) into nested class symbols under the
    /// current owner, returning the innermost one.
    fn name_class_path(&mut self, name: &Expr, decl_loc: Loc, kind: crate::ast::ClassKind) -> SymbolRef {
        let mut path: Vec<NameRef> = Vec::new();
        let mut cursor = name;
        loop {
            match &cursor.kind {
                ExprKind::UnresolvedConstant { scope, name } => {
                    path.push(*name);
                    cursor = scope;
                }
                _ => break,
            }
        }
        // Path was collected innermost-first.
        path.reverse();

        let singleton_text: &'static str = WellKnownName::Singleton.into();
        let singleton_const = self.gs.enter_name_constant(singleton_text);
        let mut owner = self.owner();
        let flags = match kind {
            crate::ast::ClassKind::Class => SymbolFlags::CLASS,
            crate::ast::ClassKind::Module => SymbolFlags::MODULE,
        };
        let mut result = owner;
        for (i, &segment) in path.iter().enumerate() {
            let last = i + 1 == path.len();
            // `class << self` desugars to a class named `<singleton>`.
            result = if segment == singleton_const {
                self.gs.singleton_class(owner, decl_loc)
            } else if last {
                self.gs.enter_class_symbol(owner, segment, flags, decl_loc)
            } else {
                self.gs.enter_class_symbol(owner, segment, SymbolFlags::CLASS, Loc::NONE)
            };
            owner = result;
        }
        result
    }

    fn walk_method_def(&mut self, expr: &mut Expr, state: &mut BodyState) {
        let ExprKind::MethodDef {
            decl_loc,
            symbol,
            name,
            args,
            body,
            flags,
        } = &mut expr.kind
        else {
            return;
        };

        let self_method = flags.has(DefFlags::SELF_METHOD);
        let owner = if self_method {
            self.gs.singleton_class(self.owner(), *decl_loc)
        } else {
            self.method_owner()
        };

        let previous_loc = self.gs.member(owner, *name).map(|sym| self.gs.symbol(sym).loc);
        let (method_sym, redefined) = self.gs.enter_method_symbol(owner, *name, *decl_loc);
        if redefined {
            let mut error = Error::new(
                classes::namer::REDEFINITION_OF_METHOD,
                *decl_loc,
                format!("Method `{}` redefined", self.gs.show_name(*name)),
            );
            if let Some(previous_loc) = previous_loc
                && previous_loc.exists()
            {
                error = error.with_section(ErrorSection::new("Previous definition", vec![previous_loc]));
            }
            self.gs.report(error);
        }
        *symbol = method_sym;
        if self_method {
            let with_flags = self.gs.symbol(method_sym).flags.with(SymbolFlags::SELF_METHOD);
            self.gs.symbol_mut(method_sym).flags = with_flags;
        }
        if state.default_visibility != Visibility::Public {
            self.gs.symbol_mut(method_sym).visibility = state.default_visibility;
        }

        // Method bodies get a fresh local scope seeded by the arguments.
        self.scope_stack.push(Frame::default());
        for arg in args.iter_mut() {
            self.name_method_arg(method_sym, arg, false);
        }
        self.walk(body);
        self.scope_stack.pop();

        // `module_function` also lands a copy on the singleton.
        if state.module_function && !self_method {
            let singleton = self.gs.singleton_class(self.owner(), *decl_loc);
            let (copy, _) = self.gs.enter_method_symbol(singleton, *name, *decl_loc);
            self.gs.symbol_mut(copy).result_type = Some(crate::types::Type::Alias(method_sym));
            let with_flags = self.gs.symbol(copy).flags.with(SymbolFlags::SELF_METHOD);
            self.gs.symbol_mut(copy).flags = with_flags;
        }
    }

    /// Enters one method argument: a symbol on the method plus a local binding.
    /// Wrapper nodes compose; `ShadowArg` skips the symbol but keeps the local.
    fn name_method_arg(&mut self, method_sym: SymbolRef, arg: &mut Expr, in_shadow: bool) {
        let arg_loc = arg.loc;
        match &mut arg.kind {
            ExprKind::UnresolvedIdent {
                kind: IdentKind::Local,
                name,
            } => {
                let name = *name;
                let var = self.enter_local(name);
                self.gs
                    .enter_method_argument(method_sym, name, SymbolFlags::default(), in_shadow, arg_loc);
                arg.kind = ExprKind::Local { var };
            }
            ExprKind::Local { var } => {
                let var = *var;
                self.current_frame_mut().locals.insert(var.name, var);
                self.gs
                    .enter_method_argument(method_sym, var.name, SymbolFlags::default(), in_shadow, arg_loc);
            }
            ExprKind::RestArg { inner } => {
                self.name_wrapped_arg(method_sym, inner, SymbolFlags::ARG_REPEATED, in_shadow);
            }
            ExprKind::KeywordArg { inner } => {
                self.name_wrapped_arg(method_sym, inner, SymbolFlags::ARG_KEYWORD, in_shadow);
            }
            ExprKind::BlockArgNode { inner } => {
                self.name_wrapped_arg(method_sym, inner, SymbolFlags::ARG_BLOCK, in_shadow);
            }
            ExprKind::ShadowArg { inner } => {
                self.name_method_arg(method_sym, inner, true);
            }
            ExprKind::OptionalArg { inner, default } => {
                self.name_wrapped_arg(method_sym, inner, SymbolFlags::ARG_OPTIONAL, in_shadow);
                self.walk(default);
            }
            _ => {}
        }
    }

    /// Composes wrapper flags down to the wrapped identifier.
    fn name_wrapped_arg(&mut self, method_sym: SymbolRef, inner: &mut Expr, flags: SymbolFlags, shadow: bool) {
        let inner_loc = inner.loc;
        match &mut inner.kind {
            ExprKind::UnresolvedIdent {
                kind: IdentKind::Local,
                name,
            } => {
                let name = *name;
                let var = self.enter_local(name);
                self.gs
                    .enter_method_argument(method_sym, name, flags, shadow, inner_loc);
                inner.kind = ExprKind::Local { var };
            }
            ExprKind::Local { var } => {
                let var = *var;
                self.current_frame_mut().locals.insert(var.name, var);
                self.gs
                    .enter_method_argument(method_sym, var.name, flags, shadow, inner_loc);
            }
            ExprKind::RestArg { inner: nested } => {
                // Wrappers compose, e.g. a keyword rest arg.
                self.name_wrapped_arg(method_sym, nested, flags.with(SymbolFlags::ARG_REPEATED), shadow);
            }
            ExprKind::KeywordArg { inner: nested } => {
                self.name_wrapped_arg(method_sym, nested, flags.with(SymbolFlags::ARG_KEYWORD), shadow);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{desugar, errors::ErrorQueue, parser};

    fn name_source(source: &str) -> (GlobalState, Expr) {
        let queue = ErrorQueue::new();
        let mut gs = GlobalState::new(&queue);
        let file = gs.enter_file("test.rb", source);
        let parsed = parser::parse_file(source, file);
        let mut tree = desugar::desugar_file(&mut gs, file, parsed.node);
        run(&mut gs, &mut tree);
        (gs, tree)
    }

    #[test]
    fn names_nested_classes_and_methods() {
        let (gs, _) = name_source("class A\n  class B\n    def m(x); x; end\n  end\nend\n");
        let table = gs.show_symbol_table();
        assert!(table.contains("class A::B"), "table was:\n{table}");
        assert!(table.contains("method A::B#m"), "table was:\n{table}");
        assert!(table.contains("arg A::B#m(x)"), "table was:\n{table}");
    }

    #[test]
    fn self_methods_land_on_the_singleton() {
        let (gs, _) = name_source("class A\n  def self.build; end\nend\n");
        let table = gs.show_symbol_table();
        assert!(table.contains("method A.build"), "table was:\n{table}");
    }

    #[test]
    fn include_is_hoisted_into_ancestors() {
        let (_, tree) = name_source("module M\nend\nclass A\n  include M\n  def m; end\nend\n");
        fn count_hoisted(e: &Expr, count: &mut usize) {
            if let ExprKind::ClassDef { ancestors, rhs, .. } = &e.kind {
                *count += ancestors
                    .iter()
                    .filter(|a| matches!(a.kind, ExprKind::UnresolvedConstant { .. }))
                    .count();
                for stmt in rhs {
                    count_hoisted(stmt, count);
                }
            }
        }
        let mut hoisted = 0;
        count_hoisted(&tree, &mut hoisted);
        assert!(hoisted >= 1, "include was not hoisted");
    }

    #[test]
    fn local_reads_resolve_to_assigned_locals() {
        let (gs, tree) = name_source("def f\n  x = 1\n  x\nend\n");
        let shown = tree.show(&gs);
        assert!(shown.contains("Local(x)"), "tree was:\n{shown}");
        assert!(!shown.contains("UnresolvedIdent[local]"), "tree was:\n{shown}");
    }
}
