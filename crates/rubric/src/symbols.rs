//! Symbols: the referenceable entities of the program.
//!
//! A [`Symbol`] is a class, module, method, field, type member, or method argument.
//! Symbols form a tree by owner, rooted at the distinguished `<root>` symbol, and are
//! identified by [`SymbolRef`] indices into `GlobalState`'s symbol table. Like names,
//! symbols are never deleted.
//!
//! The table pre-seeds the builtin universe the pipeline's semantics reference (core
//! value classes, `StandardError`, the `<Magic>` receiver) so later phases can name
//! them as constants without lookups.

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::{
    intern::{NameRef, NameTable, WellKnownName},
    loc::Loc,
    types::Type,
};

/// Index of a symbol in the symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct SymbolRef(u32);

impl SymbolRef {
    /// The reserved "no symbol" sentinel.
    pub const NONE: Self = Self(0);
    /// The root of the owner tree.
    pub const ROOT: Self = Self(1);
    /// Owner for resolver-synthesized stubs of unresolvable constants.
    pub const STUB: Self = Self(2);
    pub const OBJECT: Self = Self(3);
    pub const BASIC_OBJECT: Self = Self(4);
    pub const KERNEL: Self = Self(5);
    pub const NIL_CLASS: Self = Self(6);
    pub const TRUE_CLASS: Self = Self(7);
    pub const FALSE_CLASS: Self = Self(8);
    pub const BOOLEAN: Self = Self(9);
    pub const INTEGER: Self = Self(10);
    pub const FLOAT: Self = Self(11);
    pub const STRING: Self = Self(12);
    pub const SYMBOL: Self = Self(13);
    pub const ARRAY: Self = Self(14);
    pub const HASH: Self = Self(15);
    pub const RANGE: Self = Self(16);
    pub const REGEXP: Self = Self(17);
    pub const PROC: Self = Self(18);
    pub const EXCEPTION: Self = Self(19);
    pub const STANDARD_ERROR: Self = Self(20);
    pub const MAGIC: Self = Self(21);
    /// The `T` module carrying the type-annotation DSL (`T.let`, `T.nilable`).
    pub const T_MODULE: Self = Self(22);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn exists(self) -> bool {
        self != Self::NONE
    }

    fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).expect("symbol table overflow"))
    }
}

/// Kind and modifier bits for a symbol.
///
/// Exactly one kind bit is set per symbol; modifier bits compose on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct SymbolFlags(u16);

impl SymbolFlags {
    pub const CLASS: Self = Self(1 << 0);
    pub const MODULE: Self = Self(1 << 1);
    pub const METHOD: Self = Self(1 << 2);
    pub const FIELD: Self = Self(1 << 3);
    pub const STATIC_FIELD: Self = Self(1 << 4);
    pub const TYPE_MEMBER: Self = Self(1 << 5);
    pub const TYPE_ARGUMENT: Self = Self(1 << 6);
    pub const METHOD_ARGUMENT: Self = Self(1 << 7);

    /// Method defined on the singleton (`def self.m` or hoisted by `module_function`).
    pub const SELF_METHOD: Self = Self(1 << 8);
    /// Argument modifier bits, mirroring the AST argument wrappers.
    pub const ARG_KEYWORD: Self = Self(1 << 9);
    pub const ARG_REPEATED: Self = Self(1 << 10);
    pub const ARG_BLOCK: Self = Self(1 << 11);
    pub const ARG_OPTIONAL: Self = Self(1 << 12);

    #[inline]
    #[must_use]
    pub fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    pub fn has(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn is_class_or_module(self) -> bool {
        self.0 & (Self::CLASS.0 | Self::MODULE.0) != 0
    }

    #[inline]
    pub fn is_method(self) -> bool {
        self.has(Self::METHOD)
    }

    #[inline]
    pub fn is_field(self) -> bool {
        self.has(Self::FIELD)
    }

    #[inline]
    pub fn is_static_field(self) -> bool {
        self.has(Self::STATIC_FIELD)
    }
}

/// Method visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::IntoStaticStr, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Private,
}

/// One entry in the symbol table.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub owner: SymbolRef,
    pub name: NameRef,
    pub flags: SymbolFlags,
    pub visibility: Visibility,
    /// Resolved superclass, classes only. `None` until the resolver runs (or for
    /// the roots of the builtin hierarchy).
    pub superclass: Option<SymbolRef>,
    /// Resolved mixins in inclusion order.
    pub mixins: SmallVec<[SymbolRef; 4]>,
    /// Child symbols by name. Iteration order is insertion order, which keeps the
    /// debug printers deterministic.
    pub members: IndexMap<NameRef, SymbolRef>,
    /// Argument symbols, methods only, in declaration order. Shadow arguments are
    /// not listed here.
    pub arguments: Vec<SymbolRef>,
    /// Declared result type: return type for methods, declared type for fields and
    /// arguments, alias target for `alias_method` entries.
    pub result_type: Option<Type>,
    /// Definition location of the current definition.
    pub loc: Loc,
}

impl Symbol {
    fn new(owner: SymbolRef, name: NameRef, flags: SymbolFlags, loc: Loc) -> Self {
        Self {
            owner,
            name,
            flags,
            visibility: Visibility::Public,
            superclass: None,
            mixins: SmallVec::new(),
            members: IndexMap::new(),
            arguments: Vec::new(),
            result_type: None,
            loc,
        }
    }
}

/// The symbol table. Append-only; see module docs.
#[derive(Debug, Clone)]
pub(crate) struct SymbolTable {
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    /// Builds the table with the builtin universe pre-seeded in the fixed order the
    /// `SymbolRef` constants assume.
    pub fn new(names: &mut NameTable) -> Self {
        let mut table = Self { symbols: Vec::new() };

        let none_name = names.enter_constant(WellKnownName::NoSymbolName.into());
        table.push_raw(SymbolRef::NONE, none_name, SymbolFlags::CLASS);
        let root_name = names.enter_constant(WellKnownName::Root.into());
        table.push_raw(SymbolRef::NONE, root_name, SymbolFlags::MODULE);
        let stub_name = names.enter_constant(WellKnownName::StubName.into());
        table.push_raw(SymbolRef::ROOT, stub_name, SymbolFlags::MODULE);

        let builtins: &[(WellKnownName, SymbolFlags)] = &[
            (WellKnownName::Object, SymbolFlags::CLASS),
            (WellKnownName::BasicObject, SymbolFlags::CLASS),
            (WellKnownName::Kernel, SymbolFlags::MODULE),
            (WellKnownName::NilClass, SymbolFlags::CLASS),
            (WellKnownName::TrueClass, SymbolFlags::CLASS),
            (WellKnownName::FalseClass, SymbolFlags::CLASS),
            (WellKnownName::Boolean, SymbolFlags::MODULE),
            (WellKnownName::Integer, SymbolFlags::CLASS),
            (WellKnownName::Float, SymbolFlags::CLASS),
            (WellKnownName::String, SymbolFlags::CLASS),
            (WellKnownName::Symbol, SymbolFlags::CLASS),
            (WellKnownName::Array, SymbolFlags::CLASS),
            (WellKnownName::Hash, SymbolFlags::CLASS),
            (WellKnownName::Range, SymbolFlags::CLASS),
            (WellKnownName::Regexp, SymbolFlags::CLASS),
            (WellKnownName::Proc, SymbolFlags::CLASS),
            (WellKnownName::Exception, SymbolFlags::CLASS),
            (WellKnownName::StandardError, SymbolFlags::CLASS),
            (WellKnownName::Magic, SymbolFlags::CLASS),
            (WellKnownName::T, SymbolFlags::MODULE),
        ];
        for &(name, flags) in builtins {
            let constant = names.enter_constant(name.into());
            let id = SymbolRef::from_index(table.symbols.len());
            table.push_raw(SymbolRef::ROOT, constant, flags);
            table.symbols[SymbolRef::ROOT.index()].members.insert(constant, id);
        }
        // Register the stub owner under root as well so printers can reach it.
        table.symbols[SymbolRef::ROOT.index()].members.insert(stub_name, SymbolRef::STUB);
        // `T::Boolean` aliases the root-level Boolean module.
        let boolean_name = names.enter_constant(WellKnownName::Boolean.into());
        table.symbols[SymbolRef::T_MODULE.index()]
            .members
            .insert(boolean_name, SymbolRef::BOOLEAN);

        // The builtin subtype spine: everything descends from Object, which descends
        // from BasicObject. StandardError sits under Exception.
        for class in [
            SymbolRef::NIL_CLASS,
            SymbolRef::TRUE_CLASS,
            SymbolRef::FALSE_CLASS,
            SymbolRef::INTEGER,
            SymbolRef::FLOAT,
            SymbolRef::STRING,
            SymbolRef::SYMBOL,
            SymbolRef::ARRAY,
            SymbolRef::HASH,
            SymbolRef::RANGE,
            SymbolRef::REGEXP,
            SymbolRef::PROC,
            SymbolRef::EXCEPTION,
            SymbolRef::MAGIC,
        ] {
            table.symbols[class.index()].superclass = Some(SymbolRef::OBJECT);
        }
        table.symbols[SymbolRef::OBJECT.index()].superclass = Some(SymbolRef::BASIC_OBJECT);
        table.symbols[SymbolRef::OBJECT.index()].mixins.push(SymbolRef::KERNEL);
        table.symbols[SymbolRef::STANDARD_ERROR.index()].superclass = Some(SymbolRef::EXCEPTION);
        table.symbols[SymbolRef::TRUE_CLASS.index()].mixins.push(SymbolRef::BOOLEAN);
        table.symbols[SymbolRef::FALSE_CLASS.index()].mixins.push(SymbolRef::BOOLEAN);

        table.seed_builtin_methods(names);
        table
    }

    /// Enters the method signatures on core classes that the pipeline's own
    /// semantics lean on. User code can reopen these classes and add more.
    fn seed_builtin_methods(&mut self, names: &mut NameTable) {
        use Type::{Bottom, Top, Untyped};
        let boolean = Type::boolean;
        let nil_t = Type::nil;
        let int = || Type::Class(SymbolRef::INTEGER);
        let float = || Type::Class(SymbolRef::FLOAT);
        let string = || Type::Class(SymbolRef::STRING);
        let array = || Type::Class(SymbolRef::ARRAY);
        let hash = || Type::Class(SymbolRef::HASH);
        let opt = SymbolFlags::ARG_OPTIONAL;
        let rest = SymbolFlags::ARG_REPEATED;
        let none = SymbolFlags::default();

        self.builtin(names, SymbolRef::BASIC_OBJECT, "!", &[], boolean());
        self.builtin(names, SymbolRef::BASIC_OBJECT, "==", &[("other", Top, none)], boolean());
        self.builtin(names, SymbolRef::BASIC_OBJECT, "initialize", &[], nil_t());

        self.builtin(names, SymbolRef::OBJECT, "nil?", &[], boolean());
        self.builtin(names, SymbolRef::OBJECT, "is_a?", &[("class", Top, none)], boolean());
        self.builtin(names, SymbolRef::OBJECT, "kind_of?", &[("class", Top, none)], boolean());
        self.builtin(names, SymbolRef::OBJECT, "===", &[("other", Top, none)], boolean());
        self.builtin(names, SymbolRef::OBJECT, "to_s", &[], string());

        self.builtin(names, SymbolRef::KERNEL, "hard_assert", &[("value", Top, none)], nil_t());
        self.builtin(
            names,
            SymbolRef::KERNEL,
            "raise",
            &[("exception", Top, opt), ("message", Top, opt)],
            Bottom,
        );
        self.builtin(names, SymbolRef::KERNEL, "puts", &[("args", Top, rest)], nil_t());

        for op in ["+", "-", "*", "/", "%"] {
            self.builtin(names, SymbolRef::INTEGER, op, &[("other", int(), none)], int());
            self.builtin(names, SymbolRef::FLOAT, op, &[("other", float(), none)], float());
        }
        for op in ["<", ">", "<=", ">="] {
            self.builtin(names, SymbolRef::INTEGER, op, &[("other", int(), none)], boolean());
            self.builtin(names, SymbolRef::FLOAT, op, &[("other", float(), none)], boolean());
        }
        self.builtin(names, SymbolRef::INTEGER, "to_s", &[], string());
        self.builtin(names, SymbolRef::INTEGER, "zero?", &[], boolean());

        self.builtin(names, SymbolRef::STRING, "+", &[("other", string(), none)], string());
        self.builtin(names, SymbolRef::STRING, "concat", &[("parts", Top, rest)], string());
        self.builtin(names, SymbolRef::STRING, "intern", &[], Type::Class(SymbolRef::SYMBOL));
        self.builtin(names, SymbolRef::STRING, "to_sym", &[], Type::Class(SymbolRef::SYMBOL));
        self.builtin(names, SymbolRef::STRING, "length", &[], int());
        self.builtin(names, SymbolRef::STRING, "empty?", &[], boolean());
        self.builtin(names, SymbolRef::STRING, "to_s", &[], Type::SelfType);

        self.builtin(names, SymbolRef::SYMBOL, "to_proc", &[], Type::Class(SymbolRef::PROC));
        self.builtin(names, SymbolRef::SYMBOL, "to_s", &[], string());

        self.builtin(names, SymbolRef::ARRAY, "each", &[], Type::SelfType);
        self.builtin(names, SymbolRef::ARRAY, "[]", &[("index", Top, none)], Untyped);
        self.builtin(names, SymbolRef::ARRAY, "[]=", &[("index", Top, none), ("value", Top, none)], Untyped);
        self.builtin(names, SymbolRef::ARRAY, "slice", &[("start", Top, none), ("length", Top, opt)], Untyped);
        self.builtin(names, SymbolRef::ARRAY, "concat", &[("others", Top, rest)], Type::SelfType);
        self.builtin(names, SymbolRef::ARRAY, "push", &[("values", Top, rest)], Type::SelfType);
        self.builtin(names, SymbolRef::ARRAY, "to_a", &[], Type::SelfType);
        self.builtin(names, SymbolRef::ARRAY, "first", &[], Untyped);
        self.builtin(names, SymbolRef::ARRAY, "size", &[], int());
        self.builtin(names, SymbolRef::ARRAY, "length", &[], int());

        self.builtin(names, SymbolRef::HASH, "[]", &[("key", Top, none)], Untyped);
        self.builtin(names, SymbolRef::HASH, "[]=", &[("key", Top, none), ("value", Top, none)], Untyped);
        self.builtin(names, SymbolRef::HASH, "merge", &[("others", hash(), rest)], hash());
        self.builtin(names, SymbolRef::HASH, "to_h", &[], Type::SelfType);
        self.builtin(names, SymbolRef::HASH, "keys", &[], array());
        self.builtin(names, SymbolRef::HASH, "size", &[], int());

        self.builtin(names, SymbolRef::NIL_CLASS, "to_a", &[], array());
        self.builtin(names, SymbolRef::NIL_CLASS, "to_s", &[], string());

        self.builtin(names, SymbolRef::PROC, "call", &[("args", Top, rest)], Untyped);
        self.builtin(names, SymbolRef::PROC, "to_proc", &[], Type::SelfType);

        self.builtin(
            names,
            SymbolRef::RANGE,
            "initialize",
            &[("from", Top, none), ("to", Top, none), ("exclude_end", Top, opt)],
            Type::Class(SymbolRef::RANGE),
        );

        self.builtin(
            names,
            SymbolRef::REGEXP,
            "initialize",
            &[("pattern", Top, none), ("flags", int(), opt)],
            Type::Class(SymbolRef::REGEXP),
        );

        self.builtin(
            names,
            SymbolRef::EXCEPTION,
            "initialize",
            &[("message", Top, opt)],
            Type::SelfType,
        );
        self.builtin(
            names,
            SymbolRef::EXCEPTION,
            "message",
            &[],
            Type::Or(Box::new(nil_t()), Box::new(string())),
        );
    }

    fn builtin(
        &mut self,
        names: &mut NameTable,
        owner: SymbolRef,
        name: &str,
        args: &[(&str, Type, SymbolFlags)],
        result: Type,
    ) {
        let method_name = names.enter_utf8(name);
        let (method, _) = self.enter_method_symbol(owner, method_name, Loc::NONE);
        for (arg_name, arg_type, flags) in args {
            let arg_name = names.enter_utf8(arg_name);
            let arg = self.enter_method_argument(method, arg_name, *flags, false, Loc::NONE);
            self.get_mut(arg).result_type = Some(arg_type.clone());
        }
        self.get_mut(method).result_type = Some(result);
    }

    fn push_raw(&mut self, owner: SymbolRef, name: NameRef, flags: SymbolFlags) {
        self.symbols.push(Symbol::new(owner, name, flags, Loc::NONE));
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn get(&self, id: SymbolRef) -> &Symbol {
        &self.symbols[id.index()]
    }

    pub fn get_mut(&mut self, id: SymbolRef) -> &mut Symbol {
        &mut self.symbols[id.index()]
    }

    /// Looks up a direct member of `owner` by name.
    pub fn member(&self, owner: SymbolRef, name: NameRef) -> Option<SymbolRef> {
        self.get(owner).members.get(&name).copied()
    }

    /// Enters (or finds) a class or module symbol owned by `owner`.
    ///
    /// Re-entering an existing symbol updates its location to the latest definition
    /// and leaves everything else in place; class reopening is ordinary in SL.
    pub fn enter_class_symbol(&mut self, owner: SymbolRef, name: NameRef, flags: SymbolFlags, loc: Loc) -> SymbolRef {
        debug_assert!(flags.is_class_or_module());
        if let Some(existing) = self.member(owner, name) {
            if loc.exists() {
                self.get_mut(existing).loc = loc;
            }
            return existing;
        }
        let id = SymbolRef::from_index(self.symbols.len());
        self.symbols.push(Symbol::new(owner, name, flags, loc));
        self.get_mut(owner).members.insert(name, id);
        id
    }

    /// Enters (or finds) a method symbol owned by `owner`.
    ///
    /// Returns the symbol and whether it already existed; the namer uses the flag to
    /// report redefinitions. A redefinition clears the previous argument list, which
    /// the caller then repopulates.
    pub fn enter_method_symbol(&mut self, owner: SymbolRef, name: NameRef, loc: Loc) -> (SymbolRef, bool) {
        if let Some(existing) = self.member(owner, name) {
            let sym = self.get_mut(existing);
            sym.arguments.clear();
            sym.loc = loc;
            return (existing, true);
        }
        let id = SymbolRef::from_index(self.symbols.len());
        self.symbols.push(Symbol::new(owner, name, SymbolFlags::METHOD, loc));
        self.get_mut(owner).members.insert(name, id);
        (id, false)
    }

    /// Enters a method argument symbol and appends it to the method's argument list
    /// unless `shadow` is set.
    pub fn enter_method_argument(
        &mut self,
        method: SymbolRef,
        name: NameRef,
        flags: SymbolFlags,
        shadow: bool,
        loc: Loc,
    ) -> SymbolRef {
        let id = SymbolRef::from_index(self.symbols.len());
        self.symbols
            .push(Symbol::new(method, name, flags.with(SymbolFlags::METHOD_ARGUMENT), loc));
        if !shadow {
            self.get_mut(method).arguments.push(id);
        }
        id
    }

    /// Enters (or finds) a field symbol: instance/class fields under their class,
    /// globals under `<root>`.
    pub fn enter_field_symbol(&mut self, owner: SymbolRef, name: NameRef, flags: SymbolFlags, loc: Loc) -> SymbolRef {
        if let Some(existing) = self.member(owner, name) {
            return existing;
        }
        let id = SymbolRef::from_index(self.symbols.len());
        self.symbols.push(Symbol::new(owner, name, flags, loc));
        self.get_mut(owner).members.insert(name, id);
        id
    }

    /// Finds or creates the singleton class of `class_sym`, where `def self.m`
    /// methods live.
    pub fn singleton_class(&mut self, class_sym: SymbolRef, loc: Loc) -> SymbolRef {
        let name = NameRef::from(WellKnownName::Singleton);
        self.enter_class_symbol(class_sym, name, SymbolFlags::CLASS, loc)
    }

    /// Walks `class_sym`'s ancestry (itself, mixins, then the superclass chain)
    /// looking for a method member.
    ///
    /// Mixins are searched in reverse inclusion order, matching SL's method
    /// resolution order closely enough for the dispatch the pipeline needs.
    pub fn resolve_method(&self, class_sym: SymbolRef, name: NameRef) -> Option<SymbolRef> {
        let mut current = class_sym;
        loop {
            let sym = self.get(current);
            if let Some(&found) = sym.members.get(&name) {
                if self.get(found).flags.is_method() {
                    return Some(found);
                }
            }
            for &mixin in sym.mixins.iter().rev() {
                if let Some(found) = self.member(mixin, name)
                    && self.get(found).flags.is_method()
                {
                    return Some(found);
                }
            }
            current = sym.superclass?;
        }
    }

    /// True when `sub` is `ancestor` or descends from it through superclasses or
    /// mixins.
    pub fn derives_from(&self, sub: SymbolRef, ancestor: SymbolRef) -> bool {
        if sub == ancestor {
            return true;
        }
        let sym = self.get(sub);
        if sym.mixins.iter().any(|&m| self.derives_from(m, ancestor)) {
            return true;
        }
        match sym.superclass {
            Some(parent) => self.derives_from(parent, ancestor),
            None => false,
        }
    }

    /// Renders the fully qualified name, e.g. `A::B#m` or `A::B.m` for singleton
    /// methods.
    pub fn show_full_name(&self, names: &NameTable, id: SymbolRef) -> String {
        let sym = self.get(id);
        if id == SymbolRef::ROOT || !sym.owner.exists() {
            return names.show(sym.name);
        }
        let base = names.show(sym.name);
        let owner = self.get(sym.owner);
        let singleton_name = NameRef::from(WellKnownName::Singleton);
        if sym.flags.is_method() {
            if owner.name == singleton_name {
                let class_owner = owner.owner;
                return format!("{}.{}", self.show_full_name(names, class_owner), base);
            }
            return format!("{}#{}", self.show_full_name(names, sym.owner), base);
        }
        if sym.owner == SymbolRef::ROOT {
            return base;
        }
        format!("{}::{}", self.show_full_name(names, sym.owner), base)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolRef, &Symbol)> {
        self.symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (SymbolRef::from_index(i), s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> (NameTable, SymbolTable) {
        let mut names = NameTable::new();
        let symbols = SymbolTable::new(&mut names);
        (names, symbols)
    }

    #[test]
    fn builtin_layout_matches_constants() {
        let (names, symbols) = fresh();
        assert_eq!(names.show(symbols.get(SymbolRef::INTEGER).name), "Integer");
        assert_eq!(names.show(symbols.get(SymbolRef::MAGIC).name), "<Magic>");
        assert_eq!(symbols.get(SymbolRef::STANDARD_ERROR).superclass, Some(SymbolRef::EXCEPTION));
    }

    #[test]
    fn class_symbols_deduplicate_by_owner_and_name() {
        let (mut names, mut symbols) = fresh();
        let a = names.enter_constant("A");
        let first = symbols.enter_class_symbol(SymbolRef::ROOT, a, SymbolFlags::CLASS, Loc::NONE);
        let second = symbols.enter_class_symbol(SymbolRef::ROOT, a, SymbolFlags::CLASS, Loc::NONE);
        assert_eq!(first, second);
    }

    #[test]
    fn method_redefinition_is_detected() {
        let (mut names, mut symbols) = fresh();
        let m = names.enter_utf8("m");
        let (first, existed) = symbols.enter_method_symbol(SymbolRef::OBJECT, m, Loc::NONE);
        assert!(!existed);
        let (second, existed) = symbols.enter_method_symbol(SymbolRef::OBJECT, m, Loc::NONE);
        assert!(existed);
        assert_eq!(first, second);
    }

    #[test]
    fn derives_from_walks_mixins_and_superclasses() {
        let (_, symbols) = fresh();
        assert!(symbols.derives_from(SymbolRef::INTEGER, SymbolRef::OBJECT));
        assert!(symbols.derives_from(SymbolRef::TRUE_CLASS, SymbolRef::BOOLEAN));
        assert!(symbols.derives_from(SymbolRef::STANDARD_ERROR, SymbolRef::EXCEPTION));
        assert!(!symbols.derives_from(SymbolRef::OBJECT, SymbolRef::INTEGER));
    }

    #[test]
    fn full_names_include_owner_chain() {
        let (mut names, mut symbols) = fresh();
        let a = names.enter_constant("A");
        let b = names.enter_constant("B");
        let class_a = symbols.enter_class_symbol(SymbolRef::ROOT, a, SymbolFlags::CLASS, Loc::NONE);
        let class_b = symbols.enter_class_symbol(class_a, b, SymbolFlags::CLASS, Loc::NONE);
        let m = names.enter_utf8("m");
        let (method, _) = symbols.enter_method_symbol(class_b, m, Loc::NONE);
        assert_eq!(symbols.show_full_name(&names, class_b), "A::B");
        assert_eq!(symbols.show_full_name(&names, method), "A::B#m");

        let singleton = symbols.singleton_class(class_b, Loc::NONE);
        let (smethod, _) = symbols.enter_method_symbol(singleton, m, Loc::NONE);
        assert_eq!(symbols.show_full_name(&names, smethod), "A::B.m");
    }
}
