//! The centralized interning and symbol-table state.
//!
//! A [`GlobalState`] owns the name table, the file table, the symbol table, and a
//! handle on the error queue. It is created explicitly (never a singleton) so test
//! contexts can hold several side by side.
//!
//! Mutation discipline: the namer and resolver run with the tables unfrozen; the
//! parallel phases (desugar before them, CFG and inference after) run against
//! either a private deep copy or a frozen canonical state. Reading a frozen state
//! from many threads is safe because nothing writes to it.

use crate::{
    errors::{Error, ErrorQueue, ErrorSink},
    files::{File, FileTable, StrictLevel},
    intern::{NameRef, NameTable, UniqueNameKind},
    loc::{FileRef, Loc},
    symbols::{Symbol, SymbolFlags, SymbolRef, SymbolTable},
};

/// See module docs.
#[derive(Debug, Clone)]
pub struct GlobalState {
    pub(crate) names: NameTable,
    pub(crate) files: FileTable,
    pub(crate) symbols: SymbolTable,
    errors: ErrorSink,
    frozen: bool,
}

impl GlobalState {
    /// Creates a state wired to `queue` with the builtin names and symbols seeded.
    pub fn new(queue: &ErrorQueue) -> Self {
        let mut names = NameTable::new();
        let symbols = SymbolTable::new(&mut names);
        Self {
            names,
            files: FileTable::default(),
            symbols,
            errors: queue.sink(),
            frozen: false,
        }
    }

    // ===== files =====

    pub fn enter_file(&mut self, path: impl Into<String>, source: impl Into<String>) -> FileRef {
        self.files.enter(File::new(path.into(), source.into()))
    }

    pub fn file(&self, id: FileRef) -> &File {
        self.files.get(id)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn files(&self) -> impl Iterator<Item = (FileRef, &File)> {
        self.files.iter()
    }

    /// Applies a driver-side strictness override, winning over the sigil.
    pub fn override_strictness(&mut self, id: FileRef, level: StrictLevel) {
        self.files.get_mut(id).strict = level;
    }

    // ===== names =====

    pub fn enter_name_utf8(&mut self, text: &str) -> NameRef {
        debug_assert!(!self.frozen, "interning into a frozen GlobalState");
        self.names.enter_utf8(text)
    }

    pub fn enter_name_constant(&mut self, text: &str) -> NameRef {
        debug_assert!(!self.frozen, "interning into a frozen GlobalState");
        self.names.enter_constant(text)
    }

    /// Creates a fresh generated name; the per-base counter makes it unique.
    pub fn fresh_name_unique(&mut self, kind: UniqueNameKind, base: NameRef) -> NameRef {
        debug_assert!(!self.frozen, "interning into a frozen GlobalState");
        self.names.fresh_unique(kind, base)
    }

    /// Interns a generated name with a caller-chosen counter value. Used by
    /// phases that keep their own deterministic per-file counters.
    pub fn enter_name_unique(&mut self, kind: UniqueNameKind, base: NameRef, num: u32) -> NameRef {
        debug_assert!(!self.frozen, "interning into a frozen GlobalState");
        self.names.enter_unique(kind, base, num)
    }

    pub fn show_name(&self, name: NameRef) -> String {
        self.names.show(name)
    }

    /// Read-only lookup of an already-interned constant name.
    pub fn names_peek_constant(&self, text: &str) -> Option<NameRef> {
        self.names.peek_constant(text)
    }

    // ===== symbols =====

    pub fn symbol(&self, id: SymbolRef) -> &Symbol {
        self.symbols.get(id)
    }

    pub fn symbol_mut(&mut self, id: SymbolRef) -> &mut Symbol {
        debug_assert!(!self.frozen, "mutating a frozen symbol table");
        self.symbols.get_mut(id)
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    pub fn member(&self, owner: SymbolRef, name: NameRef) -> Option<SymbolRef> {
        self.symbols.member(owner, name)
    }

    pub fn enter_class_symbol(&mut self, owner: SymbolRef, name: NameRef, flags: SymbolFlags, loc: Loc) -> SymbolRef {
        debug_assert!(!self.frozen, "mutating a frozen symbol table");
        self.symbols.enter_class_symbol(owner, name, flags, loc)
    }

    pub fn enter_method_symbol(&mut self, owner: SymbolRef, name: NameRef, loc: Loc) -> (SymbolRef, bool) {
        debug_assert!(!self.frozen, "mutating a frozen symbol table");
        self.symbols.enter_method_symbol(owner, name, loc)
    }

    pub fn enter_method_argument(
        &mut self,
        method: SymbolRef,
        name: NameRef,
        flags: SymbolFlags,
        shadow: bool,
        loc: Loc,
    ) -> SymbolRef {
        debug_assert!(!self.frozen, "mutating a frozen symbol table");
        self.symbols.enter_method_argument(method, name, flags, shadow, loc)
    }

    pub fn enter_field_symbol(&mut self, owner: SymbolRef, name: NameRef, flags: SymbolFlags, loc: Loc) -> SymbolRef {
        debug_assert!(!self.frozen, "mutating a frozen symbol table");
        self.symbols.enter_field_symbol(owner, name, flags, loc)
    }

    pub fn singleton_class(&mut self, class_sym: SymbolRef, loc: Loc) -> SymbolRef {
        debug_assert!(!self.frozen, "mutating a frozen symbol table");
        self.symbols.singleton_class(class_sym, loc)
    }

    pub fn resolve_method(&self, class_sym: SymbolRef, name: NameRef) -> Option<SymbolRef> {
        self.symbols.resolve_method(class_sym, name)
    }

    pub fn derives_from(&self, sub: SymbolRef, ancestor: SymbolRef) -> bool {
        self.symbols.derives_from(sub, ancestor)
    }

    pub fn show_symbol(&self, id: SymbolRef) -> String {
        self.symbols.show_full_name(&self.names, id)
    }

    /// Deterministic dump of the whole symbol table, one line per symbol. Backs the
    /// `--print symbol-table` output and the parallel-equivalence tests.
    pub fn show_symbol_table(&self) -> String {
        let mut out = String::new();
        for (id, sym) in self.symbols.iter() {
            if id == SymbolRef::NONE {
                continue;
            }
            let kind = if sym.flags.is_method() {
                "method"
            } else if sym.flags.has(SymbolFlags::METHOD_ARGUMENT) {
                "arg"
            } else if sym.flags.is_field() {
                "field"
            } else if sym.flags.is_static_field() {
                "static-field"
            } else if sym.flags.has(SymbolFlags::MODULE) {
                "module"
            } else {
                "class"
            };
            out.push_str(&format!("{} {}\n", kind, self.show_full_name_or_arg(id)));
        }
        out
    }

    fn show_full_name_or_arg(&self, id: SymbolRef) -> String {
        let sym = self.symbols.get(id);
        if sym.flags.has(SymbolFlags::METHOD_ARGUMENT) {
            format!(
                "{}({})",
                self.symbols.show_full_name(&self.names, sym.owner),
                self.names.show(sym.name)
            )
        } else {
            self.symbols.show_full_name(&self.names, id)
        }
    }

    // ===== freezing =====

    /// Freezes the name and symbol tables. Frozen state is safe to share across
    /// threads for reading.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Runs `f` with the tables unfrozen, restoring the previous frozen state on
    /// exit. This is the scoped capability the resolver uses; enter/exit always
    /// pair.
    pub fn with_unfrozen<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let was_frozen = self.frozen;
        self.frozen = false;
        let result = f(self);
        self.frozen = was_frozen;
        result
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    // ===== errors =====

    /// Reports an error unless the target file's strictness silences its class.
    pub fn report(&self, error: Error) {
        if error.loc.exists() {
            let strict = self.files.get(error.loc.file).strict;
            if strict < error.class.min_level {
                return;
            }
        }
        self.errors.push(error);
    }

    // ===== worker support =====

    /// Creates an independent copy for a worker thread. The copy shares the error
    /// queue (it is MPSC) but owns private name/file/symbol tables.
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }

    /// Merges a worker's newly interned names back into this canonical state,
    /// returning the substitution table mapping worker ids into ours.
    ///
    /// Workers only intern names (desugar temporaries and identifiers); files and
    /// symbols are entered on the canonical state before fan-out, so names are the
    /// only table that needs translating.
    pub fn merge_names_from(&mut self, worker: &Self) -> Vec<NameRef> {
        debug_assert!(!self.frozen, "merging into a frozen GlobalState");
        worker.names.substitution_into(&mut self.names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::classes;

    #[test]
    fn report_silences_below_min_level() {
        let mut queue = ErrorQueue::new();
        let mut gs = GlobalState::new(&queue);
        let file = gs.enter_file("a.rb", "# typed: false\nx = 1\n");
        // Infer errors require `true`; this file is `false`.
        gs.report(Error::new(
            classes::infer::UNKNOWN_METHOD,
            Loc::new(file, 0, 1),
            "nope",
        ));
        assert!(queue.is_empty());

        gs.override_strictness(file, StrictLevel::True);
        gs.report(Error::new(
            classes::infer::UNKNOWN_METHOD,
            Loc::new(file, 0, 1),
            "yes",
        ));
        assert_eq!(queue.flush_file(file).len(), 1);
    }

    #[test]
    fn worker_merge_translates_names() {
        let queue = ErrorQueue::new();
        let mut gs = GlobalState::new(&queue);
        gs.enter_name_utf8("main_only");

        let mut worker = gs.deep_copy();
        let w_name = worker.enter_name_utf8("from_worker");

        let mapping = gs.merge_names_from(&worker);
        assert_eq!(gs.show_name(mapping[w_name.index()]), "from_worker");
    }

    #[test]
    fn with_unfrozen_restores_frozen_state() {
        let queue = ErrorQueue::new();
        let mut gs = GlobalState::new(&queue);
        gs.freeze();
        gs.with_unfrozen(|gs| {
            gs.enter_name_utf8("during");
        });
        assert!(gs.is_frozen());
    }
}
