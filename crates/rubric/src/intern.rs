//! Name interning.
//!
//! Every identifier the pipeline touches is deduplicated into a [`NameRef`], an index
//! into `GlobalState`'s name table. Comparisons are integer equality and hashing is
//! trivial, which avoids pointer-stability problems when the table grows.
//!
//! Names come in three kinds, distinguished at creation and preserved thereafter:
//!
//! * **UTF8** - raw source text,
//! * **Constant** - a constant/module/class name, conceptually `constantify(utf8)`,
//! * **Unique** - a generated name carrying a kind tag, a base name, and a per-base
//!   monotonically increasing counter. Used for compiler temporaries.
//!
//! NameRefs are laid out as follows:
//! * 0 - the reserved no-name sentinel
//! * 1 to count(WellKnownName) - pre-interned well-known names
//! * beyond - names interned per run

use ahash::AHashMap;
use strum::{EnumCount, EnumIter, IntoStaticStr};

/// Index into the name table.
///
/// Uses `u32` to save space (4 bytes vs 8 for `usize`). This limits us to ~4 billion
/// unique names, which is more than sufficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, serde::Serialize, serde::Deserialize)]
pub struct NameRef(u32);

impl NameRef {
    /// The reserved "no name" sentinel at index 0.
    pub const NO_NAME: Self = Self(0);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn exists(self) -> bool {
        self != Self::NO_NAME
    }

    fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).expect("name table overflow"))
    }
}

impl From<WellKnownName> for NameRef {
    /// Well-known names are interned at construction in enum order, so the
    /// discriminant maps directly to a table index.
    fn from(name: WellKnownName) -> Self {
        Self(name as u32 + 1)
    }
}

/// Names the pipeline itself refers to, pre-interned so phases can compare against
/// them without a lookup.
///
/// Uses strum's per-variant serialization for the source spelling, the same pattern
/// as a static-string table: the enum variant is the identity, `into()` gives the
/// text.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, EnumCount, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum WellKnownName {
    // ==========================
    // Structure and sentinels
    #[strum(serialize = "<root>")]
    Root,
    #[strum(serialize = "<none>")]
    NoSymbolName,
    #[strum(serialize = "<todo sym>")]
    StubName,
    #[strum(serialize = "<singleton>")]
    Singleton,
    #[strum(serialize = "<block>")]
    BlockTemp,
    #[strum(serialize = "<cfg>")]
    CfgTemp,
    #[strum(serialize = "<self>")]
    SelfTemp,
    #[strum(serialize = "<finalReturn>")]
    FinalReturn,
    #[strum(serialize = "<blockCall>")]
    BlockCall,
    #[strum(serialize = "<statTemp>")]
    StatTemp,
    #[strum(serialize = "<returnTemp>")]
    ReturnTemp,
    #[strum(serialize = "<condTemp>")]
    CondTemp,
    #[strum(serialize = "<andAnd>")]
    AndAnd,
    #[strum(serialize = "<orOr>")]
    OrOr,
    #[strum(serialize = "<csend>")]
    CsendTemp,
    #[strum(serialize = "<opAsgn>")]
    OpAsgnTemp,
    #[strum(serialize = "<assignTemp>")]
    AssignTemp,
    #[strum(serialize = "<destructure>")]
    DestructureArg,
    #[strum(serialize = "<rescueTemp>")]
    RescueTemp,
    #[strum(serialize = "<exceptionValue>")]
    ExceptionValue,
    #[strum(serialize = "<blockPassTemp>")]
    BlockPassTemp,
    #[strum(serialize = "<forTemp>")]
    ForTemp,
    #[strum(serialize = "<caseTemp>")]
    CaseTemp,
    #[strum(serialize = "<hashTemp>")]
    HashTemp,
    #[strum(serialize = "<arrayTemp>")]
    ArrayTemp,
    #[strum(serialize = "<argTemp>")]
    ArgTemp,
    #[strum(serialize = "<recvTemp>")]
    RecvTemp,
    #[strum(serialize = "<whileTemp>")]
    WhileTemp,

    // ==========================
    // Magic receiver and its operations
    #[strum(serialize = "<Magic>")]
    Magic,
    #[strum(serialize = "<call-with-splat>")]
    CallWithSplat,
    #[strum(serialize = "<expand-splat>")]
    ExpandSplat,
    #[strum(serialize = "<build-hash>")]
    BuildHash,
    #[strum(serialize = "<build-array>")]
    BuildArray,
    #[strum(serialize = "<defined?>")]
    DefinedP,

    // ==========================
    // Classes referenced by desugar and inference
    #[strum(serialize = "Object")]
    Object,
    #[strum(serialize = "BasicObject")]
    BasicObject,
    #[strum(serialize = "Kernel")]
    Kernel,
    #[strum(serialize = "NilClass")]
    NilClass,
    #[strum(serialize = "TrueClass")]
    TrueClass,
    #[strum(serialize = "FalseClass")]
    FalseClass,
    #[strum(serialize = "Boolean")]
    Boolean,
    #[strum(serialize = "Integer")]
    Integer,
    #[strum(serialize = "Float")]
    Float,
    #[strum(serialize = "String")]
    String,
    #[strum(serialize = "Symbol")]
    Symbol,
    #[strum(serialize = "Array")]
    Array,
    #[strum(serialize = "Hash")]
    Hash,
    #[strum(serialize = "Range")]
    Range,
    #[strum(serialize = "Regexp")]
    Regexp,
    #[strum(serialize = "Proc")]
    Proc,
    #[strum(serialize = "StandardError")]
    StandardError,
    #[strum(serialize = "Exception")]
    Exception,
    #[strum(serialize = "T")]
    T,

    // ==========================
    // Methods the pipeline gives special meaning
    #[strum(serialize = "nil?")]
    NilP,
    #[strum(serialize = "is_a?")]
    IsAP,
    #[strum(serialize = "kind_of?")]
    KindOfP,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "===")]
    TripleEq,
    #[strum(serialize = "!")]
    Bang,
    #[strum(serialize = "[]")]
    SquareBrackets,
    #[strum(serialize = "[]=")]
    SquareBracketsEq,
    #[strum(serialize = "+")]
    Plus,
    #[strum(serialize = "-")]
    Minus,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = "<=")]
    LtEq,
    #[strum(serialize = ">=")]
    GtEq,
    Each,
    Concat,
    Merge,
    ToS,
    ToA,
    ToH,
    ToProc,
    Intern,
    Call,
    New,
    Initialize,
    Slice,
    Super,
    HardAssert,
    Raise,
    Let,
    Cast,
    AssertType,

    // ==========================
    // DSL-ish methods namer recognizes
    Include,
    Private,
    Protected,
    Public,
    PrivateClassMethod,
    ModuleFunction,
    AliasMethod,
    AttrReader,
    AttrWriter,
    AttrAccessor,
}

/// The tag carried by a Unique name, recording which lowering created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, serde::Serialize, serde::Deserialize)]
pub enum UniqueNameKind {
    /// Desugar-created temporaries (and/or, csend, op-assign, splats, ...).
    Desugar,
    /// Names invented while flattening `class << self` into a nested class.
    Singleton,
    /// Temporaries the CFG builder introduces during the lowering walk.
    Cfg,
    /// The per-rescue-case exception binding when the user did not name one.
    Rescue,
    /// Block and destructuring argument positions without a user name.
    DestructureArg,
    /// Namer-synthesized aliases (`module_function` singleton copies).
    Namer,
    /// Resolver-synthesized stubs for unresolvable constants.
    ResolverStub,
}

/// Storage for one interned name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NameData {
    /// Raw source text.
    Utf8(Box<str>),
    /// A constant name wrapping its UTF8 spelling.
    Constant(NameRef),
    /// A generated name: kind tag, base name, and per-base counter.
    Unique {
        kind: UniqueNameKind,
        base: NameRef,
        num: u32,
    },
}

/// The name interner: an append-only table plus reverse maps for deduplication.
///
/// Names are never deleted. Worker GlobalState copies extend their own clone of the
/// table; the pipeline merges them back via [`NameTable::substitution_into`].
#[derive(Debug, Clone)]
pub(crate) struct NameTable {
    names: Vec<NameData>,
    utf8_map: AHashMap<Box<str>, NameRef>,
    constant_map: AHashMap<NameRef, NameRef>,
    unique_map: AHashMap<(UniqueNameKind, NameRef, u32), NameRef>,
    /// Next counter value per (kind, base) pair for fresh unique names.
    unique_counters: AHashMap<(UniqueNameKind, NameRef), u32>,
}

impl NameTable {
    /// Creates a table with the no-name sentinel and all well-known names seeded.
    pub fn new() -> Self {
        let mut table = Self {
            names: vec![NameData::Utf8("".into())],
            utf8_map: AHashMap::new(),
            constant_map: AHashMap::new(),
            unique_map: AHashMap::new(),
            unique_counters: AHashMap::new(),
        };
        for name in <WellKnownName as strum::IntoEnumIterator>::iter() {
            let text: &'static str = name.into();
            let entered = table.enter_utf8(text);
            debug_assert_eq!(entered, NameRef::from(name), "well-known name layout drifted");
        }
        table
    }

    pub(crate) fn data(&self, name: NameRef) -> &NameData {
        &self.names[name.index()]
    }

    /// Interns raw source text, returning the existing id when already present.
    pub fn enter_utf8(&mut self, text: &str) -> NameRef {
        if let Some(&existing) = self.utf8_map.get(text) {
            return existing;
        }
        let id = NameRef::from_index(self.names.len());
        let boxed: Box<str> = text.into();
        self.names.push(NameData::Utf8(boxed.clone()));
        self.utf8_map.insert(boxed, id);
        id
    }

    /// Read-only lookup of a constant name; `None` when never interned.
    pub fn peek_constant(&self, base: &str) -> Option<NameRef> {
        let utf8 = self.utf8_map.get(base)?;
        self.constant_map.get(utf8).copied()
    }

    /// Interns the constant form of a UTF8 name.
    pub fn enter_constant(&mut self, base: &str) -> NameRef {
        let utf8 = self.enter_utf8(base);
        if let Some(&existing) = self.constant_map.get(&utf8) {
            return existing;
        }
        let id = NameRef::from_index(self.names.len());
        self.names.push(NameData::Constant(utf8));
        self.constant_map.insert(utf8, id);
        id
    }

    /// Creates a fresh Unique name for `(kind, base)`, advancing that pair's counter.
    pub fn fresh_unique(&mut self, kind: UniqueNameKind, base: NameRef) -> NameRef {
        let counter = self.unique_counters.entry((kind, base)).or_insert(1);
        let num = *counter;
        *counter += 1;
        self.enter_unique(kind, base, num)
    }

    /// Interns a Unique name with an explicit counter value.
    ///
    /// Used by `fresh_unique` and by substitution merges, which must reproduce a
    /// worker's exact counter values rather than allocate new ones.
    pub fn enter_unique(&mut self, kind: UniqueNameKind, base: NameRef, num: u32) -> NameRef {
        if let Some(&existing) = self.unique_map.get(&(kind, base, num)) {
            return existing;
        }
        let id = NameRef::from_index(self.names.len());
        self.names.push(NameData::Unique { kind, base, num });
        self.unique_map.insert((kind, base, num), id);
        // Keep the fresh counter ahead of explicitly entered values so later
        // fresh_unique calls cannot collide after a merge.
        let counter = self.unique_counters.entry((kind, base)).or_insert(1);
        if *counter <= num {
            *counter = num + 1;
        }
        id
    }

    /// Renders a name for human consumption.
    pub fn show(&self, name: NameRef) -> String {
        match self.data(name) {
            NameData::Utf8(text) => text.to_string(),
            NameData::Constant(base) => self.show(*base),
            NameData::Unique { kind, base, num } => {
                let tag: &'static str = (*kind).into();
                format!("{}${}{}", self.show(*base), tag, num)
            }
        }
    }

    /// Computes a substitution from `self`'s ids into `target`, interning any names
    /// `target` is missing.
    ///
    /// Entries are processed in id order, so a Constant or Unique name's base is
    /// always translated before its dependents (bases have smaller ids by
    /// construction).
    pub fn substitution_into(&self, target: &mut Self) -> Vec<NameRef> {
        let mut mapping = Vec::with_capacity(self.names.len());
        for data in &self.names {
            let mapped = match data {
                NameData::Utf8(text) => target.enter_utf8(text),
                NameData::Constant(base) => {
                    let base = mapping[base.index()];
                    let text = match target.data(base) {
                        NameData::Utf8(text) => text.to_string(),
                        _ => unreachable!("constant name base must be utf8"),
                    };
                    target.enter_constant(&text)
                }
                NameData::Unique { kind, base, num } => {
                    let base = mapping[base.index()];
                    target.enter_unique(*kind, base, *num)
                }
            };
            mapping.push(mapped);
        }
        mapping
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_names_deduplicate() {
        let mut table = NameTable::new();
        let a = table.enter_utf8("foo");
        let b = table.enter_utf8("foo");
        assert_eq!(a, b);
        assert_ne!(a, table.enter_utf8("bar"));
    }

    #[test]
    fn well_known_names_are_stable() {
        let table = NameTable::new();
        assert_eq!(table.show(WellKnownName::NilP.into()), "nil?");
        assert_eq!(table.show(WellKnownName::Root.into()), "<root>");
        assert_eq!(table.show(WellKnownName::CallWithSplat.into()), "<call-with-splat>");
    }

    #[test]
    fn constant_names_wrap_utf8() {
        let mut table = NameTable::new();
        let c1 = table.enter_constant("Foo");
        let c2 = table.enter_constant("Foo");
        let utf8 = table.enter_utf8("Foo");
        assert_eq!(c1, c2);
        assert_ne!(c1, utf8);
        assert_eq!(table.show(c1), "Foo");
    }

    #[test]
    fn unique_names_count_per_base() {
        let mut table = NameTable::new();
        let base = table.enter_utf8("tmp");
        let other = table.enter_utf8("other");
        let u1 = table.fresh_unique(UniqueNameKind::Desugar, base);
        let u2 = table.fresh_unique(UniqueNameKind::Desugar, base);
        let o1 = table.fresh_unique(UniqueNameKind::Desugar, other);
        assert_ne!(u1, u2);
        assert_eq!(table.show(u1), "tmp$Desugar1");
        assert_eq!(table.show(u2), "tmp$Desugar2");
        assert_eq!(table.show(o1), "other$Desugar1");
    }

    #[test]
    fn substitution_translates_new_names() {
        let mut main = NameTable::new();
        let mut worker = main.clone();
        main.enter_utf8("only_in_main");
        let w_foo = worker.enter_utf8("foo");
        let w_uniq = worker.fresh_unique(UniqueNameKind::Desugar, w_foo);

        let mapping = worker.substitution_into(&mut main);
        let m_foo = mapping[w_foo.index()];
        let m_uniq = mapping[w_uniq.index()];
        assert_eq!(main.show(m_foo), "foo");
        assert_eq!(main.show(m_uniq), "foo$Desugar1");
        // Well-known ids map to themselves.
        let nil_p = NameRef::from(WellKnownName::NilP);
        assert_eq!(mapping[nil_p.index()], nil_p);
    }
}
