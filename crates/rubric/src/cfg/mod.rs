//! The control-flow graph IR.
//!
//! A [`Cfg`] owns its basic blocks in a vector; inter-block references are plain
//! indices, so the lifetime of every block equals the lifetime of the graph. Blocks
//! 0 and 1 are fixed: entry and dead. The dead block self-loops unconditionally and
//! is the sentinel successor for abnormal exits.
//!
//! Each block carries explicit `back_edges` (predecessor indices), maintained by
//! the builder and consumed by topological sorting, merge at joins, and loop-header
//! detection.

mod builder;
mod passes;

pub use builder::build_method_cfg;

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::{
    ast::{CastKind, LocalVariable},
    global_state::GlobalState,
    intern::NameRef,
    loc::Loc,
    symbols::SymbolRef,
    types::{BlockSignature, Type},
};

/// Index of the entry block.
pub const ENTRY_BLOCK: usize = 0;
/// Index of the dead block.
pub const DEAD_BLOCK: usize = 1;

/// `minLoops` sentinel: the local aliases an instance/class field.
pub const MIN_LOOP_FIELD: i32 = -3;
/// `minLoops` sentinel: the local aliases a global or static field.
pub const MIN_LOOP_GLOBAL: i32 = -2;
/// `minLoops` sentinel: the local was pinned by a `let` cast.
pub const MIN_LOOP_LET: i32 = -1;

/// Index of a send-and-block link in [`Cfg::links`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub u32);

/// The handshake object between a `Send` carrying a block and the
/// `LoadYieldParam` / `BlockReturn` / `SolveConstraint` instructions inside the
/// block body. Inference fills `signature` and `result_type` when it dispatches
/// the send.
#[derive(Debug, Clone, Default)]
pub struct BlockLink {
    pub fun: NameRef,
    pub signature: Option<BlockSignature>,
    pub result_type: Option<Type>,
}

/// Whether a [`Instruction::DebugEnvironment`] snapshot sits before or after a
/// block's real instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum DebugPosition {
    Before,
    After,
}

/// One instruction.
#[derive(Debug, Clone)]
pub enum Instruction {
    /// Copy another local.
    Ident(LocalVariable),
    /// The value of a symbol: class object, field, static field, or method
    /// argument default; pins the bound local.
    Alias(SymbolRef),
    /// `self`, typed as the owner's self type.
    SelfRef(SymbolRef),
    Send {
        recv: LocalVariable,
        fun: NameRef,
        args: Vec<LocalVariable>,
        link: Option<LinkId>,
    },
    Return(LocalVariable),
    BlockReturn {
        link: LinkId,
        what: LocalVariable,
    },
    /// The `idx`-th declared argument of the enclosing method.
    LoadArg {
        recv: LocalVariable,
        method: SymbolRef,
        arg_idx: usize,
    },
    /// The `idx`-th parameter the block receives from its send.
    LoadYieldParam {
        link: LinkId,
        arg_idx: usize,
    },
    /// A literal, carried as its (singleton) type.
    Lit(Type),
    Cast {
        value: LocalVariable,
        ty: Type,
        kind: CastKind,
    },
    /// Reads the resolved block result off the link after the send completes.
    SolveConstraint(LinkId),
    /// Control or data flow the IR does not model (exception edges, `yield`).
    Unanalyzable,
    /// Snapshot of the typing environment for the raw-CFG dump; inserted only
    /// when that dump is requested, and filled in by inference.
    DebugEnvironment {
        pos: DebugPosition,
        text: Option<String>,
    },
}

/// One `bind target = instruction` entry.
#[derive(Debug, Clone)]
pub struct Binding {
    pub bind: LocalVariable,
    pub loc: Loc,
    pub value: Instruction,
    /// Filled in by inference.
    pub computed_type: Option<Type>,
}

impl Binding {
    pub fn new(bind: LocalVariable, loc: Loc, value: Instruction) -> Self {
        Self {
            bind,
            loc,
            value,
            computed_type: None,
        }
    }
}

/// A block's terminator. Unconditional iff `thenb == elseb`, in which case `cond`
/// is the no-variable sentinel.
#[derive(Debug, Clone)]
pub struct BlockExit {
    pub cond: LocalVariable,
    pub thenb: usize,
    pub elseb: usize,
    pub loc: Loc,
}

impl BlockExit {
    /// Sentinel for "not yet set"; the builder's sanity check rejects any block
    /// still carrying it.
    pub(crate) fn unset() -> Self {
        Self {
            cond: LocalVariable::none(),
            thenb: usize::MAX,
            elseb: usize::MAX,
            loc: Loc::NONE,
        }
    }

    pub fn is_cond_set(&self) -> bool {
        self.thenb != usize::MAX
    }

    pub fn is_unconditional(&self) -> bool {
        self.thenb == self.elseb
    }
}

/// Flag bits on a basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockFlags(u8);

impl BlockFlags {
    pub const LOOP_HEADER: Self = Self(1 << 0);
    /// Unreachable after topo sorting; skipped by every later pass.
    pub const PRUNED: Self = Self(1 << 1);

    #[must_use]
    pub fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn has(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// See module docs.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: usize,
    /// Locals that must flow in from predecessors (the phi inputs).
    pub args: Vec<LocalVariable>,
    pub exprs: Vec<Binding>,
    pub bexit: BlockExit,
    /// Predecessor block ids; kept sorted so outer-loop predecessors come first.
    pub back_edges: SmallVec<[usize; 2]>,
    /// Loop nesting depth of the code in this block.
    pub outer_loops: u32,
    pub flags: BlockFlags,
}

impl BasicBlock {
    fn new(id: usize, outer_loops: u32) -> Self {
        Self {
            id,
            args: Vec::new(),
            exprs: Vec::new(),
            bexit: BlockExit::unset(),
            back_edges: SmallVec::new(),
            outer_loops,
            flags: BlockFlags::default(),
        }
    }

    pub fn is_pruned(&self) -> bool {
        self.flags.has(BlockFlags::PRUNED)
    }
}

/// A per-method control-flow graph.
#[derive(Debug, Clone)]
pub struct Cfg {
    pub symbol: SymbolRef,
    pub blocks: Vec<BasicBlock>,
    pub links: Vec<BlockLink>,
    /// Reverse-postorder from entry: parents before children; covers everything
    /// reachable from entry.
    pub forwards_topo: Vec<usize>,
    /// The blocks that can reach the dead block, in the same parents-first order,
    /// with any remaining live blocks appended. This is the iteration order for
    /// dealiasing and inference: parents before children, loop headers before
    /// their bodies.
    pub backwards_topo: Vec<usize>,
    pub min_loops: AHashMap<LocalVariable, i32>,
    pub max_loop_write: AHashMap<LocalVariable, i32>,
}

impl Cfg {
    pub(crate) fn new(symbol: SymbolRef) -> Self {
        let entry = BasicBlock::new(ENTRY_BLOCK, 0);
        let mut dead = BasicBlock::new(DEAD_BLOCK, 0);
        // The dead block self-loops unconditionally.
        dead.bexit = BlockExit {
            cond: LocalVariable::none(),
            thenb: DEAD_BLOCK,
            elseb: DEAD_BLOCK,
            loc: Loc::NONE,
        };
        dead.back_edges.push(DEAD_BLOCK);
        Self {
            symbol,
            blocks: vec![entry, dead],
            links: Vec::new(),
            forwards_topo: Vec::new(),
            backwards_topo: Vec::new(),
            min_loops: AHashMap::new(),
            max_loop_write: AHashMap::new(),
        }
    }

    pub(crate) fn new_block(&mut self, outer_loops: u32) -> usize {
        let id = self.blocks.len();
        self.blocks.push(BasicBlock::new(id, outer_loops));
        id
    }

    pub(crate) fn new_link(&mut self, fun: NameRef) -> LinkId {
        let id = LinkId(u32::try_from(self.links.len()).expect("link table overflow"));
        self.links.push(BlockLink {
            fun,
            signature: None,
            result_type: None,
        });
        id
    }

    pub fn link(&self, id: LinkId) -> &BlockLink {
        &self.links[id.0 as usize]
    }

    pub(crate) fn link_mut(&mut self, id: LinkId) -> &mut BlockLink {
        &mut self.links[id.0 as usize]
    }

    // ===== printers =====

    /// Compact, deterministic text form backing the golden tests.
    pub fn show(&self, gs: &GlobalState) -> String {
        self.show_impl(gs, false)
    }

    /// Richer form with computed types and fully qualified names.
    pub fn show_raw(&self, gs: &GlobalState) -> String {
        self.show_impl(gs, true)
    }

    fn show_impl(&self, gs: &GlobalState, raw: bool) -> String {
        let mut out = String::new();
        out.push_str(&format!("cfg {}\n", gs.show_symbol(self.symbol)));
        for block in &self.blocks {
            if block.is_pruned() {
                continue;
            }
            let header_marker = if block.flags.has(BlockFlags::LOOP_HEADER) {
                " [loop-header]"
            } else {
                ""
            };
            let args: Vec<String> = block.args.iter().map(|a| a.show(gs)).collect();
            out.push_str(&format!(
                "bb{}({}) loops={}{}\n",
                block.id,
                args.join(", "),
                block.outer_loops,
                header_marker
            ));
            for binding in &block.exprs {
                let ty = match (&binding.computed_type, raw) {
                    (Some(ty), true) => format!(" : {}", ty.show(gs)),
                    _ => String::new(),
                };
                out.push_str(&format!(
                    "    {} = {}{}\n",
                    binding.bind.show(gs),
                    self.show_instruction(gs, &binding.value),
                    ty
                ));
            }
            if block.bexit.is_cond_set() {
                if block.bexit.is_unconditional() {
                    out.push_str(&format!("    -> bb{}\n", block.bexit.thenb));
                } else {
                    out.push_str(&format!(
                        "    {} ? bb{} : bb{}\n",
                        block.bexit.cond.show(gs),
                        block.bexit.thenb,
                        block.bexit.elseb
                    ));
                }
            }
        }
        out
    }

    fn show_instruction(&self, gs: &GlobalState, instruction: &Instruction) -> String {
        match instruction {
            Instruction::Ident(v) => format!("Ident({})", v.show(gs)),
            Instruction::Alias(sym) => format!("Alias({})", gs.show_symbol(*sym)),
            Instruction::SelfRef(sym) => format!("Self({})", gs.show_symbol(*sym)),
            Instruction::Send { recv, fun, args, link } => {
                let args: Vec<String> = args.iter().map(|a| a.show(gs)).collect();
                let link_marker = if link.is_some() { " {block}" } else { "" };
                format!(
                    "Send({}.{}({})){}",
                    recv.show(gs),
                    gs.show_name(*fun),
                    args.join(", "),
                    link_marker
                )
            }
            Instruction::Return(v) => format!("Return({})", v.show(gs)),
            Instruction::BlockReturn { what, .. } => format!("BlockReturn({})", what.show(gs)),
            Instruction::LoadArg { method, arg_idx, .. } => {
                format!("LoadArg({}, {})", gs.show_symbol(*method), arg_idx)
            }
            Instruction::LoadYieldParam { arg_idx, .. } => format!("LoadYieldParam({arg_idx})"),
            Instruction::Lit(ty) => format!("Lit({})", ty.show(gs)),
            Instruction::Cast { value, ty, kind } => {
                let kind_text: &'static str = (*kind).into();
                format!("Cast[{kind_text}]({}, {})", value.show(gs), ty.show(gs))
            }
            Instruction::SolveConstraint(_) => "SolveConstraint".to_owned(),
            Instruction::Unanalyzable => "Unanalyzable".to_owned(),
            Instruction::DebugEnvironment { pos, text } => {
                let pos_text: &'static str = (*pos).into();
                match text {
                    Some(text) => format!("DebugEnvironment[{pos_text}] {{{text}}}"),
                    None => format!("DebugEnvironment[{pos_text}]"),
                }
            }
        }
    }

    /// Brackets every live block's instructions with environment snapshots.
    ///
    /// Runs after the build passes and before inference, only when the raw dump
    /// is requested; the snapshots bind the no-variable sentinel and are invisible
    /// to every analysis.
    pub fn add_debug_environment(&mut self) {
        for block in &mut self.blocks {
            if block.is_pruned() || block.id == DEAD_BLOCK {
                continue;
            }
            let head_loc = block.exprs.first().map_or(block.bexit.loc, |b| b.loc);
            block.exprs.insert(
                0,
                Binding::new(
                    LocalVariable::none(),
                    head_loc,
                    Instruction::DebugEnvironment {
                        pos: DebugPosition::Before,
                        text: None,
                    },
                ),
            );
            block.exprs.push(Binding::new(
                LocalVariable::none(),
                block.bexit.loc,
                Instruction::DebugEnvironment {
                    pos: DebugPosition::After,
                    text: None,
                },
            ));
        }
    }
}
