#![doc = include_str!("../../../README.md")]

mod ast;
mod cfg;
mod desugar;
mod errors;
mod files;
mod global_state;
mod infer;
mod intern;
mod loc;
mod namer;
mod parser;
mod pipeline;
mod resolver;
mod symbols;
mod types;

pub use crate::{
    ast::{CastKind, ClassKind, Expr, ExprKind, IdentKind, LocalVariable},
    cfg::{BasicBlock, Binding, BlockExit, Cfg, DEAD_BLOCK, DebugPosition, ENTRY_BLOCK, Instruction, build_method_cfg},
    desugar::desugar_file,
    errors::{Error, ErrorClass, ErrorQueue, ErrorSection, classes},
    files::{File, StrictLevel, scan_sigil},
    global_state::GlobalState,
    infer::{Environment, TypeAndOrigins},
    intern::{NameRef, UniqueNameKind, WellKnownName},
    loc::{FileRef, LineCol, Loc},
    parser::{Node, parse_file},
    pipeline::{FileResult, Options, typecheck},
    symbols::{Symbol, SymbolFlags, SymbolRef, Visibility},
    types::{LiteralValue, Type, can_be_falsy, can_be_truthy, drop_subtypes_of, glb, is_subtype, lub},
};

pub use crate::{namer::run as run_namer, resolver::run as run_resolver};

pub use crate::infer::run as run_inference;
