//! The per-file pipeline and its scheduling.
//!
//! Files flow leaves-first: parse and desugar fan out across workers, each worker
//! owning a deep copy of the canonical `GlobalState`; on merge, a substitution
//! table maps the worker's name ids into the canonical table and the worker's
//! trees are rewritten through it. Naming and resolution run single-threaded (they
//! mutate the symbol table), then the state freezes and per-method CFG
//! construction plus inference fan out again over a shared reference.
//!
//! Cancellation is cooperative: a shared flag polled between files and phases.
//! Errors flow through the MPSC queue the whole time and are flushed per file at
//! the end, so output never interleaves across files.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use tracing::debug;

use crate::{
    ast::{Expr, ExprKind},
    cfg::{Cfg, build_method_cfg},
    desugar,
    errors::{Error, ErrorQueue},
    files::StrictLevel,
    global_state::GlobalState,
    infer,
    intern::NameRef,
    loc::FileRef,
    namer, parser, resolver,
    symbols::SymbolRef,
};

/// Everything the pipeline produced for one file.
#[derive(Debug)]
pub struct FileResult {
    pub file: FileRef,
    /// The lifted, named, resolved AST.
    pub tree: Expr,
    /// One CFG per checked method, in deterministic collection order.
    pub cfgs: Vec<Cfg>,
    /// The file's whole error batch, in source order.
    pub errors: Vec<Error>,
}

/// Scheduling knobs.
#[derive(Debug, Clone)]
pub struct Options {
    pub workers: usize,
    pub cancel: Arc<AtomicBool>,
    /// Bracket every block with typing-environment snapshots for the raw-CFG
    /// dump. Off unless that dump was requested.
    pub debug_environments: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            workers: 1,
            cancel: Arc::new(AtomicBool::new(false)),
            debug_environments: false,
        }
    }
}

/// Runs the whole pipeline over `files`. See module docs.
pub fn typecheck(
    gs: &mut GlobalState,
    queue: &mut ErrorQueue,
    files: &[FileRef],
    options: &Options,
) -> Vec<FileResult> {
    let trees = index_files(gs, files, options);
    let mut trees = match trees {
        Some(trees) => trees,
        None => return Vec::new(),
    };

    if options.cancel.load(Ordering::Relaxed) {
        return Vec::new();
    }

    debug!(files = files.len(), "naming");
    for tree in &mut trees {
        namer::run(gs, tree);
    }

    if options.cancel.load(Ordering::Relaxed) {
        return Vec::new();
    }

    debug!("resolving");
    gs.with_unfrozen(|gs| resolver::run(gs, &mut trees));

    // Collect the per-method units to check, entering synthetic static-init
    // symbols for class-body code while the tables are still unfrozen.
    let mut units: Vec<MethodUnit> = Vec::new();
    for (tree, &file) in trees.iter().zip(files) {
        if gs.file(file).strict < StrictLevel::True {
            continue;
        }
        collect_units(gs, file, tree, &mut units);
    }

    gs.freeze();

    debug!(units = units.len(), "typechecking");
    let cfgs = check_units(gs, &units, options);

    // Assemble per-file results and flush each file's errors as one batch.
    let mut results: Vec<FileResult> = Vec::new();
    for (tree, &file) in trees.into_iter().zip(files) {
        let file_cfgs = cfgs
            .iter()
            .zip(&units)
            .filter(|(_, unit)| unit.file == file)
            .map(|(cfg, _)| cfg.clone())
            .collect();
        results.push(FileResult {
            file,
            tree,
            cfgs: file_cfgs,
            errors: queue.flush_file(file),
        });
    }
    results
}

/// Phase one: parse and desugar, fanned out over worker copies of the state.
/// Returns `None` on cancellation.
fn index_files(gs: &mut GlobalState, files: &[FileRef], options: &Options) -> Option<Vec<Expr>> {
    let workers = options.workers.max(1);
    debug!(files = files.len(), workers, "indexing");

    if workers == 1 {
        let mut trees = Vec::with_capacity(files.len());
        for &file in files {
            if options.cancel.load(Ordering::Relaxed) {
                return None;
            }
            trees.push(index_one(gs, file));
        }
        return Some(trees);
    }

    // Chunk by round robin; merge order is fixed by worker index, and name
    // substitution makes the result independent of the schedule.
    let results: Vec<(GlobalState, Vec<(usize, Expr)>)> = std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for worker_index in 0..workers {
            let mut worker_gs = gs.deep_copy();
            let cancel = Arc::clone(&options.cancel);
            handles.push(scope.spawn(move || {
                let mut produced = Vec::new();
                for (position, &file) in files.iter().enumerate() {
                    if position % workers != worker_index {
                        continue;
                    }
                    if cancel.load(Ordering::Relaxed) {
                        break;
                    }
                    let tree = index_one(&mut worker_gs, file);
                    produced.push((position, tree));
                }
                (worker_gs, produced)
            }));
        }
        handles.into_iter().map(|h| h.join().expect("worker panicked")).collect()
    });

    if options.cancel.load(Ordering::Relaxed) {
        return None;
    }

    let mut trees: Vec<Option<Expr>> = (0..files.len()).map(|_| None).collect();
    for (worker_gs, produced) in results {
        let mapping = gs.merge_names_from(&worker_gs);
        for (position, mut tree) in produced {
            substitute_names(&mut tree, &mapping);
            trees[position] = Some(tree);
        }
    }
    Some(trees.into_iter().map(|t| t.expect("file indexed exactly once")).collect())
}

/// Parses and desugars one file. Ignored files skip the parser entirely and
/// produce the empty lifted class definition.
fn index_one(gs: &mut GlobalState, file: FileRef) -> Expr {
    if gs.file(file).strict == StrictLevel::Ignore {
        return desugar::desugar_file(gs, file, None);
    }
    let source = gs.file(file).source.clone();
    let parsed = parser::parse_file(&source, file);
    for (loc, message) in parsed.errors {
        gs.report(Error::new(crate::errors::classes::parser::PARSER_ERROR, loc, message));
    }
    desugar::desugar_file(gs, file, parsed.node)
}

/// One method body to build and check.
struct MethodUnit {
    file: FileRef,
    symbol: SymbolRef,
    body: Expr,
}

/// Walks a resolved tree collecting method bodies, plus a synthetic
/// `<static-init>` unit per class body with executable statements.
fn collect_units(gs: &mut GlobalState, file: FileRef, tree: &Expr, units: &mut Vec<MethodUnit>) {
    match &tree.kind {
        ExprKind::ClassDef { symbol, rhs, .. } => {
            let mut leftover: Vec<Expr> = Vec::new();
            for stmt in rhs {
                match &stmt.kind {
                    ExprKind::ClassDef { .. } | ExprKind::MethodDef { .. } => collect_units(gs, file, stmt, units),
                    ExprKind::EmptyTree => {}
                    _ => {
                        leftover.push(stmt.clone());
                        // Nested defs inside expressions still get checked.
                        collect_nested_defs(gs, file, stmt, units);
                    }
                }
            }
            if !leftover.is_empty() && symbol.exists() {
                let loc = leftover[0].loc;
                let static_init_name = gs.enter_name_utf8("<static-init>");
                let (init_sym, _) = gs.enter_method_symbol(*symbol, static_init_name, loc);
                let body = if leftover.len() == 1 {
                    leftover.pop().expect("len checked")
                } else {
                    let last = leftover.pop().expect("non-empty");
                    Expr::new(
                        loc,
                        ExprKind::InsSeq {
                            stats: leftover,
                            expr: Box::new(last),
                        },
                    )
                };
                units.push(MethodUnit {
                    file,
                    symbol: init_sym,
                    body,
                });
            }
        }
        ExprKind::MethodDef { symbol, body, .. } => {
            if symbol.exists() {
                units.push(MethodUnit {
                    file,
                    symbol: *symbol,
                    body: (**body).clone(),
                });
            }
        }
        _ => collect_nested_defs(gs, file, tree, units),
    }
}

/// Finds method definitions buried in expression position (e.g. `private def m`
/// rewrites leave them at statement level, but a def can sit anywhere).
fn collect_nested_defs(gs: &mut GlobalState, file: FileRef, expr: &Expr, units: &mut Vec<MethodUnit>) {
    match &expr.kind {
        ExprKind::MethodDef { symbol, body, .. } => {
            if symbol.exists() {
                units.push(MethodUnit {
                    file,
                    symbol: *symbol,
                    body: (**body).clone(),
                });
            }
        }
        ExprKind::ClassDef { .. } => collect_units(gs, file, expr, units),
        ExprKind::InsSeq { stats, expr } => {
            for stat in stats {
                collect_nested_defs(gs, file, stat, units);
            }
            collect_nested_defs(gs, file, expr, units);
        }
        ExprKind::Assign { lhs, rhs } => {
            collect_nested_defs(gs, file, lhs, units);
            collect_nested_defs(gs, file, rhs, units);
        }
        ExprKind::If { cond, thenp, elsep } => {
            collect_nested_defs(gs, file, cond, units);
            collect_nested_defs(gs, file, thenp, units);
            collect_nested_defs(gs, file, elsep, units);
        }
        ExprKind::While { cond, body } => {
            collect_nested_defs(gs, file, cond, units);
            collect_nested_defs(gs, file, body, units);
        }
        ExprKind::Send { recv, args, block, .. } => {
            collect_nested_defs(gs, file, recv, units);
            for arg in args {
                collect_nested_defs(gs, file, arg, units);
            }
            if let Some(block) = block {
                collect_nested_defs(gs, file, &block.body, units);
            }
        }
        ExprKind::Rescue {
            body,
            cases,
            else_body,
            ensure_body,
        } => {
            collect_nested_defs(gs, file, body, units);
            for case in cases {
                collect_nested_defs(gs, file, &case.body, units);
            }
            collect_nested_defs(gs, file, else_body, units);
            collect_nested_defs(gs, file, ensure_body, units);
        }
        _ => {}
    }
}

/// Phase three: build and infer each unit, fanned out over the frozen state.
fn check_units(gs: &GlobalState, units: &[MethodUnit], options: &Options) -> Vec<Cfg> {
    let workers = options.workers.max(1);
    if workers == 1 || units.len() <= 1 {
        return units
            .iter()
            .map(|unit| {
                let mut cfg = build_method_cfg(gs, unit.symbol, &unit.body);
                if options.debug_environments {
                    cfg.add_debug_environment();
                }
                if !options.cancel.load(Ordering::Relaxed) {
                    infer::run(gs, &mut cfg);
                }
                cfg
            })
            .collect();
    }

    // Workers pull units through a shared cursor and return indexed results;
    // results land back in unit order regardless of schedule.
    let next = AtomicUsize::new(0);
    let produced: Vec<Vec<(usize, Cfg)>> = std::thread::scope(|scope| {
        let next = &next;
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let cancel = Arc::clone(&options.cancel);
            let debug_environments = options.debug_environments;
            handles.push(scope.spawn(move || {
                let mut out = Vec::new();
                loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    if index >= units.len() || cancel.load(Ordering::Relaxed) {
                        return out;
                    }
                    let unit = &units[index];
                    let mut cfg = build_method_cfg(gs, unit.symbol, &unit.body);
                    if debug_environments {
                        cfg.add_debug_environment();
                    }
                    infer::run(gs, &mut cfg);
                    out.push((index, cfg));
                }
            }));
        }
        handles.into_iter().map(|h| h.join().expect("worker panicked")).collect()
    });

    let mut slots: Vec<Option<Cfg>> = (0..units.len()).map(|_| None).collect();
    for worker_results in produced {
        for (index, cfg) in worker_results {
            slots[index] = Some(cfg);
        }
    }
    slots.into_iter().map(|s| s.expect("unit checked exactly once")).collect()
}

/// Rewrites every interned name id in a worker-produced tree through the
/// substitution computed at merge time.
fn substitute_names(expr: &mut Expr, mapping: &[NameRef]) {
    let map = |name: &mut NameRef| {
        *name = mapping[name.index()];
    };
    match &mut expr.kind {
        ExprKind::StringLit(name) | ExprKind::SymbolLit(name) => map(name),
        ExprKind::Local { var } => map(&mut var.name),
        ExprKind::UnresolvedIdent { name, .. } => map(name),
        ExprKind::UnresolvedConstant { scope, name } => {
            map(name);
            substitute_names(scope, mapping);
        }
        ExprKind::InsSeq { stats, expr } => {
            for stat in stats {
                substitute_names(stat, mapping);
            }
            substitute_names(expr, mapping);
        }
        ExprKind::Assign { lhs, rhs } => {
            substitute_names(lhs, mapping);
            substitute_names(rhs, mapping);
        }
        ExprKind::If { cond, thenp, elsep } => {
            substitute_names(cond, mapping);
            substitute_names(thenp, mapping);
            substitute_names(elsep, mapping);
        }
        ExprKind::While { cond, body } => {
            substitute_names(cond, mapping);
            substitute_names(body, mapping);
        }
        ExprKind::Send { recv, fun, args, block } => {
            map(fun);
            substitute_names(recv, mapping);
            for arg in args {
                substitute_names(arg, mapping);
            }
            if let Some(block) = block {
                for arg in &mut block.args {
                    substitute_names(arg, mapping);
                }
                substitute_names(&mut block.body, mapping);
            }
        }
        ExprKind::ClassDef { name, ancestors, rhs, .. } => {
            substitute_names(name, mapping);
            for ancestor in ancestors {
                substitute_names(ancestor, mapping);
            }
            for stmt in rhs {
                substitute_names(stmt, mapping);
            }
        }
        ExprKind::MethodDef { name, args, body, .. } => {
            map(name);
            for arg in args {
                substitute_names(arg, mapping);
            }
            substitute_names(body, mapping);
        }
        ExprKind::RestArg { inner }
        | ExprKind::KeywordArg { inner }
        | ExprKind::BlockArgNode { inner }
        | ExprKind::ShadowArg { inner } => substitute_names(inner, mapping),
        ExprKind::OptionalArg { inner, default } => {
            substitute_names(inner, mapping);
            substitute_names(default, mapping);
        }
        ExprKind::Return { expr } | ExprKind::Break { expr } | ExprKind::Next { expr } => {
            substitute_names(expr, mapping);
        }
        ExprKind::Yield { args } => {
            for arg in args {
                substitute_names(arg, mapping);
            }
        }
        ExprKind::Rescue {
            body,
            cases,
            else_body,
            ensure_body,
        } => {
            substitute_names(body, mapping);
            for case in cases {
                for exc in &mut case.exceptions {
                    substitute_names(exc, mapping);
                }
                substitute_names(&mut case.var, mapping);
                substitute_names(&mut case.body, mapping);
            }
            substitute_names(else_body, mapping);
            substitute_names(ensure_body, mapping);
        }
        ExprKind::ArrayLit { elems } => {
            for elem in elems {
                substitute_names(elem, mapping);
            }
        }
        ExprKind::HashLit { keys, values } => {
            for key in keys {
                substitute_names(key, mapping);
            }
            for value in values {
                substitute_names(value, mapping);
            }
        }
        ExprKind::Cast { expr, type_expr, .. } => {
            substitute_names(expr, mapping);
            substitute_names(type_expr, mapping);
        }
        ExprKind::EmptyTree
        | ExprKind::Nil
        | ExprKind::True
        | ExprKind::False
        | ExprKind::IntLit(_)
        | ExprKind::FloatLit(_)
        | ExprKind::SelfRef { .. }
        | ExprKind::ConstantLit { .. }
        | ExprKind::FieldRef { .. }
        | ExprKind::ZSuperArgs
        | ExprKind::Retry => {}
    }
}
