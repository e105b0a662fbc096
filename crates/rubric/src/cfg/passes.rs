//! Post-construction passes over a freshly built CFG.
//!
//! Order matters and is fixed: sanity check, topological sorts (with unreachable
//! pruning), dealiasing, read/write collection, loop-bound computation, dead-assign
//! removal, block-argument inference, chain simplification, and loop-header
//! marking. Simplification invalidates the sorts, so they are refreshed before
//! loop headers are marked.

use ahash::{AHashMap, AHashSet};

use super::{BlockFlags, Cfg, DEAD_BLOCK, ENTRY_BLOCK, Instruction, MIN_LOOP_FIELD, MIN_LOOP_GLOBAL};
use crate::{
    ast::LocalVariable,
    errors::{Error, classes},
    global_state::GlobalState,
};

pub(crate) fn run(gs: &GlobalState, cfg: &mut Cfg) {
    sanity_check(gs, cfg);
    fill_in_topo_sorts(cfg);
    dealias(cfg);
    let rw = find_all_reads_and_writes(cfg);
    compute_min_max_loops(cfg, &rw);
    remove_dead_assigns(cfg, &rw);
    // Deleting assignments changes the footprint; block arguments want the
    // post-deletion view.
    let rw = find_all_reads_and_writes(cfg);
    fill_in_block_arguments(cfg, &rw);
    simplify(cfg);
    fill_in_topo_sorts(cfg);
    mark_loop_headers(cfg);
}

/// Every block either has its exit set or is provably unreached.
fn sanity_check(gs: &GlobalState, cfg: &mut Cfg) {
    for index in 0..cfg.blocks.len() {
        if cfg.blocks[index].bexit.is_cond_set() {
            continue;
        }
        if cfg.blocks[index].back_edges.is_empty() {
            // Created but never targeted: a branch whose construction died.
            cfg.blocks[index].flags = cfg.blocks[index].flags.with(BlockFlags::PRUNED);
            continue;
        }
        // Reachable but unterminated: an internal invariant broke. Recover by
        // routing to the dead block so later passes stay well-defined.
        let loc = cfg.blocks[index]
            .exprs
            .first()
            .map_or(crate::loc::Loc::NONE, |b| b.loc);
        gs.report(Error::new(
            classes::internal::INTERNAL_ERROR,
            loc,
            "basic block without terminator",
        ));
        cfg.blocks[index].bexit.thenb = DEAD_BLOCK;
        cfg.blocks[index].bexit.elseb = DEAD_BLOCK;
        cfg.blocks[DEAD_BLOCK].back_edges.push(index);
    }
}

/// Computes the forward order (reverse postorder from entry), prunes blocks the
/// entry cannot reach, fixes up back-edge lists, and derives the backward order.
fn fill_in_topo_sorts(cfg: &mut Cfg) {
    let block_count = cfg.blocks.len();

    // Forward: iterative postorder DFS over successors, then reverse.
    let mut visited = vec![false; block_count];
    let mut postorder = Vec::with_capacity(block_count);
    let mut stack: Vec<(usize, u8)> = vec![(ENTRY_BLOCK, 0)];
    while let Some((block, state)) = stack.pop() {
        match state {
            0 => {
                if visited[block] {
                    continue;
                }
                visited[block] = true;
                stack.push((block, 1));
                let exit = &cfg.blocks[block].bexit;
                if exit.is_cond_set() {
                    // Push else first so the then-branch is visited first.
                    if exit.elseb != exit.thenb && !visited[exit.elseb] {
                        stack.push((exit.elseb, 0));
                    }
                    if !visited[exit.thenb] {
                        stack.push((exit.thenb, 0));
                    }
                }
            }
            _ => postorder.push(block),
        }
    }
    postorder.reverse();
    cfg.forwards_topo = postorder;

    // Prune what entry cannot reach and drop edges from pruned blocks.
    for index in 0..block_count {
        if !visited[index] {
            cfg.blocks[index].flags = cfg.blocks[index].flags.with(BlockFlags::PRUNED);
        }
    }
    let mut position = vec![usize::MAX; block_count];
    for (pos, &block) in cfg.forwards_topo.iter().enumerate() {
        position[block] = pos;
    }
    for block in &mut cfg.blocks {
        let mut seen: AHashSet<usize> = AHashSet::new();
        let keep: Vec<usize> = block
            .back_edges
            .iter()
            .copied()
            .filter(|&p| visited[p] && seen.insert(p))
            .collect();
        block.back_edges.clear();
        block.back_edges.extend(keep);
        // Outer-loop predecessors (earlier in the forward order) come first; this
        // is what makes join-merge and loop-header detection see the forward edge
        // before the loop edge.
        block.back_edges.sort_by_key(|&p| position[p]);
    }

    // Backward: membership is "can reach the dead block", order is inherited from
    // the forward order so parents still come before children and loop headers
    // before their bodies. Live blocks that never reach dead (infinite loops)
    // append at the end.
    let mut reaches_dead = vec![false; block_count];
    let mut stack = vec![DEAD_BLOCK];
    while let Some(block) = stack.pop() {
        if reaches_dead[block] {
            continue;
        }
        reaches_dead[block] = true;
        for &pred in &cfg.blocks[block].back_edges {
            if !reaches_dead[pred] {
                stack.push(pred);
            }
        }
    }
    let mut backwards: Vec<usize> = cfg
        .forwards_topo
        .iter()
        .copied()
        .filter(|&b| reaches_dead[b])
        .collect();
    backwards.extend(cfg.forwards_topo.iter().copied().filter(|&b| !reaches_dead[b]));
    cfg.backwards_topo = backwards;
}

/// Forward copy propagation: rewrites reads through `x = y` chains.
///
/// A block's incoming alias map is the agreement-intersection of its
/// predecessors' outgoing maps; a predecessor that has not been processed yet
/// (a loop edge) forces the empty map.
fn dealias(cfg: &mut Cfg) {
    let order = cfg.backwards_topo.clone();
    let mut out_maps: Vec<Option<AHashMap<LocalVariable, LocalVariable>>> = vec![None; cfg.blocks.len()];

    for &block_id in &order {
        if block_id == DEAD_BLOCK || cfg.blocks[block_id].is_pruned() {
            continue;
        }
        let mut map: AHashMap<LocalVariable, LocalVariable> = AHashMap::new();
        let preds: Vec<usize> = cfg.blocks[block_id].back_edges.iter().copied().collect();
        let mut first = true;
        let mut any_unknown = false;
        for &pred in &preds {
            if pred == DEAD_BLOCK {
                continue;
            }
            match &out_maps[pred] {
                None => {
                    any_unknown = true;
                    break;
                }
                Some(pred_map) => {
                    if first {
                        map = pred_map.clone();
                        first = false;
                    } else {
                        map.retain(|k, v| pred_map.get(k) == Some(v));
                    }
                }
            }
        }
        if any_unknown {
            map.clear();
        }

        for binding in &mut cfg.blocks[block_id].exprs {
            // Rewrite reads through the current aliases.
            match &mut binding.value {
                Instruction::Ident(v) => {
                    if let Some(&aliased) = map.get(v) {
                        *v = aliased;
                    }
                }
                Instruction::Send { recv, args, .. } => {
                    if let Some(&aliased) = map.get(recv) {
                        *recv = aliased;
                    }
                    for arg in args.iter_mut() {
                        if let Some(&aliased) = map.get(arg) {
                            *arg = aliased;
                        }
                    }
                }
                Instruction::Return(v) => {
                    if let Some(&aliased) = map.get(v) {
                        *v = aliased;
                    }
                }
                _ => {}
            }
            // The binding kills aliases flowing through its target.
            let bound = binding.bind;
            map.retain(|k, v| *k != bound && *v != bound);
            if let Instruction::Ident(what) = &binding.value
                && *what != bound
            {
                map.insert(bound, *what);
            }
        }
        out_maps[block_id] = Some(map);
    }
}

/// Per-block read and write sets.
pub(crate) struct ReadsWrites {
    pub reads: Vec<AHashSet<LocalVariable>>,
    pub writes: Vec<AHashSet<LocalVariable>>,
}

impl ReadsWrites {
    fn block_count(&self) -> usize {
        self.reads.len()
    }
}

fn find_all_reads_and_writes(cfg: &Cfg) -> ReadsWrites {
    let block_count = cfg.blocks.len();
    let mut reads: Vec<AHashSet<LocalVariable>> = vec![AHashSet::new(); block_count];
    let mut writes: Vec<AHashSet<LocalVariable>> = vec![AHashSet::new(); block_count];

    for block in &cfg.blocks {
        if block.id == DEAD_BLOCK || block.is_pruned() {
            continue;
        }
        let block_reads = &mut reads[block.id];
        for binding in &block.exprs {
            match &binding.value {
                Instruction::Ident(v) | Instruction::Return(v) | Instruction::BlockReturn { what: v, .. } => {
                    block_reads.insert(*v);
                }
                Instruction::Send { recv, args, .. } => {
                    block_reads.insert(*recv);
                    block_reads.extend(args.iter().copied());
                }
                Instruction::Cast { value, .. } => {
                    block_reads.insert(*value);
                }
                Instruction::LoadArg { recv, .. } => {
                    block_reads.insert(*recv);
                }
                Instruction::Alias(_)
                | Instruction::SelfRef(_)
                | Instruction::LoadYieldParam { .. }
                | Instruction::Lit(_)
                | Instruction::SolveConstraint(_)
                | Instruction::Unanalyzable
                | Instruction::DebugEnvironment { .. } => {}
            }
            // A store through a field or global alias keeps the alias live even
            // with no explicit reader.
            let min = cfg.min_loops.get(&binding.bind).copied();
            if matches!(min, Some(MIN_LOOP_FIELD | MIN_LOOP_GLOBAL)) && !matches!(binding.value, Instruction::Alias(_))
            {
                block_reads.insert(binding.bind);
            }
            writes[block.id].insert(binding.bind);
        }
        if block.bexit.is_cond_set() && block.bexit.cond.exists() && block.bexit.cond != LocalVariable::block_call() {
            block_reads.insert(block.bexit.cond);
        }
    }
    ReadsWrites { reads, writes }
}

/// `minLoops[v]` is the outermost loop that touches `v`; `maxLoopWrite[v]` the
/// innermost loop that writes it. Sentinels installed by the builder survive
/// because they are below every real nesting level.
fn compute_min_max_loops(cfg: &mut Cfg, rw: &ReadsWrites) {
    for block in &cfg.blocks {
        if block.id == DEAD_BLOCK || block.is_pruned() {
            continue;
        }
        let depth = i32::try_from(block.outer_loops).unwrap_or(i32::MAX);
        for v in rw.reads[block.id].iter().chain(&rw.writes[block.id]) {
            let entry = cfg.min_loops.entry(*v).or_insert(depth);
            if depth < *entry {
                *entry = depth;
            }
        }
        for v in &rw.writes[block.id] {
            let entry = cfg.max_loop_write.entry(*v).or_insert(depth);
            if depth > *entry {
                *entry = depth;
            }
        }
    }
}

/// Deletes bindings of pure instructions whose target nothing reads.
fn remove_dead_assigns(cfg: &mut Cfg, rw: &ReadsWrites) {
    let mut read_anywhere: AHashSet<LocalVariable> = AHashSet::new();
    for block_id in 0..rw.block_count() {
        read_anywhere.extend(rw.reads[block_id].iter().copied());
    }
    let min_loops = &cfg.min_loops;
    for block in &mut cfg.blocks {
        if block.id == DEAD_BLOCK || block.is_pruned() {
            continue;
        }
        block.exprs.retain(|binding| {
            let pure = matches!(
                binding.value,
                Instruction::Lit(_) | Instruction::Ident(_) | Instruction::SelfRef(_) | Instruction::LoadArg { .. }
            );
            if !pure {
                return true;
            }
            // Field and global stores are observable regardless of local reads.
            if matches!(
                min_loops.get(&binding.bind),
                Some(&(MIN_LOOP_FIELD | MIN_LOOP_GLOBAL))
            ) {
                return true;
            }
            read_anywhere.contains(&binding.bind)
        });
    }
}

/// Computes each block's argument list: the locals that are read here or below
/// and written on some path in.
fn fill_in_block_arguments(cfg: &mut Cfg, rw: &ReadsWrites) {
    let block_count = cfg.blocks.len();

    // How many blocks touch each local, and does anything write it at all?
    let mut touching_blocks: AHashMap<LocalVariable, u32> = AHashMap::new();
    let mut written: AHashSet<LocalVariable> = AHashSet::new();
    for block_id in 0..block_count {
        let mut touched: AHashSet<LocalVariable> = AHashSet::new();
        touched.extend(rw.reads[block_id].iter().copied());
        touched.extend(rw.writes[block_id].iter().copied());
        for v in touched {
            *touching_blocks.entry(v).or_insert(0) += 1;
        }
        written.extend(rw.writes[block_id].iter().copied());
    }

    // Upper bound one: reads here or in any forward-reachable block.
    let mut upper1: Vec<AHashSet<LocalVariable>> = vec![AHashSet::new(); block_count];
    loop {
        let mut changed = false;
        for &block_id in cfg.forwards_topo.iter().rev() {
            if block_id == DEAD_BLOCK {
                continue;
            }
            let mut next: AHashSet<LocalVariable> = rw.reads[block_id].clone();
            let exit = &cfg.blocks[block_id].bexit;
            if exit.is_cond_set() {
                for succ in [exit.thenb, exit.elseb] {
                    if succ != DEAD_BLOCK {
                        next.extend(upper1[succ].iter().copied());
                    }
                }
            }
            if next.len() != upper1[block_id].len() {
                upper1[block_id] = next;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    // Upper bound two: writes here or on any path from entry.
    let mut upper2: Vec<AHashSet<LocalVariable>> = vec![AHashSet::new(); block_count];
    loop {
        let mut changed = false;
        for &block_id in &cfg.forwards_topo {
            if block_id == DEAD_BLOCK {
                continue;
            }
            let mut next: AHashSet<LocalVariable> = rw.writes[block_id].clone();
            for &pred in &cfg.blocks[block_id].back_edges {
                if pred != DEAD_BLOCK {
                    next.extend(upper2[pred].iter().copied());
                }
            }
            if next.len() != upper2[block_id].len() {
                upper2[block_id] = next;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    for block in &mut cfg.blocks {
        if block.id == ENTRY_BLOCK || block.id == DEAD_BLOCK || block.is_pruned() {
            continue;
        }
        let mut args: Vec<LocalVariable> = upper1[block.id]
            .iter()
            .filter(|v| upper2[block.id].contains(v))
            // A local confined to one block never escapes it; a local nothing
            // writes carries no value in.
            .filter(|v| touching_blocks.get(v).copied().unwrap_or(0) > 1)
            .filter(|v| written.contains(v))
            .copied()
            .collect();
        args.sort_by_key(|v| (v.name.index(), v.unique_id));
        block.args = args;
    }
}

/// Collapses `A -> B` chains where B's only predecessor is A and A exits
/// unconditionally into B.
fn simplify(cfg: &mut Cfg) {
    loop {
        let mut changed = false;
        for pred_id in 0..cfg.blocks.len() {
            if pred_id == DEAD_BLOCK || cfg.blocks[pred_id].is_pruned() {
                continue;
            }
            let exit = cfg.blocks[pred_id].bexit.clone();
            if !exit.is_cond_set() || !exit.is_unconditional() {
                continue;
            }
            let succ_id = exit.thenb;
            if succ_id == DEAD_BLOCK
                || succ_id == ENTRY_BLOCK
                || succ_id == pred_id
                || cfg.blocks[succ_id].is_pruned()
            {
                continue;
            }
            if cfg.blocks[succ_id].back_edges.len() != 1 {
                continue;
            }
            // Merging across loop depths would skew the per-block nesting that
            // inference uses for pinning.
            if cfg.blocks[succ_id].outer_loops != cfg.blocks[pred_id].outer_loops {
                continue;
            }

            // Merge succ into pred.
            let succ_exprs = std::mem::take(&mut cfg.blocks[succ_id].exprs);
            let succ_exit = cfg.blocks[succ_id].bexit.clone();
            cfg.blocks[pred_id].exprs.extend(succ_exprs);
            cfg.blocks[pred_id].bexit = succ_exit.clone();
            cfg.blocks[succ_id].flags = cfg.blocks[succ_id].flags.with(BlockFlags::PRUNED);
            cfg.blocks[succ_id].back_edges.clear();
            if succ_exit.is_cond_set() {
                for next in [succ_exit.thenb, succ_exit.elseb] {
                    for pred in &mut cfg.blocks[next].back_edges {
                        if *pred == succ_id {
                            *pred = pred_id;
                        }
                    }
                    cfg.blocks[next].back_edges.dedup();
                }
            }
            changed = true;
        }
        if !changed {
            return;
        }
    }
}

/// A block is a loop header iff some incoming edge comes from later in the
/// forward order at the same or deeper loop nesting.
fn mark_loop_headers(cfg: &mut Cfg) {
    let mut position = vec![usize::MAX; cfg.blocks.len()];
    for (pos, &block) in cfg.forwards_topo.iter().enumerate() {
        position[block] = pos;
    }
    for block_id in 0..cfg.blocks.len() {
        if block_id == DEAD_BLOCK || cfg.blocks[block_id].is_pruned() {
            continue;
        }
        let my_pos = position[block_id];
        let my_loops = cfg.blocks[block_id].outer_loops;
        let is_header = cfg.blocks[block_id]
            .back_edges
            .iter()
            .any(|&p| position[p] != usize::MAX && position[p] >= my_pos && cfg.blocks[p].outer_loops >= my_loops);
        if is_header {
            cfg.blocks[block_id].flags = cfg.blocks[block_id].flags.with(BlockFlags::LOOP_HEADER);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{desugar, errors::ErrorQueue, namer, parser, resolver};

    fn build_cfgs(source: &str) -> (crate::global_state::GlobalState, Vec<Cfg>) {
        let queue = ErrorQueue::new();
        let mut gs = crate::global_state::GlobalState::new(&queue);
        let file = gs.enter_file("test.rb", source);
        let parsed = parser::parse_file(source, file);
        let mut tree = desugar::desugar_file(&mut gs, file, parsed.node);
        namer::run(&mut gs, &mut tree);
        let mut trees = [tree];
        resolver::run(&mut gs, &mut trees);
        let [tree] = trees;

        let mut cfgs = Vec::new();
        collect(&gs, &tree, &mut cfgs);
        (gs, cfgs)
    }

    fn collect(gs: &crate::global_state::GlobalState, expr: &crate::ast::Expr, out: &mut Vec<Cfg>) {
        use crate::ast::ExprKind;
        match &expr.kind {
            ExprKind::ClassDef { rhs, .. } => {
                for stmt in rhs {
                    collect(gs, stmt, out);
                }
            }
            ExprKind::MethodDef { symbol, body, .. } if symbol.exists() => {
                out.push(super::super::build_method_cfg(gs, *symbol, body));
            }
            _ => {}
        }
    }

    #[test]
    fn dealias_is_idempotent() {
        let sources = [
            "def a(x)\n  if x.nil?\n    0\n  else\n    x\n  end\nend\n",
            "def b\n  i = 0\n  while i < 3\n    i += 1\n  end\n  i\nend\n",
            "def c(x)\n  y = x\n  z = y\n  z\nend\n",
        ];
        for source in sources {
            let (gs, cfgs) = build_cfgs(source);
            for mut cfg in cfgs {
                let before = cfg.show(&gs);
                dealias(&mut cfg);
                let after = cfg.show(&gs);
                assert_eq!(before, after, "dealias changed an already-dealiased CFG for:\n{source}");
            }
        }
    }

    #[test]
    fn unreachable_blocks_are_pruned_from_topo_orders() {
        let (_, cfgs) = build_cfgs("def a\n  return 1\n  2\nend\n");
        for cfg in cfgs {
            for block in &cfg.blocks {
                if block.is_pruned() {
                    assert!(!cfg.forwards_topo.contains(&block.id));
                    assert!(!cfg.backwards_topo.contains(&block.id));
                }
            }
        }
    }
}
