//! Structural invariants over built CFGs, checked on a grab-bag of method
//! shapes: straight-line code, branches, loops, blocks, and rescues.

use rubric::{
    Cfg, DEAD_BLOCK, ENTRY_BLOCK, ErrorQueue, GlobalState, Options, StrictLevel, typecheck,
};

const SOURCES: &[&str] = &[
    "def a\n  1\nend\n",
    "def b(x)\n  if x.nil?\n    0\n  else\n    x\n  end\nend\n",
    "def c\n  i = 0\n  while i < 10\n    i += 1\n  end\n  i\nend\n",
    "def d(xs)\n  xs.each do |x|\n    next if x.nil?\n    x\n  end\nend\n",
    "def e\n  begin\n    risky()\n  rescue TypeError => err\n    err\n  ensure\n    cleanup()\n  end\nend\n",
    "def f(x)\n  case x\n  when 1 then :one\n  when 2 then :two\n  else :other\n  end\nend\n",
];

fn build_all() -> (GlobalState, Vec<Cfg>) {
    let mut queue = ErrorQueue::new();
    let mut gs = GlobalState::new(&queue);
    let files: Vec<_> = SOURCES
        .iter()
        .enumerate()
        .map(|(index, source)| {
            let file = gs.enter_file(format!("f{index}.rb"), *source);
            gs.override_strictness(file, StrictLevel::True);
            file
        })
        .collect();
    let results = typecheck(&mut gs, &mut queue, &files, &Options::default());
    let cfgs = results.into_iter().flat_map(|r| r.cfgs).collect();
    (gs, cfgs)
}

#[test]
fn every_live_block_has_a_terminator() {
    let (gs, cfgs) = build_all();
    for cfg in &cfgs {
        for block in &cfg.blocks {
            if block.is_pruned() {
                continue;
            }
            assert!(
                block.bexit.is_cond_set(),
                "block bb{} lacks a terminator in:\n{}",
                block.id,
                cfg.show(&gs)
            );
        }
    }
}

#[test]
fn conditional_exits_have_conditions_and_distinct_successors() {
    let (gs, cfgs) = build_all();
    for cfg in &cfgs {
        for block in &cfg.blocks {
            if block.is_pruned() || block.id == DEAD_BLOCK {
                continue;
            }
            let exit = &block.bexit;
            assert_eq!(
                exit.cond.exists(),
                exit.thenb != exit.elseb,
                "bb{}: condition existence must match successor distinctness in:\n{}",
                block.id,
                cfg.show(&gs)
            );
        }
    }
}

#[test]
fn successors_list_their_predecessors_exactly_once() {
    let (gs, cfgs) = build_all();
    for cfg in &cfgs {
        for block in &cfg.blocks {
            if block.is_pruned() {
                continue;
            }
            let exit = &block.bexit;
            if !exit.is_cond_set() {
                continue;
            }
            for succ in [exit.thenb, exit.elseb] {
                let count = cfg.blocks[succ].back_edges.iter().filter(|&&p| p == block.id).count();
                assert_eq!(
                    count,
                    1,
                    "bb{} should appear once in bb{}'s back edges in:\n{}",
                    block.id,
                    succ,
                    cfg.show(&gs)
                );
            }
        }
    }
}

#[test]
fn topo_orders_cover_all_retained_blocks() {
    let (_, cfgs) = build_all();
    for cfg in &cfgs {
        let retained: Vec<usize> = cfg
            .blocks
            .iter()
            .filter(|b| !b.is_pruned())
            .map(|b| b.id)
            .collect();
        for &block in &retained {
            assert!(
                cfg.forwards_topo.contains(&block) || cfg.backwards_topo.contains(&block),
                "bb{block} missing from both topo orders"
            );
        }
        // The forward order lists reachable blocks exactly once.
        let mut seen = std::collections::HashSet::new();
        for &block in &cfg.forwards_topo {
            assert!(seen.insert(block), "bb{block} listed twice in the forward order");
        }
    }
}

#[test]
fn block_arguments_have_writers_upstream() {
    let (gs, cfgs) = build_all();
    for cfg in &cfgs {
        for block in &cfg.blocks {
            if block.is_pruned() || block.id == ENTRY_BLOCK || block.id == DEAD_BLOCK {
                continue;
            }
            for arg in &block.args {
                // A block argument must be written somewhere in the graph.
                let written = cfg.blocks.iter().filter(|b| !b.is_pruned()).any(|b| {
                    b.exprs.iter().any(|binding| binding.bind == *arg)
                });
                assert!(
                    written,
                    "bb{} argument {} has no writer in:\n{}",
                    block.id,
                    arg.show(&gs),
                    cfg.show(&gs)
                );
            }
        }
    }
}

#[test]
fn loop_bodies_mark_their_headers() {
    let (gs, cfgs) = build_all();
    // The while-loop method must have a loop header; straight-line ones must not.
    let mut any_header = false;
    for cfg in &cfgs {
        for block in &cfg.blocks {
            if block.is_pruned() {
                continue;
            }
            if cfg.show(&gs).contains("loop-header") {
                any_header = true;
            }
        }
    }
    assert!(any_header, "expected at least one loop header across the suite");
}

#[test]
fn inference_fills_types_on_reachable_bindings() {
    let (gs, cfgs) = build_all();
    for cfg in &cfgs {
        let mut typed = 0usize;
        for &block_id in &cfg.forwards_topo {
            if block_id == DEAD_BLOCK || cfg.blocks[block_id].is_pruned() {
                continue;
            }
            typed += cfg.blocks[block_id]
                .exprs
                .iter()
                .filter(|b| b.computed_type.is_some())
                .count();
        }
        assert!(typed > 0, "no typed bindings in:\n{}", cfg.show(&gs));
    }
}
