//! End-to-end scenarios through the whole pipeline.

use std::sync::{Arc, atomic::AtomicBool};

use pretty_assertions::assert_eq;
use rubric::{
    Error, ErrorQueue, FileResult, GlobalState, Instruction, NameRef, Options, StrictLevel, WellKnownName, typecheck,
};

/// Runs the pipeline over one `# typed: true` source string.
fn check(source: &str) -> (GlobalState, Vec<FileResult>) {
    let mut queue = ErrorQueue::new();
    let mut gs = GlobalState::new(&queue);
    let file = gs.enter_file("test.rb", source);
    gs.override_strictness(file, StrictLevel::True);
    let results = typecheck(&mut gs, &mut queue, &[file], &Options::default());
    (gs, results)
}

fn all_errors(results: &[FileResult]) -> Vec<&Error> {
    results.iter().flat_map(|r| r.errors.iter()).collect()
}

#[test]
fn nil_check_narrows_and_the_sum_types_as_integer() {
    let (gs, results) = check("x = nil; if x.nil? then y = 1 else y = x + 1 end; y + 0");
    let errors = all_errors(&results);
    assert_eq!(errors.len(), 0, "expected no diagnostics, got {errors:?}");

    // The final `y + 0` send must have computed an Integer.
    let plus = NameRef::from(WellKnownName::Plus);
    let mut found = false;
    for result in &results {
        for cfg in &result.cfgs {
            for block in &cfg.blocks {
                for binding in &block.exprs {
                    if let Instruction::Send { fun, .. } = &binding.value
                        && *fun == plus
                        && let Some(ty) = &binding.computed_type
                    {
                        found = true;
                        assert_eq!(ty.show(&gs), "Integer");
                    }
                }
            }
        }
    }
    assert!(found, "no typed `+` send found in the CFGs");
}

#[test]
fn reassigning_a_loop_variable_reports_a_pin_violation() {
    let (_, results) = check("def f\n  i = 0\n  while i < 10\n    i = \"s\"\n    i += 1\n  end\nend\n");
    let errors = all_errors(&results);
    let pins: Vec<_> = errors.iter().filter(|e| e.class.code == 7001).collect();
    assert_eq!(pins.len(), 1, "expected exactly one pin error, got {errors:?}");
    assert!(
        pins[0].header.contains("Changing type of a variable in a loop"),
        "unexpected message: {}",
        pins[0].header
    );
}

#[test]
fn let_pins_survive_reassignment_attempts() {
    let (_, results) = check("def g(x)\n  T.let(x, Integer)\n  x = \"s\"\nend\n");
    let errors = all_errors(&results);
    let pins: Vec<_> = errors.iter().filter(|e| e.class.code == 7001).collect();
    assert_eq!(pins.len(), 1, "expected exactly one pin error, got {errors:?}");
    assert!(
        pins[0].header.contains("Incompatible assignment to variable declared via `let`"),
        "unexpected message: {}",
        pins[0].header
    );
}

#[test]
fn unresolved_superclass_reports_without_internal_errors() {
    let (_, results) = check("class A; end\nclass A < B; end\n");
    let errors = all_errors(&results);
    assert!(
        errors.iter().any(|e| e.class.code == 5001 && e.header.contains("`B`")),
        "expected an unresolved-constant report, got {errors:?}"
    );
    assert!(
        errors.iter().all(|e| e.class.code != 1001),
        "internal error leaked: {errors:?}"
    );
}

#[test]
fn splat_destructuring_expands_and_slices() {
    let (gs, results) = check("a, *b, c = [1, 2, 3, 4, 5]\n");
    let errors = all_errors(&results);
    assert_eq!(errors.len(), 0, "expected no diagnostics, got {errors:?}");

    let shown = results[0].tree.show(&gs);
    assert!(shown.contains("Send(<expand-splat>)"), "tree was:\n{shown}");
    assert!(shown.contains("Int(1)"), "tree was:\n{shown}");
    assert!(shown.contains("Send(slice)"), "tree was:\n{shown}");
    // The splat receiver slices Range.new(1, -2, true); the trailing target
    // indexes from the back.
    assert!(shown.contains("Int(-2)"), "tree was:\n{shown}");
    assert!(shown.contains("Int(-1)"), "tree was:\n{shown}");
    assert!(shown.contains("true"), "tree was:\n{shown}");
}

#[test]
fn safe_navigation_lowers_to_a_nil_branch() {
    let (gs, results) = check("x = 1\nx&.foo(1)\n");
    let shown = results[0].tree.show(&gs);
    assert!(shown.contains("Send(nil?)"), "tree was:\n{shown}");
    assert!(shown.contains("Send(foo)"), "tree was:\n{shown}");
    // The lowering binds the receiver once and branches on the nil test.
    assert!(shown.contains("InsSeq"), "tree was:\n{shown}");
    assert!(shown.contains("If"), "tree was:\n{shown}");

    // The CFG around the lowered csend has a join after the if.
    let cfg = &results[0].cfgs[0];
    let joins = cfg
        .blocks
        .iter()
        .filter(|b| !b.is_pruned() && b.back_edges.len() >= 2 && b.id != rubric::DEAD_BLOCK)
        .count();
    assert!(joins >= 1, "expected a join block, cfg:\n{}", cfg.show(&gs));
}

#[test]
fn two_runs_produce_identical_output() {
    let source = "# typed: true\nclass A\n  def m(x)\n    if x.nil?\n      0\n    else\n      x\n    end\n  end\nend\n";
    let render = |(gs, results): (GlobalState, Vec<FileResult>)| {
        let mut out = String::new();
        for result in &results {
            out.push_str(&result.tree.show_raw(&gs));
            for cfg in &result.cfgs {
                out.push_str(&cfg.show_raw(&gs));
            }
            for error in &result.errors {
                out.push_str(&format!("{error}\n"));
            }
        }
        out.push_str(&gs.show_symbol_table());
        out
    };
    let first = render(check(source));
    let second = render(check(source));
    assert_eq!(first, second);
}

#[test]
fn one_worker_and_many_workers_agree() {
    let sources = [
        "# typed: true\nclass A\n  def m(x)\n    x.nil? ? 0 : 1\n  end\nend\n",
        "# typed: true\nclass B < A\n  def n\n    while true\n      break\n    end\n  end\nend\n",
        "# typed: true\ny = \"s\"\ny + \"t\"\n",
    ];
    let run = |workers: usize| {
        let mut queue = ErrorQueue::new();
        let mut gs = GlobalState::new(&queue);
        let files: Vec<_> = sources
            .iter()
            .enumerate()
            .map(|(index, source)| gs.enter_file(format!("f{index}.rb"), *source))
            .collect();
        let options = Options {
            workers,
            cancel: Arc::new(AtomicBool::new(false)),
            debug_environments: false,
        };
        let results = typecheck(&mut gs, &mut queue, &files, &options);
        results
            .iter()
            .map(|r| {
                let mut out = r.tree.show(&gs);
                for error in &r.errors {
                    out.push_str(&format!("{} {}\n", error.class.code, error.header));
                }
                out
            })
            .collect::<Vec<String>>()
    };
    assert_eq!(run(1), run(4));
}

#[test]
fn raw_dumps_carry_environment_snapshots_when_requested() {
    let source = "# typed: true\nx = 1\ny = x + 1\ny\n";
    let mut queue = ErrorQueue::new();
    let mut gs = GlobalState::new(&queue);
    let file = gs.enter_file("test.rb", source);
    let options = Options {
        debug_environments: true,
        ..Options::default()
    };
    let results = typecheck(&mut gs, &mut queue, &[file], &options);
    let cfg = &results[0].cfgs[0];
    let raw = cfg.show_raw(&gs);
    assert!(raw.contains("DebugEnvironment[before]"), "dump was:\n{raw}");
    assert!(raw.contains("DebugEnvironment[after]"), "dump was:\n{raw}");
    // Inference filled at least one snapshot with the environment's state.
    assert!(raw.contains("y: "), "dump was:\n{raw}");

    // Without the option the snapshots never appear.
    let (plain_gs, plain_results) = check(source);
    let plain = plain_results[0].cfgs[0].show_raw(&plain_gs);
    assert!(!plain.contains("DebugEnvironment"), "dump was:\n{plain}");
}

#[test]
fn ignored_files_produce_no_diagnostics() {
    let mut queue = ErrorQueue::new();
    let mut gs = GlobalState::new(&queue);
    let file = gs.enter_file("skip.rb", "# typed: ignore\nthis is not even parseable ((((\n");
    let results = typecheck(&mut gs, &mut queue, &[file], &Options::default());
    assert_eq!(results[0].errors.len(), 0);
    assert_eq!(results[0].cfgs.len(), 0);
}

#[test]
fn strictness_below_true_skips_inference() {
    let mut queue = ErrorQueue::new();
    let mut gs = GlobalState::new(&queue);
    // A type error that `# typed: false` must not report.
    let file = gs.enter_file("lax.rb", "# typed: false\ny = \"s\"\ny + 1\n");
    let results = typecheck(&mut gs, &mut queue, &[file], &Options::default());
    assert_eq!(results[0].errors.len(), 0, "got {:?}", results[0].errors);
    assert_eq!(results[0].cfgs.len(), 0);
}
