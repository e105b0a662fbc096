//! Inference behavior: narrowing, dispatch errors, pinning edge cases.

use rubric::{Error, ErrorQueue, FileResult, GlobalState, Options, StrictLevel, typecheck};

fn check(source: &str) -> (GlobalState, Vec<FileResult>) {
    let mut queue = ErrorQueue::new();
    let mut gs = GlobalState::new(&queue);
    let file = gs.enter_file("test.rb", source);
    gs.override_strictness(file, StrictLevel::True);
    let results = typecheck(&mut gs, &mut queue, &[file], &Options::default());
    (gs, results)
}

fn errors(results: &[FileResult]) -> Vec<&Error> {
    results.iter().flat_map(|r| r.errors.iter()).collect()
}

#[test]
fn unknown_methods_report_with_the_receiver_type() {
    let (_, results) = check("x = 1\nx.frobnicate\n");
    let errs = errors(&results);
    assert!(
        errs.iter()
            .any(|e| e.class.code == 7003 && e.header.contains("`frobnicate`")),
        "got {errs:?}"
    );
}

#[test]
fn argument_type_mismatches_report_expected_and_found() {
    let (_, results) = check("x = 1\nx + \"s\"\n");
    let errs = errors(&results);
    let mismatch = errs.iter().find(|e| e.class.code == 7002).expect("mismatch error");
    assert!(mismatch.header.contains("Integer"), "got {}", mismatch.header);
    assert!(mismatch.header.contains("String"), "got {}", mismatch.header);
    assert!(
        mismatch.sections.iter().any(|s| s.header.contains("originating from")),
        "sections were {:?}",
        mismatch.sections
    );
}

#[test]
fn argument_count_mismatches_report_counts() {
    let (_, results) = check("x = 1\nx.zero?(2)\n");
    let errs = errors(&results);
    assert!(
        errs.iter()
            .any(|e| e.class.code == 7004 && e.header.contains("Too many arguments")),
        "got {errs:?}"
    );
}

#[test]
fn is_a_narrows_along_both_branches() {
    let source = "def f(x)\n  if x.is_a?(Integer)\n    x + 1\n  else\n    0\n  end\nend\n";
    let (_, results) = check(source);
    let errs = errors(&results);
    // Without narrowing, `x + 1` on an untyped-but-checked receiver is fine
    // either way; the point is that narrowing must not produce errors.
    assert!(errs.is_empty(), "got {errs:?}");
}

#[test]
fn nil_narrowing_survives_copies() {
    // The condition is read through a temporary; dealiasing must connect the
    // knowledge back to `x`.
    let source = "x = condition() ? nil : 1\nif !x.nil?\n  x + 1\nend\n";
    let (_, results) = check(source);
    let errs = errors(&results);
    // `condition()` is unknown on Object; ignore that one error.
    let relevant: Vec<_> = errs.iter().filter(|e| e.class.code != 7003).collect();
    assert!(relevant.is_empty(), "got {relevant:?}");
}

#[test]
fn a_branch_local_assignment_joins_as_nilable() {
    // `y` is only written on the then path; after the join it may still be nil,
    // so the bare `y + 1` must not typecheck.
    let source = "if condition()\n  y = 1\nend\ny + 1\n";
    let (_, results) = check(source);
    let errs = errors(&results);
    assert!(
        errs.iter().any(|e| e.class.code == 7003 && e.header.contains("`+`")),
        "expected a nil-receiver dispatch error, got {errs:?}"
    );
}

#[test]
fn hard_assert_on_a_definitely_falsy_value_reports_dead_code() {
    let (_, results) = check("hard_assert(nil)\n");
    let errs = errors(&results);
    assert!(
        errs.iter().any(|e| e.class.code == 7006),
        "expected DeadBranchInferencer, got {errs:?}"
    );
}

#[test]
fn hard_assert_narrows_for_later_statements() {
    let source = "x = condition() ? nil : 1\nhard_assert(!x.nil?)\nx + 1\n";
    let (_, results) = check(source);
    let errs = errors(&results);
    let relevant: Vec<_> = errs.iter().filter(|e| e.class.code != 7003).collect();
    assert!(relevant.is_empty(), "got {relevant:?}");
}

#[test]
fn field_reassignment_checks_against_the_declared_type() {
    // The field's type comes from its alias; without a declaration it is
    // untyped, so reassignment is permitted.
    let source = "class A\n  def set\n    @x = 1\n    @x = \"s\"\n  end\nend\n";
    let (_, results) = check(source);
    let errs = errors(&results);
    assert!(errs.is_empty(), "got {errs:?}");
}

#[test]
fn let_annotations_type_later_reads() {
    let source = "def f(x)\n  y = T.let(x, Integer)\n  y + 1\nend\n";
    let (_, results) = check(source);
    let errs = errors(&results);
    assert!(errs.is_empty(), "got {errs:?}");
}

#[test]
fn assert_type_on_untyped_reports_unable_to_infer() {
    let source = "def f(x)\n  T.assert_type!(x, Integer)\nend\n";
    let (_, results) = check(source);
    let errs = errors(&results);
    assert!(
        errs.iter()
            .any(|e| e.class.code == 7007 && e.header.contains("Unable to infer")),
        "got {errs:?}"
    );
}

#[test]
fn casts_are_trusted_without_checks() {
    let source = "def f(x)\n  y = T.cast(x, Integer)\n  y + 1\nend\n";
    let (_, results) = check(source);
    let errs = errors(&results);
    assert!(errs.is_empty(), "got {errs:?}");
}

#[test]
fn block_results_solve_through_the_link() {
    let source = "def f(xs)\n  xs.each do |x|\n    x\n  end\nend\n";
    let (_, results) = check(source);
    let errs = errors(&results);
    assert!(errs.is_empty(), "got {errs:?}");
}

#[test]
fn while_loops_treat_their_result_as_nil() {
    let source = "def f\n  r = while false\n  end\n  r.nil?\nend\n";
    let (_, results) = check(source);
    let errs = errors(&results);
    assert!(errs.is_empty(), "got {errs:?}");
}

#[test]
fn break_outside_a_loop_reports_a_scope_error() {
    let (_, results) = check("def f\n  break\nend\n");
    let errs = errors(&results);
    assert!(
        errs.iter().any(|e| e.class.code == 6001),
        "expected a scope error, got {errs:?}"
    );
}
