//! Desugaring shape tests: parse one snippet, desugar it, and assert on the
//! printed tree.

use rubric::{ErrorQueue, Expr, GlobalState, desugar_file, parse_file};

fn desugar(source: &str) -> (GlobalState, ErrorQueue, Expr) {
    let queue = ErrorQueue::new();
    let mut gs = GlobalState::new(&queue);
    let file = gs.enter_file("test.rb", source);
    let parsed = parse_file(source, file);
    for (loc, message) in parsed.errors {
        panic!("parse error at {loc}: {message}");
    }
    let tree = desugar_file(&mut gs, file, parsed.node);
    (gs, queue, tree)
}

fn shown(source: &str) -> String {
    let (gs, _, tree) = desugar(source);
    tree.show(&gs)
}

#[test]
fn and_on_a_reference_rereads_it() {
    let text = shown("a = 1\na && b()\n");
    // `a && b` with a reference: if a then b else a, no temporary.
    assert!(text.contains("If"), "tree was:\n{text}");
    assert!(!text.contains("<andAnd>"), "tree was:\n{text}");
}

#[test]
fn and_on_a_call_uses_a_temporary() {
    let text = shown("f() && g()\n");
    assert!(text.contains("<andAnd>"), "tree was:\n{text}");
}

#[test]
fn or_swaps_the_branches() {
    let text = shown("a = 1\na || b()\n");
    let if_pos = text.find("If").expect("if in tree");
    let b_pos = text.find("Send(b)").expect("b call in tree");
    assert!(b_pos > if_pos, "tree was:\n{text}");
}

#[test]
fn op_assign_on_a_send_evaluates_receiver_once() {
    let text = shown("h = f()\nh.count += 1\n");
    assert!(text.contains("<opAsgn>"), "tree was:\n{text}");
    assert!(text.contains("Send(count=)"), "tree was:\n{text}");
    // Exactly one read of the receiver feeds both count and count=.
    assert_eq!(text.matches("Send(count)").count(), 1, "tree was:\n{text}");
}

#[test]
fn index_op_assign_uses_bracket_setters() {
    let text = shown("h = f()\nh[0] ||= 1\n");
    assert!(text.contains("Send([])"), "tree was:\n{text}");
    assert!(text.contains("Send([]=)"), "tree was:\n{text}");
}

#[test]
fn constant_op_assign_is_rejected() {
    let (_, mut queue, tree) = desugar("A += 1\n");
    let errors = queue.flush_all();
    assert!(
        errors.iter().any(|e| e.class.code == 3002),
        "expected NoConstantReassignment, got {errors:?}"
    );
    let _ = tree;
}

#[test]
fn splat_call_routes_through_the_magic_receiver() {
    let text = shown("f(1, *rest())\n");
    assert!(text.contains("Send(<call-with-splat>)"), "tree was:\n{text}");
    assert!(text.contains("Symbol(:f)"), "tree was:\n{text}");
    assert!(text.contains("Send(to_a)"), "tree was:\n{text}");
}

#[test]
fn bare_super_forwards_the_arguments() {
    let text = shown("def m(a, b)\n  super\nend\n");
    assert!(text.contains("Send(super)"), "tree was:\n{text}");
    assert!(text.contains("ZSuperArgs"), "tree was:\n{text}");
}

#[test]
fn interpolation_folds_with_concat_and_to_s() {
    let text = shown("x = 1\n\"a#{x}c\"\n");
    assert!(text.contains("Send(concat)"), "tree was:\n{text}");
    // First piece is a string literal, so later pieces skip to_s; the quirk
    // keys the decision off the first piece only.
    assert!(!text.contains("Send(to_s)"), "tree was:\n{text}");

    let text = shown("x = 1\n\"#{x}c\"\n");
    assert!(text.contains("Send(to_s)"), "tree was:\n{text}");
}

#[test]
fn interpolated_symbols_intern_the_fold() {
    let text = shown("x = 1\n:\"a#{x}\"\n");
    assert!(text.contains("Send(intern)"), "tree was:\n{text}");
}

#[test]
fn for_loops_become_each_blocks() {
    let text = shown("for x in list()\n  x\nend\n");
    assert!(text.contains("Send(each)"), "tree was:\n{text}");
    assert!(text.contains("<forTemp>"), "tree was:\n{text}");
}

#[test]
fn post_condition_loops_run_the_body_first() {
    let text = shown("begin\n  work()\nend while cond()\n");
    assert!(text.contains("While"), "tree was:\n{text}");
    assert!(text.contains("true"), "tree was:\n{text}");
    assert!(text.contains("Break"), "tree was:\n{text}");
    assert!(text.contains("Send(!)"), "tree was:\n{text}");
}

#[test]
fn case_lowers_to_triple_eq_cascades() {
    let text = shown("case f()\nwhen 1 then :one\nwhen 2, 3 then :more\nelse :other\nend\n");
    assert!(text.contains("Send(===)"), "tree was:\n{text}");
    assert!(text.contains("<caseTemp>"), "tree was:\n{text}");
    // Two whens nest two ifs (plus the multi-pattern cascade).
    assert!(text.matches("If").count() >= 2, "tree was:\n{text}");
}

#[test]
fn rescue_keeps_cases_unpadded_and_merges_ensure() {
    let (gs, _, tree) = desugar("begin\n  f()\nrescue\n  g()\nensure\n  h()\nend\n");
    let text = tree.show(&gs);
    assert!(text.contains("Rescue"), "tree was:\n{text}");
    assert!(text.contains("RescueCase"), "tree was:\n{text}");
    assert!(text.contains("ensure:"), "tree was:\n{text}");
    // The default StandardError is the CFG builder's job, not desugar's.
    assert!(!text.contains("StandardError"), "tree was:\n{text}");
}

#[test]
fn regexp_literals_construct_regexps_with_flag_bits() {
    let text = shown("x = /ab/im\n");
    assert!(text.contains("Send(new)"), "tree was:\n{text}");
    assert!(text.contains("UnresolvedConstant(Regexp)"), "tree was:\n{text}");
    // i|m = 1|4.
    assert!(text.contains("Int(5)"), "tree was:\n{text}");
}

#[test]
fn defined_p_goes_through_magic() {
    let text = shown("defined?(foo)\n");
    assert!(text.contains("Send(<defined?>)"), "tree was:\n{text}");
}

#[test]
fn symbol_block_pass_becomes_a_block() {
    let text = shown("f(&:size)\n");
    assert!(text.contains("Send(size)"), "tree was:\n{text}");
    assert!(text.contains("<blockPassTemp>"), "tree was:\n{text}");
}

#[test]
fn proc_block_pass_calls_through_to_proc() {
    let text = shown("f(&g())\n");
    assert!(text.contains("Send(to_proc)"), "tree was:\n{text}");
    assert!(text.contains("Send(<call-with-splat>)"), "tree was:\n{text}");
}

#[test]
fn singleton_defs_on_non_self_are_rejected() {
    let (_, mut queue, _) = desugar("def Foo.m\nend\n");
    let errors = queue.flush_all();
    assert!(
        errors.iter().any(|e| e.class.code == 3005),
        "expected InvalidSingletonDef, got {errors:?}"
    );
}

#[test]
fn class_shift_self_makes_a_singleton_class() {
    let text = shown("class A\n  class << self\n    def m; end\n  end\nend\n");
    assert!(text.contains("UnresolvedConstant(<singleton>)"), "tree was:\n{text}");
}

#[test]
fn oversized_integers_report_and_fall_back_to_zero() {
    let (_, mut queue, tree) = desugar("99999999999999999999999999\n");
    let errors = queue.flush_all();
    assert!(
        errors.iter().any(|e| e.class.code == 3003),
        "expected IntegerOutOfRange, got {errors:?}"
    );
    let _ = tree;
}

#[test]
fn unsupported_nodes_report_and_vanish() {
    let (_, mut queue, _) = desugar("redo\n");
    let errors = queue.flush_all();
    assert!(
        errors.iter().any(|e| e.class.code == 3001),
        "expected UnsupportedNode, got {errors:?}"
    );
}

#[test]
fn array_splats_fold_through_concat() {
    let text = shown("[1, *mid(), 2]\n");
    assert!(text.contains("Send(concat)"), "tree was:\n{text}");
    assert!(text.contains("Send(to_a)"), "tree was:\n{text}");
}

#[test]
fn hash_double_splats_fold_through_merge() {
    let text = shown("{ a: 1, **extra() }\n");
    assert!(text.contains("Send(merge)"), "tree was:\n{text}");
    assert!(text.contains("Send(to_h)"), "tree was:\n{text}");
}

#[test]
fn every_node_carries_a_location() {
    let (_, _, tree) = desugar(
        "class A\n  def m(x)\n    y = x && 1\n    z = { k: [1, 2] }\n    y ? z : nil\n  end\nend\n",
    );
    fn walk(expr: &Expr, path: &mut Vec<&'static str>) {
        assert!(
            expr.loc.exists() || expr.is_empty_tree(),
            "missing location under {path:?}"
        );
        path.push("child");
        match &expr.kind {
            rubric::ExprKind::InsSeq { stats, expr } => {
                for stat in stats {
                    walk(stat, path);
                }
                walk(expr, path);
            }
            rubric::ExprKind::Assign { lhs, rhs } => {
                walk(lhs, path);
                walk(rhs, path);
            }
            rubric::ExprKind::If { cond, thenp, elsep } => {
                walk(cond, path);
                walk(thenp, path);
                walk(elsep, path);
            }
            rubric::ExprKind::Send { recv, args, block, .. } => {
                walk(recv, path);
                for arg in args {
                    walk(arg, path);
                }
                if let Some(block) = block {
                    walk(&block.body, path);
                }
            }
            rubric::ExprKind::ClassDef { rhs, .. } => {
                for stmt in rhs {
                    walk(stmt, path);
                }
            }
            rubric::ExprKind::MethodDef { args, body, .. } => {
                for arg in args {
                    walk(arg, path);
                }
                walk(body, path);
            }
            rubric::ExprKind::HashLit { keys, values } => {
                for key in keys {
                    walk(key, path);
                }
                for value in values {
                    walk(value, path);
                }
            }
            rubric::ExprKind::ArrayLit { elems } => {
                for elem in elems {
                    walk(elem, path);
                }
            }
            _ => {}
        }
        path.pop();
    }
    walk(&tree, &mut Vec::new());
}
