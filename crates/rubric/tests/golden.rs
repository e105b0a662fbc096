//! Golden-file tests: every `tests/testdata/*.rb` runs through the pipeline and
//! its rendered diagnostics are diffed against the sibling `.exp` file.
//!
//! The rendered form is one line per diagnostic, `CODE header`, in flush order.
//! Set `RUBRIC_BLESS=1` to rewrite the expectations from current output.

use std::path::{Path, PathBuf};

use rubric::{ErrorQueue, GlobalState, Options, typecheck};

fn render_diagnostics(path: &Path) -> String {
    let source = std::fs::read_to_string(path).expect("readable test input");
    let mut queue = ErrorQueue::new();
    let mut gs = GlobalState::new(&queue);
    let file = gs.enter_file(path.display().to_string(), source);
    let results = typecheck(&mut gs, &mut queue, &[file], &Options::default());
    let mut out = String::new();
    for result in &results {
        for error in &result.errors {
            out.push_str(&format!("{} {}\n", error.class.code, error.header));
        }
    }
    out
}

#[test]
fn testdata_matches_expectations() {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/testdata");
    let bless = std::env::var_os("RUBRIC_BLESS").is_some();
    let mut checked = 0usize;

    let mut entries: Vec<PathBuf> = std::fs::read_dir(&root)
        .expect("testdata directory present")
        .map(|e| e.expect("readable dir entry").path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "rb"))
        .collect();
    entries.sort();

    for input in entries {
        let expectation = input.with_extension("exp");
        let actual = render_diagnostics(&input);
        if bless {
            std::fs::write(&expectation, &actual).expect("writable expectation");
            continue;
        }
        let expected = std::fs::read_to_string(&expectation)
            .unwrap_or_else(|_| panic!("missing expectation file {}", expectation.display()));
        if expected != actual {
            let diff = similar::TextDiff::from_lines(&expected, &actual);
            let mut rendered = String::new();
            for change in diff.iter_all_changes() {
                let sign = match change.tag() {
                    similar::ChangeTag::Delete => "-",
                    similar::ChangeTag::Insert => "+",
                    similar::ChangeTag::Equal => " ",
                };
                rendered.push_str(&format!("{sign}{change}"));
            }
            panic!("{} diverged from its expectation:\n{rendered}", input.display());
        }
        checked += 1;
    }
    assert!(checked > 0, "no golden inputs found under {}", root.display());
}
