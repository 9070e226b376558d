//! Line map tests.

mod common;

use common::{assert_monotonic, generated_for};
use erde::Target;

fn mapped(input: &str) -> Vec<Option<usize>> {
    generated_for(input, Target::Lua51Plus)
        .source_map
        .iter()
        .map(|(_, line)| line)
        .collect()
}

#[test]
fn empty_input_has_empty_map() {
    let generated = generated_for("", Target::Lua54);
    assert!(generated.code.is_empty());
    assert!(generated.source_map.is_empty());
}

#[test]
fn blank_lines_and_comments_are_skipped() {
    assert_eq!(
        mapped("-- header\n\na = 1\n--[[ block\n]]\nb = 2"),
        [Some(3), Some(6)]
    );
}

#[test]
fn function_body_lines() {
    assert_eq!(
        mapped("function f(x = 1) {\n  return x\n}"),
        [Some(1), Some(1), Some(2), None]
    );
}

#[test]
fn elseif_and_else() {
    assert_eq!(
        mapped("if a {\n  f()\n} elseif b {\n  g()\n} else {\n  h()\n}"),
        [Some(1), Some(2), Some(3), Some(4), None, Some(6), None]
    );
}

#[test]
fn multiline_statement_maps_to_its_first_line() {
    assert_eq!(mapped("x = f(\n  1,\n  2\n)\ny = 3"), [Some(1), Some(5)]);
}

#[test]
fn module_return_is_scaffolding() {
    assert_eq!(mapped("module a = 1"), [Some(1), None]);
}

#[test]
fn repeat_until_maps_condition_line() {
    assert_eq!(
        mapped("repeat {\n  f()\n}\nuntil done"),
        [Some(1), Some(2), Some(4)]
    );
}

#[test]
fn lookups_out_of_range() {
    let map = generated_for("a = 1", Target::Lua54).source_map;
    assert_eq!(map.len(), 1);
    assert_eq!(map.original_line(0), None);
    assert_eq!(map.original_line(2), None);
}

#[test]
fn rewrite_leaves_other_text_alone() {
    let generated = generated_for("\n\nerror('boom')", Target::Lua54);
    assert_eq!(
        generated.rewrite_error("[string \"main\"]:1: boom at 12:30"),
        "[string \"main\"]:3: boom at 12:30"
    );
}

#[test]
fn large_program_is_monotonic() {
    let mut source = String::new();
    for i in 0..50 {
        source.push_str(&format!(
            "v{i} = t?.a ? 1 : 2\nfor k, {{ x }} in pairs(t) {{\n  if x {{ continue }}\n  v{i} += x\n}}\n"
        ));
    }
    for target in Target::ALL {
        assert_monotonic(&generated_for(&source, target));
    }
}
