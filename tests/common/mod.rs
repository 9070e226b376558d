#![allow(dead_code)]

use erde::{CompileError, CompileOptions, GeneratedCode, Target, compile, compile_with};

/// Compile with default options, panicking with the error on failure.
/// The output must parse as Lua.
pub fn lua(input: &str) -> String {
    let lua =
        compile(input).unwrap_or_else(|e| panic!("compile failed: {e}\n--- input ---\n{input}"));
    assert_valid_lua(&lua);
    lua
}

/// Compile for a specific target.
pub fn lua_for(input: &str, target: Target) -> String {
    generated_for(input, target).code
}

pub fn generated_for(input: &str, target: Target) -> GeneratedCode {
    let generated = compile_with(input, &CompileOptions::new().target(target))
        .unwrap_or_else(|e| panic!("compile failed: {e}\n--- input ---\n{input}"));
    assert_valid_lua(&generated.code);
    generated
}

/// Syntax errors a Lua 5.4 parser reports for `code`, if any.
pub fn lua_syntax_errors(code: &str) -> Option<String> {
    full_moon::parse(code).err().map(|errors| format!("{errors:?}"))
}

pub fn assert_valid_lua(code: &str) {
    if let Some(errors) = lua_syntax_errors(code) {
        panic!("output is not valid Lua: {errors}\n--- code ---\n{code}");
    }
}

/// Compile input that is expected to fail.
pub fn compile_err(input: &str) -> CompileError {
    match compile(input) {
        Ok(lua) => panic!("expected an error, got:\n{lua}"),
        Err(e) => e,
    }
}

/// Assert that mapped lines never decrease and that the map has one
/// entry per output line.
pub fn assert_monotonic(generated: &GeneratedCode) {
    assert_eq!(
        generated.source_map.len(),
        generated.code.lines().count(),
        "line map length mismatch\n--- code ---\n{}",
        generated.code
    );
    let mut last = 0;
    for (lua_line, erde_line) in generated.source_map.iter() {
        if let Some(line) = erde_line {
            assert!(
                line >= last,
                "line {lua_line} maps to {line} after {last}\n--- code ---\n{}",
                generated.code
            );
            last = line;
        }
    }
}
