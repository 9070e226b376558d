//! Parser edge cases and error tests.

use erde::ast::{Binding, ExprKind, FunctionBody, Scope, StmtKind};
use erde::{
    CompileError, Expected, MAX_NESTING, ParseErrorKind, Span, parse, parse_str, tokenize,
};

fn parse_err(input: &str) -> erde::ParseError {
    match parse_str(input) {
        Err(CompileError::Parse(e)) => e,
        other => panic!("expected a parse error, got {other:?}"),
    }
}

// -----------------------------------------------------------
// Structure.
// -----------------------------------------------------------

#[test]
fn parse_empty_input() {
    let chunk = parse(&[]).expect("parse");
    assert!(chunk.block.stmts.is_empty());
}

#[test]
fn parse_statement_spans() {
    let chunk = parse_str("a = 1\n\n  f()\n").expect("parse");
    assert_eq!(chunk.block.stmts[0].span, Span::new(1, 1));
    assert_eq!(chunk.block.stmts[1].span, Span::new(3, 3));
}

#[test]
fn parse_semicolons_are_optional() {
    let chunk = parse_str("a = 1; b = 2;").expect("parse");
    assert_eq!(chunk.block.stmts.len(), 2);
}

#[test]
fn parse_scoped_declarations() {
    let chunk = parse_str("local a\nglobal b = 1\nmodule c = 2").expect("parse");
    let scopes: Vec<Scope> = chunk
        .block
        .stmts
        .iter()
        .map(|s| match &s.kind {
            StmtKind::Declaration { scope, .. } => *scope,
            other => panic!("unexpected statement: {other:?}"),
        })
        .collect();
    assert_eq!(scopes, [Scope::Local, Scope::Global, Scope::Module]);
}

#[test]
fn parse_if_elseif_else() {
    let chunk = parse_str("if a { f() } elseif b { g() } else { h() }").expect("parse");
    let StmtKind::If { branches, otherwise } = &chunk.block.stmts[0].kind else {
        panic!("expected if");
    };
    assert_eq!(branches.len(), 2);
    assert!(otherwise.is_some());
}

#[test]
fn parse_for_with_destructuring() {
    let chunk = parse_str("for i, { name } in ipairs(users) { print(name) }").expect("parse");
    let StmtKind::GenericFor { bindings, .. } = &chunk.block.stmts[0].kind else {
        panic!("expected generic for");
    };
    assert!(matches!(bindings[0], Binding::Name(_)));
    assert!(matches!(bindings[1], Binding::Pattern(_)));
}

#[test]
fn parse_arrow_with_block_body() {
    let chunk = parse_str("f = (x = 1) => { return self[x] }").expect("parse");
    let StmtKind::Assignment { values, .. } = &chunk.block.stmts[0].kind else {
        panic!("expected assignment");
    };
    let ExprKind::Function(function) = &values[0].kind else {
        panic!("expected function");
    };
    assert!(function.is_method);
    assert!(function.params[0].default.is_some());
    assert!(matches!(function.body, FunctionBody::Block(_)));
}

#[test]
fn parse_string_call_argument() {
    let chunk = parse_str("require 'lib'").expect("parse");
    assert!(matches!(chunk.block.stmts[0].kind, StmtKind::Call(_)));
}

#[test]
fn parse_optional_chain_assignment() {
    let chunk = parse_str("a?.b = 1").expect("parse");
    let StmtKind::Assignment { targets, .. } = &chunk.block.stmts[0].kind else {
        panic!("expected assignment");
    };
    assert!(targets[0].has_optional_link());
}

#[test]
fn parse_nested_function_resets_loop() {
    let err = parse_err("while true { f = () -> { break } }");
    assert_eq!(err.kind, ParseErrorKind::BreakOutsideLoop);
}

#[test]
fn parse_method_call_on_next_line() {
    let chunk = parse_str("builder.items\n  :push(1)\n  :push(2)").expect("parse");
    assert_eq!(chunk.block.stmts.len(), 1);
    let StmtKind::Call(call) = &chunk.block.stmts[0].kind else {
        panic!("expected call");
    };
    let ExprKind::MethodCall { object, .. } = &call.kind else {
        panic!("expected method call");
    };
    assert!(matches!(object.kind, ExprKind::MethodCall { .. }));
}

#[test]
fn parse_ternary_colon_on_next_line() {
    let chunk = parse_str("x = ready\n  ? start()\n  : wait(1)").expect("parse");
    let StmtKind::Assignment { values, .. } = &chunk.block.stmts[0].kind else {
        panic!("expected assignment");
    };
    assert!(matches!(values[0].kind, ExprKind::Ternary { .. }));
}

// -----------------------------------------------------------
// Nesting.
// -----------------------------------------------------------

fn nested_parens(depth: usize) -> String {
    format!("x = {}1{}", "(".repeat(depth), ")".repeat(depth))
}

#[test]
fn parse_deep_parens_fail_cleanly() {
    let err = parse_err(&nested_parens(MAX_NESTING + 50));
    assert_eq!(err.kind, ParseErrorKind::TooDeeplyNested);
    assert_eq!(err.span, Span::new(1, 5 + MAX_NESTING));
}

#[test]
fn parse_deep_blocks_fail_cleanly() {
    let depth = MAX_NESTING + 1;
    let source = format!("{}f(){}", "do { ".repeat(depth), " }".repeat(depth));
    let err = parse_err(&source);
    assert_eq!(err.kind, ParseErrorKind::TooDeeplyNested);
}

#[test]
fn parse_deep_unary_fails_cleanly() {
    let source = format!("x = {}1", "- ".repeat(MAX_NESTING * 2));
    let err = parse_err(&source);
    assert_eq!(err.kind, ParseErrorKind::TooDeeplyNested);
}

#[test]
fn parse_nesting_below_limit() {
    assert!(parse_str(&nested_parens(MAX_NESTING / 2)).is_ok());
}

// -----------------------------------------------------------
// Errors.
// -----------------------------------------------------------

#[test]
fn parse_error_unclosed_block() {
    let err = parse_err("if x {\n  f()\n");
    assert_eq!(
        err.kind,
        ParseErrorKind::Expected {
            expected: Expected::Symbol("}"),
            found: None
        }
    );
    assert_eq!(err.span, Span::new(2, 6));
}

#[test]
fn parse_error_unclosed_call() {
    let err = parse_err("print(a, b");
    assert_eq!(
        err.kind,
        ParseErrorKind::Expected {
            expected: Expected::Symbol(")"),
            found: None
        }
    );
}

#[test]
fn parse_error_missing_expression() {
    let err = parse_err("x = ");
    assert!(matches!(
        err.kind,
        ParseErrorKind::Expected {
            expected: Expected::Expression,
            found: None
        }
    ));
}

#[test]
fn parse_error_unexpected_token() {
    let err = parse_err("x = 1 +\n)");
    assert_eq!(err.span, Span::new(2, 1));
    assert_eq!(
        err.to_string(),
        "expected expression, found ')' at line 2, column 1"
    );
}

#[test]
fn parse_error_lua_keyword() {
    let err = parse_err("if a then b() end");
    assert!(matches!(
        err.kind,
        ParseErrorKind::Expected {
            expected: Expected::Symbol("{"),
            ..
        }
    ));
}

#[test]
fn parse_error_multiple_optional_targets() {
    let err = parse_err("a?.b, c = 1, 2");
    assert_eq!(err.kind, ParseErrorKind::InvalidAssignmentTarget);
}

#[test]
fn parse_error_empty_pattern() {
    let err = parse_err("local {} = t");
    assert!(matches!(
        err.kind,
        ParseErrorKind::Expected {
            expected: Expected::Name,
            ..
        }
    ));
}

#[test]
fn parse_error_bad_interpolation() {
    let err = parse_err("s = \"a {1 2} b\"");
    assert!(matches!(
        err.kind,
        ParseErrorKind::Expected {
            expected: Expected::Symbol("}"),
            ..
        }
    ));
}

#[test]
fn parse_tokens_from_tokenize() {
    let tokens = tokenize("return 1, 2").expect("tokenize");
    let chunk = parse(&tokens).expect("parse");
    assert!(matches!(&chunk.block.stmts[0].kind, StmtKind::Return(v) if v.len() == 2));
}
