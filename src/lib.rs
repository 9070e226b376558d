//! Erde to Lua compiler.
//!
//! Erde is a small language that compiles to Lua. This crate holds the
//! whole pipeline: a lexer, a recursive-descent parser producing a
//! typed syntax tree, and a code generator that writes Lua source along
//! with a line map for translating runtime errors back to Erde lines.
//!
//! # Quick start
//!
//! ```
//! let lua = erde::compile("x = 1 + 2").unwrap();
//! assert_eq!(lua, "local x = 1 + 2\n");
//! ```
//!
//! ## Choosing a Lua target
//!
//! ```
//! use erde::{CompileOptions, Target, compile_with};
//!
//! let options = CompileOptions::new().target(Target::Lua54);
//! let generated = compile_with("y = a .| b", &options).unwrap();
//! assert_eq!(generated.code, "local y = a | b\n");
//! assert_eq!(generated.source_map.original_line(1), Some(1));
//! ```
//!
//! ## Errors
//!
//! ```
//! let err = erde::compile("x = \"abc").unwrap_err();
//! assert_eq!((err.line(), err.column()), (1, 5));
//! ```

// Allow noisy pedantic lints that don't add value for
// a library crate.
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod ast;
pub mod codegen;
pub mod lexer;
pub mod options;
pub mod parser;
pub mod source_map;
pub mod token;

pub use ast::Chunk;
pub use codegen::{GeneratedCode, generate};
pub use lexer::{LexError, LexErrorKind, Lexer, tokenize};
pub use options::{CompileOptions, OptionsError, Target};
pub use parser::{Expected, MAX_NESTING, ParseError, ParseErrorKind, parse};
pub use source_map::SourceMap;
pub use token::{Span, Token, TokenKind};

/// Unified error type covering both lexing and parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    /// A lexer error.
    #[error("{0}")]
    Lex(#[from] LexError),
    /// A parser error.
    #[error("{0}")]
    Parse(#[from] ParseError),
}

impl CompileError {
    /// Error description without the location suffix.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Lex(e) => e.kind.to_string(),
            Self::Parse(e) => e.kind.to_string(),
        }
    }

    #[must_use]
    pub const fn span(&self) -> Span {
        match self {
            Self::Lex(e) => e.span,
            Self::Parse(e) => e.span,
        }
    }

    /// 1-based line of the error.
    #[must_use]
    pub const fn line(&self) -> usize {
        self.span().line
    }

    /// 1-based column of the error, counted in characters.
    #[must_use]
    pub const fn column(&self) -> usize {
        self.span().column
    }
}

/// Tokenize and parse Erde source in one step.
pub fn parse_str(source: &str) -> Result<Chunk, CompileError> {
    let tokens = tokenize(source)?;
    log::trace!("lexed {} tokens", tokens.len());
    let chunk = parse(&tokens)?;
    log::trace!("parsed {} top-level statements", chunk.block.stmts.len());
    Ok(chunk)
}

/// Compile Erde source to Lua with default options.
pub fn compile(source: &str) -> Result<String, CompileError> {
    compile_with(source, &CompileOptions::default()).map(|generated| generated.code)
}

/// Compile Erde source to Lua, returning the code and its line map.
pub fn compile_with(
    source: &str,
    options: &CompileOptions,
) -> Result<GeneratedCode, CompileError> {
    let chunk = parse_str(source).inspect_err(|e| log::debug!("compile failed: {e}"))?;
    let generated = generate(&chunk, options);
    log::debug!(
        "generated {} lines of Lua for target {}",
        generated.source_map.len(),
        options.target
    );
    Ok(generated)
}
