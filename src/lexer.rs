use std::fmt;

use crate::parser::MAX_NESTING;
use crate::token::{Keyword, LUA_ONLY_KEYWORDS, Quote, Span, StrPiece, Token, TokenKind};

/// Largest code point a `\u{...}` escape may name.
const MAX_UTF8_ESCAPE: u32 = 0x10_FFFF;

/// Classifies a lexer error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexErrorKind {
    /// String literal without its closing delimiter.
    UnterminatedString,
    /// Block comment without its closing `]]`.
    UnterminatedComment,
    /// Backslash escape that Lua does not accept.
    InvalidEscape,
    /// Malformed numeric literal.
    InvalidNumber,
    /// Character that cannot start any token.
    UnexpectedCharacter(char),
    /// String interpolations nested deeper than [`MAX_NESTING`].
    TooDeeplyNested,
}

impl fmt::Display for LexErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnterminatedString => write!(f, "unterminated string literal"),
            Self::UnterminatedComment => write!(f, "unterminated block comment"),
            Self::InvalidEscape => write!(f, "invalid escape sequence"),
            Self::InvalidNumber => write!(f, "malformed number"),
            Self::UnexpectedCharacter(ch) => {
                write!(f, "unexpected character: {ch}")
            }
            Self::TooDeeplyNested => {
                write!(f, "interpolation is nested deeper than {MAX_NESTING} levels")
            }
        }
    }
}

/// Error produced during lexing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} at line {}, column {}", span.line, span.column)]
pub struct LexError {
    pub kind: LexErrorKind,
    pub span: Span,
}

/// Operators and punctuation, longest first so the first prefix match
/// is the longest one.
const SYMBOLS: &[&str] = &[
    "...", "..=", ".<<", ".>>", "//=", "||=", "&&=", "..", ".|", ".&", ".~", "+=", "-=", "->",
    "*=", "/=", "//", "%=", "^=", "==", "=>", "!=", "<=", ">=", "||", "&&", ".", "+", "-", "*",
    "/", "%", "^", "#", "=", "!", "<", ">", "(", ")", "{", "}", "[", "]", ",", ";", ":", "?",
];

/// Tokenize an Erde source string into a vector of tokens.
///
/// # Errors
///
/// Returns `LexError` on unterminated strings or comments, invalid
/// escapes, malformed numbers, or stray characters.
pub fn tokenize(input: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(input).collect()
}

/// Lazy tokenizer over a source string.
///
/// Yields tokens one at a time and stops for good after the first
/// error. To start over, build a new `Lexer` on the same source.
#[derive(Debug)]
pub struct Lexer<'a> {
    source: &'a str,
    input: &'a [u8],
    pos: usize,
    line: usize,
    col: usize,
    interpolation_depth: usize,
    done: bool,
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_token() {
            Ok(Some(token)) => Some(Ok(token)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<'a> Lexer<'a> {
    #[must_use]
    pub fn new(source: &'a str) -> Self {
        let start = if source.starts_with('\u{FEFF}') { 3 } else { 0 };
        Self {
            source,
            input: source.as_bytes(),
            pos: start,
            line: 1,
            col: 1,
            interpolation_depth: 0,
            done: false,
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>, LexError> {
        self.skip_trivia()?;
        if self.pos >= self.input.len() {
            return Ok(None);
        }
        self.read_token().map(Some)
    }

    fn read_token(&mut self) -> Result<Token, LexError> {
        let ch = self.input[self.pos];
        match ch {
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => Ok(self.read_name()),
            b'0'..=b'9' => self.read_number(),
            b'.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.read_number(),
            b'\'' | b'"' => self.read_quoted_string(ch),
            b'[' => match self.long_bracket_level() {
                Some(level) => self.read_long_string(level),
                None => self.read_symbol(),
            },
            _ => self.read_symbol(),
        }
    }

    const fn span(&self) -> Span {
        Span {
            line: self.line,
            column: self.col,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    fn advance(&mut self) {
        if self.pos < self.input.len() {
            let byte = self.input[self.pos];
            if byte == b'\n' {
                self.line += 1;
                self.col = 1;
            } else if byte & 0xC0 != 0x80 {
                // continuation bytes share the column of their lead byte
                self.col += 1;
            }
            self.pos += 1;
        }
    }

    fn advance_by(&mut self, n: usize) {
        for _ in 0..n {
            self.advance();
        }
    }

    fn slice(&self, start: usize) -> String {
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn skip_trivia(&mut self) -> Result<(), LexError> {
        while let Some(ch) = self.peek() {
            match ch {
                b' ' | b'\t' | b'\r' | b'\n' | 0x0B | 0x0C => self.advance(),
                b'-' if self.peek_at(1) == Some(b'-') => self.skip_comment()?,
                _ => break,
            }
        }
        Ok(())
    }

    fn skip_comment(&mut self) -> Result<(), LexError> {
        let start = self.span();
        self.advance_by(2);

        let block_level = if self.peek() == Some(b'[') {
            self.long_bracket_level()
        } else {
            None
        };

        if let Some(level) = block_level {
            self.advance_by(level + 2);
            while self.pos < self.input.len() {
                if self.closes_long_bracket(level) {
                    self.advance_by(level + 2);
                    return Ok(());
                }
                self.advance();
            }
            return Err(LexError {
                kind: LexErrorKind::UnterminatedComment,
                span: start,
            });
        }

        while self.peek().is_some_and(|c| c != b'\n') {
            self.advance();
        }
        Ok(())
    }

    /// If a long bracket `[==[` opens at the cursor, return its level.
    fn long_bracket_level(&self) -> Option<usize> {
        let mut level = 0;
        while self.peek_at(1 + level) == Some(b'=') {
            level += 1;
        }
        (self.peek_at(1 + level) == Some(b'[')).then_some(level)
    }

    fn closes_long_bracket(&self, level: usize) -> bool {
        self.peek() == Some(b']')
            && (1..=level).all(|i| self.peek_at(i) == Some(b'='))
            && self.peek_at(level + 1) == Some(b']')
    }

    fn read_name(&mut self) -> Token {
        let span = self.span();
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
        {
            self.advance();
        }
        let text = self.slice(start);
        let kind = Keyword::from_ident(&text).map_or_else(
            || {
                if LUA_ONLY_KEYWORDS.contains(&text.as_str()) {
                    TokenKind::Reserved
                } else {
                    TokenKind::Name
                }
            },
            TokenKind::Keyword,
        );
        Token { kind, text, span }
    }

    fn read_number(&mut self) -> Result<Token, LexError> {
        let span = self.span();
        let start = self.pos;
        let invalid = LexError {
            kind: LexErrorKind::InvalidNumber,
            span,
        };

        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X')) {
            self.advance_by(2);
            let digits = self.skip_while(|c| c.is_ascii_hexdigit());
            if digits == 0 {
                return Err(invalid);
            }
        } else {
            self.skip_while(|c| c.is_ascii_digit());
            if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
                self.skip_while(|c| c.is_ascii_digit());
            }
            if matches!(self.peek(), Some(b'e' | b'E')) {
                self.advance();
                if matches!(self.peek(), Some(b'+' | b'-')) {
                    self.advance();
                }
                if self.skip_while(|c| c.is_ascii_digit()) == 0 {
                    return Err(invalid);
                }
            }
        }

        let trailing_garbage = self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
            || (self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()));
        if trailing_garbage {
            return Err(invalid);
        }

        Ok(Token {
            kind: TokenKind::Number,
            text: self.slice(start),
            span,
        })
    }

    fn skip_while(&mut self, pred: impl Fn(u8) -> bool) -> usize {
        let mut count = 0;
        while self.peek().is_some_and(&pred) {
            self.advance();
            count += 1;
        }
        count
    }

    fn read_quoted_string(&mut self, quote_byte: u8) -> Result<Token, LexError> {
        let span = self.span();
        let start = self.pos;
        let quote = if quote_byte == b'"' {
            Quote::Double
        } else {
            Quote::Single
        };
        let interpolated = quote == Quote::Double;
        let unterminated = LexError {
            kind: LexErrorKind::UnterminatedString,
            span,
        };
        self.advance(); // skip opening quote

        let mut pieces = Vec::new();
        let mut buf = Vec::new();
        loop {
            match self.peek() {
                None | Some(b'\n' | b'\r') => return Err(unterminated),
                Some(c) if c == quote_byte => {
                    self.advance();
                    break;
                }
                Some(b'\\') => self.read_escape(&mut buf, interpolated, span)?,
                Some(b'{') if interpolated => {
                    flush_text(&mut pieces, &mut buf);
                    let tokens = self.read_interpolation(span)?;
                    pieces.push(StrPiece::Interp(tokens));
                }
                Some(c) => {
                    buf.push(c);
                    self.advance();
                }
            }
        }
        flush_text(&mut pieces, &mut buf);

        Ok(Token {
            kind: TokenKind::Str { quote, pieces },
            text: self.slice(start),
            span,
        })
    }

    /// Validate one escape sequence and append it to `buf` as written.
    fn read_escape(
        &mut self,
        buf: &mut Vec<u8>,
        interpolated: bool,
        literal: Span,
    ) -> Result<(), LexError> {
        let invalid = LexError {
            kind: LexErrorKind::InvalidEscape,
            span: self.span(),
        };
        let start = self.pos;
        self.advance(); // skip backslash

        match self.peek() {
            None => {
                return Err(LexError {
                    kind: LexErrorKind::UnterminatedString,
                    span: literal,
                });
            }
            Some(c @ (b'{' | b'}')) if interpolated => {
                buf.push(c);
                self.advance();
                return Ok(());
            }
            Some(b'a' | b'b' | b'f' | b'n' | b'r' | b't' | b'v' | b'\\' | b'"' | b'\'' | b'\n') => {
                self.advance();
            }
            Some(b'z') => {
                // `\z` also swallows the line breaks that follow it.
                self.advance();
                self.skip_while(|c| c.is_ascii_whitespace() || c == 0x0B);
            }
            Some(b'0'..=b'9') => {
                let digits_start = self.pos;
                let mut count = 0;
                while count < 3 && self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                    count += 1;
                }
                let value: u32 = self.slice(digits_start).parse().map_err(|_| invalid.clone())?;
                if value > 255 {
                    return Err(invalid);
                }
            }
            Some(b'x') => {
                self.advance();
                for _ in 0..2 {
                    if !self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                        return Err(invalid);
                    }
                    self.advance();
                }
            }
            Some(b'u') => {
                self.advance();
                if self.peek() != Some(b'{') {
                    return Err(invalid);
                }
                self.advance();
                let digits_start = self.pos;
                if self.skip_while(|c| c.is_ascii_hexdigit()) == 0 || self.peek() != Some(b'}') {
                    return Err(invalid);
                }
                u32::from_str_radix(&self.slice(digits_start), 16)
                    .ok()
                    .filter(|&value| value <= MAX_UTF8_ESCAPE)
                    .ok_or_else(|| invalid.clone())?;
                self.advance();
            }
            Some(_) => return Err(invalid),
        }

        buf.extend_from_slice(&self.input[start..self.pos]);
        Ok(())
    }

    /// Lex the tokens of a `{...}` interpolation, consuming both braces.
    fn read_interpolation(&mut self, literal: Span) -> Result<Vec<Token>, LexError> {
        if self.interpolation_depth >= MAX_NESTING {
            return Err(LexError {
                kind: LexErrorKind::TooDeeplyNested,
                span: self.span(),
            });
        }
        self.interpolation_depth += 1;
        let tokens = self.read_interpolation_tokens(literal);
        self.interpolation_depth -= 1;
        tokens
    }

    fn read_interpolation_tokens(&mut self, literal: Span) -> Result<Vec<Token>, LexError> {
        self.advance(); // skip {
        let mut tokens = Vec::new();
        let mut depth = 0usize;

        loop {
            self.skip_trivia()?;
            match self.peek() {
                None => {
                    return Err(LexError {
                        kind: LexErrorKind::UnterminatedString,
                        span: literal,
                    });
                }
                Some(b'}') if depth == 0 => {
                    self.advance();
                    return Ok(tokens);
                }
                Some(_) => {
                    let token = self.read_token()?;
                    if token.is_symbol("{") {
                        depth += 1;
                    } else if token.is_symbol("}") {
                        depth -= 1;
                    }
                    tokens.push(token);
                }
            }
        }
    }

    fn read_long_string(&mut self, level: usize) -> Result<Token, LexError> {
        let span = self.span();
        let start = self.pos;
        self.advance_by(level + 2);

        // Lua drops a newline directly after the opening bracket.
        if self.peek() == Some(b'\r') {
            self.advance();
        }
        if self.peek() == Some(b'\n') {
            self.advance();
        }

        let mut pieces = Vec::new();
        let mut buf = Vec::new();
        loop {
            match self.peek() {
                None => {
                    return Err(LexError {
                        kind: LexErrorKind::UnterminatedString,
                        span,
                    });
                }
                Some(b']') if self.closes_long_bracket(level) => {
                    self.advance_by(level + 2);
                    break;
                }
                Some(b'\\') if matches!(self.peek_at(1), Some(b'{' | b'}')) => {
                    self.advance();
                    buf.push(self.input[self.pos]);
                    self.advance();
                }
                Some(b'{') => {
                    flush_text(&mut pieces, &mut buf);
                    let tokens = self.read_interpolation(span)?;
                    pieces.push(StrPiece::Interp(tokens));
                }
                Some(c) => {
                    buf.push(c);
                    self.advance();
                }
            }
        }
        flush_text(&mut pieces, &mut buf);

        Ok(Token {
            kind: TokenKind::Str {
                quote: Quote::Long(level),
                pieces,
            },
            text: self.slice(start),
            span,
        })
    }

    fn read_symbol(&mut self) -> Result<Token, LexError> {
        let span = self.span();
        let rest = &self.input[self.pos..];
        let Some(symbol) = SYMBOLS.iter().find(|s| rest.starts_with(s.as_bytes())) else {
            let ch = self.source[self.pos..].chars().next().unwrap_or('\u{FFFD}');
            return Err(LexError {
                kind: LexErrorKind::UnexpectedCharacter(ch),
                span,
            });
        };
        self.advance_by(symbol.len());
        Ok(Token {
            kind: TokenKind::Symbol,
            text: (*symbol).to_string(),
            span,
        })
    }
}

fn flush_text(pieces: &mut Vec<StrPiece>, buf: &mut Vec<u8>) {
    if !buf.is_empty() {
        pieces.push(StrPiece::Text(String::from_utf8_lossy(buf).into_owned()));
        buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(input: &str) -> Vec<String> {
        tokenize(input)
            .expect("should tokenize")
            .into_iter()
            .map(|t| t.text)
            .collect()
    }

    #[test]
    fn names_and_keywords() {
        let tokens = tokenize("local foo_1 = nil").expect("should tokenize");
        assert_eq!(tokens[0].kind, TokenKind::Keyword(Keyword::Local));
        assert_eq!(tokens[1].kind, TokenKind::Name);
        assert_eq!(tokens[1].text, "foo_1");
        assert!(tokens[2].is_symbol("="));
        assert_eq!(tokens[3].kind, TokenKind::Keyword(Keyword::Nil));
    }

    #[test]
    fn lua_keywords_are_reserved() {
        let tokens = tokenize("end then").expect("should tokenize");
        assert_eq!(tokens[0].kind, TokenKind::Reserved);
        assert_eq!(tokens[1].kind, TokenKind::Reserved);
    }

    #[test]
    fn longest_match_operators() {
        assert_eq!(texts("a ..= b"), ["a", "..=", "b"]);
        assert_eq!(texts("f(...)"), ["f", "(", "...", ")"]);
        assert_eq!(texts("a // b //= c"), ["a", "//", "b", "//=", "c"]);
        assert_eq!(texts("a .<< 2"), ["a", ".<<", "2"]);
        assert_eq!(texts("x -> x"), ["x", "->", "x"]);
    }

    #[test]
    fn comments_are_discarded() {
        assert_eq!(texts("a -- note\nb"), ["a", "b"]);
        assert_eq!(texts("a --[[ multi\nline ]] b"), ["a", "b"]);
        assert_eq!(texts("a --[==[ ]] ]==] b"), ["a", "b"]);
    }

    #[test]
    fn unterminated_block_comment() {
        let err = tokenize("x --[[ never closed").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnterminatedComment);
        assert_eq!(err.span, Span::new(1, 3));
    }

    #[test]
    fn numbers() {
        assert_eq!(texts("1 1.5 .5 1e10 2.5E-3 0xFF"), [
            "1", "1.5", ".5", "1e10", "2.5E-3", "0xFF"
        ]);
    }

    #[test]
    fn number_before_concat() {
        assert_eq!(texts("1..x"), ["1", "..", "x"]);
    }

    #[test]
    fn invalid_numbers() {
        for input in ["1e", "0x", "12abc", "1.2.3", "1e+"] {
            let err = tokenize(input).unwrap_err();
            assert_eq!(err.kind, LexErrorKind::InvalidNumber, "input: {input}");
        }
    }

    #[test]
    fn single_quoted_string_keeps_escapes() {
        let tokens = tokenize(r"'a\nb'").expect("should tokenize");
        assert_eq!(
            tokens[0].kind,
            TokenKind::Str {
                quote: Quote::Single,
                pieces: vec![StrPiece::Text(r"a\nb".to_string())],
            }
        );
    }

    #[test]
    fn interpolated_string() {
        let tokens = tokenize(r#""hi {name}!""#).expect("should tokenize");
        let TokenKind::Str { quote, pieces } = &tokens[0].kind else {
            panic!("expected string token");
        };
        assert_eq!(*quote, Quote::Double);
        assert_eq!(pieces.len(), 3);
        assert!(matches!(&pieces[1], StrPiece::Interp(t) if t.len() == 1 && t[0].text == "name"));
    }

    #[test]
    fn escaped_braces_in_double_quotes() {
        let tokens = tokenize(r#""\{x\}""#).expect("should tokenize");
        assert!(matches!(
            &tokens[0].kind,
            TokenKind::Str { pieces, .. } if pieces == &[StrPiece::Text("{x}".to_string())]
        ));
    }

    #[test]
    fn brace_escape_invalid_in_single_quotes() {
        let err = tokenize(r"'\{'").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::InvalidEscape);
        assert_eq!(err.span, Span::new(1, 2));
    }

    #[test]
    fn invalid_escapes() {
        for input in [r#""\q""#, r#""\300""#, r#""\xZ1""#, r#""\u{}""#] {
            let err = tokenize(input).unwrap_err();
            assert_eq!(err.kind, LexErrorKind::InvalidEscape, "input: {input}");
        }
    }

    #[test]
    fn unterminated_string_points_at_start() {
        let err = tokenize("x = 'abc").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnterminatedString);
        assert_eq!(err.span, Span::new(1, 5));
    }

    #[test]
    fn unterminated_interpolation() {
        let err = tokenize("x = \"a {b").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnterminatedString);
        assert_eq!(err.span, Span::new(1, 5));
    }

    #[test]
    fn long_string_drops_leading_newline() {
        let tokens = tokenize("[==[\nline ]] ]==]").expect("should tokenize");
        assert_eq!(
            tokens[0].kind,
            TokenKind::Str {
                quote: Quote::Long(2),
                pieces: vec![StrPiece::Text("line ]] ".to_string())],
            }
        );
    }

    #[test]
    fn index_is_not_long_string() {
        assert_eq!(texts("t[x]"), ["t", "[", "x", "]"]);
        assert_eq!(texts("t[=x]").len(), 5);
    }

    #[test]
    fn unexpected_character() {
        let err = tokenize("a @ b").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnexpectedCharacter('@'));
        assert_eq!(err.span, Span::new(1, 3));
    }

    #[test]
    fn span_tracking() {
        let tokens = tokenize("a\n  b c").expect("should tokenize");
        assert_eq!(tokens[0].span, Span::new(1, 1));
        assert_eq!(tokens[1].span, Span::new(2, 3));
        assert_eq!(tokens[2].span, Span::new(2, 5));
    }

    #[test]
    fn multibyte_characters_count_as_one_column() {
        let tokens = tokenize("'é' x").expect("should tokenize");
        assert_eq!(tokens[1].span, Span::new(1, 5));
    }

    #[test]
    fn lexer_is_lazy_and_fused() {
        let mut lexer = Lexer::new("a 'b");
        assert!(matches!(lexer.next(), Some(Ok(t)) if t.text == "a"));
        assert!(matches!(lexer.next(), Some(Err(_))));
        assert!(lexer.next().is_none());
    }

    #[test]
    fn bom_stripping() {
        assert_eq!(texts("\u{FEFF}x"), ["x"]);
    }
}
