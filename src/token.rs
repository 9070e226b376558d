/// Source location for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl Span {
    #[must_use]
    pub const fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// Reserved Erde keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Local,
    Global,
    Module,
    Function,
    If,
    Elseif,
    Else,
    While,
    Repeat,
    Until,
    For,
    In,
    Do,
    Break,
    Continue,
    Return,
    True,
    False,
    Nil,
}

impl Keyword {
    #[must_use]
    pub fn from_ident(ident: &str) -> Option<Self> {
        let kw = match ident {
            "local" => Self::Local,
            "global" => Self::Global,
            "module" => Self::Module,
            "function" => Self::Function,
            "if" => Self::If,
            "elseif" => Self::Elseif,
            "else" => Self::Else,
            "while" => Self::While,
            "repeat" => Self::Repeat,
            "until" => Self::Until,
            "for" => Self::For,
            "in" => Self::In,
            "do" => Self::Do,
            "break" => Self::Break,
            "continue" => Self::Continue,
            "return" => Self::Return,
            "true" => Self::True,
            "false" => Self::False,
            "nil" => Self::Nil,
            _ => return None,
        };
        Some(kw)
    }
}

/// Lua keywords with no meaning in Erde. They cannot be used as names
/// because the generated code would not parse.
pub const LUA_ONLY_KEYWORDS: &[&str] = &["and", "or", "not", "then", "end", "goto"];

/// Quoting style of a string literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quote {
    /// `'...'`, never interpolated.
    Single,
    /// `"..."`, interpolated.
    Double,
    /// `[[...]]` with the given number of `=`, interpolated.
    Long(usize),
}

/// Piece of a string literal as seen by the lexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrPiece {
    /// Raw text. Escapes are kept as written, except `\{` and `\}`,
    /// which are reduced to the bare brace.
    Text(String),
    /// Tokens of an interpolated `{...}` expression.
    Interp(Vec<Token>),
}

/// Token kinds produced by the lexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifier.
    Name,
    /// Erde keyword.
    Keyword(Keyword),
    /// Lua keyword that is not valid in Erde source.
    Reserved,
    /// Numeric literal, kept verbatim in `text`.
    Number,
    /// String literal.
    Str { quote: Quote, pieces: Vec<StrPiece> },
    /// Operator or punctuation, stored in `text`.
    Symbol,
}

/// A single token with its kind, text, and source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub span: Span,
}

impl Token {
    /// True if this token is the given operator or punctuation.
    #[must_use]
    pub fn is_symbol(&self, symbol: &str) -> bool {
        self.kind == TokenKind::Symbol && self.text == symbol
    }

    #[must_use]
    pub fn is_keyword(&self, keyword: Keyword) -> bool {
        self.kind == TokenKind::Keyword(keyword)
    }

    /// Position just past the last character of this token.
    #[must_use]
    pub fn end(&self) -> Span {
        let mut span = self.span;
        for ch in self.text.chars() {
            if ch == '\n' {
                span.line += 1;
                span.column = 1;
            } else {
                span.column += 1;
            }
        }
        span
    }
}
