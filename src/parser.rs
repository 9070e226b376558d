use std::fmt;

use crate::ast::{
    Assoc, BinaryOp, Binding, Block, Chunk, Expr, ExprKind, Function, FunctionBody, FunctionName,
    IndexKey, Param, Pattern, PatternField, PatternKind, Scope, Stmt, StmtKind, StringLit,
    StringPart, TableField, UNARY_PRECEDENCE, UnaryOp,
};
use crate::token::{Keyword, Span, StrPiece, Token, TokenKind};

/// What the parser was looking for when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    /// A specific operator or punctuation.
    Symbol(&'static str),
    /// A specific keyword.
    Keyword(&'static str),
    Expression,
    Name,
    Statement,
}

impl fmt::Display for Expected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Symbol(s) | Self::Keyword(s) => write!(f, "'{s}'"),
            Self::Expression => write!(f, "expression"),
            Self::Name => write!(f, "identifier"),
            Self::Statement => write!(f, "statement"),
        }
    }
}

/// Classifies a parser error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Unexpected token, or end of input when `found` is `None`.
    Expected {
        expected: Expected,
        found: Option<String>,
    },
    /// Expression used as a statement without being a call or assignment.
    ExpectedStatement,
    /// Left side of an assignment is not a name or index.
    InvalidAssignmentTarget,
    BreakOutsideLoop,
    ContinueOutsideLoop,
    /// `...` inside a function that does not declare varargs.
    VarargsOutsideFunction,
    /// `module` declaration below the top level.
    NestedModule,
    /// Top-level `return` in a chunk that declares `module` values.
    ModuleWithReturn,
    /// Expressions or blocks nested deeper than [`MAX_NESTING`].
    TooDeeplyNested,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expected {
                expected,
                found: None,
            } => write!(f, "expected {expected}, found end of input"),
            Self::Expected {
                expected,
                found: Some(t),
            } => write!(f, "expected {expected}, found '{t}'"),
            Self::ExpectedStatement => {
                write!(f, "expression is not a statement (expected call or assignment)")
            }
            Self::InvalidAssignmentTarget => write!(f, "invalid assignment target"),
            Self::BreakOutsideLoop => write!(f, "'break' outside of a loop"),
            Self::ContinueOutsideLoop => write!(f, "'continue' outside of a loop"),
            Self::VarargsOutsideFunction => {
                write!(f, "cannot use '...' outside a vararg function")
            }
            Self::NestedModule => write!(f, "'module' is only allowed at the top level"),
            Self::ModuleWithReturn => {
                write!(f, "cannot return from a chunk that declares 'module' values")
            }
            Self::TooDeeplyNested => write!(f, "nesting is deeper than {MAX_NESTING} levels"),
        }
    }
}

/// Error produced during parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} at line {}, column {}", span.line, span.column)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub span: Span,
}

type ParseResult<T> = Result<T, ParseError>;

/// Deepest nesting of expressions and blocks the parser accepts.
pub const MAX_NESTING: usize = 100;

/// A bracketed token range: the index of the closer and whether a
/// comma sits directly inside.
#[derive(Debug, Clone, Copy)]
struct Group {
    close: usize,
    comma: bool,
}

/// Pair every opening bracket with its closer in one pass.
fn match_groups(tokens: &[Token]) -> Vec<Option<Group>> {
    let mut groups = vec![None; tokens.len()];
    let mut stack: Vec<(usize, &str, bool)> = Vec::new();

    for (i, token) in tokens.iter().enumerate() {
        if token.kind != TokenKind::Symbol {
            continue;
        }
        match token.text.as_str() {
            "(" => stack.push((i, ")", false)),
            "[" => stack.push((i, "]", false)),
            "{" => stack.push((i, "}", false)),
            ")" | "]" | "}" => {
                if stack.last().is_some_and(|&(_, close, _)| close == token.text) {
                    if let Some((open, _, comma)) = stack.pop() {
                        groups[open] = Some(Group { close: i, comma });
                    }
                }
            }
            "," => {
                if let Some(top) = stack.last_mut() {
                    top.2 = true;
                }
            }
            _ => {}
        }
    }

    groups
}

/// Parse a token stream into a `Chunk`.
///
/// # Errors
///
/// Returns `ParseError` at the first token that does not fit the
/// grammar. No partial tree is produced.
pub fn parse(tokens: &[Token]) -> Result<Chunk, ParseError> {
    let eof = tokens.last().map_or(Span::new(1, 1), Token::end);
    Parser::new(tokens, eof, true).parse_chunk()
}

struct Parser<'a> {
    tokens: &'a [Token],
    groups: Vec<Option<Group>>,
    pos: usize,
    eof: Span,
    /// Closers of the delimiters currently open, innermost last.
    open: Vec<&'static str>,
    depth: usize,
    /// Open-delimiter count at the `?` of the ternary whose `then`
    /// branch is being parsed.
    ternary_colon: Option<usize>,
    loop_depth: usize,
    block_depth: usize,
    function_nesting: usize,
    vararg: bool,
    has_module: bool,
    top_level_return: Option<Span>,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token], eof: Span, vararg: bool) -> Self {
        Self {
            tokens,
            groups: match_groups(tokens),
            pos: 0,
            eof,
            open: Vec::new(),
            depth: 0,
            ternary_colon: None,
            loop_depth: 0,
            block_depth: 0,
            function_nesting: 0,
            vararg,
            has_module: false,
            top_level_return: None,
        }
    }

    fn parse_chunk(mut self) -> ParseResult<Chunk> {
        let mut stmts = Vec::new();
        while self.pos < self.tokens.len() {
            stmts.push(self.parse_statement()?);
            self.eat_symbol(";");
        }

        if let Some(span) = self.top_level_return.filter(|_| self.has_module) {
            return Err(ParseError {
                kind: ParseErrorKind::ModuleWithReturn,
                span,
            });
        }

        Ok(Chunk {
            block: Block { stmts },
        })
    }

    // -- token helpers --

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + offset)
    }

    fn previous(&self) -> Option<&'a Token> {
        self.pos.checked_sub(1).and_then(|i| self.tokens.get(i))
    }

    fn current_span(&self) -> Span {
        self.peek().map_or(self.eof, |t| t.span)
    }

    fn check_symbol(&self, symbol: &str) -> bool {
        self.peek().is_some_and(|t| t.is_symbol(symbol))
    }

    fn check_keyword(&self, keyword: Keyword) -> bool {
        self.peek().is_some_and(|t| t.is_keyword(keyword))
    }

    fn eat_symbol(&mut self, symbol: &str) -> bool {
        if self.check_symbol(symbol) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        if self.check_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// True if the next token starts on the line where the previous
    /// token ended.
    fn on_same_line(&self) -> bool {
        match (self.previous(), self.peek()) {
            (Some(prev), Some(next)) => prev.end().line == next.span.line,
            _ => false,
        }
    }

    /// True if the token at `offset` starts right where the one before
    /// it ends, with no whitespace between.
    fn is_adjacent(&self, offset: usize) -> bool {
        match (
            (self.pos + offset).checked_sub(1).and_then(|i| self.tokens.get(i)),
            self.peek_at(offset),
        ) {
            (Some(prev), Some(next)) => prev.end() == next.span,
            _ => false,
        }
    }

    fn group_at(&self, pos: usize) -> Option<Group> {
        self.groups.get(pos).copied().flatten()
    }

    /// True if the `(` at the cursor opens an arrow function's
    /// parameter list: its matching `)` is followed by `->` or `=>`.
    fn at_arrow_params(&self) -> bool {
        self.group_at(self.pos)
            .and_then(|g| self.tokens.get(g.close + 1))
            .is_some_and(|t| t.is_symbol("->") || t.is_symbol("=>"))
    }

    /// Run `f` one nesting level deeper.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        self.descend()?;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn descend(&mut self) -> ParseResult<()> {
        if self.depth >= MAX_NESTING {
            return Err(Self::error(
                ParseErrorKind::TooDeeplyNested,
                self.current_span(),
            ));
        }
        self.depth += 1;
        Ok(())
    }

    fn unexpected(&self, expected: Expected) -> ParseError {
        match self.peek() {
            Some(token) => ParseError {
                kind: ParseErrorKind::Expected {
                    expected,
                    found: Some(token.text.clone()),
                },
                span: token.span,
            },
            None => {
                // Running out of input inside a delimiter is reported
                // as the missing closer.
                let expected = self.open.last().map_or(expected, |&c| Expected::Symbol(c));
                ParseError {
                    kind: ParseErrorKind::Expected {
                        expected,
                        found: None,
                    },
                    span: self.eof,
                }
            }
        }
    }

    fn error(kind: ParseErrorKind, span: Span) -> ParseError {
        ParseError { kind, span }
    }

    fn expect_symbol(&mut self, symbol: &'static str) -> ParseResult<&'a Token> {
        match self.peek() {
            Some(token) if token.is_symbol(symbol) => {
                self.pos += 1;
                Ok(token)
            }
            _ => Err(self.unexpected(Expected::Symbol(symbol))),
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword, text: &'static str) -> ParseResult<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(Expected::Keyword(text)))
        }
    }

    fn expect_name(&mut self) -> ParseResult<String> {
        match self.peek() {
            Some(token) if token.kind == TokenKind::Name => {
                self.pos += 1;
                Ok(token.text.clone())
            }
            _ => Err(self.unexpected(Expected::Name)),
        }
    }

    fn open_delimiter(&mut self, open: &'static str, close: &'static str) -> ParseResult<Span> {
        let span = self.expect_symbol(open)?.span;
        self.open.push(close);
        Ok(span)
    }

    fn close_delimiter(&mut self, close: &'static str) -> ParseResult<()> {
        self.expect_symbol(close)?;
        self.open.pop();
        Ok(())
    }

    /// Parse `open item {"," item} [","] close`.
    fn parse_delimited<T>(
        &mut self,
        open: &'static str,
        close: &'static str,
        mut item: impl FnMut(&mut Self) -> ParseResult<T>,
    ) -> ParseResult<Vec<T>> {
        self.open_delimiter(open, close)?;
        let mut items = Vec::new();
        while !self.check_symbol(close) {
            items.push(item(self)?);
            if !self.eat_symbol(",") {
                break;
            }
        }
        self.close_delimiter(close)?;
        Ok(items)
    }

    // -- blocks and statements --

    fn parse_block(&mut self) -> ParseResult<Block> {
        self.nested(Self::parse_block_inner)
    }

    fn parse_block_inner(&mut self) -> ParseResult<Block> {
        self.open_delimiter("{", "}")?;
        self.block_depth += 1;

        let mut stmts = Vec::new();
        while !self.check_symbol("}") {
            if self.peek().is_none() {
                return Err(self.unexpected(Expected::Symbol("}")));
            }
            stmts.push(self.parse_statement()?);
            self.eat_symbol(";");
        }

        self.block_depth -= 1;
        self.close_delimiter("}")?;
        Ok(Block { stmts })
    }

    fn parse_loop_body(&mut self) -> ParseResult<Block> {
        self.loop_depth += 1;
        let body = self.parse_block();
        self.loop_depth -= 1;
        body
    }

    fn parse_statement(&mut self) -> ParseResult<Stmt> {
        let Some(token) = self.peek() else {
            return Err(self.unexpected(Expected::Statement));
        };
        let span = token.span;

        let kind = match &token.kind {
            TokenKind::Keyword(kw @ (Keyword::Local | Keyword::Global | Keyword::Module)) => {
                let scope = match kw {
                    Keyword::Local => Scope::Local,
                    Keyword::Global => Scope::Global,
                    _ => Scope::Module,
                };
                if scope == Scope::Module {
                    if self.block_depth > 0 {
                        return Err(Self::error(ParseErrorKind::NestedModule, span));
                    }
                    self.has_module = true;
                }
                self.pos += 1;
                if self.check_keyword(Keyword::Function) {
                    self.parse_function_decl(Some(scope))?
                } else {
                    self.parse_declaration(scope)?
                }
            }
            TokenKind::Keyword(Keyword::Function) => self.parse_function_decl(None)?,
            TokenKind::Keyword(Keyword::If) => self.parse_if()?,
            TokenKind::Keyword(Keyword::While) => {
                self.pos += 1;
                let condition = self.parse_expr()?;
                let body = self.parse_loop_body()?;
                StmtKind::While { condition, body }
            }
            TokenKind::Keyword(Keyword::Repeat) => {
                self.pos += 1;
                let body = self.parse_loop_body()?;
                self.expect_keyword(Keyword::Until, "until")?;
                let condition = self.parse_expr()?;
                StmtKind::Repeat { body, condition }
            }
            TokenKind::Keyword(Keyword::For) => self.parse_for()?,
            TokenKind::Keyword(Keyword::Do) => {
                self.pos += 1;
                StmtKind::Do(self.parse_block()?)
            }
            TokenKind::Keyword(Keyword::Break) => {
                if self.loop_depth == 0 {
                    return Err(Self::error(ParseErrorKind::BreakOutsideLoop, span));
                }
                self.pos += 1;
                StmtKind::Break
            }
            TokenKind::Keyword(Keyword::Continue) => {
                if self.loop_depth == 0 {
                    return Err(Self::error(ParseErrorKind::ContinueOutsideLoop, span));
                }
                self.pos += 1;
                StmtKind::Continue
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.pos += 1;
                if !self.in_function() && self.top_level_return.is_none() {
                    self.top_level_return = Some(span);
                }
                let ends_block =
                    self.peek().is_none() || self.check_symbol("}") || self.check_symbol(";");
                let values = if ends_block {
                    Vec::new()
                } else {
                    self.parse_expr_list()?
                };
                StmtKind::Return(values)
            }
            TokenKind::Name => self.parse_expr_statement()?,
            TokenKind::Symbol if token.text == "(" => self.parse_expr_statement()?,
            _ => return Err(self.unexpected(Expected::Statement)),
        };

        Ok(Stmt { kind, span })
    }

    const fn in_function(&self) -> bool {
        self.function_nesting > 0
    }

    fn parse_declaration(&mut self, scope: Scope) -> ParseResult<StmtKind> {
        let mut bindings = vec![self.parse_binding()?];
        while self.eat_symbol(",") {
            bindings.push(self.parse_binding()?);
        }

        let values = if self.eat_symbol("=") {
            self.parse_expr_list()?
        } else if bindings.iter().any(|b| matches!(b, Binding::Pattern(_))) {
            return Err(self.unexpected(Expected::Symbol("=")));
        } else {
            Vec::new()
        };

        Ok(StmtKind::Declaration {
            scope,
            bindings,
            values,
        })
    }

    fn parse_binding(&mut self) -> ParseResult<Binding> {
        if self.check_symbol("{") {
            let fields = self.parse_delimited("{", "}", |p| {
                let key = p.expect_name()?;
                let name = if p.eat_symbol(":") {
                    p.expect_name()?
                } else {
                    key.clone()
                };
                let default = p.parse_default()?;
                Ok(PatternField { key, name, default })
            })?;
            return self.finish_pattern(PatternKind::Map, fields);
        }

        if self.check_symbol("[") {
            let fields = self.parse_delimited("[", "]", |p| {
                let name = p.expect_name()?;
                let default = p.parse_default()?;
                Ok(PatternField {
                    key: String::new(),
                    name,
                    default,
                })
            })?;
            return self.finish_pattern(PatternKind::Array, fields);
        }

        Ok(Binding::Name(self.expect_name()?))
    }

    fn finish_pattern(
        &self,
        kind: PatternKind,
        fields: Vec<PatternField>,
    ) -> ParseResult<Binding> {
        if fields.is_empty() {
            let closer = self.previous().map_or(self.eof, |t| t.span);
            return Err(ParseError {
                kind: ParseErrorKind::Expected {
                    expected: Expected::Name,
                    found: self.previous().map(|t| t.text.clone()),
                },
                span: closer,
            });
        }
        Ok(Binding::Pattern(Pattern { kind, fields }))
    }

    fn parse_default(&mut self) -> ParseResult<Option<Expr>> {
        if self.eat_symbol("=") {
            Ok(Some(self.parse_expr()?))
        } else {
            Ok(None)
        }
    }

    fn parse_function_decl(&mut self, scope: Option<Scope>) -> ParseResult<StmtKind> {
        self.expect_keyword(Keyword::Function, "function")?;

        let mut path = vec![self.expect_name()?];
        let mut method = None;
        if scope.is_none() {
            while self.eat_symbol(".") {
                path.push(self.expect_name()?);
            }
            if self.eat_symbol(":") {
                method = Some(self.expect_name()?);
            }
        }

        let (params, varargs) = self.parse_params()?;
        let body = self.with_function(varargs.is_some(), |p| p.parse_block())?;

        Ok(StmtKind::FunctionDecl {
            scope,
            name: FunctionName { path, method },
            function: Function {
                params,
                varargs,
                is_method: false,
                body: FunctionBody::Block(body),
            },
        })
    }

    /// Run `f` in a fresh function context: loops do not extend into
    /// nested functions and `...` refers to the new function.
    fn with_function<T>(
        &mut self,
        vararg: bool,
        f: impl FnOnce(&mut Self) -> ParseResult<T>,
    ) -> ParseResult<T> {
        let saved_loop = std::mem::replace(&mut self.loop_depth, 0);
        let saved_vararg = std::mem::replace(&mut self.vararg, vararg);
        self.function_nesting += 1;
        let result = f(self);
        self.loop_depth = saved_loop;
        self.vararg = saved_vararg;
        self.function_nesting -= 1;
        result
    }

    #[allow(clippy::type_complexity)]
    fn parse_params(&mut self) -> ParseResult<(Vec<Param>, Option<Option<String>>)> {
        self.open_delimiter("(", ")")?;
        let mut params = Vec::new();
        let mut varargs = None;

        while !self.check_symbol(")") {
            if self.eat_symbol("...") {
                let name = if self.peek().is_some_and(|t| t.kind == TokenKind::Name) {
                    Some(self.expect_name()?)
                } else {
                    None
                };
                varargs = Some(name);
                self.eat_symbol(",");
                break;
            }

            let binding = self.parse_binding()?;
            let default = self.parse_default()?;
            params.push(Param { binding, default });
            if !self.eat_symbol(",") {
                break;
            }
        }

        self.close_delimiter(")")?;
        Ok((params, varargs))
    }

    fn parse_if(&mut self) -> ParseResult<StmtKind> {
        self.pos += 1;
        let mut branches = Vec::new();
        let condition = self.parse_expr()?;
        branches.push((condition, self.parse_block()?));

        while self.eat_keyword(Keyword::Elseif) {
            let condition = self.parse_expr()?;
            branches.push((condition, self.parse_block()?));
        }

        let otherwise = if self.eat_keyword(Keyword::Else) {
            Some(self.parse_block()?)
        } else {
            None
        };

        Ok(StmtKind::If {
            branches,
            otherwise,
        })
    }

    fn parse_for(&mut self) -> ParseResult<StmtKind> {
        self.pos += 1;

        let numeric = self.peek().is_some_and(|t| t.kind == TokenKind::Name)
            && self.peek_at(1).is_some_and(|t| t.is_symbol("="));

        if numeric {
            let var = self.expect_name()?;
            self.expect_symbol("=")?;
            let start = self.parse_expr()?;
            self.expect_symbol(",")?;
            let limit = self.parse_expr()?;
            let step = if self.eat_symbol(",") {
                Some(self.parse_expr()?)
            } else {
                None
            };
            let body = self.parse_loop_body()?;
            return Ok(StmtKind::NumericFor {
                var,
                start,
                limit,
                step,
                body,
            });
        }

        let mut bindings = vec![self.parse_binding()?];
        while self.eat_symbol(",") {
            bindings.push(self.parse_binding()?);
        }
        self.expect_keyword(Keyword::In, "in")?;
        let exprs = self.parse_expr_list()?;
        let body = self.parse_loop_body()?;

        Ok(StmtKind::GenericFor {
            bindings,
            exprs,
            body,
        })
    }

    fn parse_expr_statement(&mut self) -> ParseResult<StmtKind> {
        let first = self.parse_suffixed()?;

        if self.check_symbol("=") || self.check_symbol(",") {
            let mut targets = vec![first];
            while self.eat_symbol(",") {
                targets.push(self.parse_suffixed()?);
            }
            self.expect_symbol("=")?;
            let values = self.parse_expr_list()?;

            let multiple = targets.len() > 1;
            if let Some(bad) = targets
                .iter()
                .find(|t| !t.is_assignable() || (multiple && t.has_optional_link()))
            {
                return Err(Self::error(ParseErrorKind::InvalidAssignmentTarget, bad.span));
            }
            return Ok(StmtKind::Assignment { targets, values });
        }

        if let Some(op) = self
            .peek()
            .filter(|t| t.kind == TokenKind::Symbol)
            .and_then(|t| BinaryOp::from_compound(&t.text))
        {
            if !first.is_assignable() || first.has_optional_link() {
                return Err(Self::error(
                    ParseErrorKind::InvalidAssignmentTarget,
                    first.span,
                ));
            }
            self.pos += 1;
            let value = self.parse_expr()?;
            return Ok(StmtKind::CompoundAssignment {
                target: first,
                op,
                value,
            });
        }

        if first.is_call() {
            return Ok(StmtKind::Call(first));
        }

        Err(Self::error(ParseErrorKind::ExpectedStatement, first.span))
    }

    // -- expressions --

    fn parse_expr_list(&mut self) -> ParseResult<Vec<Expr>> {
        let mut exprs = vec![self.parse_expr()?];
        while self.eat_symbol(",") {
            exprs.push(self.parse_expr()?);
        }
        Ok(exprs)
    }

    fn parse_expr(&mut self) -> ParseResult<Expr> {
        self.nested(Self::parse_ternary)
    }

    fn parse_ternary(&mut self) -> ParseResult<Expr> {
        let condition = self.parse_binary(2)?;
        if !self.check_symbol("?") {
            return Ok(condition);
        }

        self.pos += 1;
        let outer = self.ternary_colon.replace(self.open.len());
        let then = self.parse_expr();
        self.ternary_colon = outer;
        let then = then?;
        self.expect_symbol(":")?;
        let otherwise = self.parse_expr()?;
        let span = condition.span;
        Ok(Expr {
            kind: ExprKind::Ternary {
                condition: Box::new(condition),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            span,
        })
    }

    /// Precedence climbing over binary operators binding at least as
    /// tightly as `min_precedence`.
    fn parse_binary(&mut self, min_precedence: u8) -> ParseResult<Expr> {
        let start_depth = self.depth;
        let result = self.parse_binary_folds(min_precedence);
        self.depth = start_depth;
        result
    }

    /// Each fold makes the tree one level deeper and counts as nesting.
    fn parse_binary_folds(&mut self, min_precedence: u8) -> ParseResult<Expr> {
        let mut left = self.parse_unary()?;

        while let Some(op) = self
            .peek()
            .filter(|t| t.kind == TokenKind::Symbol)
            .and_then(|t| BinaryOp::from_symbol(&t.text))
        {
            let precedence = op.precedence();
            if precedence < min_precedence {
                break;
            }
            self.descend()?;
            self.pos += 1;

            let next_min = match op.assoc() {
                Assoc::Left => precedence + 1,
                Assoc::Right => precedence,
            };
            let right = self.parse_binary(next_min)?;
            let span = left.span;
            left = Expr {
                kind: ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            };
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        let op = self.peek().and_then(|t| {
            if t.kind != TokenKind::Symbol {
                return None;
            }
            match t.text.as_str() {
                "-" => Some(UnaryOp::Neg),
                "!" => Some(UnaryOp::Not),
                "#" => Some(UnaryOp::Len),
                ".~" => Some(UnaryOp::BitNot),
                _ => None,
            }
        });

        let Some(op) = op else {
            return self.parse_suffixed();
        };

        let span = self.current_span();
        self.pos += 1;
        let operand = self.nested(|p| p.parse_binary(UNARY_PRECEDENCE))?;
        Ok(Expr {
            kind: ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        })
    }

    fn parse_suffixed(&mut self) -> ParseResult<Expr> {
        let start_depth = self.depth;
        let result = self.parse_suffix_folds();
        self.depth = start_depth;
        result
    }

    fn parse_suffix_folds(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_primary()?;

        loop {
            let Some(token) = self.peek() else {
                break;
            };

            let mut optional = false;
            let mut offset = 0;
            if token.is_symbol("?")
                && self.is_adjacent(1)
                && self
                    .peek_at(1)
                    .is_some_and(|t| [".", "[", "(", ":"].iter().any(|s| t.is_symbol(s)))
            {
                optional = true;
                offset = 1;
            }

            let Some(suffix) = self.peek_at(offset) else {
                break;
            };
            let span = expr.span;

            let kind = if suffix.is_symbol(".") {
                self.descend()?;
                self.pos += offset + 1;
                let name = self.expect_name()?;
                ExprKind::Index {
                    object: Box::new(expr),
                    key: IndexKey::Field(name),
                    optional,
                }
            } else if suffix.is_symbol("[") && (optional || self.on_same_line()) {
                self.descend()?;
                self.pos += offset;
                self.open_delimiter("[", "]")?;
                let key = self.parse_expr()?;
                self.close_delimiter("]")?;
                ExprKind::Index {
                    object: Box::new(expr),
                    key: IndexKey::Expr(Box::new(key)),
                    optional,
                }
            } else if suffix.is_symbol(":")
                && (optional || self.is_adjacent(0) || self.detached_method_call())
            {
                self.descend()?;
                self.pos += offset + 1;
                let method = self.expect_name()?;
                let args = self.parse_call_args()?;
                ExprKind::MethodCall {
                    object: Box::new(expr),
                    method,
                    args,
                    optional,
                }
            } else if (suffix.is_symbol("(") || matches!(suffix.kind, TokenKind::Str { .. }))
                && (optional || self.on_same_line())
            {
                self.descend()?;
                self.pos += offset;
                let args = self.parse_call_args()?;
                ExprKind::Call {
                    callee: Box::new(expr),
                    args,
                    optional,
                }
            } else {
                break;
            };

            expr = Expr { kind, span };
        }

        Ok(expr)
    }

    /// A `:` separated from its object by whitespace or a newline is a
    /// method call when a name and arguments follow, unless it closes
    /// the `then` branch of a ternary.
    fn detached_method_call(&self) -> bool {
        self.ternary_colon != Some(self.open.len())
            && self.peek_at(1).is_some_and(|t| t.kind == TokenKind::Name)
            && self
                .peek_at(2)
                .is_some_and(|t| t.is_symbol("(") || matches!(t.kind, TokenKind::Str { .. }))
    }

    fn parse_call_args(&mut self) -> ParseResult<Vec<Expr>> {
        if let Some(token) = self.peek().filter(|t| matches!(t.kind, TokenKind::Str { .. })) {
            self.pos += 1;
            return Ok(vec![self.string_expr(token)?]);
        }
        self.parse_delimited("(", ")", Self::parse_expr)
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let Some(token) = self.peek() else {
            return Err(self.unexpected(Expected::Expression));
        };
        let span = token.span;

        let kind = match &token.kind {
            TokenKind::Name => {
                if self
                    .peek_at(1)
                    .is_some_and(|t| t.is_symbol("->") || t.is_symbol("=>"))
                {
                    self.pos += 1;
                    let param = Param {
                        binding: Binding::Name(token.text.clone()),
                        default: None,
                    };
                    return self.parse_arrow(vec![param], None, span);
                }
                self.pos += 1;
                ExprKind::Name(token.text.clone())
            }
            TokenKind::Keyword(Keyword::Nil) => {
                self.pos += 1;
                ExprKind::Nil
            }
            TokenKind::Keyword(Keyword::True) => {
                self.pos += 1;
                ExprKind::True
            }
            TokenKind::Keyword(Keyword::False) => {
                self.pos += 1;
                ExprKind::False
            }
            TokenKind::Number => {
                self.pos += 1;
                ExprKind::Number(token.text.clone())
            }
            TokenKind::Str { .. } => {
                self.pos += 1;
                return self.string_expr(token);
            }
            TokenKind::Symbol if token.text == "..." => {
                if !self.vararg {
                    return Err(Self::error(ParseErrorKind::VarargsOutsideFunction, span));
                }
                self.pos += 1;
                ExprKind::Varargs
            }
            TokenKind::Symbol if token.text == "{" => self.parse_table()?,
            TokenKind::Symbol if token.text == "(" => {
                if self.at_arrow_params() {
                    let (params, varargs) = self.parse_params()?;
                    return self.parse_arrow(params, varargs, span);
                }
                self.open_delimiter("(", ")")?;
                let inner = self.parse_expr()?;
                self.close_delimiter(")")?;
                ExprKind::Paren(Box::new(inner))
            }
            _ => return Err(self.unexpected(Expected::Expression)),
        };

        Ok(Expr { kind, span })
    }

    /// Parse from the arrow token onward.
    fn parse_arrow(
        &mut self,
        params: Vec<Param>,
        varargs: Option<Option<String>>,
        span: Span,
    ) -> ParseResult<Expr> {
        let is_method = self.check_symbol("=>");
        self.pos += 1;

        let body = self.with_function(varargs.is_some(), |p| {
            if p.check_symbol("{") {
                return Ok(FunctionBody::Block(p.parse_block()?));
            }
            if p.at_multiple_returns() {
                let values = p.parse_delimited("(", ")", Self::parse_expr)?;
                return Ok(FunctionBody::Expr(values));
            }
            Ok(FunctionBody::Expr(vec![p.parse_expr()?]))
        })?;

        Ok(Expr {
            kind: ExprKind::Function(Box::new(Function {
                params,
                varargs,
                is_method,
                body,
            })),
            span,
        })
    }

    /// `-> (a, b)` returns two values; `-> (a) + 1` and
    /// `-> (a, b) -> a` are single expressions.
    fn at_multiple_returns(&self) -> bool {
        self.check_symbol("(")
            && !self.at_arrow_params()
            && self.group_at(self.pos).is_some_and(|g| g.comma)
    }

    fn parse_table(&mut self) -> ParseResult<ExprKind> {
        self.open_delimiter("{", "}")?;
        let mut fields = Vec::new();

        while !self.check_symbol("}") {
            let field = if self.check_symbol("[") {
                self.open_delimiter("[", "]")?;
                let key = self.parse_expr()?;
                self.close_delimiter("]")?;
                self.expect_symbol("=")?;
                TableField::Keyed(key, self.parse_expr()?)
            } else if self.peek().is_some_and(|t| t.kind == TokenKind::Name)
                && self.peek_at(1).is_some_and(|t| t.is_symbol("="))
            {
                let name = self.expect_name()?;
                self.pos += 1;
                TableField::Named(name, self.parse_expr()?)
            } else {
                TableField::Positional(self.parse_expr()?)
            };
            fields.push(field);

            if !(self.eat_symbol(",") || self.eat_symbol(";")) {
                break;
            }
        }

        self.close_delimiter("}")?;
        Ok(ExprKind::Table(fields))
    }

    fn string_expr(&self, token: &Token) -> ParseResult<Expr> {
        let TokenKind::Str { quote, pieces } = &token.kind else {
            unreachable!("string_expr called on a non-string token");
        };

        let mut parts = Vec::with_capacity(pieces.len());
        for piece in pieces {
            match piece {
                StrPiece::Text(text) => parts.push(StringPart::Text(text.clone())),
                StrPiece::Interp(tokens) => {
                    let mut nested = Parser::new(tokens, token.end(), self.vararg);
                    nested.function_nesting = self.function_nesting;
                    nested.depth = self.depth;
                    let expr = nested.parse_expr()?;
                    if nested.peek().is_some() {
                        return Err(nested.unexpected(Expected::Symbol("}")));
                    }
                    parts.push(StringPart::Interp(expr));
                }
            }
        }

        Ok(Expr {
            kind: ExprKind::String(StringLit {
                quote: *quote,
                parts,
            }),
            span: token.span,
        })
    }
}
