//! Syntax tree for Erde source.
//!
//! Every node owns its children and carries the span of its first
//! token. The tree is built once by the parser and only read by the
//! code generator.

use crate::token::{Quote, Span};

/// Complete Erde source file.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub block: Block,
}

/// Sequence of statements sharing one lexical scope.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

/// Declaration scope keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Local,
    Global,
    /// Local that is also exported from the chunk.
    Module,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `local a, { b } = x, y`
    Declaration {
        scope: Scope,
        bindings: Vec<Binding>,
        values: Vec<Expr>,
    },
    /// `a, b.c = x, y`
    Assignment { targets: Vec<Expr>, values: Vec<Expr> },
    /// `a += 1`
    CompoundAssignment {
        target: Expr,
        op: BinaryOp,
        value: Expr,
    },
    /// `[scope] function a.b:c(...) { ... }`
    FunctionDecl {
        scope: Option<Scope>,
        name: FunctionName,
        function: Function,
    },
    /// Call used as a statement. Always an `ExprKind::Call` or
    /// `ExprKind::MethodCall`.
    Call(Expr),
    If {
        branches: Vec<(Expr, Block)>,
        otherwise: Option<Block>,
    },
    While {
        condition: Expr,
        body: Block,
    },
    Repeat {
        body: Block,
        condition: Expr,
    },
    NumericFor {
        var: String,
        start: Expr,
        limit: Expr,
        step: Option<Expr>,
        body: Block,
    },
    GenericFor {
        bindings: Vec<Binding>,
        exprs: Vec<Expr>,
        body: Block,
    },
    Do(Block),
    Break,
    Continue,
    Return(Vec<Expr>),
}

/// Name of a declared function: `a.b.c` or `a.b:c`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionName {
    pub path: Vec<String>,
    pub method: Option<String>,
}

impl FunctionName {
    /// True for a bare `name`, which is subject to scoping.
    #[must_use]
    pub fn is_simple(&self) -> bool {
        self.path.len() == 1 && self.method.is_none()
    }
}

/// Target of a declaration, parameter, or loop variable.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Name(String),
    Pattern(Pattern),
}

/// Destructuring pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub kind: PatternKind,
    pub fields: Vec<PatternField>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    /// `{ a, b: alias }`, indexed by key.
    Map,
    /// `[ a, b ]`, indexed by position.
    Array,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternField {
    /// Key in a map pattern. Unused for array patterns.
    pub key: String,
    /// Local the value is bound to.
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub params: Vec<Param>,
    /// `Some(None)` for `...`, `Some(Some(name))` for `...name`.
    pub varargs: Option<Option<String>>,
    /// Fat arrow (`=>`), which takes an implicit `self`.
    pub is_method: bool,
    pub body: FunctionBody,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub binding: Binding,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionBody {
    Block(Block),
    /// Arrow function with an expression body (implicit return).
    Expr(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Nil,
    True,
    False,
    Varargs,
    /// Numeric literal as written.
    Number(String),
    String(StringLit),
    Name(String),
    Table(Vec<TableField>),
    Function(Box<Function>),
    /// Parenthesized expression, which truncates to one value in Lua.
    Paren(Box<Expr>),
    /// `a.b`, `a[b]`, `a?.b`, `a?[b]`
    Index {
        object: Box<Expr>,
        key: IndexKey,
        optional: bool,
    },
    /// `f(args)`, `f?(args)`
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        optional: bool,
    },
    /// `a:m(args)`, `a?:m(args)`
    MethodCall {
        object: Box<Expr>,
        method: String,
        args: Vec<Expr>,
        optional: bool,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Ternary {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

impl Expr {
    /// True for expressions that can appear on the left of `=`.
    #[must_use]
    pub const fn is_assignable(&self) -> bool {
        matches!(self.kind, ExprKind::Name(_) | ExprKind::Index { .. })
    }

    #[must_use]
    pub const fn is_call(&self) -> bool {
        matches!(self.kind, ExprKind::Call { .. } | ExprKind::MethodCall { .. })
    }

    /// True if any link of this suffix chain is optional (`?.`).
    #[must_use]
    pub fn has_optional_link(&self) -> bool {
        match &self.kind {
            ExprKind::Index {
                object, optional, ..
            }
            | ExprKind::MethodCall {
                object, optional, ..
            } => *optional || object.has_optional_link(),
            ExprKind::Call {
                callee, optional, ..
            } => *optional || callee.has_optional_link(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndexKey {
    /// `.name`
    Field(String),
    /// `[expr]`
    Expr(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StringLit {
    pub quote: Quote,
    pub parts: Vec<StringPart>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StringPart {
    Text(String),
    Interp(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableField {
    /// `name = value`
    Named(String, Expr),
    /// `[key] = value`
    Keyed(Expr, Expr),
    /// Positional value.
    Positional(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-`
    Neg,
    /// `!`
    Not,
    /// `#`
    Len,
    /// `.~`
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    BitOr,
    BitXor,
    BitAnd,
    Shl,
    Shr,
    Concat,
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

/// Operator associativity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assoc {
    Left,
    Right,
}

/// Binding power of unary operators: above `*` and below `^`.
pub const UNARY_PRECEDENCE: u8 = 12;

impl BinaryOp {
    /// Map an infix operator token to its operator.
    #[must_use]
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let op = match symbol {
            "||" => Self::Or,
            "&&" => Self::And,
            "==" => Self::Eq,
            "!=" => Self::NotEq,
            "<" => Self::Lt,
            "<=" => Self::LtEq,
            ">" => Self::Gt,
            ">=" => Self::GtEq,
            ".|" => Self::BitOr,
            ".~" => Self::BitXor,
            ".&" => Self::BitAnd,
            ".<<" => Self::Shl,
            ".>>" => Self::Shr,
            ".." => Self::Concat,
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mul,
            "/" => Self::Div,
            "//" => Self::FloorDiv,
            "%" => Self::Mod,
            "^" => Self::Pow,
            _ => return None,
        };
        Some(op)
    }

    /// Map a compound assignment token (`+=`, `||=`, ...) to its operator.
    #[must_use]
    pub fn from_compound(symbol: &str) -> Option<Self> {
        let op = match symbol {
            "+=" => Self::Add,
            "-=" => Self::Sub,
            "*=" => Self::Mul,
            "/=" => Self::Div,
            "//=" => Self::FloorDiv,
            "%=" => Self::Mod,
            "^=" => Self::Pow,
            "..=" => Self::Concat,
            "||=" => Self::Or,
            "&&=" => Self::And,
            _ => return None,
        };
        Some(op)
    }

    /// Precedence level; higher binds tighter. Level 1 is the ternary.
    #[must_use]
    pub const fn precedence(self) -> u8 {
        match self {
            Self::Or => 2,
            Self::And => 3,
            Self::Eq | Self::NotEq | Self::Lt | Self::LtEq | Self::Gt | Self::GtEq => 4,
            Self::BitOr => 5,
            Self::BitXor => 6,
            Self::BitAnd => 7,
            Self::Shl | Self::Shr => 8,
            Self::Concat => 9,
            Self::Add | Self::Sub => 10,
            Self::Mul | Self::Div | Self::FloorDiv | Self::Mod => 11,
            Self::Pow => 13,
        }
    }

    #[must_use]
    pub const fn assoc(self) -> Assoc {
        match self {
            Self::Concat | Self::Pow => Assoc::Right,
            _ => Assoc::Left,
        }
    }

    /// Lua spelling for operators that exist natively in every Lua
    /// version. `None` for bitwise and floor division, whose spelling
    /// depends on the target.
    #[must_use]
    pub const fn lua_symbol(self) -> Option<&'static str> {
        let symbol = match self {
            Self::Or => "or",
            Self::And => "and",
            Self::Eq => "==",
            Self::NotEq => "~=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::Concat => "..",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Pow => "^",
            Self::BitOr
            | Self::BitXor
            | Self::BitAnd
            | Self::Shl
            | Self::Shr
            | Self::FloorDiv => return None,
        };
        Some(symbol)
    }
}
