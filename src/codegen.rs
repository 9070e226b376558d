//! Lua code generator.
//!
//! Walks a parsed [`Chunk`] once, top to bottom, writing Lua source and
//! recording for every output line the Erde line it came from. Erde
//! constructs without a direct Lua spelling (destructuring, optional
//! chaining, ternaries, `continue`, string interpolation, implicit
//! returns) are desugared into plain Lua along the way.

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt::Write as _;

use crate::ast::{
    BinaryOp, Binding, Block, Chunk, Expr, ExprKind, Function, FunctionBody, FunctionName,
    IndexKey, Pattern, PatternKind, Scope, Stmt, StmtKind, StringLit, StringPart, TableField,
    UnaryOp,
};
use crate::options::{CompileOptions, Target};
use crate::source_map::SourceMap;
use crate::token::Quote;

const INDENT: &str = "  ";

/// Generated Lua source plus its line map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedCode {
    pub code: String,
    pub source_map: SourceMap,
}

impl GeneratedCode {
    /// Translate line numbers in a Lua runtime error raised by this
    /// code back to Erde lines.
    #[must_use]
    pub fn rewrite_error(&self, message: &str) -> String {
        self.source_map.rewrite(message)
    }
}

/// Generate Lua for a parsed chunk.
///
/// Generation cannot fail on a tree produced by the parser.
#[must_use]
pub fn generate(chunk: &Chunk, options: &CompileOptions) -> GeneratedCode {
    let mut generator = Generator::new(options);
    generator.chunk(chunk);
    generator.finish()
}

/// How `continue` is spelled inside the innermost loop.
#[derive(Debug, Clone)]
enum LoopExit {
    /// Body has no `continue`.
    Plain,
    /// `goto label`.
    Goto(String),
    /// Body runs inside `repeat ... until true`; the flag records
    /// whether the inner loop was left by `break`.
    BreakFlag(String),
}

struct Generator<'o> {
    options: &'o CompileOptions,
    out: String,
    lines: Vec<Option<usize>>,
    indent: usize,
    /// Highest original line recorded so far.
    high_water: usize,
    scopes: Vec<HashSet<String>>,
    globals: HashSet<String>,
    exports: Vec<String>,
    temps: usize,
    labels: usize,
    /// Vararg flag of each enclosing function, innermost last.
    varargs: Vec<bool>,
    loops: Vec<LoopExit>,
}

impl<'o> Generator<'o> {
    fn new(options: &'o CompileOptions) -> Self {
        Self {
            options,
            out: String::new(),
            lines: Vec::new(),
            indent: 0,
            high_water: 0,
            scopes: Vec::new(),
            globals: HashSet::new(),
            exports: Vec::new(),
            temps: 0,
            labels: 0,
            varargs: Vec::new(),
            loops: Vec::new(),
        }
    }

    fn finish(mut self) -> GeneratedCode {
        if !self.out.is_empty() {
            self.out.push('\n');
        }
        GeneratedCode {
            code: self.out,
            source_map: SourceMap::from_lines(self.lines),
        }
    }

    // -- output --

    /// Start a new output line attributed to `origin`.
    fn line(&mut self, origin: Option<usize>) {
        if !self.lines.is_empty() {
            self.out.push('\n');
        }
        for _ in 0..self.indent {
            self.out.push_str(INDENT);
        }
        let mapped = origin.map(|line| {
            self.high_water = self.high_water.max(line);
            self.high_water
        });
        self.lines.push(mapped);
    }

    fn write(&mut self, text: &str) {
        // `- -x` must not collapse into a comment.
        if text.starts_with('-') && self.out.ends_with('-') {
            self.out.push(' ');
        }
        for ch in text.chars() {
            if ch == '\n' {
                let current = self.lines.last().copied().flatten();
                self.lines.push(current);
            }
            self.out.push(ch);
        }
    }

    fn temp(&mut self) -> String {
        self.temps += 1;
        format!("__erde_tmp_{}", self.temps)
    }

    fn in_vararg_function(&self) -> bool {
        self.varargs.last().copied().unwrap_or(true)
    }

    // -- scopes --

    fn push_scope(&mut self) {
        self.scopes.push(HashSet::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string());
        }
    }

    fn is_declared(&self, name: &str) -> bool {
        self.globals.contains(name) || self.scopes.iter().any(|s| s.contains(name))
    }

    // -- blocks and statements --

    fn chunk(&mut self, chunk: &Chunk) {
        self.varargs.push(true);
        self.push_scope();
        self.statements(&chunk.block.stmts, false);

        if !self.exports.is_empty() {
            let fields = self
                .exports
                .iter()
                .map(|name| format!("{name} = {name}"))
                .collect::<Vec<_>>()
                .join(", ");
            self.line(None);
            self.write(&format!("return {{ {fields} }}"));
        }

        self.pop_scope();
        self.varargs.pop();
    }

    /// Emit statements. With `more_follows`, no statement is treated as
    /// the last of its Lua block.
    fn statements(&mut self, stmts: &[Stmt], more_follows: bool) {
        for (i, stmt) in stmts.iter().enumerate() {
            let last = !more_follows && i + 1 == stmts.len();
            self.statement(stmt, last);
        }
    }

    fn block(&mut self, block: &Block) {
        self.indent += 1;
        self.push_scope();
        self.statements(&block.stmts, false);
        self.pop_scope();
        self.indent -= 1;
    }

    fn end(&mut self) {
        self.line(None);
        self.write("end");
    }

    fn statement(&mut self, stmt: &Stmt, last: bool) {
        let origin = Some(stmt.span.line);

        match &stmt.kind {
            StmtKind::Declaration {
                scope,
                bindings,
                values,
            } => self.declaration(*scope, bindings, values, origin),
            StmtKind::Assignment { targets, values } => self.assignment(targets, values, origin),
            StmtKind::CompoundAssignment { target, op, value } => {
                self.compound_assignment(target, *op, value, origin);
            }
            StmtKind::FunctionDecl {
                scope,
                name,
                function,
            } => self.function_decl(*scope, name, function, stmt.span.line),
            StmtKind::Call(call) => {
                if call.has_optional_link() {
                    self.optional_statement(call, None, origin);
                } else {
                    self.line(origin);
                    self.paren_safe(call, |g| g.expr(call));
                }
            }
            StmtKind::If {
                branches,
                otherwise,
            } => self.if_statement(branches, otherwise.as_ref(), origin),
            StmtKind::While { .. }
            | StmtKind::Repeat { .. }
            | StmtKind::NumericFor { .. }
            | StmtKind::GenericFor { .. } => self.loop_statement(stmt),
            StmtKind::Do(body) => {
                self.line(origin);
                self.write("do");
                self.block(body);
                self.end();
            }
            StmtKind::Break => {
                self.line(origin);
                self.write(if last { "break" } else { "do break end" });
            }
            StmtKind::Continue => self.continue_statement(last, origin),
            StmtKind::Return(values) => {
                self.line(origin);
                self.write(if last { "return" } else { "do return" });
                if !values.is_empty() {
                    self.write(" ");
                    self.expr_list(values);
                }
                if !last {
                    self.write(" end");
                }
            }
        }
    }

    fn if_statement(
        &mut self,
        branches: &[(Expr, Block)],
        otherwise: Option<&Block>,
        origin: Option<usize>,
    ) {
        for (i, (condition, body)) in branches.iter().enumerate() {
            if i == 0 {
                self.line(origin);
                self.write("if ");
            } else {
                self.line(Some(condition.span.line));
                self.write("elseif ");
            }
            self.expr(condition);
            self.write(" then");
            self.block(body);
        }
        if let Some(body) = otherwise {
            self.line(None);
            self.write("else");
            self.block(body);
        }
        self.end();
    }

    fn loop_statement(&mut self, stmt: &Stmt) {
        let line = stmt.span.line;
        self.line(Some(line));

        match &stmt.kind {
            StmtKind::While { condition, body } => {
                self.write("while ");
                self.expr(condition);
                self.write(" do");
                self.loop_body(body, &[], &[], line);
                self.end();
            }
            StmtKind::Repeat { body, condition } => {
                self.write("repeat");
                self.loop_body(body, &[], &[], line);
                self.line(Some(condition.span.line));
                self.write("until ");
                self.expr(condition);
            }
            StmtKind::NumericFor {
                var,
                start,
                limit,
                step,
                body,
            } => {
                self.write(&format!("for {var} = "));
                self.expr(start);
                self.write(", ");
                self.expr(limit);
                if let Some(step) = step {
                    self.write(", ");
                    self.expr(step);
                }
                self.write(" do");
                self.loop_body(body, std::slice::from_ref(var), &[], line);
                self.end();
            }
            StmtKind::GenericFor {
                bindings,
                exprs,
                body,
            } => {
                let mut names = Vec::with_capacity(bindings.len());
                let mut patterns = Vec::new();
                for binding in bindings {
                    match binding {
                        Binding::Name(name) => names.push(name.clone()),
                        Binding::Pattern(pattern) => {
                            let temp = self.temp();
                            names.push(temp.clone());
                            patterns.push((temp, pattern));
                        }
                    }
                }
                self.write(&format!("for {} in ", names.join(", ")));
                self.expr_list(exprs);
                self.write(" do");
                self.loop_body(body, &names, &patterns, line);
                self.end();
            }
            _ => unreachable!("loop_statement called on a non-loop"),
        }
    }

    /// Lua reads a statement starting with `(` as a call on the previous
    /// line's expression. Such statements get their own `do` block.
    fn paren_safe(&mut self, lead: &Expr, emit: impl FnOnce(&mut Self)) {
        let wrap = starts_with_paren(lead);
        if wrap {
            self.write("do ");
        }
        emit(self);
        if wrap {
            self.write(" end");
        }
    }

    fn declaration(
        &mut self,
        scope: Scope,
        bindings: &[Binding],
        values: &[Expr],
        origin: Option<usize>,
    ) {
        let mut names = Vec::with_capacity(bindings.len());
        let mut patterns = Vec::new();
        for binding in bindings {
            match binding {
                Binding::Name(name) => names.push(name.clone()),
                Binding::Pattern(pattern) => {
                    let temp = self.temp();
                    names.push(temp.clone());
                    patterns.push((temp, pattern));
                }
            }
        }

        let global = scope == Scope::Global;
        if global && values.is_empty() {
            self.globals.extend(names);
            return;
        }

        self.line(origin);
        if global && patterns.is_empty() {
            self.write(&names.join(", "));
        } else if global {
            // Only the temporaries are local; plain names stay global.
            let temps: Vec<&str> = patterns.iter().map(|(t, _)| t.as_str()).collect();
            self.write(&format!("local {}", temps.join(", ")));
            self.line(origin);
            self.write(&names.join(", "));
        } else {
            self.write(&format!("local {}", names.join(", ")));
        }
        if !values.is_empty() {
            self.write(" = ");
            self.expr_list(values);
        }

        let mut bound: Vec<String> = bindings
            .iter()
            .filter_map(|b| match b {
                Binding::Name(name) => Some(name.clone()),
                Binding::Pattern(_) => None,
            })
            .collect();
        for (temp, pattern) in &patterns {
            if !global {
                self.declare(temp);
            }
            self.destructure(temp, pattern, !global, origin);
            bound.extend(pattern.fields.iter().map(|f| f.name.clone()));
        }

        for name in &bound {
            if global {
                self.globals.insert(name.clone());
            } else {
                self.declare(name);
            }
        }
        if scope == Scope::Module {
            self.exports.extend(bound);
        }
    }

    /// Bind the fields of `pattern` from the value held in `source`.
    fn destructure(&mut self, source: &str, pattern: &Pattern, local: bool, origin: Option<usize>) {
        let names: Vec<&str> = pattern.fields.iter().map(|f| f.name.as_str()).collect();
        let reads: Vec<String> = pattern
            .fields
            .iter()
            .enumerate()
            .map(|(i, field)| match pattern.kind {
                PatternKind::Map => format!("{source}.{}", field.key),
                PatternKind::Array => format!("{source}[{}]", i + 1),
            })
            .collect();

        self.line(origin);
        if local {
            self.write("local ");
        }
        self.write(&format!("{} = {}", names.join(", "), reads.join(", ")));

        for field in &pattern.fields {
            if let Some(default) = &field.default {
                self.nil_default(&field.name, default, origin);
            }
        }
    }

    fn nil_default(&mut self, name: &str, default: &Expr, origin: Option<usize>) {
        self.line(origin);
        self.write(&format!("if {name} == nil then {name} = "));
        self.expr(default);
        self.write(" end");
    }

    fn assignment(&mut self, targets: &[Expr], values: &[Expr], origin: Option<usize>) {
        if let [target] = targets {
            if target.has_optional_link() {
                self.optional_statement(target, Some(values), origin);
                return;
            }
        }

        let mut fresh: Vec<&str> = Vec::new();
        for target in targets {
            if let ExprKind::Name(name) = &target.kind {
                if !self.is_declared(name) && !fresh.contains(&name.as_str()) {
                    fresh.push(name);
                }
            }
        }

        let all_fresh = fresh.len() == targets.len();
        if all_fresh {
            self.line(origin);
            self.write(&format!("local {} = ", fresh.join(", ")));
            self.expr_list(values);
            for name in fresh {
                self.declare(name);
            }
            return;
        }

        if fresh.is_empty() {
            self.line(origin);
            self.paren_safe(&targets[0], |g| {
                for (i, target) in targets.iter().enumerate() {
                    if i > 0 {
                        g.write(", ");
                    }
                    g.expr(target);
                }
                g.write(" = ");
                g.expr_list(values);
            });
            return;
        }

        // Values and existing targets are evaluated before the new
        // locals come into scope.
        let temps: Vec<String> = targets.iter().map(|_| self.temp()).collect();
        self.line(origin);
        self.write(&format!("local {} = ", temps.join(", ")));
        self.expr_list(values);

        let (new, old): (Vec<_>, Vec<_>) = targets.iter().zip(&temps).partition(|(target, _)| {
            matches!(&target.kind, ExprKind::Name(name) if fresh.contains(&name.as_str()))
        });
        if let Some((lead, _)) = old.first() {
            self.line(origin);
            self.paren_safe(lead, |g| {
                for (i, (target, _)) in old.iter().enumerate() {
                    if i > 0 {
                        g.write(", ");
                    }
                    g.expr(target);
                }
                let sources: Vec<&str> = old.iter().map(|(_, temp)| temp.as_str()).collect();
                g.write(&format!(" = {}", sources.join(", ")));
            });
        }

        let names: Vec<String> = new
            .iter()
            .filter_map(|(target, _)| match &target.kind {
                ExprKind::Name(name) => Some(name.clone()),
                _ => None,
            })
            .collect();
        let sources: Vec<&str> = new.iter().map(|(_, temp)| temp.as_str()).collect();
        self.line(origin);
        self.write(&format!("local {} = {}", names.join(", "), sources.join(", ")));
        for name in &names {
            self.declare(name);
        }
    }

    fn compound_assignment(
        &mut self,
        target: &Expr,
        op: BinaryOp,
        value: &Expr,
        origin: Option<usize>,
    ) {
        let ExprKind::Index { object, key, .. } = &target.kind else {
            // a = a op (value)
            self.line(origin);
            self.expr(target);
            self.write(" = ");
            self.binary(op, &|g| g.expr(target), &|g| g.grouped(value));
            return;
        };

        let simple_object = matches!(object.kind, ExprKind::Name(_));
        let simple_key = match key {
            IndexKey::Field(_) => true,
            IndexKey::Expr(k) => literal_source(k, self.options.target).is_some(),
        };
        if simple_object && simple_key {
            self.line(origin);
            self.expr(target);
            self.write(" = ");
            self.binary(op, &|g| g.expr(target), &|g| g.grouped(value));
            return;
        }

        // Evaluate the object and key once.
        self.line(origin);
        self.write("do");
        self.indent += 1;
        let object_temp = self.temp();
        let place = match key {
            IndexKey::Field(name) => {
                self.line(origin);
                self.write(&format!("local {object_temp} = "));
                self.expr(object);
                format!("{object_temp}.{name}")
            }
            IndexKey::Expr(k) if literal_source(k, self.options.target).is_some() => {
                let literal = literal_source(k, self.options.target).unwrap_or_default();
                self.line(origin);
                self.write(&format!("local {object_temp} = "));
                self.expr(object);
                format!("{object_temp}[{literal}]")
            }
            IndexKey::Expr(k) => {
                let key_temp = self.temp();
                self.line(origin);
                self.write(&format!("local {object_temp}, {key_temp} = "));
                self.expr(object);
                self.write(", ");
                self.expr(k);
                format!("{object_temp}[{key_temp}]")
            }
        };
        self.line(origin);
        self.write(&format!("{place} = "));
        self.binary(op, &|g| g.write(&place), &|g| g.grouped(value));
        self.indent -= 1;
        self.end();
    }

    fn function_decl(
        &mut self,
        scope: Option<Scope>,
        name: &FunctionName,
        function: &Function,
        line: usize,
    ) {
        self.line(Some(line));

        if name.is_simple() {
            let simple = &name.path[0];
            let local = match scope {
                Some(Scope::Local | Scope::Module) => true,
                Some(Scope::Global) => false,
                None => !self.is_declared(simple),
            };
            if local {
                self.write(&format!("local function {simple}"));
                self.declare(simple);
            } else {
                self.write(&format!("function {simple}"));
                if scope == Some(Scope::Global) {
                    self.globals.insert(simple.clone());
                }
            }
            if scope == Some(Scope::Module) {
                self.exports.push(simple.clone());
            }
        } else {
            let mut full = name.path.join(".");
            if let Some(method) = &name.method {
                let _ = write!(full, ":{method}");
            }
            self.write(&format!("function {full}"));
        }

        self.function_rest(function, name.method.is_some(), line);
    }

    /// Emit `(params) ... end` for a function whose `function` keyword
    /// and name are already written.
    fn function_rest(&mut self, function: &Function, has_self: bool, line: usize) {
        let origin = Some(line);
        let mut params = Vec::new();
        if function.is_method {
            params.push("self".to_string());
        }
        for param in &function.params {
            match &param.binding {
                Binding::Name(name) => params.push(name.clone()),
                Binding::Pattern(_) => params.push(self.temp()),
            }
        }
        if function.varargs.is_some() {
            params.push("...".to_string());
        }
        self.write(&format!("({})", params.join(", ")));

        self.indent += 1;
        self.push_scope();
        self.varargs.push(function.varargs.is_some());
        let outer_loops = std::mem::take(&mut self.loops);

        if has_self || function.is_method {
            self.declare("self");
        }
        for name in &params {
            self.declare(name);
        }

        let mut param_names = params.iter().skip(usize::from(function.is_method));
        for param in &function.params {
            let Some(name) = param_names.next() else {
                break;
            };
            let name = name.clone();
            if let Some(default) = &param.default {
                self.nil_default(&name, default, origin);
            }
            if let Binding::Pattern(pattern) = &param.binding {
                self.destructure(&name, pattern, true, origin);
                for field in &pattern.fields {
                    self.declare(&field.name);
                }
            }
        }
        if let Some(Some(rest)) = &function.varargs {
            self.line(origin);
            self.write(&format!("local {rest} = {{ ... }}"));
            self.declare(rest);
        }

        match &function.body {
            FunctionBody::Block(block) => self.statements(&block.stmts, false),
            FunctionBody::Expr(values) => {
                self.line(origin);
                self.write("return ");
                self.expr_list(values);
            }
        }

        self.loops = outer_loops;
        self.varargs.pop();
        self.pop_scope();
        self.indent -= 1;
        self.end();
    }

    // -- loops --

    /// Emit a loop body, declaring `vars` and destructuring `patterns`
    /// at its top, and arranging for `continue` when the body uses it.
    fn loop_body(
        &mut self,
        body: &Block,
        vars: &[String],
        patterns: &[(String, &Pattern)],
        line: usize,
    ) {
        let origin = Some(line);
        self.indent += 1;
        self.push_scope();
        for var in vars {
            self.declare(var);
        }
        for (temp, pattern) in patterns {
            self.destructure(temp, pattern, true, origin);
            for field in &pattern.fields {
                self.declare(&field.name);
            }
        }

        if !uses_continue(body) {
            self.loops.push(LoopExit::Plain);
            self.statements(&body.stmts, false);
        } else if self.options.target.has_goto() {
            self.labels += 1;
            let label = format!("__erde_continue_{}", self.labels);
            self.loops.push(LoopExit::Goto(label.clone()));
            self.line(origin);
            self.write("do");
            self.block(body);
            self.end();
            self.line(None);
            self.write(&format!("::{label}::"));
        } else {
            let flag = self.temp();
            self.loops.push(LoopExit::BreakFlag(flag.clone()));
            self.line(origin);
            self.write(&format!("local {flag} = true"));
            self.line(origin);
            self.write("repeat");
            self.indent += 1;
            self.push_scope();
            self.statements(&body.stmts, true);
            self.line(None);
            self.write(&format!("{flag} = false"));
            self.pop_scope();
            self.indent -= 1;
            self.line(None);
            self.write("until true");
            self.line(None);
            self.write(&format!("if {flag} then break end"));
        }

        self.loops.pop();
        self.pop_scope();
        self.indent -= 1;
    }

    fn continue_statement(&mut self, last: bool, origin: Option<usize>) {
        let exit = self.loops.last().cloned();
        self.line(origin);
        match exit {
            Some(LoopExit::Goto(label)) => self.write(&format!("goto {label}")),
            Some(LoopExit::BreakFlag(flag)) => {
                if last {
                    self.write(&format!("{flag} = false"));
                    self.line(origin);
                    self.write("break");
                } else {
                    self.write(&format!("do {flag} = false break end"));
                }
            }
            Some(LoopExit::Plain) | None => {
                unreachable!("continue outside a loop that was scanned for it")
            }
        }
    }

    // -- optional chaining --

    /// `a?.b.c()` as a statement, or `a?.b = v` when `values` is given.
    fn optional_statement(&mut self, chain: &Expr, values: Option<&[Expr]>, origin: Option<usize>) {
        let (base, links) = flatten_chain(chain);
        let temp = self.temp();

        self.line(origin);
        self.write("do");
        self.indent += 1;
        self.line(origin);
        self.write(&format!("local {temp} = "));
        self.expr(base);

        let mut opened = 0;
        for (i, link) in links.iter().enumerate() {
            if link_is_optional(link) {
                self.line(origin);
                self.write(&format!("if {temp} ~= nil then"));
                self.indent += 1;
                opened += 1;
            }
            self.line(origin);
            if i + 1 < links.len() {
                self.write(&format!("{temp} = "));
                self.link(&temp, link);
            } else {
                self.link(&temp, link);
                if let Some(values) = values {
                    self.write(" = ");
                    self.expr_list(values);
                }
            }
        }

        for _ in 0..opened {
            self.indent -= 1;
            self.end();
        }
        self.indent -= 1;
        self.end();
    }

    /// Optional chain used as a value: an immediately invoked function
    /// that returns `nil` at the first nil optional link.
    fn optional_expr(&mut self, chain: &Expr) {
        let (base, links) = flatten_chain(chain);
        let temp = self.temp();

        self.iife_open();
        self.write(&format!(" local {temp} = "));
        self.expr(base);
        for (i, link) in links.iter().enumerate() {
            if link_is_optional(link) {
                self.write(&format!(" if {temp} == nil then return nil end"));
            }
            if i + 1 < links.len() {
                self.write(&format!(" {temp} = "));
            } else {
                self.write(" return ");
            }
            self.link(&temp, link);
        }
        self.iife_close();
    }

    /// Emit one suffix of a chain applied to `object`.
    fn link(&mut self, object: &str, link: &Expr) {
        match &link.kind {
            ExprKind::Index { key, .. } => {
                self.write(object);
                self.index_key(key);
            }
            ExprKind::Call { args, .. } => {
                self.write(object);
                self.args(args);
            }
            ExprKind::MethodCall { method, args, .. } => {
                self.write(&format!("{object}:{method}"));
                self.args(args);
            }
            _ => unreachable!("chain link must be an index or call"),
        }
    }

    fn iife_open(&mut self) {
        self.write(if self.in_vararg_function() {
            "(function(...)"
        } else {
            "(function()"
        });
    }

    fn iife_close(&mut self) {
        self.write(if self.in_vararg_function() {
            " end)(...)"
        } else {
            " end)()"
        });
    }

    // -- expressions --

    fn expr_list(&mut self, exprs: &[Expr]) {
        for (i, expr) in exprs.iter().enumerate() {
            if i > 0 {
                self.write(", ");
            }
            self.expr(expr);
        }
    }

    fn args(&mut self, args: &[Expr]) {
        self.write("(");
        self.expr_list(args);
        self.write(")");
    }

    fn index_key(&mut self, key: &IndexKey) {
        match key {
            IndexKey::Field(name) => self.write(&format!(".{name}")),
            IndexKey::Expr(expr) => {
                self.write("[");
                self.expr(expr);
                self.write("]");
            }
        }
    }

    /// Emit an operand of a generated binary operator, parenthesized
    /// unless it is atomic.
    fn grouped(&mut self, expr: &Expr) {
        if matches!(
            expr.kind,
            ExprKind::Binary { .. } | ExprKind::Unary { .. } | ExprKind::Ternary { .. }
        ) {
            self.write("(");
            self.expr(expr);
            self.write(")");
        } else {
            self.expr(expr);
        }
    }

    /// Emit an expression in prefix position (before `.`, `[`, `:` or a
    /// call), where Lua only accepts names, calls, and parentheses.
    fn prefix(&mut self, expr: &Expr) {
        let is_prefix = matches!(
            expr.kind,
            ExprKind::Name(_)
                | ExprKind::Paren(_)
                | ExprKind::Index { .. }
                | ExprKind::Call { .. }
                | ExprKind::MethodCall { .. }
        );
        if is_prefix {
            self.expr(expr);
        } else {
            self.write("(");
            self.expr(expr);
            self.write(")");
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Nil => self.write("nil"),
            ExprKind::True => self.write("true"),
            ExprKind::False => self.write("false"),
            ExprKind::Varargs => self.write("..."),
            ExprKind::Number(n) | ExprKind::Name(n) => self.write(n),
            ExprKind::String(lit) => self.string(lit),
            ExprKind::Table(fields) => self.table(fields),
            ExprKind::Function(function) => {
                self.write("function");
                self.function_rest(function, false, expr.span.line);
            }
            ExprKind::Paren(inner) => {
                self.write("(");
                self.expr(inner);
                self.write(")");
            }
            ExprKind::Index { .. } | ExprKind::Call { .. } | ExprKind::MethodCall { .. }
                if expr.has_optional_link() =>
            {
                self.optional_expr(expr);
            }
            ExprKind::Index { object, key, .. } => {
                self.prefix(object);
                self.index_key(key);
            }
            ExprKind::Call { callee, args, .. } => {
                self.prefix(callee);
                self.args(args);
            }
            ExprKind::MethodCall {
                object,
                method,
                args,
                ..
            } => {
                self.prefix(object);
                self.write(&format!(":{method}"));
                self.args(args);
            }
            ExprKind::Unary { op, operand } => self.unary(*op, operand),
            ExprKind::Binary { op, left, right } => {
                self.binary(*op, &|g| g.expr(left), &|g| g.expr(right));
            }
            ExprKind::Ternary {
                condition,
                then,
                otherwise,
            } => self.ternary(condition, then, otherwise),
        }
    }

    fn unary(&mut self, op: UnaryOp, operand: &Expr) {
        match op {
            UnaryOp::Neg => self.write("-"),
            UnaryOp::Not => self.write("not "),
            UnaryOp::Len => self.write("#"),
            UnaryOp::BitNot => {
                let options = self.options;
                if let Some(lib) = options.bitlib_name() {
                    self.write(&format!("require('{lib}').bnot("));
                    self.expr(operand);
                    self.write(")");
                    return;
                }
                self.write("~");
            }
        }
        self.expr(operand);
    }

    fn binary(&mut self, op: BinaryOp, left: &dyn Fn(&mut Self), right: &dyn Fn(&mut Self)) {
        if let Some(symbol) = op.lua_symbol() {
            left(self);
            self.write(&format!(" {symbol} "));
            right(self);
            return;
        }

        let native = self.options.target.has_integer_ops();
        if op == BinaryOp::FloorDiv {
            if native {
                left(self);
                self.write(" // ");
                right(self);
            } else {
                self.write("math.floor(");
                left(self);
                self.write(" / ");
                right(self);
                self.write(")");
            }
            return;
        }

        let (symbol, function) = match op {
            BinaryOp::BitOr => ("|", "bor"),
            BinaryOp::BitXor => ("~", "bxor"),
            BinaryOp::BitAnd => ("&", "band"),
            BinaryOp::Shl => ("<<", "lshift"),
            BinaryOp::Shr => (">>", "rshift"),
            _ => unreachable!("operator {op:?} has a Lua symbol"),
        };
        let options = self.options;
        match options.bitlib_name() {
            Some(lib) => {
                self.write(&format!("require('{lib}').{function}("));
                left(self);
                self.write(", ");
                right(self);
                self.write(")");
            }
            None => {
                left(self);
                self.write(&format!(" {symbol} "));
                right(self);
            }
        }
    }

    fn ternary(&mut self, condition: &Expr, then: &Expr, otherwise: &Expr) {
        if is_truthy_literal(then) {
            self.write("(");
            self.grouped_or(condition);
            self.write(" and ");
            self.expr(then);
            self.write(" or ");
            self.expr(otherwise);
            self.write(")");
            return;
        }

        self.iife_open();
        self.write(" if ");
        self.expr(condition);
        self.write(" then return ");
        self.expr(then);
        self.write(" else return ");
        self.expr(otherwise);
        self.write(" end");
        self.iife_close();
    }

    /// `a or b` would bind looser than the `and` of a ternary.
    fn grouped_or(&mut self, expr: &Expr) {
        if matches!(
            expr.kind,
            ExprKind::Binary {
                op: BinaryOp::Or,
                ..
            } | ExprKind::Ternary { .. }
        ) {
            self.write("(");
            self.expr(expr);
            self.write(")");
        } else {
            self.expr(expr);
        }
    }

    fn table(&mut self, fields: &[TableField]) {
        if fields.is_empty() {
            self.write("{}");
            return;
        }
        self.write("{ ");
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                self.write(", ");
            }
            match field {
                TableField::Named(name, value) => {
                    self.write(&format!("{name} = "));
                    self.expr(value);
                }
                TableField::Keyed(key, value) => {
                    self.write("[");
                    self.expr(key);
                    self.write("] = ");
                    self.expr(value);
                }
                TableField::Positional(value) => self.expr(value),
            }
        }
        self.write(" }");
    }

    fn string(&mut self, lit: &StringLit) {
        let interpolated = lit
            .parts
            .iter()
            .any(|p| matches!(p, StringPart::Interp(_)));

        if !interpolated {
            let text: String = lit
                .parts
                .iter()
                .filter_map(|p| match p {
                    StringPart::Text(t) => Some(t.as_str()),
                    StringPart::Interp(_) => None,
                })
                .collect();
            self.write(&quote_text(lit.quote, &text, self.options.target));
            return;
        }

        self.write("(");
        for (i, part) in lit.parts.iter().enumerate() {
            if i > 0 {
                self.write(" .. ");
            }
            match part {
                StringPart::Text(text) => {
                    self.write(&quote_text(lit.quote, text, self.options.target));
                }
                StringPart::Interp(expr) => {
                    self.write("tostring(");
                    self.expr(expr);
                    self.write(")");
                }
            }
        }
        self.write(")");
    }
}

/// Render string text in Lua syntax. Quoted text keeps its escapes,
/// lowered to what `target` understands; long-string text is raw and
/// gets escaped.
fn quote_text(quote: Quote, text: &str, target: Target) -> String {
    match quote {
        Quote::Single => format!("'{}'", lower_escapes(text, target)),
        Quote::Double => format!("\"{}\"", lower_escapes(text, target)),
        Quote::Long(_) => {
            let mut out = String::with_capacity(text.len() + 2);
            out.push('"');
            for ch in text.chars() {
                match ch {
                    '\\' => out.push_str("\\\\"),
                    '"' => out.push_str("\\\""),
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    '\t' => out.push('\t'),
                    c if c.is_ascii_control() => {
                        let _ = write!(out, "\\{:03}", u32::from(c));
                    }
                    c => out.push(c),
                }
            }
            out.push('"');
            out
        }
    }
}

/// Rewrite `\x`, `\z` and `\u{}` escapes the target does not know into
/// decimal byte escapes. The lexer has already validated every escape.
fn lower_escapes(text: &str, target: Target) -> Cow<'_, str> {
    let hex = !target.has_hex_escapes();
    let utf8 = !target.has_utf8_escapes();
    if !(hex || utf8) || !text.contains('\\') {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('x') if hex => {
                let digits: String = chars.by_ref().take(2).collect();
                let byte = u8::from_str_radix(&digits, 16).unwrap_or_default();
                let _ = write!(out, "\\{byte:03}");
            }
            Some('z') if hex => {
                while chars
                    .next_if(|c| c.is_ascii_whitespace() || *c == '\u{b}')
                    .is_some()
                {}
            }
            Some('u') if utf8 => {
                let digits: String = chars.by_ref().skip(1).take_while(|&c| c != '}').collect();
                let code = u32::from_str_radix(&digits, 16).unwrap_or_default();
                for byte in utf8_bytes(code) {
                    let _ = write!(out, "\\{byte:03}");
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    Cow::Owned(out)
}

/// UTF-8 encoding of `code`, surrogates included the way Lua encodes
/// them.
fn utf8_bytes(code: u32) -> Vec<u8> {
    let byte = |bits: u32| bits.to_le_bytes()[0];
    let tail = |shift: u32| byte(0x80 | ((code >> shift) & 0x3F));
    match code {
        0..=0x7F => vec![byte(code)],
        0x80..=0x7FF => vec![byte(0xC0 | (code >> 6)), tail(0)],
        0x800..=0xFFFF => vec![byte(0xE0 | (code >> 12)), tail(6), tail(0)],
        _ => vec![byte(0xF0 | (code >> 18)), tail(12), tail(6), tail(0)],
    }
}

/// True if `continue` in `block` refers to the loop owning `block`.
/// Nested loops and functions own their own `continue`s.
fn uses_continue(block: &Block) -> bool {
    block.stmts.iter().any(|stmt| match &stmt.kind {
        StmtKind::Continue => true,
        StmtKind::If {
            branches,
            otherwise,
        } => {
            branches.iter().any(|(_, body)| uses_continue(body))
                || otherwise.as_ref().is_some_and(uses_continue)
        }
        StmtKind::Do(body) => uses_continue(body),
        _ => false,
    })
}

/// Split a suffix chain into its base and its links, innermost first.
fn flatten_chain(expr: &Expr) -> (&Expr, Vec<&Expr>) {
    let mut links = Vec::new();
    let mut current = expr;
    loop {
        match &current.kind {
            ExprKind::Index { object, .. } | ExprKind::MethodCall { object, .. } => {
                links.push(current);
                current = object;
            }
            ExprKind::Call { callee, .. } => {
                links.push(current);
                current = callee;
            }
            _ => break,
        }
    }
    links.reverse();
    (current, links)
}

const fn link_is_optional(link: &Expr) -> bool {
    matches!(
        link.kind,
        ExprKind::Index { optional: true, .. }
            | ExprKind::Call { optional: true, .. }
            | ExprKind::MethodCall { optional: true, .. }
    )
}

fn starts_with_paren(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Paren(_) => true,
        ExprKind::Index { object, .. } | ExprKind::MethodCall { object, .. } => {
            starts_with_paren(object)
        }
        ExprKind::Call { callee, .. } => starts_with_paren(callee),
        _ => false,
    }
}

/// Lua text of a constant key, which is safe to evaluate twice.
fn literal_source(expr: &Expr, target: Target) -> Option<String> {
    match &expr.kind {
        ExprKind::Nil => Some("nil".to_string()),
        ExprKind::True => Some("true".to_string()),
        ExprKind::False => Some("false".to_string()),
        ExprKind::Number(n) => Some(n.clone()),
        ExprKind::String(lit) => lit
            .parts
            .iter()
            .map(|p| match p {
                StringPart::Text(t) => Some(t.as_str()),
                StringPart::Interp(_) => None,
            })
            .collect::<Option<String>>()
            .map(|text| quote_text(lit.quote, &text, target)),
        _ => None,
    }
}

/// Values that can never be `false` or `nil`, so `c and x or y` is a
/// faithful ternary.
const fn is_truthy_literal(expr: &Expr) -> bool {
    matches!(
        expr.kind,
        ExprKind::Number(_) | ExprKind::String(_) | ExprKind::Table(_) | ExprKind::Function(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn lua(input: &str) -> String {
        lua_for(input, Target::Lua51Plus)
    }

    fn lua_for(input: &str, target: Target) -> String {
        let tokens = tokenize(input).expect("tokenize failed");
        let chunk = parse(&tokens).expect("parse failed");
        generate(&chunk, &CompileOptions::new().target(target)).code
    }

    #[test]
    fn implicit_local() {
        assert_eq!(lua("x = 1 + 2"), "local x = 1 + 2\n");
        assert_eq!(lua("x = 1\nx = 2"), "local x = 1\nx = 2\n");
    }

    #[test]
    fn global_declaration() {
        assert_eq!(lua("global x = 1\nx = 2"), "x = 1\nx = 2\n");
        assert_eq!(lua("global y\ny = 3"), "y = 3\n");
    }

    #[test]
    fn operators_are_translated() {
        assert_eq!(
            lua("local a = !b && c || d != e"),
            "local a = not b and c or d ~= e\n"
        );
    }

    #[test]
    fn double_negation_keeps_space() {
        assert_eq!(lua("local a = - -b"), "local a = - -b\n");
        assert_eq!(lua("local a = 1 - -b"), "local a = 1 - -b\n");
    }

    #[test]
    fn floor_division_per_target() {
        assert_eq!(lua("local a = b // c"), "local a = math.floor(b / c)\n");
        assert_eq!(
            lua_for("local a = b // c", Target::Lua53),
            "local a = b // c\n"
        );
    }

    #[test]
    fn bitwise_per_target() {
        assert_eq!(
            lua("local a = b .| c"),
            "local a = require('bit').bor(b, c)\n"
        );
        assert_eq!(
            lua_for("local a = b .| c", Target::Lua52),
            "local a = require('bit32').bor(b, c)\n"
        );
        assert_eq!(
            lua_for("local a = b .<< 2 .& .~c", Target::Lua54),
            "local a = b << 2 & ~c\n"
        );
    }

    #[test]
    fn arrow_function_implicit_return() {
        assert_eq!(
            lua("local f = (a, b) -> a + b"),
            "local f = function(a, b)\n  return a + b\nend\n"
        );
    }

    #[test]
    fn fat_arrow_adds_self() {
        assert_eq!(
            lua("local f = () => self.x"),
            "local f = function(self)\n  return self.x\nend\n"
        );
    }

    #[test]
    fn parameter_defaults_and_rest() {
        assert_eq!(
            lua("local function f(a = 1, ...rest) { return rest }"),
            "local function f(a, ...)\n  \
             if a == nil then a = 1 end\n  \
             local rest = { ... }\n  \
             return rest\n\
             end\n"
        );
    }

    #[test]
    fn map_destructure() {
        assert_eq!(
            lua("local { a, b: c, d = 1 } = t"),
            "local __erde_tmp_1 = t\n\
             local a, c, d = __erde_tmp_1.a, __erde_tmp_1.b, __erde_tmp_1.d\n\
             if d == nil then d = 1 end\n"
        );
    }

    #[test]
    fn array_destructure() {
        assert_eq!(
            lua("local [x, y] = point"),
            "local __erde_tmp_1 = point\n\
             local x, y = __erde_tmp_1[1], __erde_tmp_1[2]\n"
        );
    }

    #[test]
    fn string_interpolation() {
        assert_eq!(
            lua("local s = \"hi {name}!\""),
            "local s = (\"hi \" .. tostring(name) .. \"!\")\n"
        );
    }

    #[test]
    fn long_string_becomes_quoted() {
        assert_eq!(
            lua("local s = [[a \"b\"\nc]]"),
            "local s = \"a \\\"b\\\"\\nc\"\n"
        );
    }

    #[test]
    fn optional_chain_expression() {
        assert_eq!(
            lua("local v = a?.b"),
            "local v = (function(...) local __erde_tmp_1 = a \
             if __erde_tmp_1 == nil then return nil end \
             return __erde_tmp_1.b end)(...)\n"
        );
    }

    #[test]
    fn optional_chain_statement() {
        assert_eq!(
            lua("a?.b:c()"),
            "do\n  \
             local __erde_tmp_1 = a\n  \
             if __erde_tmp_1 ~= nil then\n    \
             __erde_tmp_1 = __erde_tmp_1.b\n    \
             __erde_tmp_1:c()\n  \
             end\n\
             end\n"
        );
    }

    #[test]
    fn ternary_forms() {
        assert_eq!(lua("local v = c ? 1 : 2"), "local v = (c and 1 or 2)\n");
        assert_eq!(
            lua("local v = c ? x : y"),
            "local v = (function(...) if c then return x else return y end end)(...)\n"
        );
    }

    #[test]
    fn iife_without_varargs() {
        assert_eq!(
            lua("local f = () -> c ? x : y"),
            "local f = function()\n  \
             return (function() if c then return x else return y end end)()\n\
             end\n"
        );
    }

    #[test]
    fn continue_with_goto() {
        assert_eq!(
            lua_for("while x { if y { continue }\nf() }", Target::Lua54),
            "while x do\n  \
             do\n    \
             if y then\n      \
             goto __erde_continue_1\n    \
             end\n    \
             f()\n  \
             end\n  \
             ::__erde_continue_1::\n\
             end\n"
        );
    }

    #[test]
    fn continue_with_break_flag() {
        assert_eq!(
            lua("while x { if y { continue }\nf() }"),
            "while x do\n  \
             local __erde_tmp_1 = true\n  \
             repeat\n    \
             if y then\n      \
             __erde_tmp_1 = false\n      \
             break\n    \
             end\n    \
             f()\n    \
             __erde_tmp_1 = false\n  \
             until true\n  \
             if __erde_tmp_1 then break end\n\
             end\n"
        );
    }

    #[test]
    fn early_return_is_wrapped() {
        assert_eq!(
            lua("local function f() { return 1\nprint(2) }"),
            "local function f()\n  do return 1 end\n  print(2)\nend\n"
        );
    }

    #[test]
    fn module_exports() {
        assert_eq!(
            lua("module x = 1\nmodule function f() { return x }"),
            "local x = 1\n\
             local function f()\n  return x\nend\n\
             return { x = x, f = f }\n"
        );
    }

    #[test]
    fn compound_assignment() {
        assert_eq!(lua("x = 1\nx += 2 * y"), "local x = 1\nx = x + (2 * y)\n");
        assert_eq!(lua("t.n ..= 's'"), "t.n = t.n .. 's'\n");
        assert_eq!(
            lua("t[k()] -= 1"),
            "do\n  \
             local __erde_tmp_1, __erde_tmp_2 = t, k()\n  \
             __erde_tmp_1[__erde_tmp_2] = __erde_tmp_1[__erde_tmp_2] - 1\n\
             end\n"
        );
    }

    #[test]
    fn paren_statement_is_isolated() {
        assert_eq!(lua("a = b\n(f)()"), "local a = b\ndo (f)() end\n");
    }

    #[test]
    fn literal_prefix_is_parenthesized() {
        assert_eq!(
            lua("local s = 'abc':upper()"),
            "local s = ('abc'):upper()\n"
        );
    }

    #[test]
    fn line_map_tracks_statements() {
        let tokens = tokenize("x = 1\n\nif x {\n  y = 2\n}").expect("tokenize failed");
        let chunk = parse(&tokens).expect("parse failed");
        let generated = generate(&chunk, &CompileOptions::new());
        let lines: Vec<_> = generated.source_map.iter().map(|(_, l)| l).collect();
        assert_eq!(lines, [Some(1), Some(3), Some(4), None]);
    }
}
