//! PEST-based parser for generated workflow modules
//!
//! Produces the syntax tree in [`ast`] with span information for error
//! reporting. Nothing is ever evaluated: literals are decoded, everything
//! else is kept as structure or as an opaque region of the source.

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;

pub mod ast;
pub mod semantic_validator;


use ast::{Argument, Expr, Mention, Module, NestedLine, Span, Stmt};

/* ===================== PEST Parser ===================== */

#[derive(Parser)]
#[grammar = "parser/workflow.pest"]
struct WorkflowParser;

/* ===================== Error Types ===================== */

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    /// Structurally invalid source (unbalanced brackets, bad indentation, ...)
    #[error("syntax error{}: {message}", at(.span))]
    Syntax { message: String, span: Option<Span> },

    /// Valid syntax that cannot be turned into a workflow graph
    #[error("invalid workflow{}: {message}", at(.span))]
    Build { message: String, span: Option<Span> },

    /// A call argument names a variable nothing has bound yet
    #[error("undefined reference '{name}'{}", at_span(.span))]
    UndefinedReference { name: String, span: Span },
}

impl ParseError {
    pub fn syntax(message: impl Into<String>, span: Option<Span>) -> Self {
        ParseError::Syntax {
            message: message.into(),
            span,
        }
    }

    pub fn build(message: impl Into<String>, span: Option<Span>) -> Self {
        ParseError::Build {
            message: message.into(),
            span,
        }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            ParseError::Syntax { span, .. } | ParseError::Build { span, .. } => *span,
            ParseError::UndefinedReference { span, .. } => Some(*span),
        }
    }

    pub fn message(&self) -> String {
        match self {
            ParseError::Syntax { message, .. } | ParseError::Build { message, .. } => message.clone(),
            ParseError::UndefinedReference { name, .. } => {
                format!("'{}' is used before any statement binds it", name)
            }
        }
    }
}

/// ` at line L, column C` for a known span, empty otherwise.
pub(crate) fn at(span: &Option<Span>) -> String {
    span.as_ref().map(at_span).unwrap_or_default()
}

fn at_span(span: &Span) -> String {
    let (line, col) = span.location();
    format!(" at line {}, column {}", line, col)
}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        let err = err.renamed_rules(rule_label);
        let (start, end) = match err.location {
            pest::error::InputLocation::Pos(pos) => (pos, pos),
            pest::error::InputLocation::Span((start, end)) => (start, end),
        };
        let span = match err.line_col {
            pest::error::LineColLocation::Pos((line, col)) => Span::new(
                start,
                end,
                line.saturating_sub(1),
                col.saturating_sub(1),
                line.saturating_sub(1),
                col,
            ),
            pest::error::LineColLocation::Span((start_line, start_col), (end_line, end_col)) => Span::new(
                start,
                end,
                start_line.saturating_sub(1),
                start_col.saturating_sub(1),
                end_line.saturating_sub(1),
                end_col.saturating_sub(1),
            ),
        };
        ParseError::Syntax {
            message: err.variant.message().into_owned(),
            span: Some(span),
        }
    }
}

fn rule_label(rule: &Rule) -> String {
    match rule {
        Rule::EOI => "end of input".to_string(),
        Rule::top_line | Rule::top_stmt => "statement".to_string(),
        Rule::indented_line | Rule::nested_stmt => "indented line".to_string(),
        Rule::call_args => "call arguments".to_string(),
        other => format!("{:?}", other).replace('_', " "),
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/* ===================== Span Helpers ===================== */

/// Module text plus the byte offset where each line starts, so span
/// positions are a binary search instead of a rescan from the top.
struct SourceText<'s> {
    text: &'s str,
    line_starts: Vec<usize>,
}

impl<'s> SourceText<'s> {
    fn new(text: &'s str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { text, line_starts }
    }

    /// (line, column) of a byte offset, both 0-indexed; columns count chars.
    fn line_col(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.text.len());
        let line = self
            .line_starts
            .partition_point(|&start| start <= offset)
            .saturating_sub(1);
        let start = self.line_starts.get(line).copied().unwrap_or(0);
        let col = self
            .text
            .get(start..offset)
            .map_or(offset - start, |prefix| prefix.chars().count());
        (line, col)
    }
}

impl std::ops::Deref for SourceText<'_> {
    type Target = str;

    fn deref(&self) -> &str {
        self.text
    }
}

/// Convert a PEST pair's span to our Span type
fn pair_to_span(pair: &Pair<Rule>, source: &SourceText) -> Span {
    let pest_span = pair.as_span();
    offsets_to_span(source, pest_span.start(), pest_span.end())
}

fn offsets_to_span(source: &SourceText, start: usize, end: usize) -> Span {
    let (start_line, start_col) = source.line_col(start);
    let (end_line, end_col) = source.line_col(end);
    Span::new(start, end, start_line, start_col, end_line, end_col)
}

/// Next inner pair, or a build error naming what the grammar should have produced.
fn expect_next<'i>(
    inner: &mut pest::iterators::Pairs<'i, Rule>,
    what: &str,
    span: Span,
) -> ParseResult<Pair<'i, Rule>> {
    inner
        .next()
        .ok_or_else(|| ParseError::build(format!("expected {}", what), Some(span)))
}

/* ===================== Public API ===================== */

/// Deepest bracket nesting accepted; anything deeper is a syntax error
/// raised before the recursive grammar runs.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Parse module source into its top-level statements.
pub fn parse_module(text: &str) -> ParseResult<Module> {
    let source = &SourceText::new(text);
    check_nesting(source)?;

    let mut pairs = WorkflowParser::parse(Rule::program, text)?;
    let program = pairs
        .next()
        .ok_or_else(|| ParseError::build("empty parse result", None))?;
    let span = pair_to_span(&program, source);

    let mut builder = ModuleBuilder::new(source);
    for line in program.into_inner() {
        match line.as_rule() {
            Rule::top_line => builder.top_line(line)?,
            Rule::indented_line => builder.indented_line(line)?,
            Rule::EOI => {}
            other => {
                return Err(ParseError::build(
                    format!("unexpected module content: {:?}", other),
                    Some(pair_to_span(&line, source)),
                ))
            }
        }
    }

    Ok(Module {
        body: builder.finish()?,
        span,
    })
}

/// Bracket depth scan over everything outside strings and comments.
fn check_nesting(source: &SourceText) -> ParseResult<()> {
    let bytes = source.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            quote @ (b'"' | b'\'') => {
                let delimiter = [quote; 3];
                let triple = bytes[i..].starts_with(&delimiter);
                let width = if triple { 3 } else { 1 };
                i += width;
                while i < bytes.len() {
                    match bytes[i] {
                        b'\\' => i += 2,
                        b'\n' if !triple => break,
                        c if c == quote && (!triple || bytes[i..].starts_with(&delimiter)) => {
                            i += width;
                            break;
                        }
                        _ => i += 1,
                    }
                }
                continue;
            }
            b'(' | b'[' | b'{' => {
                depth += 1;
                if depth > MAX_NESTING_DEPTH {
                    return Err(ParseError::syntax(
                        format!("brackets nested more than {} levels deep", MAX_NESTING_DEPTH),
                        Some(offsets_to_span(source, i, i + 1)),
                    ));
                }
            }
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            _ => {}
        }
        i += 1;
    }
    Ok(())
}

/* ===================== Module Builder ===================== */

/// Groups physical lines into top-level statements: decorators attach to the
/// following definition, `elif`/`else`/`except`/`finally` clauses to the
/// statement they continue, indented lines to the open block.
struct ModuleBuilder<'s> {
    source: &'s SourceText<'s>,
    body: Vec<Stmt>,
    decorators: Vec<Mention>,
    decorator_span: Option<Span>,
    block_open: bool,
    awaiting_block: Option<Span>,
}

const CONTINUATION_CLAUSES: [&str; 4] = ["elif", "else", "except", "finally"];

impl<'s> ModuleBuilder<'s> {
    fn new(source: &'s SourceText<'s>) -> Self {
        Self {
            source,
            body: Vec::new(),
            decorators: Vec::new(),
            decorator_span: None,
            block_open: false,
            awaiting_block: None,
        }
    }

    fn top_line(&mut self, line: Pair<Rule>) -> ParseResult<()> {
        let line_span = pair_to_span(&line, self.source);
        let top_stmt = expect_next(&mut line.into_inner(), "statement", line_span)?;
        let content = expect_next(&mut top_stmt.into_inner(), "statement", line_span)?;

        if let Some(header) = self.awaiting_block.take() {
            return Err(ParseError::syntax("expected an indented block", Some(header)));
        }

        match content.as_rule() {
            Rule::decorator => {
                let span = pair_to_span(&content, self.source);
                for run in content.into_inner() {
                    self.decorators.extend(scan_run(run, self.source).mentions);
                }
                self.decorator_span = Some(match self.decorator_span {
                    Some(previous) => previous.merge(&span),
                    None => span,
                });
                self.block_open = false;
            }
            Rule::compound_header => self.compound_header(content)?,
            Rule::simple_stmts => {
                if let Some(span) = self.decorator_span {
                    return Err(ParseError::syntax(
                        "decorator must be followed by a function or class definition",
                        Some(span),
                    ));
                }
                for stmt in content.into_inner() {
                    self.body.push(build_simple_stmt(stmt, self.source)?);
                }
                self.block_open = false;
            }
            other => {
                return Err(ParseError::build(
                    format!("unexpected statement: {:?}", other),
                    Some(line_span),
                ))
            }
        }
        Ok(())
    }

    fn compound_header(&mut self, header: Pair<Rule>) -> ParseResult<()> {
        let span = pair_to_span(&header, self.source);
        let mut inner = header.into_inner();
        let keyword_pair = expect_next(&mut inner, "compound statement keyword", span)?;
        let keyword = keyword_pair
            .as_str()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        let mut tokens: Vec<Pair<Rule>> = Vec::new();
        let mut inline_body = None;
        for pair in inner {
            if pair.as_rule() == Rule::opaque_run {
                inline_body = Some(pair);
            } else {
                tokens.push(pair);
            }
        }

        let mut scan = RunScan::new(self.source, true);
        let mut header_tokens = vec![keyword_pair];
        header_tokens.extend(tokens);
        scan.tokens(&header_tokens, true);
        let base = keyword.trim_start_matches("async ").to_string();
        let has_inline_body = inline_body.is_some();
        if let Some(run) = inline_body {
            let body = scan_run(run, self.source);
            if !ast::opens_scope(&base) {
                scan.bindings.extend(body.bindings);
            }
            scan.mentions.extend(body.mentions);
        }

        if CONTINUATION_CLAUSES.contains(&base.as_str()) {
            if self.decorator_span.is_some() {
                return Err(ParseError::syntax(
                    "decorator must be followed by a function or class definition",
                    self.decorator_span,
                ));
            }
            match self.body.last_mut() {
                Some(Stmt::Compound {
                    clauses,
                    bindings,
                    mentions,
                    span: stmt_span,
                    ..
                }) => {
                    clauses.push(keyword);
                    bindings.extend(scan.bindings);
                    mentions.extend(scan.mentions);
                    *stmt_span = stmt_span.merge(&span);
                }
                _ => {
                    return Err(ParseError::syntax(
                        format!("'{}' does not continue a compound statement", base),
                        Some(span),
                    ))
                }
            }
        } else {
            let mut stmt_span = span;
            let mut mentions = Vec::new();
            if let Some(decorator_span) = self.decorator_span.take() {
                if base != "def" && base != "class" {
                    return Err(ParseError::syntax(
                        "decorator must be followed by a function or class definition",
                        Some(decorator_span),
                    ));
                }
                stmt_span = decorator_span.merge(&span);
                mentions.append(&mut self.decorators);
            }
            mentions.extend(scan.mentions);
            self.body.push(Stmt::Compound {
                clauses: vec![keyword],
                bindings: scan.bindings,
                mentions,
                body: Vec::new(),
                span: stmt_span,
            });
        }

        self.block_open = true;
        if !has_inline_body {
            self.awaiting_block = Some(span);
        }
        Ok(())
    }

    fn indented_line(&mut self, line: Pair<Rule>) -> ParseResult<()> {
        let span = pair_to_span(&line, self.source);
        if !self.block_open {
            return Err(ParseError::syntax("unexpected indent", Some(span)));
        }
        let nested = expect_next(&mut line.into_inner(), "indented line", span)?;
        let nested_line = build_nested_line(nested, self.source)?;
        self.awaiting_block = None;

        if let Some(Stmt::Compound {
            body,
            span: stmt_span,
            ..
        }) = self.body.last_mut()
        {
            *stmt_span = stmt_span.merge(&nested_line.span);
            body.push(nested_line);
            Ok(())
        } else {
            Err(ParseError::syntax("unexpected indent", Some(span)))
        }
    }

    fn finish(self) -> ParseResult<Vec<Stmt>> {
        if let Some(header) = self.awaiting_block {
            return Err(ParseError::syntax("expected an indented block", Some(header)));
        }
        if let Some(span) = self.decorator_span {
            return Err(ParseError::syntax(
                "decorator must be followed by a function or class definition",
                Some(span),
            ));
        }
        Ok(self.body)
    }
}

fn build_nested_line(pair: Pair<Rule>, source: &SourceText) -> ParseResult<NestedLine> {
    let span = pair_to_span(&pair, source);
    let content = expect_next(&mut pair.into_inner(), "indented line", span)?;
    match content.as_rule() {
        Rule::nested_binding => {
            let mut bindings = Vec::new();
            let mut mentions = Vec::new();
            for part in content.into_inner() {
                match part.as_rule() {
                    Rule::identifier => bindings.push(part.as_str().to_string()),
                    Rule::opaque_run => mentions.extend(scan_run(part, source).mentions),
                    _ => {}
                }
            }
            Ok(NestedLine {
                bindings,
                mentions,
                span,
            })
        }
        Rule::opaque_run => {
            let scanned = scan_run(content, source);
            Ok(NestedLine {
                bindings: scanned.bindings,
                mentions: scanned.mentions,
                span,
            })
        }
        other => Err(ParseError::build(
            format!("unexpected indented content: {:?}", other),
            Some(span),
        )),
    }
}

/* ===================== Simple Statements ===================== */

fn build_simple_stmt(pair: Pair<Rule>, source: &SourceText) -> ParseResult<Stmt> {
    let span = pair_to_span(&pair, source);
    match pair.as_rule() {
        Rule::assign_stmt => {
            let mut parts: Vec<Pair<Rule>> = pair
                .into_inner()
                .filter(|p| p.as_rule() != Rule::assign_op)
                .collect();
            let value_pair = parts
                .pop()
                .ok_or_else(|| ParseError::build("assignment without a value", Some(span)))?;
            let mut targets = Vec::with_capacity(parts.len());
            for target_pair in parts {
                let target_span = pair_to_span(&target_pair, source);
                let list = expect_next(&mut target_pair.into_inner(), "assignment target", target_span)?;
                let target = build_expr_list(list, source)?;
                check_target(&target, source)?;
                targets.push(target);
            }
            Ok(Stmt::Assign {
                targets,
                value: build_expr_list(value_pair, source)?,
                span,
            })
        }
        Rule::aug_assign_stmt => {
            let mut inner = pair.into_inner();
            let target = build_expr(expect_next(&mut inner, "assignment target", span)?, source)?;
            check_target(&target, source)?;
            let op = expect_next(&mut inner, "augmented operator", span)?.as_str().to_string();
            let value = build_expr_list(expect_next(&mut inner, "value", span)?, source)?;
            Ok(Stmt::AugAssign {
                target,
                op,
                value,
                span,
            })
        }
        Rule::ann_assign_stmt => {
            let mut inner = pair.into_inner().filter(|p| p.as_rule() != Rule::assign_op);
            let target_pair = inner
                .next()
                .ok_or_else(|| ParseError::build("expected annotated target", Some(span)))?;
            let target = build_expr(target_pair, source)?;
            check_target(&target, source)?;
            let annotation_pair = inner
                .next()
                .ok_or_else(|| ParseError::build("expected annotation", Some(span)))?;
            let annotation = build_expr(annotation_pair, source)?;
            let value = match inner.next() {
                Some(value_pair) => Some(build_expr_list(value_pair, source)?),
                None => None,
            };
            Ok(Stmt::AnnAssign {
                target,
                annotation,
                value,
                span,
            })
        }
        Rule::expr_stmt => {
            let list = expect_next(&mut pair.into_inner(), "expression", span)?;
            Ok(Stmt::Expr {
                value: build_expr_list(list, source)?,
                span,
            })
        }
        Rule::import_stmt => {
            let import = expect_next(&mut pair.into_inner(), "import", span)?;
            Ok(Stmt::Import {
                bindings: import_bindings(import),
                span,
            })
        }
        Rule::keyword_stmt => {
            let mut inner = pair.into_inner();
            let keyword = expect_next(&mut inner, "keyword", span)?.as_str().to_string();
            let tokens: Vec<Pair<Rule>> = inner.collect();
            let mut scan = RunScan::new(source, true);
            scan.tokens(&tokens, true);
            Ok(Stmt::Keyword {
                keyword,
                mentions: scan.mentions,
                span,
            })
        }
        other => Err(ParseError::build(
            format!("unexpected statement: {:?}", other),
            Some(span),
        )),
    }
}

fn check_target(target: &Expr, source: &SourceText) -> ParseResult<()> {
    match target {
        Expr::Call { span, .. } => Err(ParseError::syntax(
            format!("cannot assign to function call '{}'", span.slice(source)),
            Some(*span),
        )),
        Expr::Str { span, .. }
        | Expr::Int { span, .. }
        | Expr::Float { span, .. }
        | Expr::Bool { span, .. }
        | Expr::None { span } => Err(ParseError::syntax(
            format!("cannot assign to literal '{}'", span.slice(source)),
            Some(*span),
        )),
        Expr::Tuple { elts, .. } => elts.iter().try_for_each(|elt| check_target(elt, source)),
        Expr::Starred { value, .. } => check_target(value, source),
        _ => Ok(()),
    }
}

fn import_bindings(import: Pair<Rule>) -> Vec<String> {
    let mut bindings = Vec::new();
    for part in import.into_inner() {
        match part.as_rule() {
            Rule::dotted_as_name => {
                let mut inner = part.into_inner();
                let dotted = inner.next();
                let alias = inner.find(|p| p.as_rule() == Rule::identifier);
                match (alias, dotted) {
                    (Some(alias), _) => bindings.push(alias.as_str().to_string()),
                    (None, Some(dotted)) => {
                        if let Some(first) = dotted.into_inner().next() {
                            bindings.push(first.as_str().to_string());
                        }
                    }
                    (None, None) => {}
                }
            }
            Rule::import_as_name => {
                if let Some(bound) = part
                    .into_inner()
                    .filter(|p| p.as_rule() == Rule::identifier)
                    .last()
                {
                    bindings.push(bound.as_str().to_string());
                }
            }
            Rule::import_star => bindings.push("*".to_string()),
            _ => {}
        }
    }
    bindings
}

/* ===================== Expressions ===================== */

/// `expr_list` is a single expression, or a tuple when it has commas.
fn build_expr_list(pair: Pair<Rule>, source: &SourceText) -> ParseResult<Expr> {
    let span = pair_to_span(&pair, source);
    let mut trailing_comma = false;
    let mut elts = Vec::new();
    for part in pair.into_inner() {
        if part.as_rule() == Rule::trailing_comma {
            trailing_comma = true;
        } else {
            elts.push(part);
        }
    }

    if elts.len() == 1 && !trailing_comma && elts[0].as_rule() != Rule::star_expr {
        if let Some(only) = elts.pop() {
            return build_expr(only, source);
        }
    }
    let elts = elts
        .into_iter()
        .map(|e| build_expr(e, source))
        .collect::<ParseResult<Vec<_>>>()?;
    Ok(Expr::Tuple { elts, span })
}

fn build_expr(pair: Pair<Rule>, source: &SourceText) -> ParseResult<Expr> {
    let span = pair_to_span(&pair, source);
    match pair.as_rule() {
        Rule::expr_list => build_expr_list(pair, source),
        Rule::expression | Rule::b_expression => {
            let inner = expect_next(&mut pair.into_inner(), "expression", span)?;
            build_expr(inner, source)
        }
        Rule::conditional | Rule::b_conditional | Rule::disjunction | Rule::b_disjunction => {
            let mut inner = pair.clone().into_inner();
            match (inner.next(), inner.next()) {
                (Some(only), None) => build_expr(only, source),
                _ => Ok(opaque(&pair, source)),
            }
        }
        Rule::operand | Rule::b_operand => build_operand(pair, source),
        Rule::primary | Rule::b_primary => build_primary(pair, source),
        Rule::star_expr | Rule::b_star_expr => {
            let inner = expect_next(&mut pair.into_inner(), "starred expression", span)?;
            Ok(Expr::Starred {
                value: Box::new(build_expr(inner, source)?),
                span,
            })
        }
        _ => build_atom(pair, source),
    }
}

/// Prefix operators make an operand opaque, except a sign on a bare number.
fn build_operand(pair: Pair<Rule>, source: &SourceText) -> ParseResult<Expr> {
    let span = pair_to_span(&pair, source);
    let parts: Vec<Pair<Rule>> = pair.clone().into_inner().collect();
    match parts.as_slice() {
        [primary] => build_expr(primary.clone(), source),
        [sign, primary] if matches!(sign.as_str(), "-" | "+") => {
            let mut atoms = primary.clone().into_inner();
            match (atoms.next(), atoms.next()) {
                (Some(number), None) if number.as_rule() == Rule::number => {
                    let negate = sign.as_str() == "-";
                    Ok(match build_number(&number, source) {
                        Expr::Int { value, .. } if negate => match value.checked_neg() {
                            Some(value) => Expr::Int { value, span },
                            None => opaque(&pair, source),
                        },
                        Expr::Int { value, .. } => Expr::Int { value, span },
                        Expr::Float { value, .. } if negate => Expr::Float { value: -value, span },
                        Expr::Float { value, .. } => Expr::Float { value, span },
                        _ => opaque(&pair, source),
                    })
                }
                _ => Ok(opaque(&pair, source)),
            }
        }
        _ => Ok(opaque(&pair, source)),
    }
}

fn build_primary(pair: Pair<Rule>, source: &SourceText) -> ParseResult<Expr> {
    let span = pair_to_span(&pair, source);
    let mut inner = pair.clone().into_inner();
    let atom = expect_next(&mut inner, "atom", span)?;
    let trailers: Vec<Pair<Rule>> = inner.collect();
    if trailers.iter().any(|t| t.as_rule() == Rule::subscript) {
        return Ok(opaque(&pair, source));
    }

    let mut expr = build_atom(atom, source)?;
    for trailer in trailers {
        let trailer_span = pair_to_span(&trailer, source);
        let span = expr.span().merge(&trailer_span);
        expr = match trailer.as_rule() {
            Rule::call_args => Expr::Call {
                func: Box::new(expr),
                args: build_args(trailer, source)?,
                span,
            },
            Rule::attribute => {
                let attr = expect_next(&mut trailer.into_inner(), "attribute name", trailer_span)?;
                Expr::Attribute {
                    value: Box::new(expr),
                    attr: attr.as_str().to_string(),
                    span,
                }
            }
            other => {
                return Err(ParseError::build(
                    format!("unexpected trailer: {:?}", other),
                    Some(trailer_span),
                ))
            }
        };
    }
    Ok(expr)
}

fn build_args(pair: Pair<Rule>, source: &SourceText) -> ParseResult<Vec<Argument>> {
    let mut args: Vec<Argument> = Vec::new();
    let mut seen_keyword = false;
    for argument in pair.into_inner() {
        let span = pair_to_span(&argument, source);
        let kind = expect_next(&mut argument.into_inner(), "argument", span)?;
        match kind.as_rule() {
            Rule::kwarg => {
                let mut inner = kind.into_inner().filter(|p| p.as_rule() != Rule::assign_op);
                let name = inner
                    .next()
                    .ok_or_else(|| ParseError::build("expected keyword name", Some(span)))?
                    .as_str()
                    .to_string();
                if args.iter().any(|a| a.keyword.as_deref() == Some(name.as_str())) {
                    return Err(ParseError::syntax(
                        format!("keyword argument repeated: {}", name),
                        Some(span),
                    ));
                }
                let value_pair = inner
                    .next()
                    .ok_or_else(|| ParseError::build("expected keyword value", Some(span)))?;
                seen_keyword = true;
                args.push(Argument {
                    keyword: Some(name),
                    value: build_expr(value_pair, source)?,
                    span,
                });
            }
            Rule::double_star_arg => {
                seen_keyword = true;
                args.push(Argument {
                    keyword: None,
                    value: opaque(&kind, source),
                    span,
                });
            }
            Rule::star_arg => args.push(Argument {
                keyword: None,
                value: opaque(&kind, source),
                span,
            }),
            Rule::positional_arg => {
                if seen_keyword {
                    return Err(ParseError::syntax(
                        "positional argument follows keyword argument",
                        Some(span),
                    ));
                }
                let mut inner = kind.clone().into_inner();
                let value_pair = expect_next(&mut inner, "argument value", span)?;
                let value = if inner.next().is_some() {
                    // generator argument
                    opaque(&kind, source)
                } else {
                    build_expr(value_pair, source)?
                };
                args.push(Argument {
                    keyword: None,
                    value,
                    span,
                });
            }
            other => {
                return Err(ParseError::build(
                    format!("unexpected argument: {:?}", other),
                    Some(span),
                ))
            }
        }
    }
    Ok(args)
}

fn build_atom(pair: Pair<Rule>, source: &SourceText) -> ParseResult<Expr> {
    let span = pair_to_span(&pair, source);
    match pair.as_rule() {
        Rule::identifier => Ok(Expr::Name {
            id: pair.as_str().to_string(),
            span,
        }),
        Rule::number => Ok(build_number(&pair, source)),
        Rule::boolean => Ok(Expr::Bool {
            value: pair.as_str() == "True",
            span,
        }),
        Rule::none_lit => Ok(Expr::None { span }),
        Rule::ellipsis => Ok(Expr::Opaque {
            mentions: Vec::new(),
            span,
        }),
        Rule::string_concat | Rule::b_string_concat => Ok(build_string(pair, source)),
        Rule::list_atom => Ok(opaque(&pair, source)),
        Rule::paren_atom => {
            let parts: Vec<Pair<Rule>> = pair.clone().into_inner().collect();
            if parts.iter().any(|p| p.as_rule() == Rule::comp_for) {
                return Ok(opaque(&pair, source));
            }
            let trailing_comma = parts.iter().any(|p| p.as_rule() == Rule::trailing_comma);
            let mut elts: Vec<Pair<Rule>> = parts
                .into_iter()
                .filter(|p| p.as_rule() != Rule::trailing_comma)
                .collect();
            if elts.len() == 1 && !trailing_comma && elts[0].as_rule() != Rule::b_star_expr {
                if let Some(only) = elts.pop() {
                    return build_expr(only, source);
                }
            }
            let elts = elts
                .into_iter()
                .map(|e| build_expr(e, source))
                .collect::<ParseResult<Vec<_>>>()?;
            Ok(Expr::Tuple { elts, span })
        }
        Rule::brace_atom => {
            let mut parts = pair.clone().into_inner();
            let first = match parts.next() {
                None => return Ok(Expr::Dict { entries: Vec::new(), span }),
                Some(first) => first,
            };
            let value = match parts.next() {
                Some(value) if value.as_rule() == Rule::dict_value => value,
                // a set, or a dict opening with `**`
                _ => return Ok(opaque(&pair, source)),
            };
            let rest = parts.next();
            let items: Vec<Pair<Rule>> = rest.map(|r| r.into_inner().collect()).unwrap_or_default();
            if items.iter().any(|item| {
                item.as_rule() == Rule::comp_for
                    || item
                        .clone()
                        .into_inner()
                        .next()
                        .is_some_and(|p| p.as_rule() == Rule::dict_unpack)
            }) {
                return Ok(opaque(&pair, source));
            }

            let value_span = pair_to_span(&value, source);
            let mut entries = Vec::with_capacity(items.len() + 1);
            entries.push((
                build_expr(first, source)?,
                build_expr(expect_next(&mut value.into_inner(), "dict value", value_span)?, source)?,
            ));
            for item in items {
                let item_span = pair_to_span(&item, source);
                let mut inner = item.into_inner();
                let key = build_expr(expect_next(&mut inner, "dict key", item_span)?, source)?;
                let value = build_expr(expect_next(&mut inner, "dict value", item_span)?, source)?;
                entries.push((key, value));
            }
            Ok(Expr::Dict { entries, span })
        }
        Rule::lambda_expr | Rule::b_lambda_expr => Ok(opaque(&pair, source)),
        _ => build_expr_fallback(pair, source),
    }
}

fn build_expr_fallback(pair: Pair<Rule>, source: &SourceText) -> ParseResult<Expr> {
    match pair.as_rule() {
        Rule::expression
        | Rule::b_expression
        | Rule::conditional
        | Rule::b_conditional
        | Rule::disjunction
        | Rule::b_disjunction
        | Rule::operand
        | Rule::b_operand
        | Rule::primary
        | Rule::b_primary
        | Rule::star_expr
        | Rule::b_star_expr => build_expr(pair, source),
        _ => Ok(opaque(&pair, source)),
    }
}

fn build_number(pair: &Pair<Rule>, source: &SourceText) -> Expr {
    let span = pair_to_span(pair, source);
    let text = pair.as_str().replace('_', "");
    let lower = text.to_ascii_lowercase();

    if lower.ends_with('j') {
        return Expr::Opaque {
            mentions: Vec::new(),
            span,
        };
    }

    let radix = match lower.get(..2) {
        Some("0x") => Some(16),
        Some("0o") => Some(8),
        Some("0b") => Some(2),
        _ => None,
    };
    let parsed = match radix {
        Some(radix) => i64::from_str_radix(&lower[2..], radix)
            .ok()
            .map(|value| Expr::Int { value, span }),
        None if lower.contains(['.', 'e']) => lower.parse::<f64>().ok().map(|value| Expr::Float { value, span }),
        None => lower.parse::<i64>().ok().map(|value| Expr::Int { value, span }),
    };
    // out of range integers stay as written
    parsed.unwrap_or(Expr::Opaque {
        mentions: Vec::new(),
        span,
    })
}

/// Plain and raw strings decode to `Str`; bytes and f-strings are opaque.
fn build_string(pair: Pair<Rule>, source: &SourceText) -> Expr {
    let span = pair_to_span(&pair, source);
    let mut value = String::new();
    for literal in pair.clone().into_inner() {
        let mut prefix = String::new();
        let mut body = "";
        for part in literal.into_inner() {
            match part.as_rule() {
                Rule::string_prefix => prefix = part.as_str().to_ascii_lowercase(),
                _ => {
                    if let Some(content) = part.into_inner().next() {
                        body = content.as_str();
                    }
                }
            }
        }
        if prefix.contains('b') || prefix.contains('f') {
            return opaque(&pair, source);
        }
        if prefix.contains('r') {
            value.push_str(body);
        } else {
            value.push_str(&decode_escapes(body));
        }
    }
    Expr::Str { value, span }
}

fn decode_escapes(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('a') => out.push('\u{07}'),
            Some('b') => out.push('\u{08}'),
            Some('f') => out.push('\u{0C}'),
            Some('v') => out.push('\u{0B}'),
            Some('\n') => {}
            Some('\r') => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
            }
            Some(kind @ ('x' | 'u' | 'U')) => {
                let width = match kind {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let digits: String = chars.by_ref().take(width).collect();
                match u32::from_str_radix(&digits, 16).ok().and_then(char::from_u32) {
                    Some(decoded) if digits.len() == width => out.push(decoded),
                    _ => {
                        out.push('\\');
                        out.push(kind);
                        out.push_str(&digits);
                    }
                }
            }
            Some(digit @ '0'..='7') => {
                let mut code = digit.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(next) => {
                            code = code * 8 + next;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(code).unwrap_or('\u{FFFD}'));
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/* ===================== Opaque Regions ===================== */

fn opaque(pair: &Pair<Rule>, source: &SourceText) -> Expr {
    let mut mentions = Vec::new();
    collect_pair_mentions(pair.clone(), source, &mut mentions);
    Expr::Opaque {
        mentions,
        span: pair_to_span(pair, source),
    }
}

/// Bare names read anywhere inside a structured expression subtree.
fn collect_pair_mentions(pair: Pair<Rule>, source: &SourceText, out: &mut Vec<Mention>) {
    match pair.as_rule() {
        Rule::identifier => out.push(Mention {
            name: pair.as_str().to_string(),
            called: false,
            span: pair_to_span(&pair, source),
        }),
        Rule::primary | Rule::b_primary => {
            let mut inner = pair.into_inner();
            if let Some(atom) = inner.next() {
                let trailers: Vec<Pair<Rule>> = inner.collect();
                if atom.as_rule() == Rule::identifier {
                    out.push(Mention {
                        name: atom.as_str().to_string(),
                        called: trailers
                            .first()
                            .is_some_and(|t| t.as_rule() == Rule::call_args),
                        span: pair_to_span(&atom, source),
                    });
                } else {
                    collect_pair_mentions(atom, source, out);
                }
                for trailer in trailers {
                    if trailer.as_rule() != Rule::attribute {
                        collect_pair_mentions(trailer, source, out);
                    }
                }
            }
        }
        Rule::kwarg => {
            for part in pair.into_inner().skip(1) {
                collect_pair_mentions(part, source, out);
            }
        }
        Rule::subscript | Rule::group => {
            let tokens: Vec<Pair<Rule>> = pair.into_inner().collect();
            let mut scan = RunScan::new(source, false);
            scan.tokens(&tokens, false);
            out.extend(scan.mentions);
        }
        Rule::string_lit => fstring_mentions(&pair, source, out),
        Rule::comp_targets | Rule::lambda_params | Rule::assign_op => {}
        Rule::paren_atom | Rule::list_atom | Rule::brace_atom | Rule::positional_arg => {
            let mut local_names = Vec::new();
            let mut found = Vec::new();
            for part in pair.into_inner() {
                comprehension_targets(&part, &mut local_names);
                collect_pair_mentions(part, source, &mut found);
            }
            out.extend(found.into_iter().filter(|m| !local_names.contains(&m.name)));
        }
        _ => {
            for part in pair.into_inner() {
                collect_pair_mentions(part, source, out);
            }
        }
    }
}

/// Names a comprehension binds, found in a display's `comp_for` tail.
fn comprehension_targets(part: &Pair<Rule>, out: &mut Vec<String>) {
    match part.as_rule() {
        Rule::comp_for => {
            for target in part.clone().into_inner().filter(|p| p.as_rule() == Rule::comp_targets) {
                collect_identifiers(target, out);
            }
        }
        Rule::dict_rest | Rule::set_rest => {
            for inner in part.clone().into_inner() {
                comprehension_targets(&inner, out);
            }
        }
        _ => {}
    }
}

fn collect_identifiers(pair: Pair<Rule>, out: &mut Vec<String>) {
    if pair.as_rule() == Rule::identifier {
        out.push(pair.as_str().to_string());
        return;
    }
    for part in pair.into_inner() {
        collect_identifiers(part, out);
    }
}

/// Leading names of `{...}` placeholders in an f-string literal.
fn fstring_mentions(literal: &Pair<Rule>, source: &SourceText, out: &mut Vec<Mention>) {
    let text = literal.as_str();
    let base = literal.as_span().start();
    let prefix_len = text.find(['"', '\'']).unwrap_or(0);
    if !text[..prefix_len].to_ascii_lowercase().contains('f') {
        return;
    }

    let bytes = text.as_bytes();
    let mut i = prefix_len;
    while i < bytes.len() {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }
        if bytes.get(i + 1) == Some(&b'{') {
            i += 2;
            continue;
        }
        let mut j = i + 1;
        while j < bytes.len() && bytes[j] == b' ' {
            j += 1;
        }
        let start = j;
        while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
            j += 1;
        }
        if j > start && !bytes[start].is_ascii_digit() && !is_keyword(&text[start..j]) {
            out.push(Mention {
                name: text[start..j].to_string(),
                called: bytes.get(j) == Some(&b'('),
                span: offsets_to_span(source, base + start, base + j),
            });
        }
        i = j.max(i + 1);
    }
}

/* ===================== Token Runs ===================== */

const KEYWORDS: [&str; 35] = [
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class", "continue",
    "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if", "import", "in",
    "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try", "while", "with",
    "yield",
];

pub(crate) fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

fn is_name_word(word: &str) -> bool {
    word.chars()
        .next()
        .is_some_and(|c| c == '_' || c.is_alphabetic())
        && !is_keyword(word)
}

struct ScannedRun {
    bindings: Vec<String>,
    mentions: Vec<Mention>,
}

fn scan_run(run: Pair<Rule>, source: &SourceText) -> ScannedRun {
    let tokens: Vec<Pair<Rule>> = run.into_inner().collect();
    let mut scan = RunScan::new(source, true);
    scan.tokens(&tokens, true);
    ScannedRun {
        bindings: scan.bindings,
        mentions: scan.mentions,
    }
}

/// Walks unstructured token runs (indented lines, compound headers, subscripts)
/// picking out bound names and read names.
struct RunScan<'s> {
    source: &'s SourceText<'s>,
    record_bindings: bool,
    bindings: Vec<String>,
    mentions: Vec<Mention>,
}

impl<'s> RunScan<'s> {
    fn new(source: &'s SourceText<'s>, record_bindings: bool) -> Self {
        Self {
            source,
            record_bindings,
            bindings: Vec::new(),
            mentions: Vec::new(),
        }
    }

    fn bind(&mut self, name: &str) {
        if self.record_bindings && !self.bindings.iter().any(|b| b == name) {
            self.bindings.push(name.to_string());
        }
    }

    fn bind_all(&mut self, pair: &Pair<Rule>) {
        for word in pair.clone().into_inner().flatten() {
            if word.as_rule() == Rule::word && is_name_word(word.as_str()) {
                self.bind(word.as_str());
            }
        }
    }

    fn tokens(&mut self, tokens: &[Pair<Rule>], top: bool) {
        let is_punct = |i: usize, text: &str| {
            tokens
                .get(i)
                .is_some_and(|t| t.as_rule() == Rule::punct && t.as_str() == text)
        };
        let opens_call = |i: usize| {
            tokens
                .get(i)
                .is_some_and(|t| t.as_rule() == Rule::group && t.as_str().starts_with('('))
        };

        // `a, b = ...` at the start of a run
        let mut start = 0;
        if top {
            let mut names = Vec::new();
            let mut i = 0;
            while let Some(token) = tokens.get(i) {
                if token.as_rule() == Rule::word && is_name_word(token.as_str()) {
                    names.push(token.as_str());
                    i += 1;
                    if is_punct(i, ",") {
                        i += 1;
                        continue;
                    }
                    if is_punct(i, "=") && !is_punct(i + 1, "=") {
                        for name in names {
                            self.bind(name);
                        }
                        start = i + 1;
                    }
                }
                break;
            }
        }

        let mut in_for_target = false;
        let mut i = start;
        while i < tokens.len() {
            let token = &tokens[i];
            let text = match token.as_rule() {
                // `async for` behaves like `for`
                Rule::compound_keyword => token.as_str().split_whitespace().last().unwrap_or(""),
                _ => token.as_str(),
            };
            match token.as_rule() {
                Rule::word | Rule::compound_keyword => match text {
                    "for" => in_for_target = true,
                    "in" if in_for_target => in_for_target = false,
                    "as" | "def" | "class" => {
                        if let Some(next) = tokens.get(i + 1) {
                            if top {
                                match next.as_rule() {
                                    Rule::word if is_name_word(next.as_str()) => self.bind(next.as_str()),
                                    Rule::group => self.bind_all(next),
                                    _ => {}
                                }
                            }
                            if matches!(next.as_rule(), Rule::word) {
                                i += 1;
                            }
                        }
                    }
                    _ if !is_name_word(text) => {}
                    _ if in_for_target => {
                        if top {
                            self.bind(text);
                        }
                    }
                    _ if i > 0 && is_punct(i - 1, ".") => {}
                    _ if is_punct(i + 1, "=") && !is_punct(i + 2, "=") && !top => {}
                    _ => self.mentions.push(Mention {
                        name: text.to_string(),
                        called: opens_call(i + 1),
                        span: pair_to_span(token, self.source),
                    }),
                },
                Rule::group => {
                    if in_for_target {
                        if top {
                            self.bind_all(token);
                        }
                    } else {
                        let inner: Vec<Pair<Rule>> = token.clone().into_inner().collect();
                        let mut nested = RunScan::new(self.source, false);
                        nested.tokens(&inner, false);
                        self.mentions.extend(nested.mentions);
                    }
                }
                Rule::string_lit => fstring_mentions(token, self.source, &mut self.mentions),
                _ => {}
            }
            i += 1;
        }
    }
}
