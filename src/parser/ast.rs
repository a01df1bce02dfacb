//! Syntax tree for generated workflow modules
//!
//! Only the shapes the compiler reasons about are modelled structurally.
//! Everything else is an `Expr::Opaque` that remembers where it was written
//! and which names it mentions.

use serde::{Deserialize, Serialize};

/// Source location span for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Span {
    /// Start byte offset
    pub start: usize,
    /// End byte offset
    pub end: usize,
    /// Start line (0-indexed)
    pub start_line: usize,
    /// Start column (0-indexed)
    pub start_col: usize,
    /// End line (0-indexed)
    pub end_line: usize,
    /// End column (0-indexed)
    pub end_col: usize,
}

impl Span {
    pub fn new(
        start: usize,
        end: usize,
        start_line: usize,
        start_col: usize,
        end_line: usize,
        end_col: usize,
    ) -> Self {
        Self {
            start,
            end,
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }

    /// Create a span that covers both self and other
    pub fn merge(&self, other: &Span) -> Span {
        let (start, start_line, start_col) = if self.start <= other.start {
            (self.start, self.start_line, self.start_col)
        } else {
            (other.start, other.start_line, other.start_col)
        };
        let (end, end_line, end_col) = if self.end >= other.end {
            (self.end, self.end_line, self.end_col)
        } else {
            (other.end, other.end_line, other.end_col)
        };
        Span::new(start, end, start_line, start_col, end_line, end_col)
    }

    /// 1-indexed `(line, column)` of the start, for messages.
    pub fn location(&self) -> (usize, usize) {
        (self.start_line + 1, self.start_col + 1)
    }

    /// The source text this span covers.
    pub fn slice<'a>(&self, source: &'a str) -> &'a str {
        source.get(self.start..self.end).unwrap_or("")
    }
}

fn is_default_span(span: &Span) -> bool {
    *span == Span::default()
}

/* ===================== Module ===================== */

/// A parsed module: top-level statements in source order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub body: Vec<Stmt>,
    #[serde(default, skip_serializing_if = "is_default_span")]
    pub span: Span,
}

/// A bare name written somewhere the compiler does not interpret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    pub name: String,
    /// The name is immediately called, e.g. `send_email(...)`.
    pub called: bool,
    #[serde(default, skip_serializing_if = "is_default_span")]
    pub span: Span,
}

/// One line (or bracketed run of lines) inside an indented block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedLine {
    /// Names assigned by a simple `a = ...` / `a, b = ...` line.
    pub bindings: Vec<String>,
    pub mentions: Vec<Mention>,
    #[serde(default, skip_serializing_if = "is_default_span")]
    pub span: Span,
}

/* ===================== Statements ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Stmt {
    /// `a = b = value`
    Assign {
        targets: Vec<Expr>,
        value: Expr,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    /// `a += value`
    AugAssign {
        target: Expr,
        op: String,
        value: Expr,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    /// `a: T` or `a: T = value`
    AnnAssign {
        target: Expr,
        annotation: Expr,
        value: Option<Expr>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    /// A bare expression statement
    Expr {
        value: Expr,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    /// `import a.b as c` / `from m import x`; `bindings` are the bound names.
    Import {
        bindings: Vec<String>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    /// `return`, `del`, `assert`, `raise`, `pass`, ...
    Keyword {
        keyword: String,
        mentions: Vec<Mention>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    /// A compound statement with all of its clauses and its indented body.
    Compound {
        /// Clause keywords in order, e.g. `["if", "elif", "else"]`.
        clauses: Vec<String>,
        /// Names the header binds (`def f`, `for x in`, `with ... as y`).
        bindings: Vec<String>,
        /// Names written in headers, decorators and inline bodies.
        mentions: Vec<Mention>,
        body: Vec<NestedLine>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Assign { span, .. }
            | Stmt::AugAssign { span, .. }
            | Stmt::AnnAssign { span, .. }
            | Stmt::Expr { span, .. }
            | Stmt::Import { span, .. }
            | Stmt::Keyword { span, .. }
            | Stmt::Compound { span, .. } => *span,
        }
    }

    /// The call this statement's value is, if it is exactly one call.
    pub fn value_call(&self) -> Option<&Expr> {
        let value = match self {
            Stmt::Assign { value, .. } | Stmt::Expr { value, .. } => value,
            Stmt::AnnAssign { value: Some(value), .. } => value,
            _ => return None,
        };
        matches!(value, Expr::Call { .. }).then_some(value)
    }

    /// Every name this statement binds at module level.
    pub fn bound_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        match self {
            Stmt::Assign { targets, .. } => {
                for target in targets {
                    target.collect_target_names(&mut names);
                }
            }
            Stmt::AugAssign { target, .. } | Stmt::AnnAssign { target, .. } => {
                target.collect_target_names(&mut names);
            }
            Stmt::Import { bindings, .. } => names.extend(bindings.iter().cloned()),
            Stmt::Compound {
                clauses, bindings, body, ..
            } => {
                names.extend(bindings.iter().cloned());
                // a def or class body assigns in its own namespace
                let scoped = clauses
                    .first()
                    .is_some_and(|clause| opens_scope(clause.trim_start_matches("async ")));
                if !scoped {
                    for line in body {
                        names.extend(line.bindings.iter().cloned());
                    }
                }
            }
            Stmt::Expr { .. } | Stmt::Keyword { .. } => {}
        }
        names
    }

    /// Names this statement reads, for usage tracking.
    pub fn mentions(&self) -> Vec<Mention> {
        let mut out = Vec::new();
        match self {
            Stmt::Assign { targets, value, .. } => {
                for target in targets {
                    target.collect_target_reads(&mut out);
                }
                value.collect_mentions(&mut out);
            }
            Stmt::AugAssign { target, value, .. } => {
                target.collect_mentions(&mut out);
                value.collect_mentions(&mut out);
            }
            Stmt::AnnAssign {
                target,
                annotation,
                value,
                ..
            } => {
                target.collect_target_reads(&mut out);
                annotation.collect_mentions(&mut out);
                if let Some(value) = value {
                    value.collect_mentions(&mut out);
                }
            }
            Stmt::Expr { value, .. } => value.collect_mentions(&mut out),
            Stmt::Import { .. } => {}
            Stmt::Keyword { mentions, .. } => out.extend(mentions.iter().cloned()),
            Stmt::Compound { mentions, body, .. } => {
                out.extend(mentions.iter().cloned());
                for line in body {
                    out.extend(line.mentions.iter().cloned());
                }
            }
        }
        out
    }
}

/// `def` and `class` bodies bind names locally, never at module level.
pub fn opens_scope(keyword: &str) -> bool {
    keyword == "def" || keyword == "class"
}

/* ===================== Expressions ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Expr {
    Name {
        id: String,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Str {
        value: String,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Int {
        value: i64,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Float {
        value: f64,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Bool {
        value: bool,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    None {
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Tuple {
        elts: Vec<Expr>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    /// Dict display without unpacking or comprehension.
    Dict {
        entries: Vec<(Expr, Expr)>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Argument>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    /// `*value` in a target or display
    Starred {
        value: Box<Expr>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    /// Anything else: operators, lambdas, comprehensions, f-strings,
    /// subscripts, list and set displays.
    Opaque {
        mentions: Vec<Mention>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
}

/// A call argument in written order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    /// `Some(name)` for `name=value`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    pub value: Expr,
    #[serde(default, skip_serializing_if = "is_default_span")]
    pub span: Span,
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Name { span, .. }
            | Expr::Str { span, .. }
            | Expr::Int { span, .. }
            | Expr::Float { span, .. }
            | Expr::Bool { span, .. }
            | Expr::None { span }
            | Expr::Tuple { span, .. }
            | Expr::Dict { span, .. }
            | Expr::Call { span, .. }
            | Expr::Attribute { span, .. }
            | Expr::Starred { span, .. }
            | Expr::Opaque { span, .. } => *span,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Expr::Name { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Callee name for `name(...)` calls.
    pub fn callee_name(&self) -> Option<&str> {
        match self {
            Expr::Call { func, .. } => func.as_name(),
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Expr::Str { .. } | Expr::Int { .. } | Expr::Float { .. } | Expr::Bool { .. } | Expr::None { .. }
        )
    }

    /// Every bare name read by this expression, in source order.
    pub fn mentions(&self) -> Vec<Mention> {
        let mut out = Vec::new();
        self.collect_mentions(&mut out);
        out
    }

    pub(crate) fn collect_mentions(&self, out: &mut Vec<Mention>) {
        match self {
            Expr::Name { id, span } => out.push(Mention {
                name: id.clone(),
                called: false,
                span: *span,
            }),
            Expr::Str { .. }
            | Expr::Int { .. }
            | Expr::Float { .. }
            | Expr::Bool { .. }
            | Expr::None { .. } => {}
            Expr::Tuple { elts, .. } => {
                for elt in elts {
                    elt.collect_mentions(out);
                }
            }
            Expr::Dict { entries, .. } => {
                for (key, value) in entries {
                    key.collect_mentions(out);
                    value.collect_mentions(out);
                }
            }
            Expr::Call { func, args, .. } => {
                match func.as_ref() {
                    Expr::Name { id, span } => out.push(Mention {
                        name: id.clone(),
                        called: true,
                        span: *span,
                    }),
                    other => other.collect_mentions(out),
                }
                for arg in args {
                    arg.value.collect_mentions(out);
                }
            }
            Expr::Attribute { value, .. } | Expr::Starred { value, .. } => value.collect_mentions(out),
            Expr::Opaque { mentions, .. } => out.extend(mentions.iter().cloned()),
        }
    }

    fn collect_target_names(&self, names: &mut Vec<String>) {
        match self {
            Expr::Name { id, .. } => names.push(id.clone()),
            Expr::Tuple { elts, .. } => {
                for elt in elts {
                    elt.collect_target_names(names);
                }
            }
            Expr::Starred { value, .. } => value.collect_target_names(names),
            _ => {}
        }
    }

    /// Names read while assigning to this target, e.g. `obj` in `obj.attr = 1`.
    fn collect_target_reads(&self, out: &mut Vec<Mention>) {
        match self {
            Expr::Name { .. } => {}
            Expr::Tuple { elts, .. } => {
                for elt in elts {
                    elt.collect_target_reads(out);
                }
            }
            Expr::Starred { value, .. } => value.collect_target_reads(out),
            other => other.collect_mentions(out),
        }
    }
}
