//! Error taxonomy for graph construction and compilation

use thiserror::Error;

use crate::parser::ast::Span;
use crate::parser::{at, ParseError};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// An edge or reference names a node the graph does not contain
    #[error("unknown node '{id}'{}", at(.span))]
    UnknownNode { id: String, span: Option<Span> },

    #[error("duplicate node '{id}'")]
    DuplicateNode { id: String },

    /// Adding an edge would close a cycle; `path` starts and ends at the same node
    #[error("cycle detected: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("plan contains no workflow code")]
    EmptyPlan,
}

impl WorkflowError {
    pub fn unknown_node(id: impl Into<String>) -> Self {
        WorkflowError::UnknownNode {
            id: id.into(),
            span: None,
        }
    }

    /// Source location, when the error came from compiling source text.
    pub fn span(&self) -> Option<Span> {
        match self {
            WorkflowError::Parse(err) => err.span(),
            WorkflowError::UnknownNode { span, .. } => *span,
            _ => None,
        }
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
