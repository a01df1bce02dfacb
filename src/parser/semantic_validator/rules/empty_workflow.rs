//! Rule: Empty Workflow
//!
//! Reports an error when the module compiles to a graph with no nodes. The
//! code parsed, but it does not describe any workflow.
//!
//! # Examples
//!
//! ```text
//! # Error: no workflow nodes
//! if ready:
//!     send_message("#ops", "done")
//! ```

use super::super::{RuleContext, ValidationError, ValidationRule};

pub struct EmptyWorkflowRule;

impl ValidationRule for EmptyWorkflowRule {
    fn id(&self) -> &'static str {
        "empty-workflow"
    }

    fn description(&self) -> &'static str {
        "A workflow module must define at least one node"
    }

    fn validate(&self, context: &RuleContext<'_>) -> Vec<ValidationError> {
        if !context.dag.is_empty() {
            return Vec::new();
        }
        let span = context
            .module
            .body
            .first()
            .map_or(context.module.span, |stmt| stmt.span());
        vec![ValidationError::error(
            span,
            "module defines no workflow nodes; activation calls must be top-level statements",
            self.id(),
        )]
    }
}
