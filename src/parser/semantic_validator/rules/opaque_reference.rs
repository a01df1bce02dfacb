//! Rule: Opaque Reference
//!
//! Reports a hint when a node's output is read inside an argument that is
//! kept as source text. No edge is added for such reads.
//!
//! # Examples
//!
//! ```text
//! hits = web_search("rust")
//! # Hint: 'hits' is used inside an expression; no dependency on 'hits' was recorded
//! generate_summary(hits[0])
//! ```
//!
//! # Notes
//!
//! - Pass the variable directly as an argument to get an edge

use super::super::{RuleContext, ValidationError, ValidationRule};

pub struct OpaqueReferenceRule;

impl ValidationRule for OpaqueReferenceRule {
    fn id(&self) -> &'static str {
        "opaque-reference"
    }

    fn description(&self) -> &'static str {
        "Node outputs used inside expressions are not tracked as dependencies"
    }

    fn validate(&self, context: &RuleContext<'_>) -> Vec<ValidationError> {
        context
            .facts
            .opaque_references
            .iter()
            .map(|reference| {
                ValidationError::hint(
                    reference.span,
                    format!(
                        "'{}' is used inside an expression for parameter '{}' of node '{}'; no dependency on '{}' was recorded",
                        reference.name, reference.parameter, reference.consumer, reference.producer
                    ),
                    self.id(),
                )
            })
            .collect()
    }
}
