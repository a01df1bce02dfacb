//! Rule: Forward Reference
//!
//! Reports a warning when an argument names a variable that is only assigned
//! by a call further down the module. The edge is still added, but the code
//! would fail if it were run top to bottom.
//!
//! # Examples
//!
//! ```text
//! # Warning: 'report' is assigned later in the module
//! send_message("#ops", report)
//! report = generate_summary("weekly")
//! ```

use super::super::{RuleContext, ValidationError, ValidationRule};

pub struct ForwardReferenceRule;

impl ValidationRule for ForwardReferenceRule {
    fn id(&self) -> &'static str {
        "forward-reference"
    }

    fn description(&self) -> &'static str {
        "Arguments should refer to outputs produced earlier in the module"
    }

    fn validate(&self, context: &RuleContext<'_>) -> Vec<ValidationError> {
        context
            .facts
            .forward_references
            .iter()
            .map(|forward| {
                ValidationError::warning(
                    forward.span,
                    format!(
                        "'{}' is assigned later in the module by node '{}'; node '{}' was ordered after it",
                        forward.name, forward.producer, forward.consumer
                    ),
                    self.id(),
                )
            })
            .collect()
    }
}
