//! Rule: Unused Output
//!
//! Reports a hint when a node's output is assigned to a variable that is
//! never read while it holds that output.
//!
//! # Examples
//!
//! ```text
//! # Hint: 'draft' is never used
//! draft = generate_summary("weekly")
//! send_message("#ops", "done")
//! ```
//!
//! # Notes
//!
//! - Variables starting with `_` are exempt (convention for intentionally unused)
//! - Bare calls like `send_message(...)` bind nothing and are never reported

use super::super::{RuleContext, ValidationError, ValidationRule};

pub struct UnusedOutputRule;

impl ValidationRule for UnusedOutputRule {
    fn id(&self) -> &'static str {
        "unused-output"
    }

    fn description(&self) -> &'static str {
        "Node outputs assigned to a variable should be used"
    }

    fn validate(&self, context: &RuleContext<'_>) -> Vec<ValidationError> {
        context
            .facts
            .bindings
            .iter()
            .filter(|binding| !binding.read && !binding.name.starts_with('_'))
            .map(|binding| {
                ValidationError::hint(
                    binding.span,
                    format!(
                        "'{}' receives the output of node '{}' but is never used",
                        binding.name, binding.node_id
                    ),
                    self.id(),
                )
            })
            .collect()
    }
}
