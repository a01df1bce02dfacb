//! Rule: Unknown Action
//!
//! Reports a warning when a node's action is not in the capability catalog.
//!
//! # Examples
//!
//! ```text
//! # Warning: 'send_fax' is not an available capability
//! receipt = send_fax("555-0100", body="hello")
//! ```
//!
//! # Notes
//!
//! - An empty catalog disables the rule

use super::super::{RuleContext, ValidationError, ValidationRule};

pub struct UnknownActionRule;

impl ValidationRule for UnknownActionRule {
    fn id(&self) -> &'static str {
        "unknown-action"
    }

    fn description(&self) -> &'static str {
        "Node actions should be available capabilities"
    }

    fn validate(&self, context: &RuleContext<'_>) -> Vec<ValidationError> {
        if context.catalog.is_empty() {
            return Vec::new();
        }

        context
            .dag
            .nodes()
            .values()
            .filter(|node| !context.catalog.contains(node.action.as_str()))
            .map(|node| {
                let span = context.facts.origins.get(&node.id).copied().unwrap_or_default();
                ValidationError::warning(
                    span,
                    format!(
                        "Node '{}' uses '{}', which is not an available capability",
                        node.id, node.action
                    ),
                    self.id(),
                )
            })
            .collect()
    }
}
