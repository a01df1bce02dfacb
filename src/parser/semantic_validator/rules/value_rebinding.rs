//! Rule: Value Rebinding
//!
//! Reports a warning when a variable holding a node's output is overwritten
//! by something other than a call. Later uses of the variable no longer
//! depend on the node.
//!
//! # Examples
//!
//! ```text
//! results = web_search("rust")
//! # Warning: 'results' held the output of node 'results'
//! results = []
//! ```

use super::super::{RuleContext, ValidationError, ValidationRule};

pub struct ValueRebindingRule;

impl ValidationRule for ValueRebindingRule {
    fn id(&self) -> &'static str {
        "value-rebinding"
    }

    fn description(&self) -> &'static str {
        "Node outputs should not be overwritten by plain values"
    }

    fn validate(&self, context: &RuleContext<'_>) -> Vec<ValidationError> {
        context
            .facts
            .rebindings
            .iter()
            .map(|rebinding| {
                ValidationError::warning(
                    rebinding.span,
                    format!(
                        "'{}' held the output of node '{}' and is reassigned here; later uses will not depend on it",
                        rebinding.name, rebinding.node_id
                    ),
                    self.id(),
                )
            })
            .collect()
    }
}
