//! Rule: Nested Activation
//!
//! Reports a warning when a capability is called somewhere the compiler does
//! not turn into a node: inside another call's arguments, inside an
//! expression, or inside an indented block.
//!
//! # Examples
//!
//! ```text
//! # Warning: 'web_search' is called inside an expression
//! summary = generate_summary(web_search("rust"))
//!
//! # Warning: 'send_message' is called inside a block
//! if urgent:
//!     send_message("#ops", "now")
//! ```
//!
//! # Notes
//!
//! - A name counts as a capability when it is in the catalog or some node
//!   already uses it as its action

use std::collections::HashSet;

use crate::parser::ast::Stmt;

use super::super::{RuleContext, ValidationError, ValidationRule};

pub struct NestedActivationRule;

impl ValidationRule for NestedActivationRule {
    fn id(&self) -> &'static str {
        "nested-activation"
    }

    fn description(&self) -> &'static str {
        "Capabilities should be called as top-level statements"
    }

    fn validate(&self, context: &RuleContext<'_>) -> Vec<ValidationError> {
        let actions: HashSet<&str> = context
            .dag
            .nodes()
            .values()
            .map(|node| node.action.as_str())
            .collect();
        // a node's own callee starts exactly where its call does
        let node_calls: HashSet<usize> = context.facts.origins.values().map(|span| span.start).collect();

        let mut errors = Vec::new();
        for stmt in &context.module.body {
            let place = match stmt {
                Stmt::Compound { .. } => "inside a block".to_string(),
                Stmt::Keyword { keyword, .. } => format!("in a '{}' statement", keyword),
                _ => "inside an expression".to_string(),
            };
            for mention in stmt.mentions() {
                if !mention.called || node_calls.contains(&mention.span.start) {
                    continue;
                }
                let name = mention.name.as_str();
                if context.catalog.contains(name) || actions.contains(name) {
                    errors.push(ValidationError::warning(
                        mention.span,
                        format!(
                            "'{}' is called {} and will not become a workflow node",
                            name, place
                        ),
                        self.id(),
                    ));
                }
            }
        }
        errors
    }
}
