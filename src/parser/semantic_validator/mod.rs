//! Semantic diagnostics for compiled workflows
//!
//! This module provides an extensible rule-based validation system that runs
//! after a module has been lowered into a graph. It reports things the graph
//! alone cannot show: activations that never became nodes, variables whose
//! dependency could not be tracked, actions nobody declared.
//!
//! A graph that compiled is structurally valid regardless of what the rules
//! say. Warnings and hints are advisory; an error means the graph is not a
//! usable workflow, and the CLI and plan harness treat it as a failure.
//!
//! # Usage
//!
//! ```ignore
//! use orchestrator_core::compiler::{compile_workflow, ParseOptions};
//!
//! let compiled = compile_workflow(source, &ParseOptions::default())?;
//! for diagnostic in &compiled.diagnostics {
//!     eprintln!("{}", diagnostic);
//! }
//! ```
//!
//! # Adding a New Rule
//!
//! 1. Create a new file in `semantic_validator/rules/`
//! 2. Implement `ValidationRule` for your struct
//! 3. Add it to the `Validator::new()` constructor

pub mod rules;

use serde::Serialize;

use crate::compiler::CompileFacts;
use crate::dag::WorkflowDAG;
use crate::types::CapabilityCatalog;

use super::ast::{Module, Span};

// ============================================================================
// Validation Error Types
// ============================================================================

/// A diagnostic produced by semantic analysis.
///
/// Independent of any output format so the CLI and the plan harness can both
/// report it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationError {
    /// The source location of the issue
    pub span: Span,
    /// Human-readable message
    pub message: String,
    /// Severity level
    pub severity: Severity,
    /// Which rule produced this diagnostic
    pub rule_id: &'static str,
}

/// Severity levels for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The workflow almost certainly does not do what was intended
    Error,
    /// Part of the source is not reflected in the graph
    Warning,
    /// Worth a look
    Hint,
}

impl ValidationError {
    pub fn error(span: Span, message: impl Into<String>, rule_id: &'static str) -> Self {
        Self {
            span,
            message: message.into(),
            severity: Severity::Error,
            rule_id,
        }
    }

    pub fn warning(span: Span, message: impl Into<String>, rule_id: &'static str) -> Self {
        Self {
            span,
            message: message.into(),
            severity: Severity::Warning,
            rule_id,
        }
    }

    pub fn hint(span: Span, message: impl Into<String>, rule_id: &'static str) -> Self {
        Self {
            span,
            message: message.into(),
            severity: Severity::Hint,
            rule_id,
        }
    }

    /// Check if this is an error (not a warning or hint)
    pub fn is_error(&self) -> bool {
        matches!(self.severity, Severity::Error)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Hint => "hint",
        })
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at line {}, col {}: {} [{}]",
            self.severity,
            self.span.start_line + 1,
            self.span.start_col + 1,
            self.message,
            self.rule_id
        )
    }
}

impl std::error::Error for ValidationError {}

// ============================================================================
// ValidationRule Trait
// ============================================================================

/// Everything a rule may look at.
pub struct RuleContext<'a> {
    pub module: &'a Module,
    pub source: &'a str,
    pub dag: &'a WorkflowDAG,
    pub catalog: &'a CapabilityCatalog,
    pub facts: &'a CompileFacts,
}

/// Trait that all validation rules must implement.
///
/// Each rule checks one aspect of the compiled workflow and must not depend
/// on other rules' results.
pub trait ValidationRule: Send + Sync {
    /// Unique identifier for this rule (e.g., "unknown-action")
    fn id(&self) -> &'static str;

    /// Human-readable description of what this rule checks
    fn description(&self) -> &'static str;

    /// Run the rule. An empty vector means no issues found.
    fn validate(&self, context: &RuleContext<'_>) -> Vec<ValidationError>;
}

// ============================================================================
// Validator - Runs All Rules
// ============================================================================

/// Runs every registered rule over a compiled workflow.
pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    /// Create a new validator with all built-in rules.
    pub fn new() -> Self {
        Self {
            rules: vec![
                // Errors
                Box::new(rules::EmptyWorkflowRule),
                // Warnings - source the graph does not reflect
                Box::new(rules::UnknownActionRule),
                Box::new(rules::NestedActivationRule),
                Box::new(rules::ValueRebindingRule),
                Box::new(rules::ForwardReferenceRule),
                // Hints
                Box::new(rules::OpaqueReferenceRule),
                Box::new(rules::UnusedOutputRule),
            ],
        }
    }

    /// Run all rules, ordered by source position.
    pub fn validate(&self, context: &RuleContext<'_>) -> Vec<ValidationError> {
        let mut diagnostics: Vec<ValidationError> = self
            .rules
            .iter()
            .flat_map(|rule| rule.validate(context))
            .collect();
        diagnostics.sort_by_key(|d| (d.span.start, d.span.end));
        diagnostics
    }

    /// Registered rules as `(id, description)`.
    pub fn rules(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.rules.iter().map(|r| (r.id(), r.description()))
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests;
