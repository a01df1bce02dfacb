//! Tests for the semantic validation system

use super::*;
use crate::compiler::{compile_workflow, ParseOptions};

// ============================================================================
// Helper Functions
// ============================================================================

/// Compile source against the builtin catalog, returning its diagnostics
fn validate(source: &str) -> Vec<ValidationError> {
    validate_with(source, &ParseOptions::default())
}

fn validate_with(source: &str, options: &ParseOptions) -> Vec<ValidationError> {
    compile_workflow(source, options)
        .expect("Compile should succeed")
        .diagnostics
}

/// Check if diagnostics contain a specific rule
fn has_rule(errors: &[ValidationError], rule_id: &str) -> bool {
    errors.iter().any(|e| e.rule_id == rule_id)
}

/// Get diagnostics for a specific rule
fn for_rule<'a>(errors: &'a [ValidationError], rule_id: &str) -> Vec<&'a ValidationError> {
    errors.iter().filter(|e| e.rule_id == rule_id).collect()
}

// ============================================================================
// Clean Workflows
// ============================================================================

#[test]
fn test_clean_pipeline_has_no_diagnostics() {
    let source = r##"
results = web_search("rust async")
summary = generate_summary(results, max_words=100)
send_message("#eng", summary)
"##;

    let errors = validate(source);
    assert!(errors.is_empty(), "unexpected diagnostics: {:?}", errors);
}

// ============================================================================
// Unknown Action Tests
// ============================================================================

#[test]
fn test_unknown_action_reported_at_call() {
    let source = r##"receipt = send_fax("555-0100")
send_message("#ops", receipt)
"##;

    let errors = validate(source);
    let unknown = for_rule(&errors, "unknown-action");
    assert_eq!(unknown.len(), 1);
    assert!(unknown[0].message.contains("'send_fax'"));
    assert_eq!(unknown[0].severity, Severity::Warning);
    assert_eq!(unknown[0].span.location(), (1, 11));
}

#[test]
fn test_unknown_action_accepts_available_nodes() {
    let source = r##"receipt = send_fax("555-0100")
send_message("#ops", receipt)
"##;

    let errors = validate_with(source, &ParseOptions::with_available(["send_fax"]));
    assert!(!has_rule(&errors, "unknown-action"));
}

#[test]
fn test_unknown_action_skipped_for_empty_catalog() {
    let source = "launch_rocket(countdown=10)";

    let options = ParseOptions::with_catalog(crate::types::CapabilityCatalog::empty());
    assert!(!has_rule(&validate_with(source, &options), "unknown-action"));
    assert!(has_rule(&validate(source), "unknown-action"));
}

// ============================================================================
// Nested Activation Tests
// ============================================================================

#[test]
fn test_nested_activation_in_arguments() {
    let source = r##"summary = generate_summary(web_search("rust"))
send_message("#eng", summary)
"##;

    let errors = validate(source);
    let nested = for_rule(&errors, "nested-activation");
    assert_eq!(nested.len(), 1);
    assert!(nested[0].message.contains("'web_search'"));
    assert!(nested[0].message.contains("inside an expression"));
}

#[test]
fn test_nested_activation_inside_block() {
    let source = r##"
urgent = conditional_check("inbox")
if urgent:
    send_message("#ops", "now")
"##;

    let errors = validate(source);
    let nested = for_rule(&errors, "nested-activation");
    assert_eq!(nested.len(), 1);
    assert!(nested[0].message.contains("'send_message'"));
    assert!(nested[0].message.contains("inside a block"));
    assert_eq!(nested[0].span.location(), (4, 5));
}

#[test]
fn test_nested_activation_in_keyword_statement() {
    let source = r##"return send_message("#ops", "done")"##;

    let errors = validate(source);
    let nested = for_rule(&errors, "nested-activation");
    assert_eq!(nested.len(), 1);
    assert!(nested[0].message.contains("in a 'return' statement"));
}

#[test]
fn test_nested_activation_ignores_unrelated_calls() {
    let source = r##"
query = format_query("rust")
hits = web_search(query)
send_message("#eng", hits)
"##;

    // format_query is not a capability, only an unknown action
    let errors = validate(source);
    assert!(!has_rule(&errors, "nested-activation"));
    assert_eq!(for_rule(&errors, "unknown-action").len(), 1);
}

// ============================================================================
// Value Rebinding Tests
// ============================================================================

#[test]
fn test_value_rebinding_reported() {
    let source = r##"results = web_search("rust")
results = []
send_message("#ops", results)
"##;

    let errors = validate(source);
    let rebinding = for_rule(&errors, "value-rebinding");
    assert_eq!(rebinding.len(), 1);
    assert!(rebinding[0].message.contains("'results'"));
    assert_eq!(rebinding[0].span.location(), (2, 1));
    // the overwritten output was never consumed
    assert!(has_rule(&errors, "unused-output"));
}

#[test]
fn test_rebinding_by_call_is_not_reported() {
    let source = r##"draft = draft_email("hello")
draft = generate_summary(draft)
send_email("team@example.com", draft)
"##;

    assert!(!has_rule(&validate(source), "value-rebinding"));
}

// ============================================================================
// Forward Reference Tests
// ============================================================================

#[test]
fn test_forward_reference_reported() {
    let source = r##"send_message("#ops", report)
report = generate_summary("weekly")
"##;

    let errors = validate(source);
    let forward = for_rule(&errors, "forward-reference");
    assert_eq!(forward.len(), 1);
    assert!(forward[0].message.contains("'report'"));
    assert_eq!(forward[0].span.location(), (1, 22));
    // a forward read still counts as a read
    assert!(!has_rule(&errors, "unused-output"));
}

// ============================================================================
// Opaque Reference Tests
// ============================================================================

#[test]
fn test_opaque_reference_is_a_hint() {
    let source = r##"hits = web_search("rust")
generate_summary(hits[0])
"##;

    let errors = validate(source);
    assert_eq!(errors.len(), 1, "unexpected diagnostics: {:?}", errors);
    assert_eq!(errors[0].rule_id, "opaque-reference");
    assert_eq!(errors[0].severity, Severity::Hint);
    assert!(errors[0].message.contains("'hits'"));
    assert!(errors[0].message.contains("parameter '0'"));
}

// ============================================================================
// Unused Output Tests
// ============================================================================

#[test]
fn test_unused_output_reported() {
    let source = r##"draft = generate_summary("weekly")
send_message("#ops", "done")
"##;

    let errors = validate(source);
    let unused = for_rule(&errors, "unused-output");
    assert_eq!(unused.len(), 1);
    assert!(unused[0].message.contains("'draft'"));
    assert_eq!(unused[0].span.location(), (1, 1));
}

#[test]
fn test_unused_output_underscore_exempt() {
    let source = r##"_scratch = web_search("rust")"##;

    assert!(!has_rule(&validate(source), "unused-output"));
}

#[test]
fn test_unused_output_bare_call_not_reported() {
    let source = r##"send_message("#ops", "done")"##;

    assert!(validate(source).is_empty());
}

// ============================================================================
// Empty Workflow Tests
// ============================================================================

#[test]
fn test_empty_workflow_is_an_error() {
    let source = r##"
if ready:
    send_message("#ops", "done")
"##;

    let compiled = compile_workflow(source, &ParseOptions::default()).expect("Compile should succeed");
    assert!(compiled.dag.is_empty());
    assert!(compiled.has_errors());
    let empty = for_rule(&compiled.diagnostics, "empty-workflow");
    assert_eq!(empty.len(), 1);
    assert_eq!(empty[0].severity, Severity::Error);
    assert_eq!(empty[0].span.location(), (2, 1));
    assert!(empty[0].to_string().starts_with("error at line 2, col 1: module defines no workflow nodes"));
}

#[test]
fn test_empty_source_is_an_error() {
    assert!(has_rule(&validate(""), "empty-workflow"));
    assert!(!has_rule(&validate("send_message('#ops', 'done')"), "empty-workflow"));
}

// ============================================================================
// Validator
// ============================================================================

#[test]
fn test_diagnostics_sorted_by_position() {
    let source = r##"send_message("#ops", report)
report = send_fax("weekly")
"##;

    let errors = validate(source);
    let ids: Vec<&str> = errors.iter().map(|e| e.rule_id).collect();
    assert_eq!(ids, vec!["forward-reference", "unknown-action"]);
}

#[test]
fn test_validator_lists_rules() {
    let validator = Validator::new();
    let ids: Vec<&str> = validator.rules().map(|(id, _)| id).collect();
    assert_eq!(
        ids,
        vec![
            "empty-workflow",
            "unknown-action",
            "nested-activation",
            "value-rebinding",
            "forward-reference",
            "opaque-reference",
            "unused-output",
        ]
    );
}

#[test]
fn test_diagnostic_display() {
    let source = r##"receipt = send_fax("555-0100")
send_message("#ops", receipt)
"##;

    let errors = validate(source);
    assert_eq!(
        errors[0].to_string(),
        "warning at line 1, col 11: Node 'receipt' uses 'send_fax', which is not an available capability [unknown-action]"
    );
    assert!(!errors[0].is_error());
}
