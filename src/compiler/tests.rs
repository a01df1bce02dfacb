use super::*;
use crate::types::Capability;

fn compile(source: &str) -> WorkflowDAG {
    parse_workflow_code(source).expect("Compile should succeed")
}

fn compile_err(source: &str) -> WorkflowError {
    parse_workflow_code(source).expect_err("Compile should fail")
}

fn param<'a>(dag: &'a WorkflowDAG, id: &str, key: ParamKey) -> &'a ParamValue {
    &dag.node(id).expect("node exists").parameters[&key]
}

fn edges(dag: &WorkflowDAG) -> Vec<(&str, &str)> {
    dag.edges().iter().map(|(a, b)| (a.as_str(), b.as_str())).collect()
}

// ============================================================================
// Activation Calls
// ============================================================================

#[test]
fn test_reference_becomes_edge() {
    let dag = compile(
        r##"
results = web_search("rust")
summary = generate_summary(results, max_words=100)
"##,
    );

    assert_eq!(dag.len(), 2);
    assert_eq!(dag.node("results").unwrap().action, Capability::WebSearch);
    assert_eq!(
        param(&dag, "summary", ParamKey::Positional(0)),
        &ParamValue::reference("results")
    );
    assert_eq!(param(&dag, "summary", ParamKey::keyword("max_words")), &ParamValue::Int(100));
    assert_eq!(edges(&dag), vec![("results", "summary")]);
    assert_eq!(dag.topological_order().unwrap(), vec!["results", "summary"]);
}

#[test]
fn test_bare_call_gets_statement_id() {
    let dag = compile("action1(1, 2)");

    let node = dag.node("_stmt_0").expect("node exists");
    assert_eq!(node.action, Capability::Other("action1".into()));
    let values: Vec<&ParamValue> = node.parameters.values().collect();
    assert_eq!(values, vec![&ParamValue::Int(1), &ParamValue::Int(2)]);
    assert!(dag.edges().is_empty());
}

#[test]
fn test_statement_index_counts_every_statement() {
    let dag = compile("import os\nlimit = 5\nsend_message('#ops', 'a'); send_message('#ops', 'b')\n");
    let ids: Vec<&str> = dag.nodes().keys().map(String::as_str).collect();
    assert_eq!(ids, vec!["_stmt_2", "_stmt_3"]);
}

#[test]
fn test_parameters_keep_written_order() {
    let dag = compile(
        r##"
note = "hello"
send_message("#ops", body=note, urgent=False, retries=-1)
"##,
    );

    let node = dag.node("_stmt_1").unwrap();
    let keys: Vec<String> = node.parameters.keys().map(ToString::to_string).collect();
    assert_eq!(keys, vec!["0", "body", "urgent", "retries"]);
    // a plain variable is kept as written, with no edge
    assert_eq!(node.parameters[&ParamKey::keyword("body")], ParamValue::Expr("note".into()));
    assert_eq!(
        node.describe(),
        "send_message('#ops', body=note, urgent=False, retries=-1)"
    );
    assert!(dag.edges().is_empty());
}

#[test]
fn test_repeated_reference_adds_one_edge() {
    let dag = compile("a = web_search('x')\ncombine(a, other=a)\n");
    assert_eq!(edges(&dag), vec![("a", "_stmt_1")]);
    assert_eq!(
        param(&dag, "_stmt_1", ParamKey::keyword("other")),
        &ParamValue::reference("a")
    );
}

#[test]
fn test_complex_argument_kept_as_source() {
    let dag = compile("hits = web_search('rust')\ngenerate_summary(hits[0], extra=' '.join(tags))\n");

    assert_eq!(
        param(&dag, "_stmt_1", ParamKey::Positional(0)),
        &ParamValue::Expr("hits[0]".into())
    );
    assert_eq!(
        param(&dag, "_stmt_1", ParamKey::keyword("extra")),
        &ParamValue::Expr("' '.join(tags)".into())
    );
    assert!(dag.edges().is_empty());
}

// ============================================================================
// Binding Rules
// ============================================================================

#[test]
fn test_rebinding_by_call_suffixes_id() {
    let dag = compile(
        r##"
draft = draft_email("hi")
draft = generate_summary(draft)
send_email("team@example.com", draft)
"##,
    );

    let ids: Vec<&str> = dag.nodes().keys().map(String::as_str).collect();
    assert_eq!(ids, vec!["draft", "draft_2", "_stmt_2"]);
    assert_eq!(
        param(&dag, "draft_2", ParamKey::Positional(0)),
        &ParamValue::reference("draft")
    );
    assert_eq!(edges(&dag), vec![("draft", "draft_2"), ("draft_2", "_stmt_2")]);
}

#[test]
fn test_value_rebinding_drops_dependency() {
    let dag = compile(
        r##"
results = web_search("rust")
results = []
send_message("#ops", results)
"##,
    );

    assert_eq!(
        param(&dag, "_stmt_2", ParamKey::Positional(1)),
        &ParamValue::Expr("results".into())
    );
    assert!(dag.edges().is_empty());
}

#[test]
fn test_chained_and_tuple_targets() {
    let dag = compile(
        r##"
a = b = web_search("x")
c, d = doc_search("y")
send_message(b, d)
"##,
    );

    assert!(dag.contains("a"));
    assert!(dag.contains("_stmt_1"));
    assert_eq!(edges(&dag), vec![("a", "_stmt_2"), ("_stmt_1", "_stmt_2")]);
}

#[test]
fn test_attribute_target_uses_statement_id() {
    let dag = compile("state.result = web_search('x')\n");
    assert!(dag.contains("_stmt_0"));
}

#[test]
fn test_undefined_self_reference() {
    match compile_err("x = generate_summary(x)") {
        WorkflowError::Parse(ParseError::UndefinedReference { name, span }) => {
            assert_eq!(name, "x");
            assert_eq!(span.location(), (1, 22));
        }
        other => panic!("expected undefined reference, got {:?}", other),
    }
}

#[test]
fn test_self_reference_to_earlier_binding() {
    let dag = compile("x = web_search('a')\nx = generate_summary(x)\n");
    assert_eq!(edges(&dag), vec![("x", "x_2")]);
}

#[test]
fn test_unknown_name_reported_with_location() {
    let err = compile_err(r##"send_message("#ops", ghost)"##);
    assert_eq!(err.to_string(), "unknown node 'ghost' at line 1, column 22");
    assert!(matches!(err, WorkflowError::UnknownNode { ref id, span: Some(_) } if id == "ghost"));
}

#[test]
fn test_known_non_node_names_kept_as_source() {
    let dag = compile(
        r##"
import json
send_message("#ops", json)
send_message("#ops", len)
send_message("#ops", later)
later = 5
"##,
    );

    for id in ["_stmt_1", "_stmt_2", "_stmt_3"] {
        assert!(matches!(
            param(&dag, id, ParamKey::Positional(1)),
            ParamValue::Expr(_)
        ));
    }
}

#[test]
fn test_star_import_hides_unknown_names() {
    let dag = compile("from helpers import *\nsend_message('#ops', anything)\n");
    assert_eq!(
        param(&dag, "_stmt_1", ParamKey::Positional(1)),
        &ParamValue::Expr("anything".into())
    );
}

#[test]
fn test_forward_reference_orders_producer_first() {
    let dag = compile(
        r##"
send_message("#ops", report)
report = generate_summary("weekly")
"##,
    );

    assert_eq!(edges(&dag), vec![("report", "_stmt_0")]);
    assert_eq!(dag.topological_order().unwrap(), vec!["report", "_stmt_0"]);
}

#[test]
fn test_forward_references_forming_cycle() {
    let err = compile_err(
        r##"
a = web_search(b)
b = generate_summary(a)
"##,
    );
    assert_eq!(
        err,
        WorkflowError::Cycle {
            path: vec!["a".into(), "b".into(), "a".into()]
        }
    );
}

#[test]
fn test_nested_and_augmented_calls_are_not_nodes() {
    let dag = compile(
        r##"
ready = True
total = 0
if ready:
    send_message("#ops", "x")
total += web_search("x")
"##,
    );
    assert!(dag.is_empty());
}

#[test]
fn test_empty_source() {
    assert!(compile("").is_empty());
    assert!(compile("# nothing to do\n\n").is_empty());
}

#[test]
fn test_syntax_error_surfaces_as_parse_error() {
    let err = compile_err("x = web_search(\"unclosed\"\n");
    assert!(matches!(err, WorkflowError::Parse(ParseError::Syntax { .. })));
    assert!(err.span().is_some());
}

#[test]
fn test_function_locals_do_not_rebind_module_names() {
    let dag = compile(
        r##"
summary = generate_summary(text="x")
def helper():
    summary = "local"
    return summary
send_message(body=summary)
"##,
    );

    assert_eq!(
        param(&dag, "_stmt_2", ParamKey::keyword("body")),
        &ParamValue::reference("summary")
    );
    assert_eq!(edges(&dag), vec![("summary", "_stmt_2")]);
}

#[test]
fn test_block_assignments_still_rebind() {
    let dag = compile(
        r##"
summary = generate_summary(text="x")
if ready:
    summary = "fallback"
send_message(body=summary)
"##,
    );

    assert!(matches!(
        param(&dag, "_stmt_2", ParamKey::keyword("body")),
        ParamValue::Expr(_)
    ));
    assert!(dag.edges().is_empty());
}

#[test]
fn test_large_module_compiles_in_bounded_time() {
    let mut source = String::new();
    for i in 0..2000 {
        source.push_str(&format!(
            "n{i} = send_message(\"recipient number {i}\", body=\"status update for the weekly report\", channel=\"chat\")\n"
        ));
    }

    let started = std::time::Instant::now();
    let dag = compile(&source);
    assert!(started.elapsed() < std::time::Duration::from_secs(15));
    assert_eq!(dag.len(), 2000);
    assert_eq!(dag.nodes().keys().last().map(String::as_str), Some("n1999"));
}

// ============================================================================
// Construction Dialect
// ============================================================================

#[test]
fn test_explicit_construction() {
    let dag = compile(
        r##"
dag = WorkflowDAG()
fetch = WorkflowNode("fetch", "web_search", {"query": "status"})
dag.add_node(fetch)
dag.add_node(WorkflowNode("notify", "send_message", {"channel": "#ops"}))
dag.add_edge("fetch", "notify")
"##,
    );

    let ids: Vec<&str> = dag.nodes().keys().map(String::as_str).collect();
    assert_eq!(ids, vec!["fetch", "notify"]);
    assert_eq!(
        param(&dag, "fetch", ParamKey::keyword("query")),
        &ParamValue::str("status")
    );
    assert_eq!(edges(&dag), vec![("fetch", "notify")]);
}

#[test]
fn test_construction_keywords_and_variable_edges() {
    let dag = compile(
        r##"
graph = WorkflowDAG()
search = WorkflowNode(action="web_search")
summary = WorkflowNode(name="summary", action="generate_summary", params={"text": "x", "limit": 3})
graph.add_node(search)
graph.add_node(node=summary)
graph.add_edge(search, summary)
"##,
    );

    assert_eq!(dag.node("search").unwrap().action, Capability::WebSearch);
    assert_eq!(param(&dag, "summary", ParamKey::keyword("limit")), &ParamValue::Int(3));
    assert_eq!(edges(&dag), vec![("search", "summary")]);
}

#[test]
fn test_construction_duplicate_id() {
    let err = compile_err(
        r##"
dag = WorkflowDAG()
dag.add_node(WorkflowNode("x", "web_search"))
dag.add_node(WorkflowNode("x", "doc_search"))
"##,
    );
    assert_eq!(err, WorkflowError::DuplicateNode { id: "x".into() });
}

#[test]
fn test_construction_edge_to_missing_node() {
    let err = compile_err(
        r##"
dag = WorkflowDAG()
dag.add_node(WorkflowNode("fetch", "web_search"))
dag.add_edge("fetch", "missing")
"##,
    );
    assert!(matches!(err, WorkflowError::UnknownNode { ref id, span: Some(_) } if id == "missing"));
}

#[test]
fn test_construction_params_must_be_literal() {
    let err = compile_err(
        r##"
dag = WorkflowDAG()
dag.add_node(WorkflowNode("fetch", "web_search", {"query": topic}))
"##,
    );
    assert!(matches!(err, WorkflowError::Parse(ParseError::Build { .. })));
    assert!(err.to_string().contains("must be a literal value"));
}

#[test]
fn test_derived_ids_avoid_declared_ids() {
    let dag = compile(
        r##"
dag = WorkflowDAG()
dag.add_node(WorkflowNode("summary", "web_search"))
summary = generate_summary("x")
"##,
    );
    let ids: Vec<&str> = dag.nodes().keys().map(String::as_str).collect();
    assert_eq!(ids, vec!["summary", "summary_2"]);
}

// ============================================================================
// Compile With Diagnostics
// ============================================================================

#[test]
fn test_compile_records_origins_and_facts() {
    let source = "hits = web_search('rust')\nsend_message('#ops', hits)\n";
    let compiled = compile_workflow(source, &ParseOptions::default()).unwrap();

    assert!(!compiled.has_errors());
    assert!(compiled.diagnostics.is_empty());
    let origin = compiled.origin("hits").unwrap();
    assert_eq!(origin.slice(source), "web_search('rust')");
    assert_eq!(compiled.facts.bindings.len(), 1);
    assert!(compiled.facts.bindings[0].read);
}

#[test]
fn test_compile_with_available_nodes() {
    let source = "receipt = send_fax('555')\nsend_message('#ops', receipt)\n";

    let strict = compile_workflow(source, &ParseOptions::default()).unwrap();
    assert_eq!(strict.diagnostics.len(), 1);

    let relaxed = compile_workflow(source, &ParseOptions::with_available(["send_fax"])).unwrap();
    assert!(relaxed.diagnostics.is_empty());
    assert_eq!(relaxed.dag, strict.dag);
}
