//! Explicit graph construction written as code
//!
//! ```text
//! dag = WorkflowDAG()
//! fetch = WorkflowNode("fetch", "web_search", {"query": "status"})
//! dag.add_node(fetch)
//! dag.add_node(WorkflowNode("notify", "send_message", {"channel": "#ops"}))
//! dag.add_edge("fetch", "notify")
//! ```
//!
//! Node declarations are literal-only: names, actions and parameter values
//! must be written as literals so they can be read without evaluation.

use std::collections::{HashMap, HashSet};

use crate::error::WorkflowResult;
use crate::parser::ast::{Argument, Expr, Module, Span};
use crate::parser::ParseError;
use crate::types::{ParamKey, ParamValue, Parameters, WorkflowNode};

pub(super) const GRAPH_CONSTRUCTOR: &str = "WorkflowDAG";
pub(super) const NODE_CONSTRUCTOR: &str = "WorkflowNode";

/// Graph handles and node declarations found before lowering starts.
pub(super) struct Construction {
    handles: HashSet<String>,
    /// statement index -> node declared by a `WorkflowNode(...)` call in it
    declarations: HashMap<usize, WorkflowNode>,
}

impl Construction {
    pub(super) fn is_handle(&self, name: &str) -> bool {
        self.handles.contains(name)
    }

    pub(super) fn declaration(&self, index: usize) -> Option<&WorkflowNode> {
        self.declarations.get(&index)
    }

    /// Ids explicitly chosen by declarations; derived ids must avoid them.
    pub(super) fn reserved_ids(&self) -> HashSet<String> {
        self.declarations.values().map(|node| node.id.clone()).collect()
    }
}

pub(super) fn scan(module: &Module, source: &str) -> WorkflowResult<Construction> {
    let mut handles = HashSet::new();
    for stmt in &module.body {
        if stmt.value_call().and_then(Expr::callee_name) == Some(GRAPH_CONSTRUCTOR) {
            handles.extend(stmt.bound_names());
        }
    }

    let mut declarations = HashMap::new();
    for (index, stmt) in module.body.iter().enumerate() {
        let Some(call) = stmt.value_call() else {
            continue;
        };
        if call.callee_name() == Some(NODE_CONSTRUCTOR) {
            let default_name = stmt.bound_names().into_iter().next();
            declarations.insert(index, node_from_call(call, default_name, source)?);
            continue;
        }

        let Expr::Call { func, args, .. } = call else {
            continue;
        };
        let Expr::Attribute { value, attr, .. } = func.as_ref() else {
            continue;
        };
        let on_handle = value.as_name().is_some_and(|name| handles.contains(name));
        if attr == "add_node" && on_handle {
            if let Some(arg) = node_argument(args) {
                if arg.value.callee_name() == Some(NODE_CONSTRUCTOR) {
                    declarations.insert(index, node_from_call(&arg.value, None, source)?);
                }
            }
        }
    }

    Ok(Construction { handles, declarations })
}

/// The node passed to `add_node`: first positional argument or `node=`.
pub(super) fn node_argument(args: &[Argument]) -> Option<&Argument> {
    args.iter()
        .find(|a| a.keyword.is_none() || a.keyword.as_deref() == Some("node"))
}

enum Field {
    Name,
    Action,
    Params,
}

/// Build a node from `WorkflowNode(name, action, params)`.
///
/// A missing name falls back to `default_name` (the assigned variable) and a
/// missing action falls back to the name.
fn node_from_call(call: &Expr, default_name: Option<String>, source: &str) -> WorkflowResult<WorkflowNode> {
    let Expr::Call { args, span, .. } = call else {
        return Err(ParseError::build("expected a WorkflowNode call", Some(call.span())).into());
    };

    let mut name = None;
    let mut action = None;
    let mut parameters = Parameters::new();
    let mut position = 0;

    for arg in args {
        let field = match arg.keyword.as_deref() {
            None => {
                position += 1;
                match position {
                    1 => Field::Name,
                    2 => Field::Action,
                    3 => Field::Params,
                    _ => {
                        return Err(ParseError::build(
                            "WorkflowNode takes at most 3 positional arguments",
                            Some(arg.span),
                        )
                        .into())
                    }
                }
            }
            Some("name") => Field::Name,
            Some("action") => Field::Action,
            Some("params") => Field::Params,
            Some(other) => {
                return Err(ParseError::build(
                    format!("unexpected WorkflowNode argument '{}'", other),
                    Some(arg.span),
                )
                .into())
            }
        };
        match field {
            Field::Name => name = Some(literal_text(&arg.value, "node name")?),
            Field::Action => action = Some(literal_text(&arg.value, "node action")?),
            Field::Params => parameters = literal_params(&arg.value, source)?,
        }
    }

    let name = name.or(default_name);
    let action = action.or_else(|| name.clone());
    match (name, action) {
        (Some(name), Some(action)) => Ok(WorkflowNode::new(name, action, parameters)),
        (name, _) => {
            let missing = if name.is_none() { "name, action" } else { "action" };
            Err(ParseError::build(
                format!("WorkflowNode requires values for: {}", missing),
                Some(*span),
            )
            .into())
        }
    }
}

fn literal_text(expr: &Expr, label: &str) -> WorkflowResult<String> {
    match expr {
        Expr::Str { value, .. } => Ok(value.clone()),
        Expr::Int { value, .. } => Ok(value.to_string()),
        other => Err(ParseError::build(
            format!("{} must be a string literal", label),
            Some(other.span()),
        )
        .into()),
    }
}

fn literal_params(expr: &Expr, source: &str) -> WorkflowResult<Parameters> {
    let Expr::Dict { entries, .. } = expr else {
        return Err(ParseError::build("WorkflowNode params must be a dictionary", Some(expr.span())).into());
    };

    let mut parameters = Parameters::new();
    for (key, value) in entries {
        let Expr::Str { value: key_text, span } = key else {
            return Err(ParseError::build("WorkflowNode params keys must be strings", Some(key.span())).into());
        };
        let key = ParamKey::try_from(key_text.clone()).map_err(|message| ParseError::build(message, Some(*span)))?;
        let value = match value {
            Expr::Str { value, .. } => ParamValue::Str(value.clone()),
            Expr::Int { value, .. } => ParamValue::Int(*value),
            Expr::Float { value, .. } => ParamValue::Float(*value),
            Expr::Bool { value, .. } => ParamValue::Bool(*value),
            Expr::None { .. } => ParamValue::None,
            // literal containers are kept as written
            container @ (Expr::Tuple { .. } | Expr::Dict { .. } | Expr::Opaque { .. })
                if container.mentions().is_empty() =>
            {
                ParamValue::Expr(container.span().slice(source).to_string())
            }
            other => {
                return Err(ParseError::build(
                    format!(
                        "WorkflowNode param '{}' must be a literal value, got '{}'",
                        key,
                        other.span().slice(source)
                    ),
                    Some(other.span()),
                )
                .into())
            }
        };
        parameters.insert(key, value);
    }
    Ok(parameters)
}

/// `(producer, consumer)` from `add_edge(a, b)`.
///
/// Endpoints are string literals, or variables holding a declared node.
pub(super) fn edge_arguments<F>(args: &[Argument], span: Span, resolve: F) -> WorkflowResult<(String, String)>
where
    F: Fn(&str) -> Option<String>,
{
    let positional: Vec<&Argument> = args.iter().filter(|a| a.keyword.is_none()).collect();
    let [source_arg, target_arg] = positional.as_slice() else {
        return Err(ParseError::build("add_edge requires source and target node names", Some(span)).into());
    };

    let endpoint = |arg: &Argument| -> WorkflowResult<String> {
        match &arg.value {
            Expr::Str { value, .. } => Ok(value.clone()),
            Expr::Name { id, span } => resolve(id).ok_or_else(|| {
                ParseError::build(format!("add_edge endpoint '{}' is not a declared node", id), Some(*span)).into()
            }),
            other => Err(ParseError::build(
                "add_edge requires source and target node names",
                Some(other.span()),
            )
            .into()),
        }
    };
    Ok((endpoint(*source_arg)?, endpoint(*target_arg)?))
}
