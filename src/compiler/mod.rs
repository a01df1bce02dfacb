//! Static compiler from generated module source to a validated workflow graph
//!
//! The module is parsed, never run. Each top-level call to a bare-named
//! function becomes a node; bare-name arguments that hold an earlier call's
//! result become references plus producer → consumer edges. The graph is
//! either returned whole or not at all.
//!
//! Lowering is one ordered walk over top-level statements with a single
//! binding table. Ids are allocated up front so later statements can be
//! referenced before they are reached, and edges are applied once the walk
//! has finished.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info};

use crate::dag::WorkflowDAG;
use crate::error::{WorkflowError, WorkflowResult};
use crate::parser::ast::{Argument, Expr, Module, Span, Stmt};
use crate::parser::semantic_validator::{RuleContext, ValidationError, Validator};
use crate::parser::{parse_module, ParseError};
use crate::types::{CapabilityCatalog, ParamKey, ParamValue, Parameters, WorkflowNode};

mod construction;

#[cfg(test)]
mod tests;

use construction::{Construction, GRAPH_CONSTRUCTOR, NODE_CONSTRUCTOR};

/* ===================== Options and Results ===================== */

#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Capabilities considered valid when producing diagnostics
    pub catalog: CapabilityCatalog,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            catalog: CapabilityCatalog::builtin(),
        }
    }
}

impl ParseOptions {
    pub fn with_catalog(catalog: CapabilityCatalog) -> Self {
        Self { catalog }
    }

    /// Builtin capabilities plus a caller-supplied list of available nodes.
    pub fn with_available<I, S>(available: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut catalog = CapabilityCatalog::builtin();
        catalog.extend(available);
        Self { catalog }
    }
}

/// A compiled graph together with what the compiler noticed on the way.
#[derive(Debug, Clone)]
pub struct CompiledWorkflow {
    pub dag: WorkflowDAG,
    pub diagnostics: Vec<ValidationError>,
    pub facts: CompileFacts,
}

impl CompiledWorkflow {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.is_error())
    }

    /// Where the call that produced a node was written.
    pub fn origin(&self, id: &str) -> Option<Span> {
        self.facts.origins.get(id).copied()
    }
}

/// Observations made while lowering, consumed by the diagnostics rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompileFacts {
    /// node id -> span of the call (or `add_node` statement) that created it
    pub origins: IndexMap<String, Span>,
    pub bindings: Vec<NodeBinding>,
    pub rebindings: Vec<Rebinding>,
    pub forward_references: Vec<ForwardReference>,
    pub opaque_references: Vec<OpaqueReference>,
}

/// A variable that received a node's output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeBinding {
    pub name: String,
    pub node_id: String,
    pub span: Span,
    /// Some later statement reads the variable while it still holds this output.
    pub read: bool,
}

/// A node-bound variable overwritten by something other than a call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rebinding {
    pub name: String,
    pub node_id: String,
    pub span: Span,
}

/// A bare-name argument resolved to a call further down the module.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForwardReference {
    pub name: String,
    pub producer: String,
    pub consumer: String,
    pub span: Span,
}

/// A node-bound variable read inside an argument kept as source text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpaqueReference {
    pub name: String,
    pub producer: String,
    pub consumer: String,
    pub parameter: ParamKey,
    pub span: Span,
}

/* ===================== Public API ===================== */

/// Compile generated source into a validated graph.
pub fn parse_workflow_code(source: &str) -> WorkflowResult<WorkflowDAG> {
    let module = parse_module(source)?;
    let (dag, _) = lower_module(&module, source)?;
    Ok(dag)
}

/// Compile and run the diagnostics rules against `options.catalog`.
pub fn compile_workflow(source: &str, options: &ParseOptions) -> WorkflowResult<CompiledWorkflow> {
    let module = parse_module(source)?;
    let (dag, facts) = lower_module(&module, source)?;

    let context = RuleContext {
        module: &module,
        source,
        dag: &dag,
        catalog: &options.catalog,
        facts: &facts,
    };
    let diagnostics = Validator::new().validate(&context);

    info!(
        nodes = dag.len(),
        edges = dag.edges().len(),
        diagnostics = diagnostics.len(),
        "compiled workflow"
    );
    Ok(CompiledWorkflow {
        dag,
        diagnostics,
        facts,
    })
}

/// Lower an already parsed module.
pub fn lower_module(module: &Module, source: &str) -> WorkflowResult<(WorkflowDAG, CompileFacts)> {
    let construction = construction::scan(module, source)?;
    let mut lowering = Lowering::new(module, source, construction);
    for (index, stmt) in module.body.iter().enumerate() {
        lowering.statement(index, stmt)?;
    }
    lowering.finish()
}

/* ===================== Lowering ===================== */

/// Names Python provides without a binding statement.
const BUILTIN_NAMES: &[&str] = &[
    "__name__", "__file__", "abs", "all", "any", "bool", "dict", "enumerate", "Exception", "filter",
    "float", "format", "getattr", "hasattr", "int", "isinstance", "KeyError", "len", "list", "map",
    "max", "min", "next", "object", "open", "print", "range", "repr", "reversed", "round",
    "RuntimeError", "set", "sorted", "str", "sum", "tuple", "type", "TypeError", "ValueError", "zip",
];

#[derive(Debug, Clone)]
enum Binding {
    /// Holds the output of the node with this id
    Node(String),
    /// Holds something the compiler does not track
    Value,
    /// A `WorkflowDAG()` handle
    Graph,
    /// A `WorkflowNode(...)` declaration
    Declared(WorkflowNode),
}

struct PendingEdge {
    producer: String,
    consumer: String,
    span: Span,
}

/// A name bound to a call's output, by statement index.
struct CallBinding {
    index: usize,
    name: String,
    node_id: String,
}

struct Lowering<'a> {
    source: &'a str,
    construction: Construction,
    dag: WorkflowDAG,
    facts: CompileFacts,
    bindings: HashMap<String, Binding>,
    /// name -> index into `facts.bindings` while the name holds a node output
    active: HashMap<String, usize>,
    /// statement index -> id of the node the statement creates
    node_ids: HashMap<usize, String>,
    call_bindings: Vec<CallBinding>,
    bound_anywhere: HashSet<String>,
    star_import: bool,
    pending_edges: Vec<PendingEdge>,
}

impl<'a> Lowering<'a> {
    fn new(module: &'a Module, source: &'a str, construction: Construction) -> Self {
        let mut taken: HashSet<String> = construction.reserved_ids();
        let mut node_ids = HashMap::new();
        let mut call_bindings = Vec::new();
        let mut bound_anywhere = HashSet::new();
        let mut star_import = false;

        for (index, stmt) in module.body.iter().enumerate() {
            let bound = stmt.bound_names();
            star_import |= bound.iter().any(|name| name == "*");
            bound_anywhere.extend(bound.iter().cloned());

            if activation_call(stmt).is_none() {
                continue;
            }
            let base = first_name_target(stmt)
                .map(str::to_string)
                .unwrap_or_else(|| format!("_stmt_{}", index));
            let id = first_free(&base, &taken);
            taken.insert(id.clone());
            for name in bound {
                call_bindings.push(CallBinding {
                    index,
                    name,
                    node_id: id.clone(),
                });
            }
            node_ids.insert(index, id);
        }

        Self {
            source,
            construction,
            dag: WorkflowDAG::new(),
            facts: CompileFacts::default(),
            bindings: HashMap::new(),
            active: HashMap::new(),
            node_ids,
            call_bindings,
            bound_anywhere,
            star_import,
            pending_edges: Vec::new(),
        }
    }

    fn statement(&mut self, index: usize, stmt: &Stmt) -> WorkflowResult<()> {
        self.mark_reads(stmt);

        if let Some(call) = activation_call(stmt) {
            return self.activation(index, stmt, call);
        }

        if let Some(call) = stmt.value_call() {
            if let Some(handled) = self.construction_call(index, stmt, call)? {
                self.bind_names(stmt, handled);
                return Ok(());
            }
        }

        if matches!(stmt, Stmt::AnnAssign { value: None, .. }) {
            // annotation without a value binds nothing
            return Ok(());
        }
        self.bind_names(stmt, Binding::Value);
        Ok(())
    }

    /// `x = action(...)` or a bare `action(...)`.
    fn activation(&mut self, index: usize, stmt: &Stmt, call: &Expr) -> WorkflowResult<()> {
        let (action, args) = match call {
            Expr::Call { func, args, .. } => match func.as_name() {
                Some(action) => (action, args),
                None => return Ok(()),
            },
            _ => return Ok(()),
        };
        let id = match self.node_ids.get(&index) {
            Some(id) => id.clone(),
            None => return Ok(()),
        };
        let targets = stmt.bound_names();

        let mut parameters = Parameters::new();
        let mut position = 0;
        for arg in args {
            let key = match &arg.keyword {
                Some(name) => ParamKey::Keyword(name.clone()),
                None => {
                    position += 1;
                    ParamKey::Positional(position - 1)
                }
            };
            let value = self.argument(index, &id, &key, &arg.value, &targets)?;
            parameters.insert(key, value);
        }

        debug!(id = %id, action = %action, params = parameters.len(), "activation node");
        self.dag.add_node(WorkflowNode::new(id.clone(), action, parameters))?;
        self.facts.origins.insert(id.clone(), call.span());

        for name in targets {
            let span = target_span(stmt, &name).unwrap_or_else(|| stmt.span());
            self.bindings.insert(name.clone(), Binding::Node(id.clone()));
            self.active.insert(name.clone(), self.facts.bindings.len());
            self.facts.bindings.push(NodeBinding {
                name,
                node_id: id.clone(),
                span,
                read: false,
            });
        }
        Ok(())
    }

    fn argument(
        &mut self,
        index: usize,
        consumer: &str,
        key: &ParamKey,
        value: &Expr,
        targets: &[String],
    ) -> WorkflowResult<ParamValue> {
        Ok(match value {
            Expr::Str { value, .. } => ParamValue::Str(value.clone()),
            Expr::Int { value, .. } => ParamValue::Int(*value),
            Expr::Float { value, .. } => ParamValue::Float(*value),
            Expr::Bool { value, .. } => ParamValue::Bool(*value),
            Expr::None { .. } => ParamValue::None,
            Expr::Name { id, span } => return self.resolve_name(index, consumer, id, *span, targets),
            other => {
                for mention in other.mentions() {
                    if let Some(Binding::Node(producer)) = self.bindings.get(&mention.name) {
                        self.facts.opaque_references.push(OpaqueReference {
                            name: mention.name.clone(),
                            producer: producer.clone(),
                            consumer: consumer.to_string(),
                            parameter: key.clone(),
                            span: mention.span,
                        });
                    }
                }
                ParamValue::Expr(other.span().slice(self.source).to_string())
            }
        })
    }

    fn resolve_name(
        &mut self,
        index: usize,
        consumer: &str,
        name: &str,
        span: Span,
        targets: &[String],
    ) -> WorkflowResult<ParamValue> {
        match self.bindings.get(name) {
            Some(Binding::Node(producer)) => {
                let producer = producer.clone();
                self.pending_edges.push(PendingEdge {
                    producer: producer.clone(),
                    consumer: consumer.to_string(),
                    span,
                });
                return Ok(ParamValue::Ref(producer));
            }
            Some(_) => return Ok(ParamValue::Expr(name.to_string())),
            None => {}
        }

        if targets.iter().any(|t| t == name) {
            return Err(ParseError::UndefinedReference {
                name: name.to_string(),
                span,
            }
            .into());
        }

        if let Some(later) = self
            .call_bindings
            .iter()
            .find(|binding| binding.index > index && binding.name == name)
        {
            let producer = later.node_id.clone();
            self.facts.forward_references.push(ForwardReference {
                name: name.to_string(),
                producer: producer.clone(),
                consumer: consumer.to_string(),
                span,
            });
            self.pending_edges.push(PendingEdge {
                producer: producer.clone(),
                consumer: consumer.to_string(),
                span,
            });
            return Ok(ParamValue::Ref(producer));
        }

        if self.star_import || self.bound_anywhere.contains(name) || BUILTIN_NAMES.contains(&name) {
            return Ok(ParamValue::Expr(name.to_string()));
        }

        Err(WorkflowError::UnknownNode {
            id: name.to_string(),
            span: Some(span),
        })
    }

    /// Handle `WorkflowDAG()`, `WorkflowNode(...)` and `<graph>.add_node/add_edge(...)`.
    ///
    /// Returns the binding the statement's targets receive, or `None` when the
    /// call is not part of the construction dialect.
    fn construction_call(&mut self, index: usize, stmt: &Stmt, call: &Expr) -> WorkflowResult<Option<Binding>> {
        let Expr::Call { func, args, span } = call else {
            return Ok(None);
        };

        match func.as_ref() {
            Expr::Name { id, .. } if id == GRAPH_CONSTRUCTOR => Ok(Some(Binding::Graph)),
            Expr::Name { id, .. } if id == NODE_CONSTRUCTOR => Ok(Some(
                match self.construction.declaration(index) {
                    Some(node) => Binding::Declared(node.clone()),
                    None => Binding::Value,
                },
            )),
            Expr::Attribute { value, attr, .. } => {
                let handle = match value.as_name() {
                    Some(handle) if self.construction.is_handle(handle) => handle,
                    _ => return Ok(None),
                };
                match attr.as_str() {
                    "add_node" => {
                        let node = match self.construction.declaration(index) {
                            Some(node) => node.clone(),
                            None => self.declared_node_argument(args, *span)?,
                        };
                        debug!(graph = %handle, id = %node.id, "explicit node");
                        let id = node.id.clone();
                        self.dag.add_node(node)?;
                        self.facts.origins.insert(id, stmt.span());
                    }
                    "add_edge" => {
                        let (producer, consumer) = construction::edge_arguments(args, *span, |name| {
                            match self.bindings.get(name) {
                                Some(Binding::Declared(node)) => Some(node.id.clone()),
                                Some(Binding::Node(id)) => Some(id.clone()),
                                _ => None,
                            }
                        })?;
                        self.pending_edges.push(PendingEdge {
                            producer,
                            consumer,
                            span: *span,
                        });
                    }
                    _ => {}
                }
                Ok(Some(Binding::Value))
            }
            _ => Ok(None),
        }
    }

    fn declared_node_argument(&self, args: &[Argument], span: Span) -> WorkflowResult<WorkflowNode> {
        let arg = construction::node_argument(args)
            .ok_or_else(|| ParseError::build("add_node must receive a WorkflowNode", Some(span)))?;
        match arg.value.as_name().and_then(|name| self.bindings.get(name)) {
            Some(Binding::Declared(node)) => Ok(node.clone()),
            _ => Err(ParseError::build(
                "add_node expects a WorkflowNode constructor call or a declared node",
                Some(arg.span),
            )
            .into()),
        }
    }

    /// Rebind every name the statement assigns, recording node outputs that get overwritten.
    fn bind_names(&mut self, stmt: &Stmt, binding: Binding) {
        for name in stmt.bound_names() {
            if name == "*" {
                continue;
            }
            if let Some(Binding::Node(node_id)) = self.bindings.get(&name) {
                self.facts.rebindings.push(Rebinding {
                    name: name.clone(),
                    node_id: node_id.clone(),
                    span: stmt.span(),
                });
            }
            self.active.remove(&name);
            self.bindings.insert(name, binding.clone());
        }
    }

    fn mark_reads(&mut self, stmt: &Stmt) {
        for mention in stmt.mentions() {
            if let Some(&slot) = self.active.get(&mention.name) {
                if let Some(binding) = self.facts.bindings.get_mut(slot) {
                    binding.read = true;
                }
            }
        }
    }

    fn finish(mut self) -> WorkflowResult<(WorkflowDAG, CompileFacts)> {
        for forward in &self.facts.forward_references {
            for binding in self.facts.bindings.iter_mut() {
                if binding.node_id == forward.producer && binding.name == forward.name {
                    binding.read = true;
                }
            }
        }

        for edge in &self.pending_edges {
            self.dag
                .add_edge(&edge.producer, &edge.consumer)
                .map_err(|err| match err {
                    WorkflowError::UnknownNode { id, span: None } => WorkflowError::UnknownNode {
                        id,
                        span: Some(edge.span),
                    },
                    other => other,
                })?;
        }
        Ok((self.dag, self.facts))
    }
}

/* ===================== Statement Shapes ===================== */

/// The call a statement makes when it creates an activation node.
fn activation_call(stmt: &Stmt) -> Option<&Expr> {
    let call = stmt.value_call()?;
    match call.callee_name() {
        Some(GRAPH_CONSTRUCTOR) | Some(NODE_CONSTRUCTOR) | None => None,
        Some(_) => Some(call),
    }
}

/// First plain-name target, which names the node.
fn first_name_target(stmt: &Stmt) -> Option<&str> {
    match stmt {
        Stmt::Assign { targets, .. } => targets.iter().find_map(Expr::as_name),
        Stmt::AnnAssign { target, .. } => target.as_name(),
        _ => None,
    }
}

fn target_span(stmt: &Stmt, name: &str) -> Option<Span> {
    fn find(expr: &Expr, name: &str) -> Option<Span> {
        match expr {
            Expr::Name { id, span } if id == name => Some(*span),
            Expr::Tuple { elts, .. } => elts.iter().find_map(|e| find(e, name)),
            Expr::Starred { value, .. } => find(value, name),
            _ => None,
        }
    }
    match stmt {
        Stmt::Assign { targets, .. } => targets.iter().find_map(|t| find(t, name)),
        Stmt::AnnAssign { target, .. } => find(target, name),
        _ => None,
    }
}

/// `base`, or `base_2`, `base_3`, ... whichever is free first.
fn first_free(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{}_{}", base, n))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}
