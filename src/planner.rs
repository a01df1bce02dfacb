//! Boundary to whatever writes workflow code
//!
//! The core never talks to a model. A [`Planner`] implementation does, and
//! hands back a [`Plan`]; everything after that (compiling, exporting,
//! persisting) happens here.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::dag::export::GraphRenderer;
use crate::dag::WorkflowDAG;
use crate::error::{WorkflowError, WorkflowResult};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a workflow planner. Build Python code that wires activation
nodes into an executable DAG. Use the WorkflowDAG and nodes from the
`orchestrator` package. Always create named WorkflowNode instances and
connect them in execution order.";

const DEFAULT_RATIONALE: &str = "Generated workflow using available activation nodes.";

/// Generated workflow code and a short rationale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub code: String,
    #[serde(default)]
    pub rationale: String,
}

impl Plan {
    pub fn new(code: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            rationale: rationale.into(),
        }
    }

    /// Plan with the stock rationale.
    pub fn from_code(code: impl Into<String>) -> Self {
        Self::new(code, DEFAULT_RATIONALE)
    }

    pub fn is_empty(&self) -> bool {
        self.code.trim().is_empty()
    }

    /// SHA-256 of the code, hex encoded.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.code.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Write the code to `path` for review, returning the path written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();
        fs::write(path, &self.code).with_context(|| format!("Failed to save plan to {}", path.display()))?;
        let fingerprint = self.fingerprint();
        debug!(path = %path.display(), fingerprint = %&fingerprint[..8], "saved plan");
        Ok(path.to_path_buf())
    }
}

/// Produces workflow code for a task.
pub trait Planner {
    fn plan_workflow(&mut self, task: &str, available: &[String]) -> Result<Plan>;

    /// Repair `previous_code`, which failed with `error`.
    fn revise_workflow(&mut self, task: &str, available: &[String], previous_code: &str, error: &str) -> Result<Plan>;
}

/// User prompt asking for a workflow over the available activation nodes.
pub fn build_prompt(task: &str, available: &[String]) -> String {
    let readable_nodes = available
        .iter()
        .map(|name| format!("- {}", name))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Task: {}\nYou can use the following activation nodes:\n{}\nReturn valid Python that builds a WorkflowDAG named `dag` and populates it.",
        task, readable_nodes
    )
}

/// User prompt asking for a repaired version of code that failed to compile.
pub fn build_revision_prompt(task: &str, available: &[String], previous_code: &str, error: &str) -> String {
    format!(
        "{}\n\nThe previous attempt failed to compile:\n```python\n{}\n```\nError: {}\nReturn corrected Python only.",
        build_prompt(task, available),
        previous_code.trim_end(),
        error
    )
}

/// Compile a plan's code into a graph. Blank code is rejected before parsing.
pub fn materialize_dag(plan: &Plan) -> WorkflowResult<WorkflowDAG> {
    if plan.is_empty() {
        return Err(WorkflowError::EmptyPlan);
    }
    crate::compiler::parse_workflow_code(&plan.code)
}

/// Materialize a plan and hand its export to `renderer`.
pub fn export_plan_dag(plan: &Plan, renderer: &dyn GraphRenderer, path: &Path, format: &str) -> Result<PathBuf> {
    let dag = materialize_dag(plan).context("Failed to materialize plan")?;
    let written = renderer
        .render(&dag.export_representation(), path, format)
        .with_context(|| format!("Failed to render workflow graph to {}", path.display()))?;
    info!(nodes = dag.len(), path = %written.display(), format = %format, "exported plan graph");
    Ok(written)
}
