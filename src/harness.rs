//! End-to-end plan validation
//!
//! Generate query variants for a task, ask a [`Planner`] for code, compile it,
//! and feed compile errors back to the planner until the code compiles or the
//! attempt budget runs out.

use anyhow::{bail, Result};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::compiler::{compile_workflow, ParseOptions};
use crate::config::PlanningSettings;
use crate::dag::WorkflowDAG;
use crate::error::WorkflowError;
use crate::parser::semantic_validator::ValidationError;
use crate::planner::{Plan, Planner};

/// The task itself followed by `"<task> (variation i)"`, `variations` queries in all.
pub fn generate_workflow_queries(task: &str, variations: usize) -> Result<Vec<String>> {
    let base = task.trim();
    if base.is_empty() {
        bail!("Task description must be non-empty");
    }

    let mut queries = vec![base.to_string()];
    queries.extend((1..variations).map(|i| format!("{} (variation {})", base, i)));
    debug!(?queries, "generated workflow queries");
    Ok(queries)
}

/// Outcome of compiling one plan for one query.
#[derive(Debug, Clone, Serialize)]
pub struct PlanOutcome {
    pub query: String,
    pub code: String,
    /// Compiled without any error-severity diagnostic
    pub compiled: bool,
    pub dag: Option<WorkflowDAG>,
    pub diagnostics: Vec<ValidationError>,
    pub error: Option<String>,
    /// Plans requested for this query, including revisions
    pub attempts: u32,
}

impl PlanOutcome {
    pub fn node_count(&self) -> usize {
        self.dag.as_ref().map_or(0, WorkflowDAG::len)
    }

    pub fn succeeded(&self) -> bool {
        self.compiled && self.dag.is_some()
    }
}

/// Compile a plan, capturing failure as data. Error diagnostics count as failure.
pub fn validate_workflow_plan(plan: &Plan, query: &str, options: &ParseOptions) -> PlanOutcome {
    let compiled = if plan.is_empty() {
        Err(WorkflowError::EmptyPlan)
    } else {
        compile_workflow(&plan.code, options)
    };

    match compiled {
        Ok(compiled) => {
            // an error diagnostic fails the plan even though a graph was built
            let error = compiled
                .diagnostics
                .iter()
                .find(|d| d.is_error())
                .map(|d| d.to_string());
            match &error {
                Some(error) => warn!(query, error = %error, "workflow plan compiled with errors"),
                None => info!(query, nodes = compiled.dag.len(), "workflow plan compiled"),
            }
            PlanOutcome {
                query: query.to_string(),
                code: plan.code.clone(),
                compiled: error.is_none(),
                dag: Some(compiled.dag),
                diagnostics: compiled.diagnostics,
                error,
                attempts: 1,
            }
        }
        Err(err) => {
            error!(query, error = %err, "workflow plan failed validation");
            PlanOutcome {
                query: query.to_string(),
                code: plan.code.clone(),
                compiled: false,
                dag: None,
                diagnostics: Vec::new(),
                error: Some(err.to_string()),
                attempts: 1,
            }
        }
    }
}

/// Plan, validate, and request revisions until the code compiles or
/// `max_attempts` plans have been tried.
pub fn build_and_validate_workflow_plan(
    query: &str,
    available: &[String],
    planner: &mut dyn Planner,
    options: &ParseOptions,
    max_attempts: u32,
) -> Result<PlanOutcome> {
    info!(query, "building workflow plan");
    let mut plan = planner.plan_workflow(query, available)?;
    let mut outcome = validate_workflow_plan(&plan, query, options);
    let mut attempt = 1;

    while !outcome.compiled && attempt < max_attempts {
        let error = outcome.error.as_deref().unwrap_or("Unknown compilation error");
        warn!(query, attempt, "plan failed; requesting revision");
        plan = planner.revise_workflow(query, available, &plan.code, error)?;
        attempt += 1;
        outcome = validate_workflow_plan(&plan, query, options);
    }

    outcome.attempts = attempt;
    Ok(outcome)
}

/// Summary of a build run over all query variants of a task.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub task: String,
    pub plans: Vec<PlanOutcome>,
}

impl BuildReport {
    /// Fraction of queries whose final plan compiled; 0.0 with no plans.
    pub fn success_rate(&self) -> f64 {
        if self.plans.is_empty() {
            return 0.0;
        }
        let successes = self.plans.iter().filter(|p| p.succeeded()).count();
        successes as f64 / self.plans.len() as f64
    }
}

/// Build and validate one plan per query variant of `task`.
pub fn run_plans(
    task: &str,
    available: &[String],
    planner: &mut dyn Planner,
    settings: &PlanningSettings,
) -> Result<BuildReport> {
    info!(task, "starting workflow build");
    let options = ParseOptions::with_available(available);

    let mut plans = Vec::new();
    for query in generate_workflow_queries(task, settings.query_variations)? {
        plans.push(build_and_validate_workflow_plan(
            &query,
            available,
            planner,
            &options,
            settings.max_attempts,
        )?);
    }

    let report = BuildReport {
        task: task.to_string(),
        plans,
    };
    info!(
        task,
        success_rate = %format!("{:.0}%", report.success_rate() * 100.0),
        "workflow build complete"
    );
    Ok(report)
}
