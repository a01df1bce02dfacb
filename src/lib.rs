pub mod cli;
pub mod compiler;
pub mod config;
pub mod dag;
pub mod error;
pub mod harness;
pub mod parser;
pub mod planner;
pub mod types;

// Re-export main types
pub use types::*;

pub use compiler::{compile_workflow, parse_workflow_code, CompiledWorkflow, ParseOptions};
pub use dag::export::{GraphExport, GraphRenderer};
pub use dag::WorkflowDAG;
pub use error::{WorkflowError, WorkflowResult};
pub use parser::semantic_validator::{Severity, ValidationError};
pub use parser::ParseError;
pub use planner::{Plan, Planner};
