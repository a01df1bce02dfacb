use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::compiler::{compile_workflow, CompiledWorkflow, ParseOptions};
use crate::config::{Config, ExportFormat};

#[derive(Parser)]
#[command(name = "orchestrator")]
#[command(about = "Compile generated workflow code into validated DAGs", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile a workflow file and print its nodes in execution order
    Parse {
        /// Workflow source file
        file: PathBuf,

        /// Extra available node names (comma-separated)
        #[arg(long, value_delimiter = ',')]
        available: Vec<String>,
    },

    /// Print the export representation of a compiled workflow
    Export {
        /// Workflow source file
        file: PathBuf,

        /// Output format (defaults to the configured format)
        #[arg(long, value_enum)]
        format: Option<ExportFormat>,
    },

    /// Compile a workflow file and report diagnostics only
    Check {
        /// Workflow source file
        file: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config,
}

/// Run the CLI by parsing process arguments. `Ok(false)` means the command
/// ran but found problems.
pub fn run_cli() -> Result<bool> {
    let cli = Cli::parse();
    run_cli_with_args(cli, &mut std::io::stdout().lock())
}

/// Run the CLI with provided arguments
pub fn run_cli_from_args(args: Vec<String>) -> Result<bool> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli, &mut std::io::stdout().lock())
}

/// Handle one command, writing its report to `out`
pub fn run_cli_with_args(cli: Cli, out: &mut dyn Write) -> Result<bool> {
    // Load configuration before any command so config errors surface first
    let config = Config::builder()
        .config_path(cli.config.as_deref().map(PathBuf::from))
        .build()?;

    match cli.command {
        Commands::Parse { file, available } => {
            let mut options = config.parse_options();
            options.catalog.extend(&available);
            let compiled = compile_file(&file, &options)?;

            let order = compiled.dag.topological_order()?;
            writeln!(out, "{} node(s) in execution order:", order.len())?;
            for id in order {
                if let Some(node) = compiled.dag.node(id) {
                    writeln!(out, "  {} = {}", id, node.describe())?;
                }
            }
            if !compiled.dag.edges().is_empty() {
                writeln!(out, "\nEdges:")?;
                for (producer, consumer) in compiled.dag.edges() {
                    writeln!(out, "  {} -> {}", producer, consumer)?;
                }
            }
            write_diagnostics(out, &compiled)?;
            Ok(!compiled.has_errors())
        }

        Commands::Export { file, format } => {
            let compiled = compile_file(&file, &config.parse_options())?;
            let export = compiled.dag.export_representation();
            match format.unwrap_or(config.export.format) {
                ExportFormat::Json => writeln!(
                    out,
                    "{}",
                    serde_json::to_string_pretty(&export).context("Failed to serialize export")?
                )?,
                ExportFormat::Dot => writeln!(out, "{}", export.to_dot())?,
            }
            Ok(true)
        }

        Commands::Check { file } => {
            let compiled = compile_file(&file, &config.parse_options())?;
            write_diagnostics(out, &compiled)?;
            let mark = if compiled.has_errors() { "✗" } else { "✓" };
            writeln!(
                out,
                "{} {}: {} node(s), {} edge(s), {} diagnostic(s)",
                mark,
                file.display(),
                compiled.dag.len(),
                compiled.dag.edges().len(),
                compiled.diagnostics.len()
            )?;
            Ok(!compiled.has_errors())
        }

        Commands::Config => {
            write!(out, "{}", config.to_toml()?)?;
            Ok(true)
        }
    }
}

fn compile_file(file: &Path, options: &ParseOptions) -> Result<CompiledWorkflow> {
    let source =
        fs::read_to_string(file).with_context(|| format!("Failed to read workflow file {}", file.display()))?;
    compile_workflow(&source, options).with_context(|| format!("Failed to compile {}", file.display()))
}

fn write_diagnostics(out: &mut dyn Write, compiled: &CompiledWorkflow) -> Result<()> {
    if compiled.diagnostics.is_empty() {
        return Ok(());
    }
    writeln!(out, "\nDiagnostics:")?;
    for diagnostic in &compiled.diagnostics {
        writeln!(out, "  {}", diagnostic)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workflow_file(name: &str, source: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("orchestrator-cli-{}-{}.py", name, std::process::id()));
        fs::write(&path, source).unwrap();
        path
    }

    fn run(args: &[&str]) -> (Result<bool>, String) {
        let cli = Cli::parse_from(std::iter::once("orchestrator").chain(args.iter().copied()));
        let mut out = Vec::new();
        let result = run_cli_with_args(cli, &mut out);
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_parse_prints_nodes_in_order() {
        let path = workflow_file("parse", "send_message('#ops', report)\nreport = send_fax('weekly')\n");
        let file = path.to_string_lossy().to_string();

        let (result, output) = run(&["parse", &file]);
        assert!(result.unwrap());
        assert!(output.starts_with("2 node(s) in execution order:\n  report = send_fax('weekly')\n"));
        assert!(output.contains("  report -> _stmt_0\n"));
        assert!(output.contains("[unknown-action]"));

        let (_, output) = run(&["parse", &file, "--available", "send_fax,make_fax"]);
        assert!(!output.contains("[unknown-action]"));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_export_formats() {
        let path = workflow_file("export", "a = web_search('x')\nb = generate_summary(a)\n");
        let file = path.to_string_lossy().to_string();

        let (_, json) = run(&["export", &file]);
        let export: crate::dag::export::GraphExport = serde_json::from_str(&json).unwrap();
        assert_eq!(export.nodes.len(), 2);

        let (_, dot) = run(&["export", &file, "--format", "dot"]);
        assert!(dot.contains("\"a\" -> \"b\";"));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_check_reports_compile_failure() {
        let path = workflow_file("check", "x = generate_summary(x)\n");
        let file = path.to_string_lossy().to_string();

        let (result, _) = run(&["check", &file]);
        let err = result.unwrap_err();
        assert!(format!("{:#}", err).contains("undefined reference 'x'"));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_check_fails_on_error_diagnostics() {
        let path = workflow_file("empty", "if ready:\n    send_message('#ops', 'x')\n");
        let file = path.to_string_lossy().to_string();

        let (result, output) = run(&["check", &file]);
        assert!(!result.unwrap());
        assert!(output.contains("[empty-workflow]"));

        let (result, _) = run(&["parse", &file]);
        assert!(!result.unwrap());
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_missing_file() {
        let (result, _) = run(&["check", "/nonexistent/workflow.py"]);
        assert!(result.unwrap_err().to_string().contains("Failed to read workflow file"));
    }

    #[test]
    fn test_config_command_prints_toml() {
        let (result, output) = run(&["config"]);
        assert!(result.unwrap());
        assert!(output.contains("[planning]"));
    }
}
