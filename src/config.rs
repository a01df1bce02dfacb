//! Layered configuration
//!
//! Sources, lowest precedence first:
//! 1. built-in defaults
//! 2. `orchestrator.toml` in the working directory (optional), or an explicit
//!    file passed to [`ConfigBuilder::config_path`] (must exist)
//! 3. `ORCHESTRATOR__SECTION__KEY` environment variables

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::compiler::ParseOptions;
use crate::types::CapabilityCatalog;

pub const DEFAULT_CONFIG_FILE: &str = "orchestrator.toml";
const ENV_PREFIX: &str = "ORCHESTRATOR";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub capabilities: CapabilitySettings,

    #[serde(default)]
    pub planning: PlanningSettings,

    #[serde(default)]
    pub export: ExportSettings,
}

/// Which activation names count as available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySettings {
    /// Include the builtin activations
    #[serde(default = "default_true")]
    pub include_builtin: bool,

    /// Additional capability names
    #[serde(default)]
    pub extra: Vec<String>,
}

impl Default for CapabilitySettings {
    fn default() -> Self {
        Self {
            include_builtin: true,
            extra: Vec::new(),
        }
    }
}

impl CapabilitySettings {
    pub fn catalog(&self) -> CapabilityCatalog {
        let mut catalog = if self.include_builtin {
            CapabilityCatalog::builtin()
        } else {
            CapabilityCatalog::empty()
        };
        catalog.extend(&self.extra);
        catalog
    }

    /// Catalog names as a list, e.g. for planner prompts.
    pub fn available(&self) -> Vec<String> {
        self.catalog().names().map(str::to_string).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningSettings {
    /// Plan attempts per query, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Queries generated per task, including the task itself
    #[serde(default = "default_query_variations")]
    pub query_variations: usize,

    /// Model name handed to planner implementations
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for PlanningSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            query_variations: default_query_variations(),
            model: default_model(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Dot,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportSettings {
    #[serde(default)]
    pub format: ExportFormat,
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_query_variations() -> usize {
    3
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load from the default locations.
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }

    /// Compile options using this configuration's catalog.
    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions::with_catalog(self.capabilities.catalog())
    }

    /// The effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration as TOML")
    }

    fn validate(&self) -> Result<()> {
        if self.planning.max_attempts == 0 {
            bail!("planning.max_attempts must be at least 1");
        }
        if self.planning.query_variations == 0 {
            bail!("planning.query_variations must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
}

impl ConfigBuilder {
    /// Explicit config file; replaces the `orchestrator.toml` lookup.
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn build(self) -> Result<Config> {
        let mut builder = config::Config::builder().add_source(
            config::Config::try_from(&Config::default()).context("Failed to load default configuration")?,
        );

        builder = match &self.config_path {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file not found: {}", path.display());
                }
                builder.add_source(
                    config::File::new(&path.to_string_lossy(), config::FileFormat::Toml).required(true),
                )
            }
            None => builder.add_source(config::File::new(DEFAULT_CONFIG_FILE, config::FileFormat::Toml).required(false)),
        };

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("capabilities.extra"),
        );

        let config: Config = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_config(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("orchestrator-{}-{}.toml", name, std::process::id()));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.capabilities.include_builtin);
        assert_eq!(config.planning.max_attempts, 3);
        assert_eq!(config.planning.query_variations, 3);
        assert_eq!(config.export.format, ExportFormat::Json);
        assert!(config.parse_options().catalog.contains("web_search"));
    }

    #[test]
    fn test_catalog_from_settings() {
        let settings = CapabilitySettings {
            include_builtin: false,
            extra: vec!["send_fax".into(), " ".into()],
        };
        assert_eq!(settings.available(), vec!["send_fax"]);

        let settings = CapabilitySettings {
            include_builtin: true,
            extra: vec!["send_fax".into()],
        };
        assert_eq!(settings.available().len(), 13);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let path = temp_config(
            "file",
            "[planning]\nmax_attempts = 5\n\n[capabilities]\nextra = [\"send_fax\"]\n",
        );

        let config = Config::builder().config_path(Some(path.clone())).build().unwrap();
        assert_eq!(config.planning.max_attempts, 5);
        assert_eq!(config.planning.query_variations, 3);
        assert!(config.capabilities.catalog().contains("send_fax"));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = Config::builder()
            .config_path(Some(PathBuf::from("/nonexistent/orchestrator.toml")))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let path = temp_config("invalid", "[planning]\nquery_variations = 0\n");
        let err = Config::builder().config_path(Some(path.clone())).build().unwrap_err();
        assert!(err.to_string().contains("query_variations"));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_environment_overrides() {
        std::env::set_var("ORCHESTRATOR__PLANNING__MODEL", "local-model");
        let config = Config::builder().build();
        std::env::remove_var("ORCHESTRATOR__PLANNING__MODEL");

        assert_eq!(config.unwrap().planning.model, "local-model");
    }

    #[test]
    fn test_renders_toml() {
        let rendered = Config::default().to_toml().unwrap();
        assert!(rendered.contains("[planning]"));
        assert!(rendered.contains("max_attempts = 3"));
        assert!(rendered.contains("format = \"json\""));
    }
}
