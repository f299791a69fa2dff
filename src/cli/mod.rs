//! memsim command-line interface.
//!
//! The shell is a thin driver over [`crate::system::System`]: it parses the
//! line-oriented command surface, invokes the core operations, and prints
//! their results. Replacing it with a scripted harness (see `run` in the
//! binary) does not change core semantics.

pub mod output;
pub mod shell;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{
    DEFAULT_DISK_PENALTY, DEFAULT_L1_LATENCY, DEFAULT_L2_LATENCY, DEFAULT_MEM_PENALTY,
    DEFAULT_MIN_BLOCK,
};

/// CLI configuration, loaded from the user's config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Default output format for stats and dumps.
    pub output_format: OutputFormat,
    /// Force color on or off; unset means auto-detect.
    pub color: Option<bool>,
    /// Cycle cost of an L1 probe.
    pub l1_latency: u64,
    /// Cycle cost of an L2 probe.
    pub l2_latency: u64,
    /// Cycle penalty for main memory.
    pub mem_penalty: u64,
    /// Cycle penalty per page fault.
    pub disk_penalty: u64,
    /// Minimum block size of the buddy allocator.
    pub min_block: usize,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            output_format: OutputFormat::Table,
            color: None,
            l1_latency: DEFAULT_L1_LATENCY,
            l2_latency: DEFAULT_L2_LATENCY,
            mem_penalty: DEFAULT_MEM_PENALTY,
            disk_penalty: DEFAULT_DISK_PENALTY,
            min_block: DEFAULT_MIN_BLOCK,
        }
    }
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
    Plain,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "yaml" => Ok(OutputFormat::Yaml),
            "plain" | "text" => Ok(OutputFormat::Plain),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

/// CLI command result.
pub type CliResult<T> = Result<T, CliError>;

/// CLI errors.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArg(String),

    #[error(transparent)]
    Sim(#[from] crate::system::SystemError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Get config file path
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("memsim")
        .join("config.yaml")
}

/// Load CLI configuration from the default path.
pub fn load_config() -> CliConfig {
    load_config_from(&config_path())
}

/// Load CLI configuration from an explicit path, falling back to defaults
/// on any failure.
pub fn load_config_from(path: &Path) -> CliConfig {
    if path.exists() {
        if let Ok(content) = std::fs::read_to_string(path) {
            if let Ok(config) = serde_yaml::from_str(&content) {
                return config;
            }
        }
    }
    CliConfig::default()
}

/// Save CLI configuration
pub fn save_config(config: &CliConfig, path: &Path) -> Result<(), CliError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content =
        serde_yaml::to_string(config).map_err(|e| CliError::Config(e.to_string()))?;
    std::fs::write(path, content)?;
    Ok(())
}
