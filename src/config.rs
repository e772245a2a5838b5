//! Configuration management for ctxpack
//!
//! This module provides configuration structures and defaults for ingestion,
//! structure listing, rendering and session storage. Values come from an
//! optional TOML file, then environment overrides.

use std::fs;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::error::{ContextError, Result};
use crate::filter::PatternMap;

/// Files at or below this size are read eagerly during ingestion.
pub const DEFAULT_MAX_EAGER_BYTES: u64 = 1024 * 1024;

/// Global configuration for ctxpack
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Workspace roots used for relative pattern matching and display paths
    pub workspace_roots: Vec<PathBuf>,
    /// Ingestion configuration
    pub ingest: IngestConfig,
    /// Structure listing configuration
    pub structure: StructureConfig,
    /// Rendering configuration
    pub output: OutputConfig,
    /// Session storage configuration
    pub storage: StorageConfig,
}

/// Configuration for adding resources to a session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Largest file (in bytes) whose content is cached at ingestion time
    pub max_eager_bytes: u64,
    /// Glob pattern -> enabled flag
    pub exclude: PatternMap,
}

/// Configuration for the directory structure listing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StructureConfig {
    /// Glob pattern -> enabled flag, matched relative to the listed root
    pub exclude: PatternMap,
    /// Also hide entries ignored by .gitignore files
    pub respect_gitignore: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Markdown,
    Xml,
}

impl std::str::FromStr for OutputFormat {
    type Err = ContextError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(Self::Markdown),
            "xml" => Ok(Self::Xml),
            other => Err(ContextError::Config(format!("unknown output format: {other}"))),
        }
    }
}

/// Configuration for rendered documents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,
    /// Optional text placed above the rendered files
    pub header: Option<String>,
}

/// Configuration for persisted session state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Session state file; defaults to the platform data directory
    pub state_file: Option<PathBuf>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            workspace_roots: Vec::new(),
            ingest: IngestConfig::default(),
            structure: StructureConfig::default(),
            output: OutputConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_eager_bytes: DEFAULT_MAX_EAGER_BYTES,
            exclude: default_patterns(&[
                "**/node_modules",
                "**/.git",
                "**/target",
                "**/dist",
                "**/*.lock",
                "**/.DS_Store",
            ]),
        }
    }
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            exclude: default_patterns(&["**/node_modules", "**/.git", "**/target"]),
            respect_gitignore: true,
        }
    }
}

fn default_patterns(patterns: &[&str]) -> PatternMap {
    patterns.iter().map(|p| (p.to_string(), true)).collect()
}

impl StorageConfig {
    /// Resolve the state file path, falling back to the data directory
    pub fn state_file_path(&self) -> PathBuf {
        self.state_file.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("ctxpack")
                .join("sessions.json")
        })
    }
}

/// Configuration loading and management
impl ContextConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|err| ContextError::Config(format!("{}: {}", path.display(), err)))
    }

    /// Load configuration from `path` when given, otherwise use defaults.
    /// Environment overrides apply in both cases.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("CTXPACK_STATE_FILE") {
            if !val.trim().is_empty() {
                self.storage.state_file = Some(PathBuf::from(val));
            }
        }

        if let Ok(val) = std::env::var("CTXPACK_MAX_EAGER_BYTES") {
            if let Ok(bytes) = val.parse::<u64>() {
                self.ingest.max_eager_bytes = bytes;
            }
        }

        if let Ok(val) = std::env::var("CTXPACK_OUTPUT_FORMAT") {
            if let Ok(format) = val.parse::<OutputFormat>() {
                self.output.format = format;
            }
        }

        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.ingest.max_eager_bytes == 0 {
            return Err(ContextError::Config(
                "max_eager_bytes must be greater than 0".to_string(),
            ));
        }

        let all_patterns = self.ingest.exclude.keys().chain(self.structure.exclude.keys());
        for pattern in all_patterns {
            if pattern.trim().is_empty() {
                return Err(ContextError::Config("exclusion patterns must not be empty".to_string()));
            }
        }

        Ok(())
    }
}
