//! Operator configuration: an optional TOML file, then environment, then flags.

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "dbops.toml";
pub const DATABASE_ENV: &str = "DBOPS_DATABASE";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: PathBuf,
    pub link_base_url: String,
    pub locales: Vec<String>,
    pub log_level: String,
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: PathBuf::from("recodex.sqlite3"),
            link_base_url: "https://recodex.mff.cuni.cz".to_string(),
            locales: vec!["en".to_string(), "cs".to_string()],
            log_level: "warn".to_string(),
            snapshot_dir: None,
        }
    }
}

impl Config {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("invalid configuration")
    }

    /// Loads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.to_string_lossy(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.to_string_lossy()))?;
        Self::parse(&text).with_context(|| format!("in {}", path.to_string_lossy()))
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_database_override(std::env::var(DATABASE_ENV).ok())
    }

    pub fn with_database_override(mut self, database: Option<String>) -> Self {
        if let Some(db) = database.filter(|d| !d.trim().is_empty()) {
            self.database = PathBuf::from(db);
        }
        self
    }
}
