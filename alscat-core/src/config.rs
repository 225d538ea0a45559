use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{DEFAULT_SCOPES, Scope};

/// Name of the optional config file inside a catalog directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Snapshot subdirectory of a catalog directory; holds one folder per scope.
pub const SNAPSHOT_DIR: &str = "snapshots";

/// Top-level configuration, matching `<catalog dir>/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub catalog: CatalogSection,
    #[serde(default)]
    pub scan: ScanSection,
    #[serde(default)]
    pub ingest: IngestSection,
    #[serde(default)]
    pub analytics: AnalyticsSection,
    #[serde(default)]
    pub query: QuerySection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSection {
    /// Scopes built and analysed by default.
    pub scopes: Vec<Scope>,
    /// Database file name inside the catalog directory.
    pub database: String,
}

impl Default for CatalogSection {
    fn default() -> Self {
        Self {
            scopes: DEFAULT_SCOPES
                .iter()
                .map(|s| Scope::new(*s).unwrap_or_default())
                .collect(),
            database: "catalog.sqlite".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct ScanSection {
    pub include_media: bool,
    pub incremental: bool,
    pub hash: bool,
    pub rehash_unchanged: bool,
    pub analyze_audio: bool,
    pub skip_backups: bool,
    /// Directory names never descended into.
    pub skip_dirs: Vec<String>,
    /// Glob patterns of paths to leave out of the index.
    pub exclude_patterns: Vec<String>,
    pub workers: usize,
    /// Save scan state every N indexed files (0 disables).
    pub checkpoint_every: u64,
    pub max_decompressed_bytes: usize,
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            include_media: false,
            incremental: true,
            hash: false,
            rehash_unchanged: false,
            analyze_audio: false,
            skip_backups: false,
            skip_dirs: vec![
                ".git".into(),
                ".venv".into(),
                "venv".into(),
                "__pycache__".into(),
                ".DS_Store".into(),
            ],
            exclude_patterns: Vec::new(),
            workers: 1,
            checkpoint_every: 0,
            max_decompressed_bytes: alscat_doc::DEFAULT_MAX_DECOMPRESSED,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSection {
    pub batch_size: usize,
}

impl Default for IngestSection {
    fn default() -> Self {
        Self { batch_size: 1000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsSection {
    pub chain_len: usize,
    /// Trailing day windows for activity summaries.
    pub activity_windows: Vec<u32>,
    /// Documents with more distinct devices are left out of pair counts.
    pub max_devices_per_doc: usize,
    pub top_sets: usize,
}

impl Default for AnalyticsSection {
    fn default() -> Self {
        Self {
            chain_len: 3,
            activity_windows: vec![7, 30, 90],
            max_devices_per_doc: 50,
            top_sets: 25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySection {
    pub default_limit: usize,
}

impl Default for QuerySection {
    fn default() -> Self {
        Self { default_limit: 500 }
    }
}

impl CatalogConfig {
    /// Parse and validate configuration text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `<dir>/config.toml`, falling back to defaults when it is absent.
    pub fn load_or_default(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    /// Load a specific config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::NotFound(path.display().to_string()))?;
        Self::from_toml(&text)
    }

    /// Database file inside `catalog_dir`.
    pub fn db_path(&self, catalog_dir: &Path) -> PathBuf {
        catalog_dir.join(&self.catalog.database)
    }

    /// Snapshot root inside `catalog_dir`.
    pub fn snapshot_dir(catalog_dir: &Path) -> PathBuf {
        catalog_dir.join(SNAPSHOT_DIR)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.catalog.scopes.is_empty() {
            return Err(ConfigError::Invalid("catalog.scopes must not be empty".into()));
        }
        if self.catalog.database.trim().is_empty() {
            return Err(ConfigError::Invalid("catalog.database must not be empty".into()));
        }
        if self.scan.workers == 0 {
            return Err(ConfigError::Invalid("scan.workers must be at least 1".into()));
        }
        if self.ingest.batch_size == 0 {
            return Err(ConfigError::Invalid("ingest.batch_size must be at least 1".into()));
        }
        if self.analytics.chain_len == 0 {
            return Err(ConfigError::Invalid("analytics.chain_len must be at least 1".into()));
        }
        if self.query.default_limit == 0 {
            return Err(ConfigError::Invalid("query.default_limit must be at least 1".into()));
        }
        for pattern in &self.scan.exclude_patterns {
            glob::Pattern::new(pattern).map_err(|e| {
                ConfigError::Invalid(format!("scan.exclude_patterns entry {pattern:?}: {e}"))
            })?;
        }
        Ok(())
    }
}
