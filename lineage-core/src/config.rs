use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl CoreConfig {
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join("config.toml");
        let mut cfg = if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            Self::from_toml_str(&text)
                .with_context(|| format!("parsing config file {}", path.display()))?
        } else {
            tracing::info!(
                "No config file found at {}. Using CoreConfig::default().",
                path.display()
            );
            CoreConfig::default()
        };
        cfg.resolve_paths(root);
        Ok(cfg)
    }

    /// Parse and clamp without touching any paths.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut cfg = toml::from_str::<CoreConfig>(text)?;
        cfg.clamp();
        Ok(cfg)
    }

    fn resolve_paths(&mut self, root: &Path) {
        self.storage.db_path = absolutize(root, &self.storage.db_path);
        self.storage.records_dir = absolutize(root, &self.storage.records_dir);
    }

    fn clamp(&mut self) {
        if self.history.limit == 0 {
            tracing::warn!("history.limit must be at least 1; using 1");
            self.history.limit = 1;
        }
        if !self.history.jitter_threshold.is_finite() || self.history.jitter_threshold < 0.0 {
            tracing::warn!(
                value = self.history.jitter_threshold,
                "history.jitter_threshold invalid; using default"
            );
            self.history.jitter_threshold = HistoryConfig::default_jitter_threshold();
        }
        if self.history.precision > 12 {
            tracing::warn!(value = self.history.precision, "history.precision capped at 12");
            self.history.precision = 12;
        }
        let r = self.filter.retention_ratio;
        if !(r.is_finite() && r > 0.0 && r <= 1.0) {
            tracing::warn!(value = r, "filter.retention_ratio outside (0, 1]; using default");
            self.filter.retention_ratio = FilterConfig::default_retention_ratio();
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            history: HistoryConfig::default(),
            filter: FilterConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "HistoryConfig::default_limit")]
    pub limit: usize,
    #[serde(default = "HistoryConfig::default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "HistoryConfig::default_jitter_threshold")]
    pub jitter_threshold: f64,
    #[serde(default = "HistoryConfig::default_signature_sample")]
    pub signature_sample: usize,
    #[serde(default = "HistoryConfig::default_precision")]
    pub precision: u32,
}

impl HistoryConfig {
    fn default_limit() -> usize {
        20
    }

    fn default_debounce_ms() -> u64 {
        120
    }

    fn default_jitter_threshold() -> f64 {
        2.0
    }

    fn default_signature_sample() -> usize {
        20
    }

    fn default_precision() -> u32 {
        5
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            limit: Self::default_limit(),
            debounce_ms: Self::default_debounce_ms(),
            jitter_threshold: Self::default_jitter_threshold(),
            signature_sample: Self::default_signature_sample(),
            precision: Self::default_precision(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "FilterConfig::default_max_items")]
    pub max_items: usize,
    #[serde(default = "FilterConfig::default_retention_ratio")]
    pub retention_ratio: f64,
}

impl FilterConfig {
    fn default_max_items() -> usize {
        4000
    }

    fn default_retention_ratio() -> f64 {
        0.85
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_items: Self::default_max_items(),
            retention_ratio: Self::default_retention_ratio(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Sqlite,
    File,
    Memory,
}

impl Default for StorageBackend {
    fn default() -> Self {
        StorageBackend::Sqlite
    }
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Sqlite => "sqlite",
            StorageBackend::File => "file",
            StorageBackend::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "StorageConfig::default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "StorageConfig::default_records_dir")]
    pub records_dir: PathBuf,
}

impl StorageConfig {
    fn default_db_path() -> PathBuf {
        PathBuf::from("lineage.db")
    }

    fn default_records_dir() -> PathBuf {
        PathBuf::from("records")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            db_path: Self::default_db_path(),
            records_dir: Self::default_records_dir(),
        }
    }
}

fn absolutize(root: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        root.join(value)
    }
}
