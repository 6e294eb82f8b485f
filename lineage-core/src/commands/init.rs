// lineage-core/src/commands/init.rs

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::CoreConfig;

#[derive(Debug, Clone)]
pub struct InitReport {
    pub root: PathBuf,
    pub created: Vec<String>,
    pub existed: Vec<String>,
    pub config: CoreConfig,
}

/// Resolve the state root. Allow override via LINEAGE_ROOT (tests/venvs).
pub fn lineage_root() -> PathBuf {
    std::env::var_os("LINEAGE_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".lineage"))
}

/// Ensure `root` exists with a config file and a records directory, then load
/// the config. Idempotent.
pub fn ensure_initialized(root: &Path) -> Result<InitReport> {
    let mut created = Vec::new();
    let mut existed = Vec::new();

    ensure_dir(root, "", &mut created, &mut existed)?;
    ensure_file(
        root,
        "config.toml",
        DEFAULT_CONFIG_TOML,
        &mut created,
        &mut existed,
    )?;

    let config = CoreConfig::load(root)?;
    let records = &config.storage.records_dir;
    if records.exists() {
        existed.push("records".to_string());
    } else {
        fs::create_dir_all(records).with_context(|| format!("create_dir_all({:?})", records))?;
        created.push("records".to_string());
    }

    Ok(InitReport {
        root: root.to_path_buf(),
        created,
        existed,
        config,
    })
}

fn ensure_dir(
    base: &Path,
    rel: &str,
    created: &mut Vec<String>,
    existed: &mut Vec<String>,
) -> Result<()> {
    let p = if rel.is_empty() { base.to_path_buf() } else { base.join(rel) };
    let label = if rel.is_empty() { ".".to_string() } else { rel.to_string() };
    if p.exists() {
        existed.push(label);
        return Ok(());
    }
    fs::create_dir_all(&p).with_context(|| format!("create_dir_all({:?})", p))?;
    created.push(label);
    Ok(())
}

fn ensure_file(
    base: &Path,
    rel_file: &str,
    content_if_absent: &str,
    created: &mut Vec<String>,
    existed: &mut Vec<String>,
) -> Result<()> {
    let p = base.join(rel_file);
    if p.exists() {
        existed.push(rel_file.to_string());
        return Ok(());
    }
    let tmp = p.with_extension("tmp");
    {
        let mut f = fs::File::create(&tmp).with_context(|| format!("open temp file {:?}", tmp))?;
        f.write_all(content_if_absent.as_bytes())?;
        f.flush()?;
    }
    fs::rename(&tmp, &p).with_context(|| format!("rename {:?} -> {:?}", tmp, p))?;
    created.push(rel_file.to_string());
    Ok(())
}

const DEFAULT_CONFIG_TOML: &str = r#"# lineage-core configuration

[history]
limit = 20              # snapshots kept per file; oldest evicted first
debounce_ms = 120       # coalescing window for history writes
jitter_threshold = 2.0  # total positional drift treated as no change
signature_sample = 20   # node positions sampled into the dedup signature
precision = 5           # decimal digits kept for coordinates

[filter]
max_items = 4000
retention_ratio = 0.85  # share of max_items kept when ranking by degree

[storage]
backend = "sqlite"      # sqlite | file | memory
db_path = "lineage.db"
records_dir = "records"
"#;
