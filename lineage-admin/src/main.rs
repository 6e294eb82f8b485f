use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lineage_core::commands::{ensure_initialized, lineage_root};
use lineage_core::graph::filter::{BoundedFilter, ColumnFilters};
use lineage_core::graph::{LineageGraph, NeighborhoodResolver, Relation, filter_options};
use lineage_core::memory::{HistoryMove, HistoryStore};
use lineage_core::services::{PositionCache, open_gateway};
use lineage_core::utils::SystemClock;

#[derive(Parser)]
#[command(
    name = "lineage-admin",
    about = "Inspect lineage closures, filters and stored view history"
)]
struct Cli {
    /// State root (defaults to $LINEAGE_ROOT or .lineage)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List the filter values offered for each column
    Options {
        #[arg(long)]
        relations: PathBuf,
    },
    /// Print the ancestor/descendant closure of the given seeds
    Closure {
        #[arg(long)]
        relations: PathBuf,
        #[arg(long = "seed", required = true)]
        seeds: Vec<String>,
    },
    /// Apply column filters (and optionally a neighborhood) under the node budget
    Filter {
        #[arg(long)]
        relations: PathBuf,
        /// column=value1,value2 (repeatable)
        #[arg(long = "filter")]
        filters: Vec<String>,
        #[arg(long = "seed")]
        seeds: Vec<String>,
        #[arg(long)]
        max_items: Option<usize>,
    },
    /// Show the stored history for a file
    History {
        #[arg(long)]
        file: String,
    },
    /// Step the stored history for a file back one entry
    Undo {
        #[arg(long)]
        file: String,
    },
    /// Step the stored history for a file forward one entry
    Redo {
        #[arg(long)]
        file: String,
    },
    /// Drop the stored history and node records for a file
    Clear {
        #[arg(long)]
        file: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = cli.root.unwrap_or_else(lineage_root);
    match cli.cmd {
        Cmd::Options { relations } => options(&relations),
        Cmd::Closure { relations, seeds } => closure(&relations, &seeds),
        Cmd::Filter {
            relations,
            filters,
            seeds,
            max_items,
        } => filter(&root, &relations, &filters, &seeds, max_items),
        Cmd::History { file } => history(&root, &file),
        Cmd::Undo { file } => step(&root, &file, true),
        Cmd::Redo { file } => step(&root, &file, false),
        Cmd::Clear { file } => clear(&root, &file),
    }
}

fn load_relations(path: &Path) -> Result<Vec<Relation>> {
    let bytes = fs::read(path).with_context(|| format!("read relations {:?}", path))?;
    let rows: Vec<Relation> =
        serde_json::from_slice(&bytes).with_context(|| format!("parse relations {:?}", path))?;
    tracing::debug!(path = %path.display(), rows = rows.len(), "relations loaded");
    Ok(rows)
}

fn parse_filter(arg: &str) -> Result<(String, BTreeSet<String>)> {
    let (column, values) = arg
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("filter must look like column=v1,v2: {arg}"))?;
    let values = values
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect();
    Ok((column.trim().to_string(), values))
}

fn options(relations: &Path) -> Result<()> {
    let rows = load_relations(relations)?;
    println!("{}", serde_json::to_string_pretty(&filter_options(&rows))?);
    Ok(())
}

fn closure(relations: &Path, seeds: &[String]) -> Result<()> {
    let rows = load_relations(relations)?;
    let graph = LineageGraph::from_relations(&rows);
    let sel = NeighborhoodResolver::new(&graph).select(seeds.iter());
    println!("{}", serde_json::to_string_pretty(&sel)?);
    Ok(())
}

fn filter(
    root: &Path,
    relations: &Path,
    raw_filters: &[String],
    seeds: &[String],
    max_items: Option<usize>,
) -> Result<()> {
    let report = ensure_initialized(root)?;
    let rows = load_relations(relations)?;
    let mut filters = ColumnFilters::new();
    for arg in raw_filters {
        let (column, values) = parse_filter(arg)?;
        filters.insert(column, values);
    }
    let graph = LineageGraph::from_relations(&rows);
    let closure: BTreeSet<String> = if seeds.is_empty() {
        BTreeSet::new()
    } else {
        NeighborhoodResolver::new(&graph).select(seeds.iter()).closure
    };
    let mut bf = BoundedFilter::from_config(&report.config.filter);
    if let Some(n) = max_items {
        bf.max_items = n;
    }
    let outcome = bf.apply(&rows, &filters, Some(&closure));
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn open_history(root: &Path) -> Result<HistoryStore> {
    let report = ensure_initialized(root)?;
    let gateway = open_gateway(&report.config.storage)?;
    Ok(HistoryStore::new(
        report.config.history.clone(),
        gateway,
        Arc::new(SystemClock::new()),
    ))
}

fn history(root: &Path, file: &str) -> Result<()> {
    let mut store = open_history(root)?;
    if !store.load(file) {
        println!("no stored history for {file}");
        return Ok(());
    }
    let Some(log) = store.log(file) else {
        return Ok(());
    };
    for (i, entry) in log.entries.iter().enumerate() {
        let marker = if i == log.index { "*" } else { " " };
        let ts = Utc
            .timestamp_millis_opt(entry.timestamp)
            .single()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| entry.timestamp.to_string());
        println!(
            "{marker} {i:>2}  {ts}  positions={} hidden={} filters={} layout={} closure={}",
            entry.positions.len(),
            entry.hidden.len(),
            entry.filters.len(),
            entry.layout_direction,
            entry.neighborhood_closure.len(),
        );
    }
    Ok(())
}

fn step(root: &Path, file: &str, back: bool) -> Result<()> {
    let mut store = open_history(root)?;
    anyhow::ensure!(store.load(file), "no stored history for {file}");
    let moved = if back { store.undo(file) } else { store.redo(file) };
    match moved {
        HistoryMove::Moved(_) => {
            let idx = store.index(file).unwrap_or(0);
            println!("{file}: now at entry {idx} of {}", store.len(file));
        }
        HistoryMove::Exhausted => {
            println!("{file}: nothing to {}", if back { "undo" } else { "redo" });
        }
    }
    anyhow::ensure!(!store.is_degraded(file), "history for {file} could not be saved");
    Ok(())
}

fn clear(root: &Path, file: &str) -> Result<()> {
    let report = ensure_initialized(root)?;
    let gateway = open_gateway(&report.config.storage)?;
    let clock = Arc::new(SystemClock::new());
    let mut store = HistoryStore::new(report.config.history.clone(), gateway.clone(), clock.clone());
    store.clear(file);
    PositionCache::new(gateway, clock, report.config.history.debounce_ms).clear(file);
    println!("cleared stored view state for {file}");
    Ok(())
}
