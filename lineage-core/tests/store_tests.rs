use std::fs;
use std::sync::Arc;

use serde_json::json;
use tempfile::tempdir;

use lineage_core::CoreConfig;
use lineage_core::commands::ensure_initialized;
use lineage_core::config::StorageBackend;
use lineage_core::services::{
    FileGateway, GatewayError, MemoryGateway, PersistenceGateway, SqliteGateway, open_gateway,
};
use lineage_core::utils::path::sanitize_key;

fn round_trip(gw: &dyn PersistenceGateway) {
    let key = "history::reports/q3 orders.csv";
    assert!(gw.get(key).expect("get missing").is_none());

    gw.put(key, &json!({ "entries": [], "index": 0 })).expect("put");
    gw.put(key, &json!({ "entries": [1, 2], "index": 1 })).expect("overwrite");
    let v = gw.get(key).expect("get").expect("present");
    assert_eq!(v["index"], 1);
    assert_eq!(v["entries"].as_array().map(Vec::len), Some(2));

    // Keys are independent.
    gw.put("positions::other.csv", &json!({})).expect("put other");
    gw.remove(key).expect("remove");
    assert!(gw.get(key).expect("get removed").is_none());
    assert!(gw.get("positions::other.csv").expect("get other").is_some());

    // Removing twice is fine.
    gw.remove(key).expect("remove again");
}

#[test]
fn memory_gateway_round_trip() {
    let gw = MemoryGateway::new();
    round_trip(&gw);
    assert_eq!(gw.len(), 1);
}

#[test]
fn file_gateway_round_trip() {
    let dir = tempdir().expect("tempdir");
    let gw = FileGateway::open(dir.path().join("records")).expect("open");
    round_trip(&gw);
    // No temp files left behind.
    let leftovers: Vec<_> = fs::read_dir(dir.path().join("records"))
        .expect("read_dir")
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|x| x == "tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn file_gateway_reports_corrupt_records() {
    let dir = tempdir().expect("tempdir");
    let gw = FileGateway::open(dir.path()).expect("open");
    let key = "history::broken.csv";
    fs::write(dir.path().join(format!("{}.json", sanitize_key(key))), b"{ not json").expect("write");
    assert!(matches!(gw.get(key), Err(GatewayError::Encode { .. })));
}

#[test]
fn sqlite_gateway_round_trip_and_reopen() {
    let dir = tempdir().expect("tempdir");
    let db = dir.path().join("nested").join("lineage.db");
    {
        let gw = SqliteGateway::open(&db).expect("open");
        round_trip(&gw);
        gw.put("history::keep.csv", &json!({ "index": 3 })).expect("put");
        let keys = gw.keys().expect("keys");
        assert_eq!(keys, vec!["history::keep.csv", "positions::other.csv"]);
    }
    let gw = SqliteGateway::open(&db).expect("reopen");
    let v = gw.get("history::keep.csv").expect("get").expect("present");
    assert_eq!(v["index"], 3);
}

#[test]
fn sanitized_keys_are_distinct_and_safe() {
    let a = sanitize_key("history::a/b.csv");
    let b = sanitize_key("history::a_b.csv");
    assert_ne!(a, b);
    assert!(!a.contains('/') && !a.contains(':'));
    assert_eq!(sanitize_key("plain-key_1.csv"), "plain-key_1.csv");
}

// ---------- config ----------

#[test]
fn config_defaults() {
    let cfg = CoreConfig::default();
    assert_eq!(cfg.history.limit, 20);
    assert_eq!(cfg.history.debounce_ms, 120);
    assert_eq!(cfg.history.jitter_threshold, 2.0);
    assert_eq!(cfg.history.signature_sample, 20);
    assert_eq!(cfg.history.precision, 5);
    assert_eq!(cfg.filter.max_items, 4000);
    assert_eq!(cfg.filter.retention_ratio, 0.85);
    assert_eq!(cfg.storage.backend, StorageBackend::Sqlite);
}

#[test]
fn config_partial_toml_keeps_other_defaults() {
    let cfg = CoreConfig::from_toml_str(
        r#"
        [history]
        limit = 5

        [storage]
        backend = "file"
        "#,
    )
    .expect("parse");
    assert_eq!(cfg.history.limit, 5);
    assert_eq!(cfg.history.debounce_ms, 120);
    assert_eq!(cfg.filter.max_items, 4000);
    assert_eq!(cfg.storage.backend, StorageBackend::File);
}

#[test]
fn config_out_of_range_values_are_clamped() {
    let cfg = CoreConfig::from_toml_str(
        r#"
        [history]
        limit = 0
        jitter_threshold = -1.0
        precision = 40

        [filter]
        retention_ratio = 1.5
        "#,
    )
    .expect("parse");
    assert_eq!(cfg.history.limit, 1);
    assert_eq!(cfg.history.jitter_threshold, 2.0);
    assert_eq!(cfg.history.precision, 12);
    assert_eq!(cfg.filter.retention_ratio, 0.85);
}

#[test]
fn config_rejects_unknown_backend() {
    assert!(CoreConfig::from_toml_str("[storage]\nbackend = \"redis\"\n").is_err());
}

#[test]
fn config_load_without_file_resolves_paths_under_root() {
    let dir = tempdir().expect("tempdir");
    let cfg = CoreConfig::load(dir.path()).expect("load");
    assert_eq!(cfg.storage.db_path, dir.path().join("lineage.db"));
    assert_eq!(cfg.storage.records_dir, dir.path().join("records"));
}

// ---------- init ----------

#[test]
fn init_creates_root_and_is_idempotent() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path().join(".lineage");

    let first = ensure_initialized(&root).expect("init");
    assert!(first.created.contains(&"config.toml".to_string()));
    assert!(first.created.contains(&"records".to_string()));
    assert!(root.join("config.toml").exists());
    assert!(root.join("records").is_dir());
    assert_eq!(first.config.history.limit, 20);

    let second = ensure_initialized(&root).expect("init again");
    assert!(second.created.is_empty());
    assert!(second.existed.contains(&"config.toml".to_string()));
}

#[test]
fn init_respects_an_existing_config() {
    let dir = tempdir().expect("tempdir");
    fs::write(
        dir.path().join("config.toml"),
        "[history]\nlimit = 7\n[storage]\nbackend = \"memory\"\n",
    )
    .expect("write config");
    let report = ensure_initialized(dir.path()).expect("init");
    assert_eq!(report.config.history.limit, 7);
    assert_eq!(report.config.storage.backend, StorageBackend::Memory);
}

#[test]
fn open_gateway_follows_backend() {
    let dir = tempdir().expect("tempdir");
    for backend in ["sqlite", "file", "memory"] {
        let root = dir.path().join(backend);
        fs::create_dir_all(&root).expect("mkdir");
        fs::write(
            root.join("config.toml"),
            format!("[storage]\nbackend = \"{backend}\"\n"),
        )
        .expect("write config");
        let report = ensure_initialized(&root).expect("init");
        let gw: Arc<dyn PersistenceGateway> = open_gateway(&report.config.storage).expect("open");
        gw.put("history::x.csv", &json!({ "index": 0 })).expect("put");
        assert!(gw.get("history::x.csv").expect("get").is_some());
    }
    assert!(dir.path().join("sqlite").join("lineage.db").exists());
}
