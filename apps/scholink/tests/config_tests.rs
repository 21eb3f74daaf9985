//! Tests for CLI configuration loading.

#![allow(clippy::unwrap_used, clippy::panic)]

use scholink::config::{Backend, Config, DEFAULT_CONFIG_FILE, LogFormat};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.database, PathBuf::from("scholink.db"));
    assert_eq!(config.backend, Backend::Redb);
    assert_eq!(config.log.format, LogFormat::Text);
    assert_eq!(config.log.filter, "scholink=info,scholink_core=warn");
}

#[test]
fn test_empty_document_is_default() {
    assert_eq!(Config::from_toml("").unwrap(), Config::default());
}

#[test]
fn test_full_document() {
    let config = Config::from_toml(
        r#"
database = "/var/lib/scholink/graph.bin"
backend = "file"

[log]
format = "json"
filter = "scholink=debug"
"#,
    )
    .unwrap();

    assert_eq!(config.database, PathBuf::from("/var/lib/scholink/graph.bin"));
    assert_eq!(config.backend, Backend::File);
    assert_eq!(config.log.format, LogFormat::Json);
    assert_eq!(config.log.filter, "scholink=debug");
}

#[test]
fn test_partial_log_section_keeps_default_filter() {
    let config = Config::from_toml("[log]\nformat = \"json\"\n").unwrap();
    assert_eq!(config.log.format, LogFormat::Json);
    assert_eq!(config.log.filter, "scholink=info,scholink_core=warn");
}

#[test]
fn test_unknown_backend_rejected() {
    assert!(Config::from_toml("backend = \"sqlite\"").is_err());
}

#[test]
fn test_env_overrides_log_format() {
    let log = Config::default().log;
    assert_eq!(log.effective_format(None), LogFormat::Text);
    assert_eq!(log.effective_format(Some("JSON")), LogFormat::Json);
    assert_eq!(log.effective_format(Some(" text ")), LogFormat::Text);
    assert_eq!(log.effective_format(Some("yaml")), LogFormat::Text);
}

#[test]
fn test_discover_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    assert_eq!(Config::discover(None, dir.path()).unwrap(), Config::default());
}

#[test]
fn test_discover_reads_default_file() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(DEFAULT_CONFIG_FILE), "backend = \"file\"\n").unwrap();

    let config = Config::discover(None, dir.path()).unwrap();
    assert_eq!(config.backend, Backend::File);
}

#[test]
fn test_explicit_path_must_exist() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing.toml");
    assert!(Config::discover(Some(&missing), Path::new(".")).is_err());
}

#[test]
fn test_flags_override_file() {
    let mut config = Config::from_toml("database = \"a.db\"\nbackend = \"file\"").unwrap();

    config.override_with(None, None);
    assert_eq!(config.database, PathBuf::from("a.db"));
    assert_eq!(config.backend, Backend::File);

    config.override_with(Some(PathBuf::from("b.db")), Some(Backend::Redb));
    assert_eq!(config.database, PathBuf::from("b.db"));
    assert_eq!(config.backend, Backend::Redb);
}
