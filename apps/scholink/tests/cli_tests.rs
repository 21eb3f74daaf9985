//! Tests for CLI commands against both database backends.

#![allow(clippy::unwrap_used, clippy::panic)]

use scholink::cli::{
    Output, cmd_export, cmd_import, cmd_ingest, cmd_init, cmd_status, open_broker,
    parse_events,
};
use scholink::config::{Backend, Config};
use scholink_core::{CitationQuery, IdentifierRef};
use std::path::Path;
use tempfile::TempDir;

const QUIET: Output = Output {
    json: false,
    quiet: true,
};

fn config(dir: &Path, backend: Backend) -> Config {
    Config {
        database: dir.join(match backend {
            Backend::Redb => "graph.redb",
            Backend::File => "graph.bin",
        }),
        backend,
        ..Config::default()
    }
}

fn event_json(id: &str, kind: &str, source: &str, relation: &str, target: &str) -> String {
    format!(
        r#"{{"ID":"{id}","EventType":"{kind}","Creator":"crossref","Source":"test","Time":"2024-03-01T12:00:00Z","Payload":[{{"Source":{{"ID":"{source}","IDScheme":"DOI"}},"RelationshipType":{{"Name":"{relation}"}},"Target":{{"ID":"{target}","IDScheme":"DOI"}}}}]}}"#
    )
}

const E1: &str = "5c1c3c9e-4a5b-4f3e-9a1d-000000000001";
const E2: &str = "5c1c3c9e-4a5b-4f3e-9a1d-000000000002";
const E3: &str = "5c1c3c9e-4a5b-4f3e-9a1d-000000000003";

fn write_events(dir: &Path, lines: &[String]) -> std::path::PathBuf {
    let path = dir.join("events.jsonl");
    std::fs::write(&path, lines.join("\n")).unwrap();
    path
}

fn cited_by(config: &Config, value: &str) -> usize {
    open_broker(config)
        .unwrap()
        .get_citations(&IdentifierRef::new(value, "doi"), CitationQuery::default())
        .unwrap()
        .citing_sets()
}

// =============================================================================
// PARSING
// =============================================================================

#[test]
fn test_parse_events_formats() {
    let one = event_json(E1, "RelationshipCreated", "10.1/a", "References", "10.1/b");
    let two = event_json(E2, "RelationshipCreated", "10.1/c", "References", "10.1/b");

    assert_eq!(parse_events(&one).unwrap().len(), 1);
    assert_eq!(parse_events(&format!("[{one},{two}]")).unwrap().len(), 2);
    assert_eq!(parse_events(&format!("{one}\n\n{two}\n")).unwrap().len(), 2);
}

#[test]
fn test_parse_events_reports_line() {
    let one = event_json(E1, "RelationshipCreated", "10.1/a", "References", "10.1/b");
    let err = parse_events(&format!("{one}\nnot json\n")).unwrap_err();
    assert!(err.to_string().contains("Line 2"), "{err}");
}

// =============================================================================
// COMMANDS
// =============================================================================

#[test]
fn test_ingest_persists_on_both_backends() {
    for backend in [Backend::Redb, Backend::File] {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path(), backend);
        let file = write_events(
            dir.path(),
            &[
                event_json(E1, "RelationshipCreated", "10.1/a", "References", "10.1/b"),
                event_json(E2, "RelationshipCreated", "10.1/c", "Cites", "10.1/b"),
            ],
        );

        cmd_ingest(&config, QUIET, &file).unwrap();
        assert_eq!(cited_by(&config, "10.1/b"), 2, "{:?}", backend);

        // redelivery is a no-op
        cmd_ingest(&config, QUIET, &file).unwrap();
        let metrics = open_broker(&config).unwrap().metrics().unwrap();
        assert_eq!(metrics.events, 2);
        assert_eq!(metrics.claims, 2);
    }
}

#[test]
fn test_ingest_skips_rejected_events() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path(), Backend::File);
    let file = write_events(
        dir.path(),
        &[
            event_json(E1, "RelationshipCreated", "10.1/a", "References", "10.1/b"),
            // never created
            event_json(E2, "RelationshipDeleted", "10.1/x", "References", "10.1/y"),
            event_json(E3, "RelationshipCreated", "10.1/c", "References", "10.1/b"),
        ],
    );

    cmd_ingest(&config, QUIET, &file).unwrap();
    assert_eq!(cited_by(&config, "10.1/b"), 2);
    assert_eq!(open_broker(&config).unwrap().metrics().unwrap().events, 2);
}

#[test]
fn test_init_refuses_existing_database() {
    for backend in [Backend::Redb, Backend::File] {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path(), backend);

        cmd_init(&config, QUIET, false).unwrap();
        assert!(config.database.exists());
        assert!(cmd_init(&config, QUIET, false).is_err());
        cmd_init(&config, QUIET, true).unwrap();
        cmd_status(&config, QUIET).unwrap();
    }
}

#[test]
fn test_export_then_import_into_file_backend() {
    let dir = TempDir::new().unwrap();
    let source = config(dir.path(), Backend::Redb);
    let file = write_events(
        dir.path(),
        &[event_json(E1, "RelationshipCreated", "10.1/a", "IsCitedBy", "10.1/b")],
    );
    cmd_ingest(&source, QUIET, &file).unwrap();

    let exported = dir.path().join("graph.export");
    cmd_export(&source, QUIET, &exported).unwrap();

    let target = config(dir.path(), Backend::File);
    cmd_import(&target, QUIET, &exported).unwrap();

    // "a IsCitedBy b" is stored as b Cites a
    assert_eq!(cited_by(&target, "10.1/a"), 1);
    assert_eq!(
        open_broker(&source).unwrap().export_canonical().unwrap(),
        open_broker(&target).unwrap().export_canonical().unwrap()
    );
}

#[test]
fn test_import_rejected_for_redb() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path(), Backend::Redb);
    let input = dir.path().join("graph.export");
    std::fs::write(&input, b"irrelevant").unwrap();

    assert!(cmd_import(&config, QUIET, &input).is_err());
}

#[test]
fn test_import_rejects_corrupt_file() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path(), Backend::File);
    let input = dir.path().join("graph.export");
    std::fs::write(&input, b"\x04\x00\x00\x00junk").unwrap();

    assert!(cmd_import(&config, QUIET, &input).is_err());
    assert!(!config.database.exists());
}
