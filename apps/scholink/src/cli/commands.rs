//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use crate::config::{Backend, Config};
use scholink_core::{
    Broker, CitationQuery, GroupType, IdentifierRef, IngestOutcome, RawEvent, ScholinkError,
};
use serde::Serialize;
use std::path::{Path, PathBuf};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum file size for ingestion (100 MB).
const MAX_INGEST_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Maximum file size for import and for the file backend's database (500 MB).
const MAX_IMPORT_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// Maximum number of events read from one ingest file.
const MAX_EVENTS_PER_FILE: usize = 1_000_000;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), ScholinkError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| ScholinkError::Io(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(ScholinkError::Serialization(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Canonicalize an input path and ensure it is a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, ScholinkError> {
    let canonical = path.canonicalize().map_err(|e| {
        ScholinkError::Io(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(ScholinkError::Io(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Canonicalize the parent directory of an output path.
fn validate_output_path(path: &Path) -> Result<PathBuf, ScholinkError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        ScholinkError::Io(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(ScholinkError::Io(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| ScholinkError::Io("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

// =============================================================================
// OUTPUT
// =============================================================================

/// Output switches shared by every command.
#[derive(Debug, Clone, Copy, Default)]
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

impl Output {
    fn print_json<T: Serialize>(self, value: &T) {
        println!(
            "{}",
            serde_json::to_string_pretty(value).unwrap_or_default()
        );
    }

    fn info(self, line: std::fmt::Arguments<'_>) {
        if !self.quiet {
            println!("{}", line);
        }
    }
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show counts and the integrity check.
pub fn cmd_status(config: &Config, out: Output) -> Result<(), ScholinkError> {
    let broker = open_broker(config)?;
    let metrics = broker.metrics()?;
    let violations = broker.verify()?;

    if out.json {
        out.print_json(&serde_json::json!({
            "database": config.database.to_string_lossy(),
            "backend": config.backend.as_str(),
            "metrics": metrics,
            "consistent": violations.is_empty(),
            "violations": violations,
        }));
        return Ok(());
    }

    println!("scholink Status");
    println!("===============");
    println!("Database: {:?}", config.database);
    println!("Backend:  {}", config.backend.as_str());
    println!();
    println!("Identifiers:     {}", metrics.identifiers);
    println!("Identity Groups: {}", metrics.identity_groups);
    println!("Version Groups:  {}", metrics.version_groups);
    println!(
        "Relationships:   {} ({} active)",
        metrics.relationships, metrics.active_relationships
    );
    println!(
        "Claims:          {} ({} retracted)",
        metrics.claims, metrics.retractions
    );
    println!("Events:          {}", metrics.events);
    println!("Identity Edges:  {}", metrics.identity_edges);
    println!("Version Edges:   {}", metrics.version_edges);
    println!(
        "Aliases:         {} per thousand groups",
        metrics.aliases_per_thousand
    );
    println!();
    if violations.is_empty() {
        println!("Integrity:       consistent");
    } else {
        println!("Integrity:       {} violations", violations.len());
        for violation in violations.iter().take(10) {
            println!("  {:?}", violation);
        }
        if violations.len() > 10 {
            println!("  ... and {} more", violations.len() - 10);
        }
    }

    Ok(())
}

// =============================================================================
// INGEST COMMAND
// =============================================================================

/// Totals for one ingest run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub events: usize,
    pub applied: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub relationships_created: usize,
    pub folded: usize,
    pub unfolded: usize,
}

/// Parse an ingest file: a JSON array of events, one event object, or one
/// event per line.
pub fn parse_events(contents: &str) -> Result<Vec<RawEvent>, ScholinkError> {
    let trimmed = contents.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed)
            .map_err(|e| ScholinkError::Serialization(format!("Events: {}", e)));
    }
    if let Ok(event) = serde_json::from_str::<RawEvent>(trimmed) {
        return Ok(vec![event]);
    }
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).map_err(|e| {
                ScholinkError::Serialization(format!("Line {}: {}", n.saturating_add(1), e))
            })
        })
        .collect()
}

/// Ingest events from a file. A rejected event is logged and skipped; the
/// rest of the file is still applied.
pub fn cmd_ingest(config: &Config, out: Output, file: &Path) -> Result<(), ScholinkError> {
    tracing::info!("Ingesting from {:?}", file);

    let validated_path = validate_file_path(file)?;
    validate_file_size(&validated_path, MAX_INGEST_FILE_SIZE)?;
    let contents = std::fs::read_to_string(&validated_path)
        .map_err(|e| ScholinkError::Io(format!("Read file: {}", e)))?;

    let events = parse_events(&contents)?;
    if events.len() > MAX_EVENTS_PER_FILE {
        return Err(ScholinkError::Serialization(format!(
            "Event count {} exceeds maximum allowed {}",
            events.len(),
            MAX_EVENTS_PER_FILE
        )));
    }

    let broker = open_broker(config)?;
    let mut summary = IngestSummary {
        events: events.len(),
        ..IngestSummary::default()
    };

    for raw in &events {
        match broker.ingest_raw(raw) {
            Ok(IngestOutcome::Applied(report)) => {
                summary.applied += 1;
                summary.relationships_created += report.relationships_created;
                summary.folded += report.folded;
                summary.unfolded += report.unfolded;
            }
            Ok(IngestOutcome::Duplicate(_)) => summary.duplicates += 1,
            Err(e) => {
                tracing::warn!(event = %raw.id, error = %e, "rejected event");
                summary.rejected += 1;
            }
        }
    }

    save_broker(&broker, config)?;

    if out.json {
        out.print_json(&summary);
        return Ok(());
    }

    out.info(format_args!(
        "Ingested {} events: {} applied, {} duplicates, {} rejected",
        summary.events, summary.applied, summary.duplicates, summary.rejected
    ));
    out.info(format_args!(
        "{} new relationships, {} folded, {} unfolded",
        summary.relationships_created, summary.folded, summary.unfolded
    ));

    Ok(())
}

// =============================================================================
// QUERY COMMANDS
// =============================================================================

/// Who cites a work.
pub fn cmd_citations(
    config: &Config,
    out: Output,
    value: &str,
    scheme: &str,
    query: CitationQuery,
) -> Result<(), ScholinkError> {
    let broker = open_broker(config)?;
    let identifier = IdentifierRef::new(value, scheme);
    let citations = broker.get_citations(&identifier, query)?;

    if out.json {
        let entries: Vec<_> = citations.iter().collect();
        out.print_json(&serde_json::json!({
            "identifier": identifier,
            "citing_sets": citations.citing_sets(),
            "entries": entries,
        }));
        return Ok(());
    }

    out.info(format_args!(
        "Citations of {}:{} ({} citing works)",
        identifier.scheme,
        identifier.value,
        citations.citing_sets()
    ));
    let citing = citations.citing_sets();
    for (index, entry) in citations.iter().enumerate() {
        let names: Vec<&str> = entry.identifiers.iter().map(|i| i.value.as_str()).collect();
        if index < citing {
            println!("  [{}]", names.join(", "));
        } else {
            println!("  frontier [{}]", names.join(", "));
        }
        for rel in &entry.relationships {
            println!(
                "    {} {} {}",
                rel.source.value, rel.relation, rel.target.value
            );
        }
    }

    Ok(())
}

/// Direct group-level edges of one relation.
pub fn cmd_relations(
    config: &Config,
    out: Output,
    value: &str,
    scheme: &str,
    relation: &str,
    grouping: GroupType,
) -> Result<(), ScholinkError> {
    let broker = open_broker(config)?;
    let identifier = IdentifierRef::new(value, scheme);
    let results = broker.get_citations2(&identifier, relation, grouping)?;

    if out.json {
        out.print_json(&results);
        return Ok(());
    }

    out.info(format_args!(
        "{} of {}:{} at {:?} level ({} groups)",
        relation,
        identifier.scheme,
        identifier.value,
        grouping,
        results.len()
    ));
    for result in &results {
        let names: Vec<&str> = result
            .identifiers
            .iter()
            .map(|i| i.value.as_str())
            .collect();
        println!(
            "  group {} [{}] via {} edge(s)",
            result.group.id.0,
            names.join(", "),
            result.edges.len()
        );
    }

    Ok(())
}

// =============================================================================
// EXPORT / IMPORT COMMANDS
// =============================================================================

/// Export the graph in canonical format.
pub fn cmd_export(config: &Config, out: Output, output: &Path) -> Result<(), ScholinkError> {
    let validated_output = validate_output_path(output)?;
    let broker = open_broker(config)?;

    let data = broker.export_canonical()?;
    let checksum = broker.canonical_checksum()?;
    std::fs::write(&validated_output, &data)
        .map_err(|e| ScholinkError::Io(format!("Write file: {}", e)))?;

    if out.json {
        out.print_json(&serde_json::json!({
            "output": validated_output.to_string_lossy(),
            "bytes": data.len(),
            "checksum": checksum,
        }));
        return Ok(());
    }

    out.info(format_args!("Checksum: {}", checksum));
    out.info(format_args!(
        "Exported {} bytes to {:?}",
        data.len(),
        validated_output
    ));
    Ok(())
}

/// Import a canonical export into the file backend.
pub fn cmd_import(config: &Config, out: Output, input: &Path) -> Result<(), ScholinkError> {
    if config.backend == Backend::Redb {
        return Err(ScholinkError::Serialization(
            "Import to redb not supported. Use the file backend.".to_string(),
        ));
    }

    let validated_path = validate_file_path(input)?;
    validate_file_size(&validated_path, MAX_IMPORT_FILE_SIZE)?;
    let data = std::fs::read(&validated_path)
        .map_err(|e| ScholinkError::Io(format!("Read file: {}", e)))?;

    let broker = Broker::from_canonical(&data)?;
    save_broker(&broker, config)?;

    let metrics = broker.metrics()?;
    if out.json {
        out.print_json(&metrics);
        return Ok(());
    }
    out.info(format_args!(
        "Imported graph: {} identifiers, {} relationships",
        metrics.identifiers, metrics.relationships
    ));
    Ok(())
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize a new database.
pub fn cmd_init(config: &Config, out: Output, force: bool) -> Result<(), ScholinkError> {
    let db_path = &config.database;
    if db_path.exists() {
        if !force {
            return Err(ScholinkError::Io(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(db_path)
            .map_err(|e| ScholinkError::Io(format!("Remove db: {}", e)))?;
    }

    match config.backend {
        Backend::Redb => {
            Broker::with_redb(db_path)?;
        }
        Backend::File => {
            save_broker(&Broker::in_memory()?, config)?;
        }
    }
    out.info(format_args!(
        "Initialized new {} database at {:?}",
        config.backend.as_str(),
        db_path
    ));
    Ok(())
}

// =============================================================================
// HASH COMMAND
// =============================================================================

/// Compute the BLAKE3 hash of the canonical export.
pub fn cmd_hash(config: &Config, out: Output) -> Result<(), ScholinkError> {
    let broker = open_broker(config)?;
    let hash = broker.canonical_crypto_hash()?;

    if out.json {
        out.print_json(&serde_json::json!({ "algorithm": "blake3", "hash": hash }));
    } else {
        println!("{}", hash);
    }
    Ok(())
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Open the configured database, creating it when absent.
pub fn open_broker(config: &Config) -> Result<Broker, ScholinkError> {
    match config.backend {
        Backend::Redb => Broker::with_redb(&config.database),
        Backend::File => {
            if config.database.exists() {
                validate_file_size(&config.database, MAX_IMPORT_FILE_SIZE)?;
                let data = std::fs::read(&config.database)
                    .map_err(|e| ScholinkError::Io(format!("Read db: {}", e)))?;
                Broker::from_canonical(&data)
            } else {
                Broker::in_memory()
            }
        }
    }
}

/// Persist an in-memory broker as a canonical export. redb writes are
/// already durable.
pub fn save_broker(broker: &Broker, config: &Config) -> Result<(), ScholinkError> {
    if broker.is_persistent() {
        return Ok(());
    }
    let data = broker.export_canonical()?;
    std::fs::write(&config.database, &data)
        .map_err(|e| ScholinkError::Io(format!("Write db: {}", e)))
}
