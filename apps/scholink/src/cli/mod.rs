//! # scholink CLI Module
//!
//! This module implements the CLI interface for scholink.
//!
//! ## Available Commands
//!
//! - `init` - Initialize a new database
//! - `ingest` - Ingest relationship events from a file
//! - `citations` - Who cites a work, across aliases and versions
//! - `relations` - Direct group-level edges of one relation
//! - `status` - Show counts and the integrity check
//! - `export` - Export the graph in canonical format
//! - `import` - Import a canonical export (file backend only)
//! - `hash` - Compute BLAKE3 cryptographic hash of the graph

mod commands;

use crate::config::{Backend, Config};
use clap::{Parser, Subcommand, ValueEnum};
use scholink_core::{GroupType, ScholinkError};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// scholink - scholarly identifier deduplication broker
///
/// Clusters identifiers of the same work into identity and version groups
/// and answers citation queries across them.
#[derive(Parser, Debug)]
#[command(name = "scholink")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (debug logging when RUST_LOG is unset)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress informational output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the configuration file [default: ./scholink.toml if present]
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the database (overrides the config file)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Storage backend (overrides the config file)
    #[arg(short = 'B', long, global = true, value_enum)]
    pub backend: Option<Backend>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Grouping granularity for `relations`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Grouping {
    Identity,
    Version,
}

impl From<Grouping> for GroupType {
    fn from(grouping: Grouping) -> Self {
        match grouping {
            Grouping::Identity => GroupType::Identity,
            Grouping::Version => GroupType::Version,
        }
    }
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show counts and the integrity check
    Status,

    /// Ingest events from a file (JSON array, one object, or one per line)
    Ingest {
        /// Path to the input file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Who cites a work, counting its aliases
    Citations {
        /// Identifier value
        value: String,

        /// Identifier scheme
        #[arg(short, long, default_value = "doi")]
        scheme: String,

        /// Include parent versions
        #[arg(long)]
        parents: bool,

        /// Include sibling versions (children of the same parents)
        #[arg(long)]
        siblings: bool,

        /// Append the frontier itself as a final entry
        #[arg(long)]
        expand: bool,
    },

    /// Direct group-level edges of one relation
    Relations {
        /// Identifier value
        value: String,

        /// Identifier scheme
        #[arg(short, long, default_value = "doi")]
        scheme: String,

        /// Relation token, e.g. Cites, IsCitedBy, HasVersion
        #[arg(short, long)]
        relation: String,

        /// Group granularity
        #[arg(short, long, value_enum, default_value = "identity")]
        grouping: Grouping,
    },

    /// Export the graph in canonical format
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Import a canonical export (file backend only)
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Initialize a new empty database
    Init {
        /// Force initialization even if database exists
        #[arg(short, long)]
        force: bool,
    },

    /// Compute BLAKE3 cryptographic hash of the graph
    Hash,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments and resolved configuration.
pub fn execute(cli: Cli, config: &Config) -> Result<(), ScholinkError> {
    let out = Output {
        json: cli.json_mode,
        quiet: cli.quiet,
    };

    match cli.command {
        Some(Commands::Status) | None => cmd_status(config, out),
        Some(Commands::Ingest { file }) => cmd_ingest(config, out, &file),
        Some(Commands::Citations {
            value,
            scheme,
            parents,
            siblings,
            expand,
        }) => cmd_citations(
            config,
            out,
            &value,
            &scheme,
            scholink_core::CitationQuery {
                with_parents: parents,
                with_siblings: siblings,
                expand_target: expand,
            },
        ),
        Some(Commands::Relations {
            value,
            scheme,
            relation,
            grouping,
        }) => cmd_relations(config, out, &value, &scheme, &relation, grouping.into()),
        Some(Commands::Export { output }) => cmd_export(config, out, &output),
        Some(Commands::Import { input }) => cmd_import(config, out, &input),
        Some(Commands::Init { force }) => cmd_init(config, out, force),
        Some(Commands::Hash) => cmd_hash(config, out),
    }
}
