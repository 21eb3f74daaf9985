//! # scholink - Scholarly Identifier Broker
//!
//! The main binary for the scholink deduplication broker.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │            apps/scholink (THE BINARY)         │
//! │                                              │
//! │   ┌─────────────┐        ┌──────────────┐    │
//! │   │    CLI      │        │    Config    │    │
//! │   │   (clap)    │        │    (toml)    │    │
//! │   └──────┬──────┘        └──────┬───────┘    │
//! │          └───────────┬──────────┘            │
//! │                      ▼                       │
//! │              ┌───────────────┐               │
//! │              │ scholink-core │               │
//! │              │  (THE LOGIC)  │               │
//! │              └───────────────┘               │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! scholink init
//! scholink ingest -f events.jsonl
//! scholink citations 10.1234/abc --parents --siblings
//! scholink relations 10.1234/abc -r IsCitedBy -g version
//! ```

use clap::Parser;
use scholink::cli;
use scholink::config::{Config, LOG_FORMAT_ENV, LogFormat};
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    let config = match Config::discover(cli.config.as_deref(), Path::new(".")) {
        Ok(mut config) => {
            config.override_with(cli.database.clone(), cli.backend);
            config
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the config file; --verbose only raises the default.
    let default_filter = if cli.verbose {
        "scholink=debug,scholink_core=debug".to_string()
    } else {
        config.log.filter.clone()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let env_format = std::env::var(LOG_FORMAT_ENV).ok();
    match config.log.effective_format(env_format.as_deref()) {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli, &config) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the scholink startup banner.
fn print_banner() {
    println!("scholink v{} - scholarly identifier broker\n", env!("CARGO_PKG_VERSION"));
}
