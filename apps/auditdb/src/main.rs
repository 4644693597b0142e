//! # auditdb - Audit Database CLI
//!
//! Inspect and maintain the database of one security audit.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │           apps/auditdb (THE BINARY)       │
//! │                                           │
//! │   ┌──────────────┐                        │
//! │   │     CLI      │                        │
//! │   │   (clap)     │                        │
//! │   └──────┬───────┘                        │
//! │          ▼                                │
//! │   ┌──────────────┐                        │
//! │   │ auditdb-core │                        │
//! │   │ (THE STORE)  │                        │
//! │   └──────────────┘                        │
//! └───────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! auditdb --database audit.db init --domain example.com
//! auditdb --database audit.db info
//! auditdb --database audit.db keys -t resource
//! auditdb --database audit.db log --plugin spider --per-page 50
//! auditdb --database audit.db dump -o audit.json
//! ```

use auditdb::cli;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // AUDITDB_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("AUDITDB_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "auditdb=info,auditdb_core=warn".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
