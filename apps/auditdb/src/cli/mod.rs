//! # auditdb CLI Module
//!
//! Operator commands over one audit database.
//!
//! ## Available Commands
//!
//! - `init` - Create an audit database
//! - `info` - Show the audit header and table counts
//! - `keys` - List entity identities
//! - `get` - Show one entity or relationship
//! - `pending` - List keys that have not finished a stage
//! - `history` - Show which plugins processed an entity
//! - `log` - Query the audit log
//! - `dump` - Write a JSON snapshot of every table
//! - `compact` - Compact the database file
//! - `config` - Print the configuration stored in a database

mod commands;

use auditdb_core::AuditError;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// auditdb - audit database inspector
///
/// Opens an audit database in-process. Nothing here talks to a running
/// audit; use it on databases that are not being written.
#[derive(Parser, Debug)]
#[command(name = "auditdb")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Database URL (redb://, sqlite://, memory://) or file path
    #[arg(short = 'D', long, global = true)]
    pub database: Option<String>,

    /// Audit name; must match the name stored in the database
    #[arg(short = 'n', long, global = true)]
    pub audit_name: Option<String>,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create an audit database (or open it if it exists)
    Init {
        /// Target domain in scope (repeatable)
        #[arg(long = "domain")]
        domains: Vec<String>,

        /// Target address in scope (repeatable)
        #[arg(long = "address")]
        addresses: Vec<String>,

        /// Root URL in scope (repeatable)
        #[arg(long = "root")]
        roots: Vec<String>,
    },

    /// Show the audit header and table counts
    Info,

    /// List entity identities
    Keys {
        /// Data family (resource, information, vulnerability)
        #[arg(short = 't', long)]
        data_type: Option<String>,

        /// Subtype, e.g. "resource/url"
        #[arg(short, long)]
        subtype: Option<String>,
    },

    /// Show one entity, or a relationship given as "left-right"
    Get {
        /// Identity or relationship key
        key: String,
    },

    /// List keys that have not finished a stage
    Pending {
        /// Stage number
        stage: u32,
    },

    /// Show which plugins processed an entity
    History {
        /// Entity identity
        identity: String,
    },

    /// Query the audit log
    Log {
        /// Only lines from this plugin
        #[arg(short, long)]
        plugin: Option<String>,

        /// Only lines about this entity
        #[arg(short, long)]
        identity: Option<String>,

        /// Page number, starting at 1
        #[arg(long, requires = "per_page")]
        page: Option<usize>,

        /// Lines per page
        #[arg(long)]
        per_page: Option<usize>,
    },

    /// Write a JSON snapshot of every table
    Dump {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Compact the database file
    Compact,

    /// Print the configuration stored in a database
    Config,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), AuditError> {
    let json = cli.json;
    let target = Target {
        database: cli.database,
        audit_name: cli.audit_name,
        config: cli.config,
    };

    match cli.command {
        Some(Commands::Init {
            domains,
            addresses,
            roots,
        }) => cmd_init(&target, json, domains, addresses, roots),
        Some(Commands::Info) | None => cmd_info(&target, json),
        Some(Commands::Keys { data_type, subtype }) => {
            cmd_keys(&target, json, data_type.as_deref(), subtype.as_deref())
        }
        Some(Commands::Get { key }) => cmd_get(&target, json, &key),
        Some(Commands::Pending { stage }) => cmd_pending(&target, json, stage),
        Some(Commands::History { identity }) => cmd_history(&target, json, &identity),
        Some(Commands::Log {
            plugin,
            identity,
            page,
            per_page,
        }) => cmd_log(&target, json, plugin, identity, page, per_page),
        Some(Commands::Dump { output }) => cmd_dump(&target, &output),
        Some(Commands::Compact) => cmd_compact(&target),
        Some(Commands::Config) => cmd_config(&target, json),
    }
}
