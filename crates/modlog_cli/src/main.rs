//! modlog CLI
//!
//! Command-line tools for modlog instances. Every instance lives in a
//! directory holding its `state.json`.
//!
//! # Commands
//!
//! - `init` - Create an instance
//! - `put` / `delete` / `restore` - Edit entities through the logged write path
//! - `log` - Query the modification log
//! - `undo` - Revert logged changes
//! - `replicate` - Pull a master's changes into this instance
//! - `prune` - Drop log entries of entities that no longer exist

mod commands;
mod error;
mod state;

use clap::{Parser, Subcommand};
use commands::QueryArgs;
use modlog_core::{FieldValue, UndoOptions, WriteContext};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// modlog command-line tools.
#[derive(Parser)]
#[command(name = "modlog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the instance directory
    #[arg(global = true, short, long, default_value = ".")]
    path: PathBuf,

    /// Account recorded as the modifier of writes
    #[arg(global = true, short, long, default_value = "admin")]
    account: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new instance
    Init {
        /// Use this instance id instead of a random one
        #[arg(long)]
        instance_id: Option<String>,
    },

    /// Create an entity, or update the live one with --id
    Put {
        /// Model of the entity
        model: String,

        /// Entity id
        #[arg(long)]
        id: Option<String>,

        /// Field assignments (name=value)
        #[arg(value_parser = commands::parse_assignment)]
        fields: Vec<(String, FieldValue)>,
    },

    /// Delete an entity
    Delete {
        /// Model of the entity
        model: String,

        /// Entity id
        id: String,

        /// Remove the entity for good, even for soft-deleted models
        #[arg(long)]
        purge: bool,
    },

    /// Restore a soft-deleted entity
    Restore {
        /// Model of the entity
        model: String,

        /// Entity id
        id: String,
    },

    /// Show modification log entries
    Log {
        #[command(flatten)]
        query: QueryArgs,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Revert the changes recorded by matching log entries
    Undo {
        #[command(flatten)]
        query: QueryArgs,

        /// Revert updates even if the entity changed afterwards
        #[arg(long)]
        overwrite: bool,

        /// Report what would be undone without changing anything
        #[arg(short, long)]
        dry_run: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Pull changes from a master instance
    Replicate {
        /// Directory of the master instance
        #[arg(long)]
        master: PathBuf,

        /// Maximum entries per pull
        #[arg(short, long, default_value = "100")]
        batch_limit: u32,

        /// Keep pulling until caught up
        #[arg(long)]
        all: bool,
    },

    /// Delete log entries of entities that no longer exist
    Prune,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let path = cli.path.as_path();
    let ctx = WriteContext::account(cli.account).with_client("modlog-cli");

    match cli.command {
        Commands::Init { instance_id } => commands::init::run(path, instance_id.as_deref())?,
        Commands::Put { model, id, fields } => {
            commands::edit::run_put(path, &model, id.as_deref(), fields, &ctx)?;
        }
        Commands::Delete { model, id, purge } => {
            commands::edit::run_delete(path, &model, &id, purge, &ctx)?;
        }
        Commands::Restore { model, id } => commands::edit::run_restore(path, &model, &id, &ctx)?,
        Commands::Log { query, format } => commands::log::run(path, &query, &format)?,
        Commands::Undo {
            query,
            overwrite,
            dry_run,
            format,
        } => {
            let options = UndoOptions::default()
                .overwrite(overwrite)
                .dry_run(dry_run);
            commands::undo::run(path, &query, options, &format, &ctx)?;
        }
        Commands::Replicate {
            master,
            batch_limit,
            all,
        } => commands::replicate::run(path, &master, batch_limit, all)?,
        Commands::Prune => commands::prune::run(path)?,
        Commands::Version => {
            println!("modlog CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
