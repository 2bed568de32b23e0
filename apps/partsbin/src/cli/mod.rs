//! # partsbin CLI Module
//!
//! This module implements the CLI interface for partsbin.
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `status` - Show catalog row counts
//! - `init` - Initialize a new database
//! - `query` - Filter items with a query expression
//! - `keys` - Show attribute key usage
//! - `tree` - Print a category, container or template subtree
//! - `item show` - Show one item with its attributes and locations

mod commands;

use crate::config::{Backend, Config};
use clap::{Parser, Subcommand};
use partsbin_core::CatalogError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// partsbin - inventory catalog server
///
/// Items with typed attributes, organised in category, container and
/// template trees.
#[derive(Parser, Debug)]
#[command(name = "partsbin")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to a partsbin.toml configuration file
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the catalog database (overrides the configuration)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Storage backend (overrides the configuration)
    #[arg(short = 'B', long, global = true, value_enum)]
    pub backend: Option<Backend>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show catalog status
    Status,

    /// Initialize a new empty database
    Init {
        /// Force initialization even if database exists
        #[arg(short, long)]
        force: bool,
    },

    /// Filter items, e.g. `resistance>=1000 & package=SMD`
    Query {
        /// Filter expression
        filter: String,
    },

    /// Show attribute keys and how often they are used
    Keys {
        /// Only keys used at least this many times
        #[arg(short, long, default_value = "0")]
        at_least: usize,
    },

    /// Print a subtree of the category, container or template tree
    Tree {
        /// Tree to print (category, container, template)
        kind: String,

        /// Node to start from
        #[arg(short, long, default_value = "0")]
        id: u64,

        /// Levels below the start node
        #[arg(short, long, default_value = "1")]
        depth: usize,
    },

    /// Item operations
    Item {
        #[command(subcommand)]
        command: ItemCommands,
    },
}

/// Item subcommands.
#[derive(Subcommand, Debug)]
pub enum ItemCommands {
    /// Show an item with its attributes and locations
    Show {
        /// Item ID
        id: u64,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

impl Cli {
    /// Configuration file, then environment, then these flags.
    pub fn resolve_config(&self) -> Result<Config, CatalogError> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(database) = &self.database {
            config.storage.path = database.clone();
        }
        if let Some(backend) = self.backend {
            config.storage.backend = backend;
        }
        Ok(config)
    }
}

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), CatalogError> {
    let mut config = cli.resolve_config()?;
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Server { host, port }) => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            cmd_server(&config, cli.verbose).await
        }
        Some(Commands::Status) => cmd_status(&config, json_mode),
        Some(Commands::Init { force }) => cmd_init(&config, force),
        Some(Commands::Query { filter }) => cmd_query(&config, json_mode, cli.verbose, &filter),
        Some(Commands::Keys { at_least }) => cmd_keys(&config, json_mode, at_least),
        Some(Commands::Tree { kind, id, depth }) => cmd_tree(&config, json_mode, &kind, id, depth),
        Some(Commands::Item {
            command: ItemCommands::Show { id },
        }) => cmd_item_show(&config, json_mode, id),
        None => cmd_status(&config, json_mode),
    }
}
