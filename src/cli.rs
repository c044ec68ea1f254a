use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "txscope")]
#[command(author, version, about = "Request-scoped SQLite transactions and schema migrations")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect to the configured database and verify it answers
    Ping {
        /// Database address (overrides config)
        #[arg(long)]
        url: Option<String>,
    },

    /// Apply, revert, or inspect schema migrations
    Migrate {
        /// Directory containing the migration subdirectory (overrides config)
        #[arg(long, global = true)]
        dir: Option<PathBuf>,

        /// Database address (overrides config)
        #[arg(long, global = true)]
        url: Option<String>,

        #[command(subcommand)]
        action: MigrateAction,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

#[derive(Subcommand, Clone, Copy)]
pub enum MigrateAction {
    /// Apply every pending migration
    Up,

    /// Revert every applied migration
    Down,

    /// List applied and pending migrations
    Status,
}
