pub mod onboard;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "shelfmark",
    about = "Book club goal tracking and reading statistics"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    Onboard,
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    Status,
    Doctor,
    /// Run the dispatcher, nightly rebuild and HTTP API in the foreground.
    Service,
    /// Evaluate a goal for the period containing `--at` (default: now).
    Progress {
        goal_id: i64,
        #[arg(long)]
        at: Option<String>,
    },
    Stats {
        #[command(subcommand)]
        command: StatsCommands,
    },
    /// Apply all pending progress events once.
    Drain,
    /// Recompute statistics from the progress records.
    Rebuild {
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        book: Option<i64>,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    Set { key: String, value: String },
    Get { key: String },
}

#[derive(Debug, Subcommand)]
pub enum StatsCommands {
    User { id: String },
    Book { id: i64 },
}
