//! Dirwatch CLI - dirwatch command

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;
mod output;

/// Dirwatch - report changes to a directory and its immediate children
#[derive(Parser)]
#[command(name = "dirwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a directory (or file) and print its changes
    Watch {
        /// Path to observe
        path: PathBuf,

        /// Observe a symlinked path through its target
        #[arg(long)]
        follow: bool,

        /// Batch interval in milliseconds (default: 100)
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Print every event as it happens instead of batching
        #[arg(long)]
        immediate: bool,

        /// Maximum number of directories watched below the root
        #[arg(long)]
        watch_limit: Option<usize>,

        /// Print newline-delimited JSON
        #[arg(long)]
        json: bool,

        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Show the kernel inotify limits
    Limits,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            path,
            follow,
            interval_ms,
            immediate,
            watch_limit,
            json,
            config,
        } => {
            cmd::watch::run(cmd::watch::WatchArgs {
                path,
                follow,
                interval_ms,
                immediate,
                watch_limit,
                json,
                config,
            })
            .await
        }
        Commands::Limits => cmd::limits::run(),
    }
}
