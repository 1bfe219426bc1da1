//! CLI for the `bx` background transfer engine.
//!
//! A thin debugging surface over [`bx_core::engine::Engine`]: `bx run`
//! spins up one engine in-process, enqueues whatever downloads were given
//! on the command line, and drives them to completion, printing
//! status/progress lines as they arrive.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{run_checksum, run_engine};

#[derive(Debug, Parser)]
#[command(name = "bx")]
#[command(about = "bx: background HTTP transfer engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Enqueue one or more downloads and run them to completion.
    Run {
        /// Direct HTTP/HTTPS URLs to download.
        urls: Vec<String>,

        /// Directory to save files in (default: current directory).
        #[arg(long, value_name = "DIR")]
        dest: Option<std::path::PathBuf>,

        /// Group name shared by every task enqueued this run.
        #[arg(long, default_value = "default")]
        group: String,

        /// Scheduling priority (0 = highest, 10 = lowest).
        #[arg(long, default_value_t = 5)]
        priority: u8,

        /// Retry attempts on a retryable failure.
        #[arg(long, default_value_t = 0)]
        retries: u32,

        /// Maximum total concurrent transfers (0 = unlimited).
        #[arg(long)]
        max_concurrent: Option<usize>,

        /// Maximum concurrent transfers per URL host (0 = unlimited).
        #[arg(long)]
        max_concurrent_by_host: Option<usize>,

        /// Maximum concurrent transfers per group (0 = unlimited).
        #[arg(long)]
        max_concurrent_by_group: Option<usize>,
    },

    /// Compute SHA-256 of a file (e.g. after a download completes).
    Checksum {
        /// Path to the file.
        path: String,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        match cli.command {
            CliCommand::Run {
                urls,
                dest,
                group,
                priority,
                retries,
                max_concurrent,
                max_concurrent_by_host,
                max_concurrent_by_group,
            } => {
                run_engine(commands::RunArgs {
                    urls,
                    dest,
                    group,
                    priority,
                    retries,
                    max_concurrent,
                    max_concurrent_by_host,
                    max_concurrent_by_group,
                })
                .await
            }
            CliCommand::Checksum { path } => run_checksum(std::path::Path::new(&path)).await,
        }
    }
}

#[cfg(test)]
mod tests;
