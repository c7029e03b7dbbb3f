//! # Project Harvest CLI (`harvest`)
//!
//! ## Usage
//!
//! ```bash
//! harvest --config ./config/harvest.toml <command>
//! ```
//!
//! With no command, `harvest` behaves like `harvest run`.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `harvest run` | Crawl partitions and write `projects-<year>.json` files |
//! | `harvest stats` | Summarize persisted records |
//! | `harvest revenue "<text>"` | Show the monthly value parsed from a revenue string |
//! | `harvest partitions` | List configured years and their output files |
//!
//! ## Examples
//!
//! ```bash
//! # Refresh only the current year
//! UPDATE_YEAR=2025 harvest
//!
//! # Crawl 2023 with JSON-lines progress
//! harvest run --year 2023 --progress json
//!
//! # Walk the 2019 thread without calling the model
//! harvest run --year 2019 --dry-run --limit 50
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use project_harvest::config;
use project_harvest::ingest::{self, RunOptions};
use project_harvest::progress::ProgressMode;
use project_harvest::revenue;
use project_harvest::sources;
use project_harvest::stats;

/// Project Harvest: collect indie project records from yearly forum threads.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults.
#[derive(Parser)]
#[command(
    name = "harvest",
    about = "Project Harvest: extract project records from yearly forum threads",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/harvest.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl partitions and persist extracted projects.
    ///
    /// Without `--year`, the `UPDATE_YEAR` environment variable selects a
    /// single partition; otherwise every configured year is crawled, newest
    /// first.
    Run {
        /// Crawl only this year.
        #[arg(long)]
        year: Option<i32>,

        /// Visit at most this many replies per partition.
        #[arg(long)]
        limit: Option<usize>,

        /// Walk threads and report counts without extracting or writing.
        #[arg(long)]
        dry_run: bool,

        /// Progress output on stderr. Defaults to human on a TTY, else off.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Summarize persisted project records.
    Stats,

    /// Parse a free-text revenue string into a monthly amount.
    Revenue { text: String },

    /// List configured partitions and their output files.
    Partitions,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Needs no configuration
    if let Some(Commands::Revenue { text }) = &cli.command {
        println!("{}", revenue::parse_revenue(Some(text.as_str())));
        return Ok(());
    }

    let cfg = config::load_or_default(&cli.config)?;

    match cli.command {
        None => {
            ingest::run_crawl(&cfg, RunOptions::default()).await?;
        }
        Some(Commands::Run {
            year,
            limit,
            dry_run,
            progress,
        }) => {
            let opts = RunOptions {
                year,
                limit,
                dry_run,
                progress,
            };
            ingest::run_crawl(&cfg, opts).await?;
        }
        Some(Commands::Stats) => {
            stats::run_stats(&cfg)?;
        }
        Some(Commands::Partitions) => {
            sources::list_sources(&cfg)?;
        }
        Some(Commands::Revenue { .. }) => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
