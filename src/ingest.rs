//! `harvest run` driver.
//!
//! Resolves which partitions to crawl (explicit `--year`, then the
//! `UPDATE_YEAR` override, then every configured partition), runs the
//! pipeline, and prints a per-partition summary. A dry run only walks the
//! threads and needs no model credentials.

use anyhow::{bail, Result};

use crate::config::{self, Config};
use crate::pipeline::{self, Pipeline, RunSummary};
use crate::progress::ProgressMode;

/// Options for one `harvest run` invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub year: Option<i32>,
    pub limit: Option<usize>,
    pub dry_run: bool,
    pub progress: Option<ProgressMode>,
}

pub async fn run_crawl(config: &Config, opts: RunOptions) -> Result<()> {
    let year = match opts.year {
        Some(y) => Some(y),
        None => config::year_override_from_env()?,
    };
    let partitions = config.select_partitions(year)?;
    let limit = opts.limit.or(config.pipeline.max_comments);

    if opts.dry_run {
        let harvester = pipeline::harvester_from_config(config)?;
        let results = pipeline::dry_run(&harvester, &partitions, limit).await;

        println!("run (dry-run)");
        for (year, stats) in results {
            match stats {
                Some(s) => println!(
                    "  {}: {} replies, {} comments, {} empty, {} fetch failures",
                    year, s.replies, s.comments, s.skipped_empty, s.fetch_failures
                ),
                None => println!("  {}: root unavailable", year),
            }
        }
        return Ok(());
    }

    let progress = opts.progress.unwrap_or_else(ProgressMode::default_for_tty);
    let pipeline = Pipeline::from_config(config)?
        .with_max_comments(limit)
        .with_progress(progress.reporter());

    let summary = pipeline.run(&partitions).await;
    print_summary(&summary);

    let failed = summary.write_failures();
    if !failed.is_empty() {
        bail!("failed to persist partitions: {:?}", failed);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("run");
    for p in &summary.partitions {
        println!(
            "  {}: {} (thread {})",
            p.year,
            p.state.label(),
            p.root_id
        );
        println!(
            "    processed: {}  extracted: {}  rejected: {}  errors: {}",
            p.attempted, p.extracted, p.rejected, p.extraction_errors
        );
        println!(
            "    empty: {}  fetch failures: {}",
            p.harvest.skipped_empty, p.harvest.fetch_failures
        );
        if p.circuit_open > 0 {
            println!(
                "    partial: {} replies skipped behind an open circuit, re-run this year",
                p.circuit_open
            );
        }
        if let Some(path) = &p.path {
            println!("    written: {}", path.display());
        }
        if let Some(err) = &p.error {
            println!("    error: {}", err);
        }
    }
    println!(
        "  total: {} processed, {} extracted",
        summary.attempted(),
        summary.extracted()
    );
    let partial = summary.partial();
    if !partial.is_empty() {
        println!("  partial (re-run): {:?}", partial);
    }
    if summary.write_failures().is_empty() {
        println!("ok");
    }
}
