//! Summary statistics over persisted projects.
//!
//! Reads every partition through [`PartitionStore::load_all`] and reports
//! counts, monthly-normalized revenue aggregates, the revenue distribution,
//! and the most common stack entries. Used by `harvest stats` to sanity
//! check a crawl.

use anyhow::Result;
use std::collections::{BTreeMap, HashMap};

use crate::config::Config;
use crate::models::ProjectRecord;
use crate::progress::format_number;
use crate::store::PartitionStore;

/// Revenue bands as `(label, exclusive lower bound, inclusive upper bound)`.
const BANDS: [(&str, f64, f64); 5] = [
    ("$0-500", 0.0, 500.0),
    ("$500-1k", 500.0, 1_000.0),
    ("$1k-5k", 1_000.0, 5_000.0),
    ("$5k-10k", 5_000.0, 10_000.0),
    ("$10k+", 10_000.0, f64::INFINITY),
];

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectStats {
    pub total_projects: usize,
    pub with_revenue: usize,
    pub total_monthly: f64,
    pub average_monthly: f64,
    pub max_monthly: f64,
    pub by_year: BTreeMap<i32, usize>,
    pub bands: Vec<(&'static str, usize)>,
    pub top_stack: Vec<(String, usize)>,
}

pub fn compute(projects: &[ProjectRecord]) -> ProjectStats {
    let revenues: Vec<f64> = projects
        .iter()
        .map(ProjectRecord::monthly_revenue)
        .filter(|r| *r > 0.0)
        .collect();

    let total_monthly: f64 = revenues.iter().sum();
    let average_monthly = if revenues.is_empty() {
        0.0
    } else {
        total_monthly / revenues.len() as f64
    };
    let max_monthly = revenues.iter().cloned().fold(0.0, f64::max);

    let mut by_year = BTreeMap::new();
    for p in projects {
        *by_year.entry(p.year).or_insert(0) += 1;
    }

    let bands = BANDS
        .iter()
        .map(|(label, lo, hi)| {
            let count = revenues.iter().filter(|r| **r > *lo && **r <= *hi).count();
            (*label, count)
        })
        .filter(|(_, count)| *count > 0)
        .collect();

    let mut stack_counts: HashMap<&str, usize> = HashMap::new();
    for tech in projects.iter().flat_map(|p| p.stack.iter()) {
        *stack_counts.entry(tech.as_str()).or_insert(0) += 1;
    }
    let mut top_stack: Vec<(String, usize)> = stack_counts
        .into_iter()
        .map(|(name, count)| (name.to_string(), count))
        .collect();
    top_stack.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_stack.truncate(10);

    ProjectStats {
        total_projects: projects.len(),
        with_revenue: revenues.len(),
        total_monthly,
        average_monthly,
        max_monthly,
        by_year,
        bands,
        top_stack,
    }
}

/// Run the stats command: load persisted records and print a summary.
pub fn run_stats(config: &Config) -> Result<()> {
    let store = PartitionStore::from_config(&config.output);
    let projects = store.load_all()?;
    let stats = compute(&projects);

    println!("Project Harvest Stats");
    println!("=====================");
    println!();
    println!("  Data dir:      {}", store.dir().display());
    println!("  Projects:      {}", stats.total_projects);
    println!("  With revenue:  {}", stats.with_revenue);
    println!();
    println!("  Monthly revenue (normalized)");
    println!("    total:   {}", format_money(stats.total_monthly));
    println!("    average: {}", format_money(stats.average_monthly));
    println!("    max:     {}", format_money(stats.max_monthly));

    if !stats.by_year.is_empty() {
        println!();
        println!("  By year:");
        for (year, count) in stats.by_year.iter().rev() {
            let label = if *year == 0 {
                "legacy".to_string()
            } else {
                year.to_string()
            };
            println!("    {:<8} {:>6}", label, count);
        }
    }

    if !stats.bands.is_empty() {
        println!();
        println!("  Revenue distribution:");
        for (label, count) in &stats.bands {
            println!("    {:<10} {:>6}", label, count);
        }
    }

    if !stats.top_stack.is_empty() {
        println!();
        println!("  Top stack:");
        for (tech, count) in &stats.top_stack {
            println!("    {:<24} {:>6}", tech, count);
        }
    }

    println!();
    Ok(())
}

/// Round to whole dollars with thousands separators: `$12,345`.
pub fn format_money(amount: f64) -> String {
    format!("${}", format_number(amount.round().max(0.0) as usize))
}
