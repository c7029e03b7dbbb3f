//! Harvest progress reporting.
//!
//! Reports observable progress during `harvest run` so users can see which
//! partition is being worked on and how far along it is. Progress is emitted
//! on **stderr**, separate from `tracing` logs, so stdout stays parseable.

use std::io::Write;

use crate::pipeline::PartitionReport;

/// A single progress event for a run.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// Root fetched; `replies` direct replies will be visited.
    PartitionStarted { year: i32, replies: usize },
    /// `n` of `total` replies handled for this partition.
    ReplyDone {
        year: i32,
        n: usize,
        total: usize,
        extracted: usize,
    },
    PartitionFinished(PartitionReport),
}

/// Reports run progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "[2024]  replies  120 / 1,031  (17 extracted)".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::PartitionStarted { year, replies } => {
                format!("[{}]  harvesting {} replies\n", year, format_number(*replies))
            }
            ProgressEvent::ReplyDone {
                year,
                n,
                total,
                extracted,
            } => format!(
                "[{}]  replies  {} / {}  ({} extracted)\n",
                year,
                format_number(*n),
                format_number(*total),
                format_number(*extracted)
            ),
            ProgressEvent::PartitionFinished(report) => {
                format!("[{}]  {}\n", report.year, report.state.label())
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::PartitionStarted { year, replies } => serde_json::json!({
                "event": "partition_started",
                "year": year,
                "replies": replies
            }),
            ProgressEvent::ReplyDone {
                year,
                n,
                total,
                extracted,
            } => serde_json::json!({
                "event": "progress",
                "year": year,
                "n": n,
                "total": total,
                "extracted": extracted
            }),
            ProgressEvent::PartitionFinished(report) => serde_json::json!({
                "event": "partition_finished",
                "year": report.year,
                "state": report.state.label(),
                "attempted": report.attempted,
                "extracted": report.extracted,
                "rejected": report.rejected,
                "extraction_errors": report.extraction_errors,
                "circuit_open": report.circuit_open,
                "fetch_failures": report.harvest.fetch_failures,
                "skipped_empty": report.harvest.skipped_empty
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Thousands separators: `1234567` → `"1,234,567"`.
pub fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
