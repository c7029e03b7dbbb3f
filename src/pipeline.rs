//! Run orchestration.
//!
//! Coordinates the full flow per partition: root fetch → reply harvest →
//! extraction → partition write. Partitions run newest first, one at a time.
//! Within a partition a pool of workers fetches and extracts replies; the
//! shared [`RateLimiter`] paces model calls and records are written in
//! thread order regardless of which worker finished first.
//!
//! Failure containment:
//! - a reply that fails to fetch or extract is counted and skipped
//! - a root that cannot be fetched ends only its partition, nothing is written
//! - a failed write leaves the previous partition file untouched
//!
//! ```text
//! Pending → RootFetching ─┬→ RootFailed
//!                         └→ Harvesting/Extracting → Writing ─┬→ Done
//!                                                             └→ WriteFailed
//! ```

use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::ExtractionError;
use crate::extract::{ChatCompletionClient, ExtractionEngine};
use crate::fetcher::HttpItemFetcher;
use crate::harvest::{HarvestStats, Harvester, ReplyOutcome};
use crate::models::{ExtractionRequest, ExtractionResult, ItemId, Partition, ProjectRecord};
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};
use crate::retry::{CircuitBreaker, RateLimiter, RetryPolicy};
use crate::store::PartitionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    Pending,
    RootFetching,
    RootFailed,
    Harvesting,
    Extracting,
    Writing,
    Done,
    WriteFailed,
}

impl PartitionState {
    pub fn label(&self) -> &'static str {
        match self {
            PartitionState::Pending => "pending",
            PartitionState::RootFetching => "root-fetching",
            PartitionState::RootFailed => "root-failed",
            PartitionState::Harvesting => "harvesting",
            PartitionState::Extracting => "extracting",
            PartitionState::Writing => "writing",
            PartitionState::Done => "done",
            PartitionState::WriteFailed => "write-failed",
        }
    }
}

/// Outcome of one partition.
#[derive(Debug, Clone)]
pub struct PartitionReport {
    pub year: i32,
    pub root_id: ItemId,
    pub state: PartitionState,
    pub harvest: HarvestStats,
    /// Replies not skipped for lack of text: submitted for extraction, or
    /// lost to a fetch failure.
    pub attempted: usize,
    pub extracted: usize,
    pub rejected: usize,
    pub extraction_errors: usize,
    /// Extraction errors that failed fast on an open circuit. Non-zero means
    /// the written file is partial and the year should be re-run.
    pub circuit_open: usize,
    pub path: Option<PathBuf>,
    pub error: Option<String>,
}

impl PartitionReport {
    fn new(partition: Partition) -> Self {
        Self {
            year: partition.year,
            root_id: partition.root_id,
            state: PartitionState::Pending,
            harvest: HarvestStats::default(),
            attempted: 0,
            extracted: 0,
            rejected: 0,
            extraction_errors: 0,
            circuit_open: 0,
            path: None,
            error: None,
        }
    }

    fn tally(&mut self, outcome: &ItemOutcome) {
        self.harvest.replies += 1;
        match outcome {
            ItemOutcome::Empty => self.harvest.skipped_empty += 1,
            ItemOutcome::FetchFailed => {
                self.harvest.fetch_failures += 1;
                self.attempted += 1;
            }
            other => {
                self.harvest.comments += 1;
                self.attempted += 1;
                match other {
                    ItemOutcome::Accepted(_) => self.extracted += 1,
                    ItemOutcome::Rejected => self.rejected += 1,
                    ItemOutcome::ExtractionFailed { circuit_open } => {
                        self.extraction_errors += 1;
                        if *circuit_open {
                            self.circuit_open += 1;
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

/// All partition reports of one run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub partitions: Vec<PartitionReport>,
}

impl RunSummary {
    pub fn extracted(&self) -> usize {
        self.partitions.iter().map(|p| p.extracted).sum()
    }

    pub fn attempted(&self) -> usize {
        self.partitions.iter().map(|p| p.attempted).sum()
    }

    /// Partitions written with replies skipped behind an open circuit.
    pub fn partial(&self) -> Vec<i32> {
        self.partitions
            .iter()
            .filter(|p| p.circuit_open > 0)
            .map(|p| p.year)
            .collect()
    }

    /// Partitions that could not be persisted and must be re-run.
    pub fn write_failures(&self) -> Vec<i32> {
        self.partitions
            .iter()
            .filter(|p| p.state == PartitionState::WriteFailed)
            .map(|p| p.year)
            .collect()
    }
}

/// What happened to a single reply.
#[derive(Debug)]
enum ItemOutcome {
    Empty,
    FetchFailed,
    Rejected,
    Accepted(Box<ProjectRecord>),
    ExtractionFailed { circuit_open: bool },
}

/// Per-partition settings.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub concurrency: usize,
    pub pacing: Duration,
    pub max_comments: Option<usize>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            pacing: Duration::from_millis(100),
            max_comments: None,
        }
    }
}

pub struct Pipeline {
    harvester: Harvester,
    engine: ExtractionEngine,
    store: PartitionStore,
    limiter: Arc<RateLimiter>,
    settings: PipelineSettings,
    progress: Box<dyn ProgressReporter>,
}

/// Build a harvester over the HTTP item API with the configured retry policy.
pub fn harvester_from_config(config: &Config) -> Result<Harvester> {
    let fetcher = HttpItemFetcher::new(&config.forum)?;
    Ok(Harvester::new(
        Arc::new(fetcher),
        RetryPolicy::from_config(&config.retry),
        Arc::new(CircuitBreaker::from_config("forum", &config.retry)),
    ))
}

impl Pipeline {
    pub fn new(
        harvester: Harvester,
        engine: ExtractionEngine,
        store: PartitionStore,
        settings: PipelineSettings,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(settings.pacing));
        Self {
            harvester,
            engine,
            store,
            limiter,
            settings,
            progress: Box::new(NoProgress),
        }
    }

    /// Wire up HTTP clients, retry, and storage from configuration.
    ///
    /// # Errors
    ///
    /// Fails if the extraction API key is not in the environment.
    pub fn from_config(config: &Config) -> Result<Self> {
        let harvester = harvester_from_config(config)?;
        let client = ChatCompletionClient::from_env(&config.extraction)?;
        let engine = ExtractionEngine::new(
            Arc::new(client),
            RetryPolicy::from_config(&config.retry),
            Arc::new(CircuitBreaker::from_config("completion", &config.retry)),
            &config.extraction.language,
            config.forum.web_url.clone(),
        );
        let settings = PipelineSettings {
            concurrency: config.pipeline.concurrency,
            pacing: Duration::from_millis(config.pipeline.pacing_ms),
            max_comments: config.pipeline.max_comments,
        };
        Ok(Self::new(
            harvester,
            engine,
            PartitionStore::from_config(&config.output),
            settings,
        ))
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_max_comments(mut self, max: Option<usize>) -> Self {
        if max.is_some() {
            self.settings.max_comments = max;
        }
        self
    }

    /// Run every given partition in order. Never aborts early.
    pub async fn run(&self, partitions: &[Partition]) -> RunSummary {
        info!(
            partitions = partitions.len(),
            model = self.engine.model_name(),
            workers = self.settings.concurrency,
            "starting crawl"
        );

        let mut summary = RunSummary::default();
        for partition in partitions {
            let report = self.run_partition(*partition).await;
            summary.partitions.push(report);
        }

        info!(
            attempted = summary.attempted(),
            extracted = summary.extracted(),
            "crawl completed"
        );
        summary
    }

    pub async fn run_partition(&self, partition: Partition) -> PartitionReport {
        let year = partition.year;
        let mut report = PartitionReport::new(partition);

        report.state = PartitionState::RootFetching;
        info!(year, thread = partition.root_id, "processing partition");

        let thread = match self.harvester.open(partition.root_id).await {
            Ok(thread) => thread,
            Err(e) => {
                error!(year, "failed to fetch root item: {}", e);
                report.state = PartitionState::RootFailed;
                report.error = Some(e.to_string());
                self.progress
                    .report(ProgressEvent::PartitionFinished(report.clone()));
                return report;
            }
        };

        report.state = PartitionState::Harvesting;
        let thread = match self.settings.max_comments {
            Some(max) => thread.limit(max),
            None => thread,
        };
        let ids = thread.reply_ids().to_vec();
        info!(year, replies = ids.len(), "found replies");
        self.progress.report(ProgressEvent::PartitionStarted {
            year,
            replies: ids.len(),
        });

        // harvesting and extraction interleave per reply
        report.state = PartitionState::Extracting;
        let mut outcomes = self.process_replies(year, ids, &mut report).await;

        outcomes.sort_by_key(|(idx, _)| *idx);
        let records: Vec<ProjectRecord> = outcomes
            .into_iter()
            .filter_map(|(_, o)| match o {
                ItemOutcome::Accepted(r) => Some(*r),
                _ => None,
            })
            .collect();

        if report.circuit_open > 0 {
            warn!(
                year,
                skipped = report.circuit_open,
                "completion circuit opened mid-partition; output is partial, re-run this year"
            );
        }

        report.state = PartitionState::Writing;
        match self.store.write_partition(year, &records) {
            Ok(path) => {
                info!(
                    year,
                    attempted = report.attempted,
                    extracted = report.extracted,
                    rejected = report.rejected,
                    extraction_errors = report.extraction_errors,
                    fetch_failures = report.harvest.fetch_failures,
                    path = %path.display(),
                    "partition complete"
                );
                report.path = Some(path);
                report.state = PartitionState::Done;
            }
            Err(e) => {
                error!(year, "failed to persist partition: {}", e);
                report.error = Some(e.to_string());
                report.state = PartitionState::WriteFailed;
            }
        }

        self.progress
            .report(ProgressEvent::PartitionFinished(report.clone()));
        report
    }

    /// Fetch and extract every reply with a pool of workers. Returns each
    /// outcome tagged with its position in the thread.
    async fn process_replies(
        &self,
        year: i32,
        ids: Vec<ItemId>,
        report: &mut PartitionReport,
    ) -> Vec<(usize, ItemOutcome)> {
        let total = ids.len();
        let workers = self.settings.concurrency.max(1).min(total);
        let ids = Arc::new(ids);
        let cursor = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::channel::<(usize, ItemOutcome)>(workers.max(1) * 2);

        let mut set = JoinSet::new();
        for _ in 0..workers {
            let worker = ReplyWorker {
                harvester: self.harvester.clone(),
                engine: self.engine.clone(),
                limiter: Arc::clone(&self.limiter),
                year,
            };
            let ids = Arc::clone(&ids);
            let cursor = Arc::clone(&cursor);
            let tx = tx.clone();
            set.spawn(async move {
                loop {
                    let idx = cursor.fetch_add(1, Ordering::SeqCst);
                    let Some(&id) = ids.get(idx) else { break };
                    let outcome = worker.process(id).await;
                    if tx.send((idx, outcome)).await.is_err() {
                        break;
                    }
                }
            });
        }
        // rx closes once every worker has dropped its sender
        drop(tx);

        let mut outcomes = Vec::with_capacity(total);
        while let Some((idx, outcome)) = rx.recv().await {
            report.tally(&outcome);
            self.progress.report(ProgressEvent::ReplyDone {
                year,
                n: report.harvest.replies,
                total,
                extracted: report.extracted,
            });
            if let ItemOutcome::Accepted(record) = &outcome {
                info!(
                    year,
                    extracted = report.extracted,
                    attempted = report.attempted,
                    "extracted: {} - {}",
                    record.name,
                    record.revenue
                );
            }
            outcomes.push((idx, outcome));
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!(year, "reply worker failed: {}", e);
            }
        }

        outcomes
    }
}

#[derive(Clone)]
struct ReplyWorker {
    harvester: Harvester,
    engine: ExtractionEngine,
    limiter: Arc<RateLimiter>,
    year: i32,
}

impl ReplyWorker {
    async fn process(&self, id: ItemId) -> ItemOutcome {
        let item = match self.harvester.fetch_reply(id).await {
            ReplyOutcome::Comment(item) => item,
            ReplyOutcome::Empty(_) => return ItemOutcome::Empty,
            ReplyOutcome::Failed(..) => return ItemOutcome::FetchFailed,
        };

        let Some(request) = ExtractionRequest::from_item(self.year, &item) else {
            return ItemOutcome::Empty;
        };

        self.limiter.acquire().await;
        match self.engine.extract(&request).await {
            Ok(ExtractionResult::Accepted(record)) => ItemOutcome::Accepted(Box::new(record)),
            Ok(ExtractionResult::Rejected) => ItemOutcome::Rejected,
            Err(ExtractionError::CircuitOpen) => {
                debug!(year = self.year, id, "extraction skipped, circuit open");
                ItemOutcome::ExtractionFailed { circuit_open: true }
            }
            Err(e) => {
                warn!(year = self.year, id, "extraction failed: {}", e);
                ItemOutcome::ExtractionFailed {
                    circuit_open: false,
                }
            }
        }
    }
}

/// Harvest without extracting or writing. Returns per-partition counts, or
/// `None` for a partition whose root could not be fetched.
pub async fn dry_run(
    harvester: &Harvester,
    partitions: &[Partition],
    max_comments: Option<usize>,
) -> Vec<(i32, Option<HarvestStats>)> {
    let mut out = Vec::with_capacity(partitions.len());
    for partition in partitions {
        let thread = match harvester.open(partition.root_id).await {
            Ok(t) => t,
            Err(e) => {
                error!(year = partition.year, "failed to fetch root item: {}", e);
                out.push((partition.year, None));
                continue;
            }
        };
        let mut thread = match max_comments {
            Some(max) => thread.limit(max),
            None => thread,
        };
        while thread.next_comment().await.is_some() {}
        out.push((partition.year, Some(thread.stats())));
    }
    out
}
