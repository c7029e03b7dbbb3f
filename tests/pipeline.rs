//! End-to-end pipeline runs over in-memory item and completion fakes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use project_harvest::error::{ExtractionError, FetchError};
use project_harvest::extract::{CompletionClient, ExtractionEngine};
use project_harvest::fetcher::ItemSource;
use project_harvest::harvest::Harvester;
use project_harvest::models::{ItemId, Partition, ProjectRecord, RawItem};
use project_harvest::pipeline::{PartitionState, Pipeline, PipelineSettings};
use project_harvest::retry::{CircuitBreaker, RetryPolicy};
use project_harvest::store::PartitionStore;

// ============ Fakes ============

#[derive(Default)]
struct MemoryForum {
    items: HashMap<ItemId, RawItem>,
}

impl MemoryForum {
    fn root(mut self, id: ItemId, kids: &[ItemId]) -> Self {
        self.items.insert(
            id,
            RawItem {
                id,
                text: None,
                kids: kids.to_vec(),
                by: Some("whoishiring".to_string()),
                deleted: false,
                dead: false,
            },
        );
        self
    }

    fn comment(mut self, id: ItemId, text: &str) -> Self {
        self.items.insert(
            id,
            RawItem {
                id,
                text: Some(text.to_string()),
                kids: Vec::new(),
                by: Some(format!("user{}", id)),
                deleted: false,
                dead: false,
            },
        );
        self
    }

    fn deleted(mut self, id: ItemId) -> Self {
        self.items.insert(
            id,
            RawItem {
                id,
                text: None,
                kids: Vec::new(),
                by: None,
                deleted: true,
                dead: false,
            },
        );
        self
    }
}

#[async_trait]
impl ItemSource for MemoryForum {
    async fn fetch_item(&self, id: ItemId) -> Result<RawItem, FetchError> {
        self.items
            .get(&id)
            .cloned()
            .ok_or(FetchError::Status { id, status: 503 })
    }
}

/// Answers by looking up the comment text; unknown text is rejected.
struct ScriptedModel {
    replies: HashMap<String, String>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    fn new(pairs: &[(&str, &str)]) -> Self {
        Self {
            replies: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CompletionClient for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _system: &str, user: &str) -> Result<String, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .replies
            .get(user)
            .cloned()
            .unwrap_or_else(|| r#"{"name": null}"#.to_string()))
    }
}

/// Always answers with a retryable upstream error.
struct OverloadedModel {
    calls: AtomicUsize,
}

#[async_trait]
impl CompletionClient for OverloadedModel {
    fn model_name(&self) -> &str {
        "overloaded"
    }

    async fn complete(&self, _system: &str, _user: &str) -> Result<String, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ExtractionError::Status {
            status: 503,
            body: "overloaded".to_string(),
        })
    }
}

fn breaker() -> Arc<CircuitBreaker> {
    Arc::new(CircuitBreaker::new("test", 5, Duration::from_secs(30)))
}

fn pipeline(
    forum: MemoryForum,
    model: Arc<dyn CompletionClient>,
    dir: &std::path::Path,
    concurrency: usize,
) -> Pipeline {
    pipeline_with_breaker(forum, model, breaker(), dir, concurrency)
}

fn pipeline_with_breaker(
    forum: MemoryForum,
    model: Arc<dyn CompletionClient>,
    model_breaker: Arc<CircuitBreaker>,
    dir: &std::path::Path,
    concurrency: usize,
) -> Pipeline {
    let harvester = Harvester::new(Arc::new(forum), RetryPolicy::none(), breaker());
    let engine = ExtractionEngine::new(
        model,
        RetryPolicy::none(),
        model_breaker,
        "English",
        "https://news.example.com",
    );
    let settings = PipelineSettings {
        concurrency,
        pacing: Duration::ZERO,
        max_comments: None,
    };
    Pipeline::new(harvester, engine, PartitionStore::new(dir), settings)
}

fn foo_forum() -> MemoryForum {
    MemoryForum::default()
        .root(100, &[1, 2, 3])
        .comment(1, "I built Foo, $500/mo")
        .deleted(2)
        .comment(3, "hello")
}

const FOO_REPLY: &str = r#"{"name":"Foo","url":"https://foo.io","description":"A tool.","revenue":"$500/mo","stack":["Rust"]}"#;

fn read_partition(dir: &std::path::Path, year: i32) -> Vec<ProjectRecord> {
    let content = std::fs::read_to_string(dir.join(format!("projects-{}.json", year))).unwrap();
    serde_json::from_str(&content).unwrap()
}

// ============ Scenarios ============

#[tokio::test]
async fn extracts_one_project_from_thread() {
    let tmp = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::new(&[("I built Foo, $500/mo", FOO_REPLY)]));
    let p = pipeline(foo_forum(), model.clone(), tmp.path(), 1);

    let summary = p
        .run(&[Partition {
            year: 2024,
            root_id: 100,
        }])
        .await;

    let report = &summary.partitions[0];
    assert_eq!(report.state, PartitionState::Done);
    assert_eq!(report.attempted, 2);
    assert_eq!(report.extracted, 1);
    assert_eq!(report.rejected, 1);
    assert_eq!(report.harvest.skipped_empty, 1);
    assert_eq!(model.calls.load(Ordering::SeqCst), 2);

    let records = read_partition(tmp.path(), 2024);
    assert_eq!(records.len(), 1);
    let foo = &records[0];
    assert_eq!(foo.name, "Foo");
    assert_eq!(foo.url, "https://foo.io");
    assert_eq!(foo.revenue, "$500/mo");
    assert_eq!(foo.stack, vec!["Rust"]);
    assert_eq!(foo.year, 2024);
    assert_eq!(foo.author.as_deref(), Some("user1"));
    assert_eq!(
        foo.source_discussion_url.as_deref(),
        Some("https://news.example.com/item?id=1")
    );
    assert!(foo.crawled_at.is_some());
    assert_eq!(foo.monthly_revenue(), 500.0);
}

#[tokio::test]
async fn blank_and_unreachable_replies() {
    let tmp = TempDir::new().unwrap();
    // 2 has no text, 3 is listed but cannot be fetched
    let forum = MemoryForum::default()
        .root(100, &[1, 2, 3])
        .comment(1, "I built Foo")
        .deleted(2);
    let model = Arc::new(ScriptedModel::new(&[(
        "I built Foo",
        r#"{"name": "Foo", "url": "https://foo.io", "description": "A tool.", "stack": ["Go"]}"#,
    )]));
    let p = pipeline(forum, model, tmp.path(), 1);

    let summary = p
        .run(&[Partition {
            year: 2021,
            root_id: 100,
        }])
        .await;

    let report = &summary.partitions[0];
    assert_eq!(report.attempted, 2);
    assert_eq!(report.extracted, 1);
    assert_eq!(report.harvest.fetch_failures, 1);

    let records = read_partition(tmp.path(), 2021);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "Foo");
    assert_eq!(records[0].year, 2021);
    assert_eq!(records[0].revenue, "");
    assert_eq!(
        records[0].source_discussion_url.as_deref(),
        Some("https://news.example.com/item?id=1")
    );
}

#[tokio::test]
async fn rerun_replaces_partition_without_duplicates() {
    let tmp = TempDir::new().unwrap();
    let partition = Partition {
        year: 2024,
        root_id: 100,
    };

    for _ in 0..2 {
        let model = Arc::new(ScriptedModel::new(&[("I built Foo, $500/mo", FOO_REPLY)]));
        let p = pipeline(foo_forum(), model, tmp.path(), 1);
        p.run(&[partition]).await;
    }

    let records = read_partition(tmp.path(), 2024);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "Foo");
}

#[tokio::test]
async fn root_failure_leaves_existing_partition_untouched() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("projects-2023.json");
    std::fs::write(&path, "[]\n").unwrap();

    let model = Arc::new(ScriptedModel::new(&[]));
    let p = pipeline(MemoryForum::default(), model.clone(), tmp.path(), 1);

    let summary = p
        .run(&[Partition {
            year: 2023,
            root_id: 999,
        }])
        .await;

    assert_eq!(summary.partitions[0].state, PartitionState::RootFailed);
    assert!(summary.partitions[0].error.is_some());
    assert!(summary.write_failures().is_empty());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]\n");
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn root_failure_does_not_stop_later_partitions() {
    let tmp = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::new(&[("I built Foo, $500/mo", FOO_REPLY)]));
    let p = pipeline(foo_forum(), model, tmp.path(), 1);

    let summary = p
        .run(&[
            Partition {
                year: 2025,
                root_id: 404,
            },
            Partition {
                year: 2024,
                root_id: 100,
            },
        ])
        .await;

    assert_eq!(summary.partitions[0].state, PartitionState::RootFailed);
    assert_eq!(summary.partitions[1].state, PartitionState::Done);
    assert_eq!(summary.extracted(), 1);
    assert!(!tmp.path().join("projects-2025.json").exists());
}

#[tokio::test]
async fn failed_reply_fetch_is_counted_and_skipped() {
    let tmp = TempDir::new().unwrap();
    // reply 7 is listed by the root but missing from the forum
    let forum = MemoryForum::default()
        .root(100, &[1, 7])
        .comment(1, "I built Foo, $500/mo");
    let model = Arc::new(ScriptedModel::new(&[("I built Foo, $500/mo", FOO_REPLY)]));
    let p = pipeline(forum, model, tmp.path(), 1);

    let summary = p
        .run(&[Partition {
            year: 2024,
            root_id: 100,
        }])
        .await;

    let report = &summary.partitions[0];
    assert_eq!(report.state, PartitionState::Done);
    assert_eq!(report.harvest.fetch_failures, 1);
    assert_eq!(report.extracted, 1);
    assert_eq!(read_partition(tmp.path(), 2024).len(), 1);
}

#[tokio::test]
async fn malformed_reply_is_an_extraction_error() {
    let tmp = TempDir::new().unwrap();
    let forum = MemoryForum::default()
        .root(100, &[1, 2])
        .comment(1, "garbled")
        .comment(2, "I built Foo, $500/mo");
    let model = Arc::new(ScriptedModel::new(&[
        ("garbled", "sorry, I cannot help with that"),
        ("I built Foo, $500/mo", FOO_REPLY),
    ]));
    let p = pipeline(forum, model, tmp.path(), 1);

    let summary = p
        .run(&[Partition {
            year: 2024,
            root_id: 100,
        }])
        .await;

    let report = &summary.partitions[0];
    assert_eq!(report.extraction_errors, 1);
    assert_eq!(report.extracted, 1);
    assert_eq!(report.attempted, 2);
}

#[tokio::test]
async fn reply_without_name_counts_as_rejected() {
    let tmp = TempDir::new().unwrap();
    let forum = MemoryForum::default()
        .root(100, &[1, 2])
        .comment(1, "just a meta comment")
        .comment(2, "I built Foo, $500/mo");
    let model = Arc::new(ScriptedModel::new(&[
        ("just a meta comment", r#"{"url": "", "description": "meta"}"#),
        ("I built Foo, $500/mo", FOO_REPLY),
    ]));
    let p = pipeline(forum, model, tmp.path(), 1);

    let summary = p
        .run(&[Partition {
            year: 2024,
            root_id: 100,
        }])
        .await;

    let report = &summary.partitions[0];
    assert_eq!(report.rejected, 1);
    assert_eq!(report.extraction_errors, 0);
    assert_eq!(report.extracted, 1);
}

#[tokio::test]
async fn open_circuit_marks_partition_partial() {
    let tmp = TempDir::new().unwrap();
    let ids: Vec<ItemId> = (1..=5).collect();
    let mut forum = MemoryForum::default().root(100, &ids);
    for id in &ids {
        forum = forum.comment(*id, &format!("project {}", id));
    }
    let model = Arc::new(OverloadedModel {
        calls: AtomicUsize::new(0),
    });
    let model_breaker = Arc::new(CircuitBreaker::new("model", 2, Duration::from_secs(300)));
    let p = pipeline_with_breaker(forum, model.clone(), model_breaker, tmp.path(), 1);

    let summary = p
        .run(&[Partition {
            year: 2020,
            root_id: 100,
        }])
        .await;

    let report = &summary.partitions[0];
    assert_eq!(report.state, PartitionState::Done);
    assert_eq!(report.extraction_errors, 5);
    assert_eq!(report.circuit_open, 3);
    assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    assert_eq!(summary.partial(), vec![2020]);
}

#[tokio::test]
async fn concurrent_workers_keep_thread_order() {
    let tmp = TempDir::new().unwrap();
    let ids: Vec<ItemId> = (1..=20).collect();
    let mut forum = MemoryForum::default().root(100, &ids);
    let mut pairs = Vec::new();
    for id in &ids {
        forum = forum.comment(*id, &format!("project {}", id));
        pairs.push((
            format!("project {}", id),
            format!(r#"{{"name":"P{}","revenue":"$1k/mo"}}"#, id),
        ));
    }
    let pairs: Vec<(&str, &str)> = pairs.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
    let model = Arc::new(ScriptedModel::new(&pairs));
    let p = pipeline(forum, model, tmp.path(), 4);

    let summary = p
        .run(&[Partition {
            year: 2022,
            root_id: 100,
        }])
        .await;

    assert_eq!(summary.partitions[0].extracted, 20);
    let names: Vec<String> = read_partition(tmp.path(), 2022)
        .into_iter()
        .map(|r| r.name)
        .collect();
    let expected: Vec<String> = ids.iter().map(|id| format!("P{}", id)).collect();
    assert_eq!(names, expected);
}

#[tokio::test]
async fn empty_thread_writes_empty_partition() {
    let tmp = TempDir::new().unwrap();
    let forum = MemoryForum::default().root(100, &[]);
    let p = pipeline(forum, Arc::new(ScriptedModel::new(&[])), tmp.path(), 2);

    let summary = p
        .run(&[Partition {
            year: 2018,
            root_id: 100,
        }])
        .await;

    assert_eq!(summary.partitions[0].state, PartitionState::Done);
    assert!(read_partition(tmp.path(), 2018).is_empty());
}

#[tokio::test]
async fn unwritable_output_is_a_write_failure() {
    let tmp = TempDir::new().unwrap();
    let blocker = tmp.path().join("data");
    std::fs::write(&blocker, "not a directory").unwrap();

    let model = Arc::new(ScriptedModel::new(&[("I built Foo, $500/mo", FOO_REPLY)]));
    let p = pipeline(foo_forum(), model, &blocker, 1);

    let summary = p
        .run(&[Partition {
            year: 2024,
            root_id: 100,
        }])
        .await;

    assert_eq!(summary.partitions[0].state, PartitionState::WriteFailed);
    assert_eq!(summary.write_failures(), vec![2024]);
}

#[tokio::test]
async fn max_comments_limits_replies() {
    let tmp = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::new(&[("I built Foo, $500/mo", FOO_REPLY)]));
    let p = pipeline(foo_forum(), model.clone(), tmp.path(), 1).with_max_comments(Some(1));

    let summary = p
        .run(&[Partition {
            year: 2024,
            root_id: 100,
        }])
        .await;

    assert_eq!(summary.partitions[0].harvest.replies, 1);
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
}
