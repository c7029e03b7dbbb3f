//! Core data models used throughout the harvester.
//!
//! These types represent the forum items, extraction requests, and project
//! records that flow through the harvest → extract → persist pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Numeric item ID in the forum's item API.
pub type ItemId = u64;

/// One unit of harvesting and persistence: a year keyed to its root thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub year: i32,
    pub root_id: ItemId,
}

/// A forum item (story or comment) as returned by the item API.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RawItem {
    pub id: ItemId,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub kids: Vec<ItemId>,
    #[serde(default)]
    pub by: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub deleted: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dead: bool,
}

/// The item API sometimes sends `null` where a field is simply absent.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl RawItem {
    /// The body text, if present and not blank.
    pub fn body(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// A single comment submitted to the extraction engine.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub year: i32,
    pub item_id: ItemId,
    pub author: Option<String>,
    pub reply_count: usize,
    pub text: String,
}

impl ExtractionRequest {
    /// Build a request from a fetched comment. Returns `None` for items
    /// without body text.
    pub fn from_item(year: i32, item: &RawItem) -> Option<Self> {
        let text = item.body()?.to_string();
        Some(Self {
            year,
            item_id: item.id,
            author: item.by.clone(),
            reply_count: item.kids.len(),
            text,
        })
    }
}

/// Outcome of a successful extraction call.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionResult {
    /// The model judged the comment not to describe a revenue-bearing project.
    Rejected,
    Accepted(ProjectRecord),
}

/// A side project extracted from one comment. Persisted as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: String,
    /// Free-form, as the model reported it. See [`crate::revenue::parse_revenue`].
    #[serde(default)]
    pub revenue: String,
    #[serde(default)]
    pub stack: Vec<String>,
    /// Legacy aggregate files predate partitioning and load with year 0.
    #[serde(default)]
    pub year: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(
        default,
        alias = "hn_discussion_url",
        skip_serializing_if = "Option::is_none"
    )]
    pub source_discussion_url: Option<String>,
    #[serde(default, alias = "comment_count", skip_serializing_if = "Option::is_none")]
    pub reply_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crawled_at: Option<DateTime<Utc>>,
}

impl ProjectRecord {
    /// Monthly-normalized revenue, derived on demand.
    pub fn monthly_revenue(&self) -> f64 {
        crate::revenue::parse_revenue(Some(&self.revenue))
    }
}

/// `<web base>/item?id=<id>`
pub fn discussion_url(web_base: &str, id: ItemId) -> String {
    format!("{}/item?id={}", web_base.trim_end_matches('/'), id)
}
