//! Error types at component boundaries.
//!
//! Per-item errors ([`FetchError`], [`ExtractionError`]) are caught by the
//! pipeline and counted. [`HarvestError`] ends a single partition.
//! [`PersistenceError`] leaves a partition unwritten so it can be re-run.

use std::path::PathBuf;

use thiserror::Error;

use crate::models::ItemId;

/// Errors the retry layer may want to try again.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error fetching item {id}: {source}")]
    Transport {
        id: ItemId,
        #[source]
        source: reqwest::Error,
    },
    #[error("item {id}: HTTP {status}")]
    Status { id: ItemId, status: u16 },
    #[error("item {0} does not exist")]
    NotFound(ItemId),
    #[error("item {id}: invalid JSON: {message}")]
    Decode { id: ItemId, message: String },
    #[error("forum API circuit open, skipping item {0}")]
    CircuitOpen(ItemId),
}

impl Transient for FetchError {
    fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("transport error calling completion API: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("completion API error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("completion contained no message content")]
    EmptyReply,
    #[error("malformed model reply: {0}")]
    Malformed(String),
    #[error("completion API circuit open")]
    CircuitOpen,
}

impl Transient for ExtractionError {
    fn is_transient(&self) -> bool {
        match self {
            ExtractionError::Transport(_) => true,
            ExtractionError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("root item {root_id} unavailable: {source}")]
    PartitionRootUnavailable {
        root_id: ItemId,
        #[source]
        source: FetchError,
    },
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode partition {year}: {source}")]
    Encode {
        year: i32,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
