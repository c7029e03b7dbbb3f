//! # Project Harvest
//!
//! Crawls the yearly "what are you working on" discussion threads of a
//! public forum, asks a language model to pull structured project records
//! out of each reply, and stores the results as one JSON file per year.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌─────────────┐   ┌──────────────────┐
//! │  Item API   │──▶│  Harvester  │──▶│  Extraction │──▶│ projects-<y>.json│
//! │ root + kids │   │ retry/break │   │ chat model  │   │  atomic rename   │
//! └─────────────┘   └─────────────┘   └─────────────┘   └────────┬─────────┘
//!                                                               │
//!                                                        ┌──────▼──────┐
//!                                                        │ stats / CLI │
//!                                                        └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export DEEPSEEK_API_KEY=...
//! harvest partitions            # list configured years
//! harvest run --year 2024       # crawl one year
//! UPDATE_YEAR=2025 harvest      # same, via the environment
//! harvest stats                 # summarize persisted records
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and partition table |
//! | [`models`] | Items, requests, and project records |
//! | [`error`] | Typed failure kinds |
//! | [`fetcher`] | Forum item API client |
//! | [`harvest`] | Thread traversal and reply filtering |
//! | [`extract`] | Model-backed record extraction |
//! | [`retry`] | Backoff, circuit breaking, pacing |
//! | [`pipeline`] | Per-partition orchestration |
//! | [`store`] | Partition files on disk |
//! | [`revenue`] | Monthly revenue normalization |
//! | [`stats`] | Aggregate statistics |

pub mod config;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod harvest;
pub mod ingest;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod revenue;
pub mod sources;
pub mod stats;
pub mod store;
