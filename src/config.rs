//! TOML configuration parsing.
//!
//! Every section is optional. A missing config file yields the built-in
//! defaults, which cover the yearly revenue threads the harvester was
//! written for, so `harvest` runs with no arguments.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::{ItemId, Partition};

/// Environment variable that restricts a run to a single partition.
pub const YEAR_OVERRIDE_ENV: &str = "UPDATE_YEAR";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub forum: ForumConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub output: OutputConfig,
    /// Year → root thread ID. Keys and values are strings in TOML.
    #[serde(default = "default_partitions")]
    pub partitions: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            forum: ForumConfig::default(),
            extraction: ExtractionConfig::default(),
            pipeline: PipelineConfig::default(),
            retry: RetryConfig::default(),
            output: OutputConfig::default(),
            partitions: default_partitions(),
        }
    }
}

fn default_partitions() -> BTreeMap<String, String> {
    [
        ("2025", "46307973"),
        ("2024", "42373343"),
        ("2023", "38467691"),
        ("2022", "34190421"),
        ("2021", "29667095"),
        ("2020", "24947167"),
        ("2019", "20899863"),
        ("2018", "17790306"),
        ("2017", "15148804"),
    ]
    .into_iter()
    .map(|(y, id)| (y.to_string(), id.to_string()))
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ForumConfig {
    #[serde(default = "default_forum_api")]
    pub api_url: String,
    #[serde(default = "default_forum_web")]
    pub web_url: String,
    #[serde(default = "default_forum_timeout")]
    pub timeout_secs: u64,
}

impl Default for ForumConfig {
    fn default() -> Self {
        Self {
            api_url: default_forum_api(),
            web_url: default_forum_web(),
            timeout_secs: default_forum_timeout(),
        }
    }
}

fn default_forum_api() -> String {
    "https://hacker-news.firebaseio.com/v0".to_string()
}
fn default_forum_web() -> String {
    "https://news.ycombinator.com".to_string()
}
fn default_forum_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_extraction_timeout")]
    pub timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
            api_key_env: None,
            language: default_language(),
            timeout_secs: default_extraction_timeout(),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}
fn default_language() -> String {
    "English".to_string()
}
fn default_extraction_timeout() -> u64 {
    60
}

impl ExtractionConfig {
    pub fn model_name(&self) -> &str {
        match (&self.model, self.provider.as_str()) {
            (Some(m), _) => m.as_str(),
            (None, "openai") => "gpt-4o",
            (None, _) => "deepseek-chat",
        }
    }

    pub fn endpoint_base(&self) -> &str {
        match (&self.base_url, self.provider.as_str()) {
            (Some(u), _) => u.trim_end_matches('/'),
            (None, "openai") => "https://api.openai.com/v1",
            (None, _) => "https://api.deepseek.com",
        }
    }

    pub fn key_env(&self) -> &str {
        match (&self.api_key_env, self.provider.as_str()) {
            (Some(k), _) => k.as_str(),
            (None, "openai") => "OPENAI_API_KEY",
            (None, _) => "DEEPSEEK_API_KEY",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub max_comments: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pacing_ms: default_pacing_ms(),
            concurrency: default_concurrency(),
            max_comments: None,
        }
    }
}

fn default_pacing_ms() -> u64 {
    100
}
fn default_concurrency() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
    #[serde(default = "default_breaker_cooldown")]
    pub breaker_cooldown_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            breaker_threshold: default_breaker_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_breaker_threshold() -> u32 {
    5
}
fn default_breaker_cooldown() -> u64 {
    30
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_legacy_file")]
    pub legacy_file: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            legacy_file: default_legacy_file(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_legacy_file() -> String {
    "projects.json".to_string()
}

impl Config {
    /// All configured partitions, newest year first.
    pub fn partitions(&self) -> Result<Vec<Partition>> {
        let mut out = Vec::with_capacity(self.partitions.len());
        for (year, root) in &self.partitions {
            let year: i32 = year
                .trim()
                .parse()
                .with_context(|| format!("partition key '{}' is not a year", year))?;
            let root_id: ItemId = root
                .trim()
                .parse()
                .with_context(|| format!("root thread ID '{}' for {} is not an integer", root, year))?;
            if root_id == 0 {
                bail!("root thread ID for {} must be positive", year);
            }
            out.push(Partition { year, root_id });
        }
        out.sort_by(|a, b| b.year.cmp(&a.year));
        Ok(out)
    }

    /// Partitions to run: the override alone if given, otherwise all of them.
    ///
    /// An override naming a year that is not configured is an error.
    pub fn select_partitions(&self, year: Option<i32>) -> Result<Vec<Partition>> {
        let all = self.partitions()?;
        match year {
            None => Ok(all),
            Some(y) => match all.into_iter().find(|p| p.year == y) {
                Some(p) => Ok(vec![p]),
                None => bail!("Year {} is not defined in the partitions configuration", y),
            },
        }
    }
}

/// Read the single-partition override from `UPDATE_YEAR`, if set.
pub fn year_override_from_env() -> Result<Option<i32>> {
    match std::env::var(YEAR_OVERRIDE_ENV) {
        Ok(v) if !v.trim().is_empty() => {
            let year = v
                .trim()
                .parse()
                .with_context(|| format!("{} must be a year, got '{}'", YEAR_OVERRIDE_ENV, v))?;
            Ok(Some(year))
        }
        _ => Ok(None),
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Like [`load_config`], but a missing file falls back to defaults.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::default())
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.partitions.is_empty() {
        bail!("at least one partition must be configured");
    }
    config.partitions()?;

    if config.pipeline.concurrency == 0 {
        bail!("pipeline.concurrency must be >= 1");
    }

    if config.retry.breaker_threshold == 0 {
        bail!("retry.breaker_threshold must be >= 1");
    }

    match config.extraction.provider.as_str() {
        "deepseek" | "openai" => {}
        other => bail!(
            "Unknown extraction provider: '{}'. Must be deepseek or openai.",
            other
        ),
    }

    Ok(())
}
