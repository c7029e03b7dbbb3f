//! Durable per-partition storage of project records.
//!
//! Each partition lives in its own `projects-<year>.json` file under the
//! output directory. Writes go to a temporary file in the same directory and
//! are renamed into place, so a crash mid-write leaves the previous file
//! intact and a re-run replaces it wholesale.
//!
//! Readers discover partition files with a fixed glob and fall back to the
//! legacy single-file aggregate when no partition files exist.

use globset::{Glob, GlobMatcher};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use walkdir::WalkDir;

use crate::config::OutputConfig;
use crate::error::PersistenceError;
use crate::models::ProjectRecord;

const PARTITION_GLOB: &str = "projects-*.json";

pub struct PartitionStore {
    dir: PathBuf,
    legacy_file: String,
}

impl PartitionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            legacy_file: "projects.json".to_string(),
        }
    }

    pub fn from_config(config: &OutputConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            legacy_file: config.legacy_file.clone(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn partition_path(&self, year: i32) -> PathBuf {
        self.dir.join(format!("projects-{}.json", year))
    }

    /// Atomically replace a partition's file with `records`.
    pub fn write_partition(
        &self,
        year: i32,
        records: &[ProjectRecord],
    ) -> Result<PathBuf, PersistenceError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| PersistenceError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let json = serde_json::to_string_pretty(records)
            .map_err(|source| PersistenceError::Encode { year, source })?;

        let path = self.partition_path(year);
        let tmp = self.dir.join(format!(".projects-{}.json.tmp", year));

        let result = write_synced(&tmp, json.as_bytes())
            .map_err(|source| PersistenceError::Io {
                path: tmp.clone(),
                source,
            })
            .and_then(|()| {
                std::fs::rename(&tmp, &path).map_err(|source| PersistenceError::Io {
                    path: path.clone(),
                    source,
                })
            });

        if let Err(e) = result {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
        Ok(path)
    }

    /// Load one partition. A missing file is `Ok(None)`.
    pub fn load_partition(&self, year: i32) -> Result<Option<Vec<ProjectRecord>>, PersistenceError> {
        let path = self.partition_path(year);
        if !path.exists() {
            return Ok(None);
        }
        read_records(&path).map(Some)
    }

    /// Partition files present on disk, newest year first.
    pub fn partition_files(&self) -> Result<Vec<(i32, PathBuf)>, PersistenceError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();

        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| PersistenceError::Io {
                path: self.dir.clone(),
                source: e.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if !PARTITION_MATCHER.is_match(&name) {
                continue;
            }
            let year = name
                .strip_prefix("projects-")
                .and_then(|s| s.strip_suffix(".json"))
                .and_then(|s| s.parse::<i32>().ok());
            if let Some(year) = year {
                files.push((year, entry.into_path()));
            }
        }

        files.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(files)
    }

    /// Every persisted record: all partitions concatenated newest first, or
    /// the legacy aggregate if there are no partition files.
    pub fn load_all(&self) -> Result<Vec<ProjectRecord>, PersistenceError> {
        let files = self.partition_files()?;
        if files.is_empty() {
            let legacy = self.dir.join(&self.legacy_file);
            if legacy.exists() {
                return read_records(&legacy);
            }
            return Ok(Vec::new());
        }

        let mut all = Vec::new();
        for (_, path) in files {
            all.extend(read_records(&path)?);
        }
        Ok(all)
    }
}

static PARTITION_MATCHER: LazyLock<GlobMatcher> = LazyLock::new(|| {
    Glob::new(PARTITION_GLOB)
        .expect("valid partition glob")
        .compile_matcher()
});

fn write_synced(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(contents)?;
    file.write_all(b"\n")?;
    file.sync_all()
}

fn read_records(path: &Path) -> Result<Vec<ProjectRecord>, PersistenceError> {
    let content = std::fs::read_to_string(path).map_err(|source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| PersistenceError::Decode {
        path: path.to_path_buf(),
        source,
    })
}
