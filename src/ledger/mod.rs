//! Iteration ledger.
//!
//! One pretty-printed JSON file per executed iteration under the history
//! directory:
//!
//! ```text
//! .loopsmith/history/
//! ├── iteration-00001.json
//! ├── iteration-00002.json
//! └── ...
//! ```
//!
//! Records are append-only. The ledger answers history queries, aggregates
//! statistics and builds the compressed context fed into the next prompt.

pub mod context;
pub mod memory;
pub mod record;

use serde::Serialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::Builder;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::{llog_debug, llog_warn};

pub use context::{compress, render_full, render_summary, ContextOptions};
pub use memory::{InMemorySearch, MemorySearch, MemorySnippet, SearchMode, SearchRequest};
pub use record::{parse_file_name, IterationRecord, IterationStatus, QualityChecks};

/// Per-check pass counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QualityBreakdown {
    pub type_check: usize,
    pub lint: usize,
    pub tests: usize,
    pub coverage_met: usize,
}

/// Aggregates over the whole history.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerStats {
    pub total: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub avg_duration_ms: u64,
    /// Percentage in `0.0..=100.0`.
    pub success_rate: f64,
    pub quality_breakdown: QualityBreakdown,
}

impl LedgerStats {
    pub fn from_records(records: &[IterationRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }
        let total = records.len();
        let success_count = records.iter().filter(|r| r.is_success()).count();
        let duration_sum: u64 = records.iter().map(|r| r.duration_ms).sum();
        let mut breakdown = QualityBreakdown::default();
        for checks in records.iter().map(|r| &r.quality_checks) {
            breakdown.type_check += checks.type_check as usize;
            breakdown.lint += checks.lint as usize;
            breakdown.tests += checks.tests as usize;
            breakdown.coverage_met += checks.coverage_met as usize;
        }
        Self {
            total,
            success_count,
            failed_count: total - success_count,
            avg_duration_ms: duration_sum / total as u64,
            success_rate: success_count as f64 * 100.0 / total as f64,
            quality_breakdown: breakdown,
        }
    }
}

/// File-backed iteration history.
pub struct IterationLedger {
    dir: PathBuf,
    memory: Option<Arc<dyn MemorySearch>>,
}

impl IterationLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            memory: None,
        }
    }

    /// Ledger at the configured history directory under `root`.
    pub fn from_config(config: &Config, root: &Path) -> Self {
        Self::new(config.history_path(root))
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemorySearch>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist `record`. An existing file for the same number is never
    /// overwritten, and a record file is either complete or absent.
    pub fn record(&self, record: IterationRecord) -> Result<IterationRecord> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(record.file_name());
        let json = serde_json::to_string_pretty(&record)?;

        let mut tmp = Builder::new()
            .prefix(".iteration-")
            .suffix(".tmp")
            .tempfile_in(&self.dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        if let Err(e) = tmp.persist_noclobber(&path) {
            return Err(match e.error.kind() {
                ErrorKind::AlreadyExists => Error::IterationExists(record.iteration),
                _ => e.error.into(),
            });
        }
        llog_debug!(
            "Recorded iteration {} ({} {}) at {}",
            record.iteration,
            record.task_id,
            record.status,
            path.display()
        );
        Ok(record)
    }

    /// Every readable record, oldest first by iteration number.
    pub fn load_all(&self) -> Result<Vec<IterationRecord>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_record = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_file_name)
                .is_some();
            if !is_record {
                continue;
            }
            match read_record(&path) {
                Ok(record) => records.push(record),
                Err(e) => llog_warn!("Skipping unreadable record {}: {}", path.display(), e),
            }
        }
        records.sort_by_key(|r| r.iteration);
        Ok(records)
    }

    /// Newest first, optionally filtered by task and then capped.
    pub fn history(
        &self,
        limit: Option<usize>,
        task_id: Option<&str>,
    ) -> Result<Vec<IterationRecord>> {
        let mut records = self.load_all()?;
        records.reverse();
        if let Some(task_id) = task_id {
            records.retain(|r| r.task_id == task_id);
        }
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    /// One past the highest number any record file claims. Unreadable
    /// files still hold their number.
    pub fn next_iteration(&self) -> Result<u32> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(1),
            Err(e) => return Err(e.into()),
        };
        let mut highest = 0;
        for entry in entries {
            let name = entry?.file_name();
            if let Some(n) = name.to_str().and_then(parse_file_name) {
                highest = highest.max(n);
            }
        }
        Ok(highest.saturating_add(1))
    }

    pub fn statistics(&self) -> Result<LedgerStats> {
        Ok(LedgerStats::from_records(&self.load_all()?))
    }

    /// Prompt context summarizing the history.
    ///
    /// A failing memory service is logged and treated as having no
    /// snippets.
    pub async fn build_compressed_context(&self, options: &ContextOptions) -> Result<String> {
        let records = self.load_all()?;
        let mut snippets = Vec::new();

        if options.should_compress(records.len()) && options.memory_limit > 0 {
            if let (Some(memory), Some(query)) = (&self.memory, options.memory_query(&records)) {
                match memory
                    .search(SearchRequest::new(query, options.memory_limit))
                    .await
                {
                    Ok(found) => snippets = found,
                    Err(e) => llog_warn!("Memory search failed, continuing without: {}", e),
                }
            }
        }

        Ok(compress(&records, &snippets, options))
    }
}

fn read_record(path: &Path) -> Result<IterationRecord> {
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}
