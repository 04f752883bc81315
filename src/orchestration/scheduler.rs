//! Batch scheduler for concurrent work item execution.
//!
//! The scheduler turns a backlog into an ordered plan of batches (waves).
//! Items inside a batch may run concurrently; batch `k + 1` may depend on the
//! results of batch `k`. The plan is computed up front with a greedy
//! wavefront:
//!
//! 1. Each wave takes, in backlog order, up to `max_concurrency` items whose
//!    dependencies were all placed in earlier waves.
//! 2. If no item is ready the remaining items form a cycle (or depend on
//!    one). They are flushed into batches of at most `max_concurrency`
//!    without further dependency checks, and planning stops.
//! 3. Each wave is split so that no two items judged to touch the same files
//!    share a batch. Flush batches are not split.

use serde::Serialize;
use std::collections::HashSet;

use crate::config::Config;
use crate::core::analyzer::Analyzer;
use crate::core::dag::DependencyMap;
use crate::core::task::WorkItem;
use crate::error::Result;
use crate::{llog_debug, llog_warn};

/// How a batch was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    /// Items whose dependencies were all placed earlier.
    Ready,
    /// A single item moved out of a wave because it conflicts with a sibling.
    ConflictSplit,
    /// Items drained without dependency checks after a deadlock.
    DeadlockFlush,
}

impl std::fmt::Display for BatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchKind::Ready => write!(f, "ready"),
            BatchKind::ConflictSplit => write!(f, "conflict-split"),
            BatchKind::DeadlockFlush => write!(f, "deadlock-flush"),
        }
    }
}

/// An ordered group of work items intended to run concurrently.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Batch {
    pub kind: BatchKind,
    pub items: Vec<WorkItem>,
}

impl Batch {
    pub fn new(kind: BatchKind, items: Vec<WorkItem>) -> Self {
        Self { kind, items }
    }

    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_flush(&self) -> bool {
        self.kind == BatchKind::DeadlockFlush
    }
}

/// Plans batches for a backlog.
///
/// # Example
///
/// ```
/// use loopsmith::core::WorkItem;
/// use loopsmith::orchestration::BatchScheduler;
///
/// let items = vec![
///     WorkItem::new("US-1", "schema"),
///     WorkItem::new("US-2", "api").with_description("needs US-1"),
///     WorkItem::new("US-3", "docs"),
/// ];
/// let batches = BatchScheduler::with_concurrency(2).plan(&items);
/// assert_eq!(batches[0].ids(), vec!["US-1", "US-3"]);
/// assert_eq!(batches[1].ids(), vec!["US-2"]);
/// ```
#[derive(Debug, Clone)]
pub struct BatchScheduler {
    analyzer: Analyzer,
    max_concurrency: usize,
}

impl BatchScheduler {
    /// Create a scheduler. `max_concurrency` below 1 is clamped to 1.
    pub fn new(analyzer: Analyzer, max_concurrency: usize) -> Self {
        Self {
            analyzer,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Scheduler with the default id prefixes.
    pub fn with_concurrency(max_concurrency: usize) -> Self {
        Self::new(Analyzer::default(), max_concurrency)
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            Analyzer::new(&config.id_prefixes)?,
            config.effective_max_concurrency(),
        ))
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    /// Derive dependencies from item text and schedule.
    pub fn plan(&self, items: &[WorkItem]) -> Vec<Batch> {
        let deps = self.analyzer.build_dependency_map(items);
        self.schedule(items, &deps)
    }

    /// Schedule `items` against an explicit dependency map.
    ///
    /// The concatenation of the returned batches contains every distinct item
    /// exactly once. Duplicate ids keep their first occurrence.
    pub fn schedule(&self, items: &[WorkItem], deps: &DependencyMap) -> Vec<Batch> {
        let max = self.max_concurrency;
        let mut seen = HashSet::new();
        let mut remaining: Vec<WorkItem> = Vec::with_capacity(items.len());
        for item in items {
            if seen.insert(item.id.as_str()) {
                remaining.push(item.clone());
            } else {
                llog_warn!("Duplicate work item {} dropped from schedule", item.id);
            }
        }

        let deps = deps.restricted_to(&seen);
        let mut placed: HashSet<String> = HashSet::new();
        let mut batches = Vec::new();

        while !remaining.is_empty() {
            let ready: HashSet<usize> = remaining
                .iter()
                .enumerate()
                .filter(|(_, item)| deps.is_satisfied(&item.id, &placed))
                .map(|(idx, _)| idx)
                .take(max)
                .collect();

            if ready.is_empty() {
                let stuck: Vec<&str> = remaining.iter().map(|i| i.id.as_str()).collect();
                llog_warn!(
                    "Dependency deadlock: flushing {} items {:?} (cycles: {:?})",
                    stuck.len(),
                    stuck,
                    deps.cycles()
                );
                for chunk in remaining.chunks(max) {
                    batches.push(Batch::new(BatchKind::DeadlockFlush, chunk.to_vec()));
                }
                break;
            }

            let mut wave = Vec::with_capacity(ready.len());
            let mut rest = Vec::with_capacity(remaining.len() - ready.len());
            for (idx, item) in remaining.into_iter().enumerate() {
                if ready.contains(&idx) {
                    wave.push(item);
                } else {
                    rest.push(item);
                }
            }
            remaining = rest;

            // Placed only after the scan, so siblings never satisfy each other.
            placed.extend(wave.iter().map(|i| i.id.clone()));
            batches.extend(self.split_conflicts(wave));
        }

        llog_debug!(
            "Scheduled {} items into {} batches (max_concurrency={})",
            seen.len(),
            batches.len(),
            max
        );
        batches
    }

    /// Split a wave so no two conflicting items share a batch.
    ///
    /// Walking in order, an item that conflicts with one already kept becomes
    /// a singleton batch placed right after the kept batch.
    fn split_conflicts(&self, wave: Vec<WorkItem>) -> Vec<Batch> {
        let mut kept: Vec<WorkItem> = Vec::with_capacity(wave.len());
        let mut split: Vec<WorkItem> = Vec::new();

        for item in wave {
            match kept.iter().find(|k| self.analyzer.conflicts(k, &item)) {
                Some(other) => {
                    llog_debug!(
                        "{} conflicts with {} on {:?}, running it alone",
                        item.id,
                        other.id,
                        self.analyzer.shared_files(other, &item)
                    );
                    split.push(item);
                }
                None => kept.push(item),
            }
        }

        let mut batches = Vec::with_capacity(1 + split.len());
        batches.push(Batch::new(BatchKind::Ready, kept));
        batches.extend(
            split
                .into_iter()
                .map(|item| Batch::new(BatchKind::ConflictSplit, vec![item])),
        );
        batches
    }
}

/// Schedule with the default analyzer.
pub fn schedule_batches(
    items: &[WorkItem],
    max_concurrency: usize,
    deps: &DependencyMap,
) -> Vec<Batch> {
    BatchScheduler::with_concurrency(max_concurrency).schedule(items, deps)
}
