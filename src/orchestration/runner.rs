//! Loop runner tying the scheduler, bridge and ledger together.
//!
//! For each planned batch the runner builds the compressed context once,
//! executes every item of the batch concurrently, runs the quality gate for
//! successful executions and records one iteration per item in completion
//! order. A stop request is honored between batches and kills in-flight
//! agents immediately.

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use super::bridge::{AgentBridge, ExecuteOptions};
use super::protocol::StreamEvent;
use super::scheduler::{Batch, BatchScheduler};
use super::tools::ToolKind;
use crate::config::Config;
use crate::core::task::{Backlog, WorkItem};
use crate::error::{Error, Result};
use crate::git::{commit_if_changed, GitOps};
use crate::ledger::{
    ContextOptions, IterationLedger, IterationRecord, IterationStatus, MemorySearch,
    QualityChecks,
};
use crate::quality::{CommandQualityGate, QualityGate};
use crate::{llog, llog_warn};

/// Stops a running loop from another task.
#[derive(Clone)]
pub struct StopHandle {
    token: CancellationToken,
    bridge: Arc<AgentBridge>,
}

impl StopHandle {
    /// Prevent further batches and kill running agents.
    pub fn stop(&self) {
        if !self.token.is_cancelled() {
            llog!("Stop requested");
        }
        self.token.cancel();
        self.bridge.kill_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// What a call to [`LoopRunner::run`] did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub batches_planned: usize,
    pub batches_run: usize,
    pub records: Vec<IterationRecord>,
    pub stopped: bool,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.records.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.records.len() - self.succeeded()
    }
}

pub struct LoopRunner {
    root: PathBuf,
    tool: ToolKind,
    context: ContextOptions,
    scheduler: BatchScheduler,
    bridge: Arc<AgentBridge>,
    ledger: IterationLedger,
    quality: Arc<dyn QualityGate>,
    git: Option<GitOps>,
    stop: CancellationToken,
    events: Option<UnboundedSender<StreamEvent>>,
}

impl LoopRunner {
    /// Runner for the project at `root` using the configured tool, history
    /// directory and quality commands.
    pub fn new(config: Config, root: &Path) -> Result<Self> {
        let tool = config.tool_kind()?;
        let scheduler = BatchScheduler::from_config(&config)?;
        let ledger = IterationLedger::from_config(&config, root);
        let quality: Arc<dyn QualityGate> =
            Arc::new(CommandQualityGate::new(config.quality.clone()));
        let context = ContextOptions::from(&config.context);
        let git = GitOps::discover(root);
        if git.is_none() {
            llog_warn!("{} is not a git repository, commits will not be recorded", root.display());
        }

        Ok(Self {
            root: root.to_path_buf(),
            tool,
            context,
            scheduler,
            bridge: Arc::new(AgentBridge::new(config)),
            ledger,
            quality,
            git,
            stop: CancellationToken::new(),
            events: None,
        })
    }

    pub fn with_tool(mut self, tool: ToolKind) -> Self {
        self.tool = tool;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.scheduler = BatchScheduler::new(self.scheduler.analyzer().clone(), max_concurrency);
        self
    }

    pub fn with_quality_gate(mut self, gate: Arc<dyn QualityGate>) -> Self {
        self.quality = gate;
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemorySearch>) -> Self {
        self.ledger = self.ledger.with_memory(memory);
        self
    }

    pub fn with_events(mut self, events: UnboundedSender<StreamEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn tool(&self) -> ToolKind {
        self.tool
    }

    pub fn ledger(&self) -> &IterationLedger {
        &self.ledger
    }

    pub fn bridge(&self) -> &AgentBridge {
        &self.bridge
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            token: self.stop.clone(),
            bridge: Arc::clone(&self.bridge),
        }
    }

    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    /// Batches the pending items of `backlog` would run in.
    pub fn plan(&self, backlog: &Backlog) -> Vec<Batch> {
        self.scheduler.plan(&backlog.pending())
    }

    /// Execute every pending item of `backlog`, batch by batch.
    ///
    /// Only storage faults are errors; failed agent runs are recorded as
    /// failed iterations.
    pub async fn run(&self, backlog: &Backlog) -> Result<RunSummary> {
        let batches = self.plan(backlog);
        let counter = AtomicU32::new(self.ledger.next_iteration()?);
        let mut summary = RunSummary {
            batches_planned: batches.len(),
            ..Default::default()
        };
        llog!(
            "Running {} batches with {} (max_concurrency={})",
            batches.len(),
            self.tool,
            self.scheduler.max_concurrency()
        );

        for (index, batch) in batches.iter().enumerate() {
            if self.stop.is_cancelled() {
                summary.stopped = true;
                break;
            }
            llog!(
                "Batch {}/{} ({}): {:?}",
                index + 1,
                batches.len(),
                batch.kind,
                batch.ids()
            );

            let context = self.ledger.build_compressed_context(&self.context).await?;
            if self.stop.is_cancelled() {
                summary.stopped = true;
                break;
            }
            let runs = batch
                .items
                .iter()
                .map(|item| self.run_item(item, &context, &counter));
            for record in join_all(runs).await {
                if let Some(record) = record? {
                    summary.records.push(record);
                }
            }
            summary.batches_run += 1;
        }

        if self.stop.is_cancelled() && summary.batches_run < summary.batches_planned {
            summary.stopped = true;
        }
        llog!(
            "Loop finished: {} succeeded, {} failed, stopped={}",
            summary.succeeded(),
            summary.failed(),
            summary.stopped
        );
        Ok(summary)
    }

    /// `None` when the loop was stopped before the agent started.
    async fn run_item(
        &self,
        item: &WorkItem,
        context: &str,
        counter: &AtomicU32,
    ) -> Result<Option<IterationRecord>> {
        if self.stop.is_cancelled() {
            llog!("Skipping {}: stop requested", item.id);
            return Ok(None);
        }
        let started_at = Utc::now();
        let head_before = self
            .git
            .as_ref()
            .and_then(|git| git.head_commit().ok().flatten());

        let mut options = ExecuteOptions::default()
            .with_cwd(&self.root)
            .with_cancel(self.stop.clone());
        if let Some(events) = &self.events {
            options = options.with_events(events.clone());
        }
        let instruction = build_instruction(item, context);
        let result = self.bridge.execute(self.tool, &instruction, options).await;

        let checks = if result.success {
            self.quality.check(&self.root).await
        } else {
            QualityChecks::default()
        };
        let status = if result.success && checks.all_passed() {
            IterationStatus::Success
        } else {
            IterationStatus::Failed
        };
        let error = match (&result.error, result.success) {
            (Some(e), _) => Some(e.clone()),
            (None, true) if !checks.all_passed() => {
                Some(format!("quality gate failed: {}", checks.summary()))
            }
            _ => None,
        };

        if let Some(git) = &self.git {
            if git.is_dirty().unwrap_or(false) {
                llog_warn!("{} left uncommitted changes in {}", item.id, self.root.display());
            }
        }

        let iteration = counter.fetch_add(1, Ordering::SeqCst);
        let record = IterationRecord::new(iteration, &item.id, &item.title, started_at, status)
            .with_duration_ms(result.duration_ms)
            .with_quality(checks)
            .with_tool(self.tool.name())
            .with_error(error)
            .with_commit(commit_if_changed(self.git.as_ref(), head_before.as_deref()));
        llog!(
            "Iteration {} {}: {} in {}ms",
            iteration,
            item.id,
            record.status,
            record.duration_ms
        );
        self.store(record, counter).map(Some)
    }

    /// Record under the next free number if the assigned one is taken.
    fn store(&self, mut record: IterationRecord, counter: &AtomicU32) -> Result<IterationRecord> {
        loop {
            match self.ledger.record(record.clone()) {
                Err(Error::IterationExists(taken)) => {
                    let floor = self.ledger.next_iteration()?.max(taken.saturating_add(1));
                    counter.fetch_max(floor, Ordering::SeqCst);
                    record.iteration = counter.fetch_add(1, Ordering::SeqCst);
                    llog_warn!(
                        "Iteration {} already on disk, recording {} as {}",
                        taken,
                        record.task_id,
                        record.iteration
                    );
                }
                other => return other,
            }
        }
    }
}

/// Prompt handed to the agent for one work item.
pub fn build_instruction(item: &WorkItem, context: &str) -> String {
    let mut out = format!("You are working on {}: {}\n", item.id, item.title);
    if !item.description.trim().is_empty() {
        let _ = write!(out, "\n{}\n", item.description.trim());
    }
    if !item.acceptance_criteria.is_empty() {
        out.push_str("\nAcceptance criteria:\n");
        for criterion in &item.acceptance_criteria {
            let _ = writeln!(out, "- {}", criterion);
        }
    }
    if !item.notes.trim().is_empty() {
        let _ = write!(out, "\nNotes:\n{}\n", item.notes.trim());
    }
    if !context.trim().is_empty() {
        let _ = write!(out, "\nPrevious iterations:\n\n{}", context.trim_end());
        out.push('\n');
    }
    out.push_str(
        "\nImplement only this item. Run the project's checks and commit your changes when the acceptance criteria are met.\n",
    );
    out
}
