//! Full loop tests: backlog in, recorded iterations out.

use async_trait::async_trait;
use chrono::Utc;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;

use loopsmith::config::Config;
use loopsmith::core::{Backlog, WorkItem};
use loopsmith::ledger::{
    IterationLedger, IterationRecord, IterationStatus, MemorySearch, MemorySnippet,
    QualityChecks, SearchRequest,
};
use loopsmith::orchestration::{LoopRunner, StopHandle, ToolKind};
use loopsmith::quality::QualityGate;

use crate::fixtures::{config_with_agent, fake_agent, sample_backlog, TestRepo};

/// Claude agent that commits once and completes. Fails with exit 3 when
/// asked to work on US-003.
const COMMITTING_CLAUDE: &str = r#"case "$2" in
  *"working on US-003"*) echo 'cannot migrate' >&2; exit 3 ;;
esac
git commit --allow-empty -q -m "agent work" >/dev/null 2>&1
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"committed"}]}}'
echo '{"type":"result","subtype":"success","result":"done"}'"#;

struct FixedGate(QualityChecks);

#[async_trait]
impl QualityGate for FixedGate {
    async fn check(&self, _cwd: &Path) -> QualityChecks {
        self.0
    }
}

fn runner(repo: &TestRepo, script: &str, checks: QualityChecks) -> (tempfile::TempDir, LoopRunner) {
    let bin = tempfile::TempDir::new().unwrap();
    let agent = fake_agent(bin.path(), "claude", script);
    let runner = LoopRunner::new(config_with_agent(ToolKind::Claude, &agent), &repo.path)
        .unwrap()
        .with_max_concurrency(1)
        .with_quality_gate(Arc::new(FixedGate(checks)));
    (bin, runner)
}

/// Test: Loop over the sample backlog
/// Given the sample backlog and an agent that commits and completes,
/// failing only on US-003
/// When the loop runs
/// Then four iterations are recorded in plan order with commits for the
/// successful ones
#[tokio::test]
async fn test_loop_records_every_pending_item() {
    let repo = TestRepo::new();
    let initial_head = repo.head();
    let (_bin, runner) = runner(&repo, COMMITTING_CLAUDE, QualityChecks::all_passing());

    let summary = runner.run(&sample_backlog()).await.unwrap();

    assert_eq!(summary.batches_planned, 4);
    assert_eq!(summary.batches_run, 4);
    assert!(!summary.stopped);
    assert_eq!(summary.succeeded(), 3);
    assert_eq!(summary.failed(), 1);

    let order: Vec<(u32, &str)> = summary
        .records
        .iter()
        .map(|r| (r.iteration, r.task_id.as_str()))
        .collect();
    assert_eq!(
        order,
        vec![(1, "US-001"), (2, "US-003"), (3, "US-002"), (4, "US-004")]
    );

    let failed = &summary.records[1];
    assert_eq!(failed.status, IterationStatus::Failed);
    assert_eq!(failed.git_commit, None);
    assert!(failed.error.as_deref().unwrap().contains("cannot migrate"));

    for record in summary.records.iter().filter(|r| r.is_success()) {
        let commit = record.git_commit.as_deref().unwrap();
        assert_eq!(commit.len(), 7);
        assert!(!initial_head.starts_with(commit));
        assert_eq!(record.tool.as_deref(), Some("claude"));
    }
    assert!(repo.head().starts_with(summary.records[3].git_commit.as_deref().unwrap()));

    let stored = runner.ledger().history(None, None).unwrap();
    assert_eq!(stored.len(), 4);
    assert_eq!(stored[0].task_id, "US-004");
    assert_eq!(runner.ledger().next_iteration().unwrap(), 5);
}

/// Test: Numbering continues across runs
/// Given a history from a previous run
/// When the loop runs again
/// Then new iterations continue after the stored ones
#[tokio::test]
async fn test_numbering_continues() {
    let repo = TestRepo::new();
    let (_bin, runner) = runner(&repo, COMMITTING_CLAUDE, QualityChecks::all_passing());
    runner.run(&sample_backlog()).await.unwrap();

    let summary = runner.run(&sample_backlog()).await.unwrap();
    let numbers: Vec<u32> = summary.records.iter().map(|r| r.iteration).collect();
    assert_eq!(numbers, vec![5, 6, 7, 8]);
    assert_eq!(runner.ledger().statistics().unwrap().total, 8);
}

/// Test: Quality gate failure
/// Given an agent that succeeds and a gate whose tests fail
/// When the loop runs
/// Then the iterations are failed with the gate summary as error
#[tokio::test]
async fn test_quality_gate_failure_marks_iteration() {
    let repo = TestRepo::new();
    let checks = QualityChecks {
        tests: false,
        ..QualityChecks::all_passing()
    };
    let (_bin, runner) = runner(&repo, COMMITTING_CLAUDE, checks);

    let summary = runner.run(&sample_backlog()).await.unwrap();
    let first = &summary.records[0];
    assert_eq!(first.task_id, "US-001");
    assert_eq!(first.status, IterationStatus::Failed);
    assert_eq!(
        first.error.as_deref(),
        Some("quality gate failed: typecheck:pass lint:pass tests:fail coverage:pass")
    );
    assert!(!first.quality_checks.tests);
    assert_eq!(summary.succeeded(), 0);
}

/// Test: Stop while an agent runs
/// Given an agent that streams text and never completes
/// When stop is requested on the first streamed event
/// Then the running iteration is recorded as cancelled and no further
/// batch starts
#[tokio::test]
async fn test_stop_during_first_batch() {
    let repo = TestRepo::new();
    let script = r#"echo '{"type":"assistant","message":{"content":[{"type":"text","text":"thinking"}]}}'
exec sleep 30"#;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (_bin, runner) = runner(&repo, script, QualityChecks::all_passing());
    let runner = runner.with_events(tx);

    let stop = runner.stop_handle();
    tokio::spawn(async move {
        if rx.recv().await.is_some() {
            stop.stop();
        }
    });

    let summary = runner.run(&sample_backlog()).await.unwrap();
    assert!(summary.stopped);
    assert_eq!(summary.batches_planned, 4);
    assert_eq!(summary.batches_run, 1);
    assert_eq!(summary.records.len(), 1);
    assert_eq!(summary.records[0].error.as_deref(), Some("cancelled"));
    assert_eq!(runner.bridge().active_count(), 0);
    assert_eq!(runner.ledger().load_all().unwrap().len(), 1);
}

/// Memory service that requests a stop while the context is being built.
struct StopOnSearch(Arc<OnceLock<StopHandle>>);

#[async_trait]
impl MemorySearch for StopOnSearch {
    async fn search(&self, _request: SearchRequest) -> loopsmith::Result<Vec<MemorySnippet>> {
        if let Some(stop) = self.0.get() {
            stop.stop();
        }
        Ok(Vec::new())
    }
}

/// Test: Stop while building context
/// Given five stored iterations, so the context queries memory, and a
/// memory service that requests a stop
/// When the loop runs
/// Then no agent is started and nothing new is recorded
#[tokio::test]
async fn test_stop_during_context_starts_no_agent() {
    let repo = TestRepo::new();
    let ledger = IterationLedger::from_config(&Config::default(), &repo.path);
    for n in 1..=5 {
        ledger
            .record(IterationRecord::new(n, "US-000", "Earlier", Utc::now(), IterationStatus::Success))
            .unwrap();
    }

    let marker = repo.path.join("agent-ran");
    let script = format!(
        "touch '{}'\necho '{{\"type\":\"result\",\"subtype\":\"success\",\"result\":\"ran\"}}'",
        marker.display()
    );
    let handle = Arc::new(OnceLock::new());
    let (_bin, runner) = runner(&repo, &script, QualityChecks::all_passing());
    let runner = runner.with_memory(Arc::new(StopOnSearch(Arc::clone(&handle))));
    assert!(handle.set(runner.stop_handle()).is_ok());

    let summary = runner.run(&sample_backlog()).await.unwrap();
    assert!(summary.stopped);
    assert_eq!(summary.batches_run, 0);
    assert!(summary.records.is_empty());
    assert!(!marker.exists(), "agent was started after stop");
    assert_eq!(ledger.load_all().unwrap().len(), 5);
}

/// Test: Taken iteration number
/// Given an agent that leaves an empty iteration-00001.json behind
/// When its iteration is recorded
/// Then the run succeeds and the record moves to the next free number
#[tokio::test]
async fn test_taken_number_is_skipped() {
    let repo = TestRepo::new();
    let script = r#"mkdir -p .loopsmith/history
: > .loopsmith/history/iteration-00001.json
echo '{"type":"result","subtype":"success","result":"ok"}'"#;
    let (_bin, runner) = runner(&repo, script, QualityChecks::all_passing());
    let backlog = Backlog {
        project: None,
        user_stories: vec![WorkItem::new("US-001", "Schema")],
    };

    let summary = runner.run(&backlog).await.unwrap();
    assert_eq!(summary.records.len(), 1);
    assert_eq!(summary.records[0].iteration, 2);
    assert!(summary.records[0].is_success());

    let stored = runner.ledger().load_all().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].iteration, 2);
    assert_eq!(runner.ledger().next_iteration().unwrap(), 3);
}
