//! Iteration ledger tests over a project's history directory.

use chrono::Utc;
use std::sync::Arc;

use loopsmith::config::Config;
use loopsmith::ledger::{
    ContextOptions, InMemorySearch, IterationLedger, IterationRecord, IterationStatus,
    MemorySnippet, QualityChecks,
};
use loopsmith::Error;

use crate::fixtures::TestRepo;

fn record(n: u32, status: IterationStatus) -> IterationRecord {
    let checks = if status == IterationStatus::Success {
        QualityChecks::all_passing()
    } else {
        QualityChecks::default()
    };
    IterationRecord::new(
        n,
        &format!("US-{:03}", n),
        &format!("Story {}", n),
        Utc::now(),
        status,
    )
    .with_duration_ms(1_000 * n as u64)
    .with_quality(checks)
    .with_tool("claude")
}

fn ledger_with(repo: &TestRepo, count: u32) -> IterationLedger {
    let ledger = IterationLedger::from_config(&Config::default(), &repo.path);
    for n in 1..=count {
        let status = if n == 2 {
            IterationStatus::Failed
        } else {
            IterationStatus::Success
        };
        ledger.record(record(n, status)).unwrap();
    }
    ledger
}

/// Test: Records land in the configured history directory
/// Given a default config
/// When three iterations are recorded
/// Then one zero-padded JSON file per iteration exists under .loopsmith/history
#[test]
fn test_records_written_under_history_dir() {
    let repo = TestRepo::new();
    let ledger = ledger_with(&repo, 3);

    assert_eq!(ledger.dir(), repo.history_dir());
    for n in 1..=3 {
        let path = repo.history_dir().join(format!("iteration-{:05}.json", n));
        assert!(path.exists(), "missing {}", path.display());
    }
    assert_eq!(ledger.next_iteration().unwrap(), 4);
}

/// Test: Records are never overwritten
/// Given a recorded iteration 1
/// When another record claims number 1
/// Then recording fails and the original file is untouched
#[test]
fn test_duplicate_iteration_rejected() {
    let repo = TestRepo::new();
    let ledger = ledger_with(&repo, 1);

    let err = ledger
        .record(record(1, IterationStatus::Failed))
        .unwrap_err();
    assert!(matches!(err, Error::IterationExists(1)));
    let stored = ledger.load_all().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, IterationStatus::Success);
}

/// Test: History and statistics
/// Given five iterations with iteration 2 failed
/// When history and statistics are queried
/// Then history is newest first and statistics match the records
#[test]
fn test_history_and_statistics() {
    let repo = TestRepo::new();
    let ledger = ledger_with(&repo, 5);

    let newest: Vec<u32> = ledger
        .history(Some(2), None)
        .unwrap()
        .iter()
        .map(|r| r.iteration)
        .collect();
    assert_eq!(newest, vec![5, 4]);

    let only = ledger.history(None, Some("US-002")).unwrap();
    assert_eq!(only.len(), 1);
    assert_eq!(only[0].status, IterationStatus::Failed);

    let stats = ledger.statistics().unwrap();
    assert_eq!(stats.total, 5);
    assert_eq!(stats.success_count, 4);
    assert_eq!(stats.failed_count, 1);
    assert_eq!(stats.avg_duration_ms, 3_000);
    assert!((stats.success_rate - 80.0).abs() < f64::EPSILON);
    assert_eq!(stats.quality_breakdown.tests, 4);
}

/// Test: Unreadable files are skipped
/// Given a corrupt iteration file next to valid ones
/// When the history is loaded
/// Then the valid records are returned and numbering continues past the
/// corrupt file
#[test]
fn test_corrupt_record_skipped() {
    let repo = TestRepo::new();
    let ledger = ledger_with(&repo, 2);
    std::fs::write(repo.history_dir().join("iteration-00009.json"), "{ not json").unwrap();
    std::fs::write(repo.history_dir().join("notes.txt"), "ignored").unwrap();

    let records = ledger.load_all().unwrap();
    assert_eq!(records.len(), 2);
    // The corrupt file keeps its number reserved.
    assert_eq!(ledger.next_iteration().unwrap(), 10);
}

/// Test: Short history is rendered in full
/// Given four iterations and the default threshold of five
/// When the compressed context is built
/// Then every iteration appears as a full block
#[tokio::test]
async fn test_context_below_threshold() {
    let repo = TestRepo::new();
    let ledger = ledger_with(&repo, 4);

    let context = ledger
        .build_compressed_context(&ContextOptions::default())
        .await
        .unwrap();
    assert!(context.starts_with("## Iteration History"));
    assert_eq!(context.matches("### Iteration").count(), 4);
    assert!(!context.contains("## Earlier Iterations"));
}

/// Test: Long history is compressed
/// Given six iterations and a memory store
/// When the compressed context is built with defaults
/// Then memory comes first, three iterations are one-liners and the newest
/// three are full blocks
#[tokio::test]
async fn test_context_compressed_with_memory() {
    let repo = TestRepo::new();
    let memory = InMemorySearch::new(vec![
        MemorySnippet {
            title: "Story conventions".to_string(),
            content: "Each story lands as one commit".to_string(),
            tags: vec!["process".to_string()],
        },
        MemorySnippet {
            title: "Unrelated".to_string(),
            content: "zzz".to_string(),
            tags: Vec::new(),
        },
    ]);
    let ledger = ledger_with(&repo, 6).with_memory(Arc::new(memory));

    let context = ledger
        .build_compressed_context(&ContextOptions::default())
        .await
        .unwrap();

    let memory_at = context.find("## Relevant Memory").unwrap();
    let earlier_at = context.find("## Earlier Iterations").unwrap();
    let recent_at = context.find("## Recent Iterations").unwrap();
    assert!(memory_at < earlier_at && earlier_at < recent_at);

    assert!(context.contains("- **Story conventions** [process]: Each story lands as one commit"));
    assert!(context.contains("- #2 [failed] US-002: Story 2"));
    assert_eq!(context.matches("\n- #").count(), 3);
    assert_eq!(context.matches("### Iteration").count(), 3);
    assert!(context.contains("### Iteration 6 - US-006: Story 6"));
    assert!(!context.contains("### Iteration 3 "));
}
