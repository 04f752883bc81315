//! Backlog to batch planning tests.
//!
//! These tests load backlogs from disk and verify the batches the scheduler
//! plans for them.

use loopsmith::config::Config;
use loopsmith::core::{build_dependency_map, Backlog, WorkItem};
use loopsmith::orchestration::{BatchKind, BatchScheduler};

use crate::fixtures::{sample_backlog, write_backlog, TestRepo};

/// Test: Sample backlog plan
/// Given a chain US-001 -> US-002 -> US-004 and US-003 conflicting with US-001
/// When planned with three slots
/// Then US-003 is split out right after the first batch and the chain follows
#[test]
fn test_sample_backlog_plan() {
    let repo = TestRepo::new();
    let path = write_backlog(&repo.path, &sample_backlog());
    let backlog = Backlog::load(&path).unwrap();

    let scheduler = BatchScheduler::from_config(&Config::default()).unwrap();
    let batches = scheduler.plan(&backlog.pending());
    let ids: Vec<Vec<&str>> = batches.iter().map(|b| b.ids()).collect();

    assert_eq!(
        ids,
        vec![vec!["US-001"], vec!["US-003"], vec!["US-002"], vec!["US-004"]]
    );
    assert_eq!(batches[1].kind, BatchKind::ConflictSplit);
    assert!(ids.iter().flatten().all(|id| *id != "US-005"));
}

/// Test: Custom id prefixes
/// Given a config recognizing JIRA ids only
/// When items reference each other with JIRA and US ids
/// Then only the JIRA reference orders the plan
#[test]
fn test_custom_prefixes_from_config() {
    let config: Config = toml::from_str("id_prefixes = [\"JIRA\"]\nmax_concurrency = 4\n").unwrap();
    config.validate().unwrap();
    let items = vec![
        WorkItem::new("JIRA-2", "second").with_description("after JIRA-1"),
        WorkItem::new("JIRA-1", "first").with_description("unrelated to US-9"),
    ];

    let batches = BatchScheduler::from_config(&config).unwrap().plan(&items);
    let ids: Vec<Vec<&str>> = batches.iter().map(|b| b.ids()).collect();
    assert_eq!(ids, vec![vec!["JIRA-1"], vec!["JIRA-2"]]);
}

/// Test: Cycle in a larger backlog
/// Given a three-item cycle behind an independent item
/// When planned with two slots
/// Then the independent item runs first and the cycle is flushed in chunks of two
#[test]
fn test_cycle_flushed_after_progress() {
    let items = vec![
        WorkItem::new("GH-1", "a").with_description("needs GH-3"),
        WorkItem::new("GH-2", "b").with_description("needs GH-1"),
        WorkItem::new("GH-3", "c").with_description("needs GH-2"),
        WorkItem::new("GH-4", "independent"),
    ];
    let deps = build_dependency_map(&items);
    assert_eq!(deps.cycles().len(), 1);

    let batches = BatchScheduler::with_concurrency(2).schedule(&items, &deps);
    let ids: Vec<Vec<&str>> = batches.iter().map(|b| b.ids()).collect();
    assert_eq!(ids, vec![vec!["GH-4"], vec!["GH-1", "GH-2"], vec!["GH-3"]]);
    assert!(batches[1..].iter().all(|b| b.kind == BatchKind::DeadlockFlush));
}

/// Test: Wide independent backlog
/// Given 10 independent items
/// When planned with three slots
/// Then four Ready batches of sizes 3, 3, 3, 1 keep backlog order
#[test]
fn test_wide_backlog_chunks() {
    let items: Vec<WorkItem> = (1..=10)
        .map(|n| WorkItem::new(&format!("US-{}", n), "item"))
        .collect();
    let batches = BatchScheduler::with_concurrency(3).plan(&items);
    let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
    assert_eq!(sizes, vec![3, 3, 3, 1]);
    let flat: Vec<&str> = batches.iter().flat_map(|b| b.ids()).collect();
    let expected: Vec<String> = (1..=10).map(|n| format!("US-{}", n)).collect();
    assert_eq!(flat, expected);
}
