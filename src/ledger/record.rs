//! Iteration records as persisted in the history directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IterationStatus {
    Success,
    Failed,
}

impl std::fmt::Display for IterationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IterationStatus::Success => write!(f, "success"),
            IterationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of the quality gate for one iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityChecks {
    pub type_check: bool,
    pub lint: bool,
    pub tests: bool,
    pub coverage_met: bool,
}

impl QualityChecks {
    pub fn all_passing() -> Self {
        Self {
            type_check: true,
            lint: true,
            tests: true,
            coverage_met: true,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.type_check && self.lint && self.tests && self.coverage_met
    }

    /// `typecheck:pass lint:pass tests:fail coverage:pass`
    pub fn summary(&self) -> String {
        let mark = |ok: bool| if ok { "pass" } else { "fail" };
        format!(
            "typecheck:{} lint:{} tests:{} coverage:{}",
            mark(self.type_check),
            mark(self.lint),
            mark(self.tests),
            mark(self.coverage_met)
        )
    }
}

/// One executed iteration of the agent loop. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub task_id: String,
    pub task_title: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: IterationStatus,
    pub quality_checks: QualityChecks,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IterationRecord {
    /// A record spanning `started_at` until now.
    pub fn new(
        iteration: u32,
        task_id: &str,
        task_title: &str,
        started_at: DateTime<Utc>,
        status: IterationStatus,
    ) -> Self {
        let completed_at = Utc::now();
        let duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;
        Self {
            iteration,
            task_id: task_id.to_string(),
            task_title: task_title.to_string(),
            started_at,
            completed_at,
            duration_ms,
            status,
            quality_checks: QualityChecks::default(),
            git_commit: None,
            tool: None,
            error: None,
        }
    }

    pub fn with_quality(mut self, checks: QualityChecks) -> Self {
        self.quality_checks = checks;
        self
    }

    pub fn with_commit(mut self, commit: Option<String>) -> Self {
        self.git_commit = commit;
        self
    }

    pub fn with_tool(mut self, tool: &str) -> Self {
        self.tool = Some(tool.to_string());
        self
    }

    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = error;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == IterationStatus::Success
    }

    pub fn file_name(&self) -> String {
        file_name(self.iteration)
    }
}

/// `iteration-00042.json`
pub fn file_name(iteration: u32) -> String {
    format!("iteration-{:05}.json", iteration)
}

/// The iteration number a record file name claims, readable or not.
pub fn parse_file_name(name: &str) -> Option<u32> {
    let digits = name.strip_prefix("iteration-")?.strip_suffix(".json")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
