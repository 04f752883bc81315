//! Work item data model.
//!
//! Work items are the atomic units of backlog work handed to an agent. The
//! scheduler treats them as immutable; only `passes` is flipped externally
//! once an item has been verified.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::llog_warn;

/// A single unit of backlog work (user story, issue, task).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    /// Stable identifier such as `US-001` or `GH-42`.
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Lower values sort first.
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub passes: bool,
    #[serde(default)]
    pub notes: String,
}

impl WorkItem {
    /// Create a work item with the given id and title and empty text fields.
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            acceptance_criteria: Vec::new(),
            priority: 0,
            passes: false,
            notes: String::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_notes(mut self, notes: &str) -> Self {
        self.notes = notes.to_string();
        self
    }

    pub fn with_criteria<I, S>(mut self, criteria: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.acceptance_criteria = criteria.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Description, notes and acceptance criteria joined into one text blob.
    ///
    /// This is the text the analyzer scans for id and file references.
    pub fn searchable_text(&self) -> String {
        let mut text = String::with_capacity(
            self.description.len()
                + self.notes.len()
                + self.acceptance_criteria.iter().map(|c| c.len() + 1).sum::<usize>()
                + 2,
        );
        text.push_str(&self.description);
        text.push('\n');
        text.push_str(&self.notes);
        for criterion in &self.acceptance_criteria {
            text.push('\n');
            text.push_str(criterion);
        }
        text
    }
}

impl std::fmt::Display for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.id, self.title)
    }
}

/// A backlog file: `{ "project": "...", "userStories": [...] }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backlog {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub user_stories: Vec<WorkItem>,
}

impl Backlog {
    pub fn load(path: &Path) -> Result<Self> {
        let backlog: Self = serde_json::from_str(&fs::read_to_string(path)?)?;
        backlog.validate()?;
        Ok(backlog)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(item) = self.user_stories.iter().find(|s| s.id.trim().is_empty()) {
            return Err(Error::Validation(format!(
                "work item {:?} has an empty id",
                item.title
            )));
        }
        Ok(())
    }

    /// Items still to be done, lowest priority value first and file order
    /// within a priority. Duplicate ids are dropped.
    pub fn pending(&self) -> Vec<WorkItem> {
        let mut seen = HashSet::new();
        let mut items: Vec<WorkItem> = self
            .user_stories
            .iter()
            .filter(|item| {
                if !seen.insert(item.id.as_str()) {
                    llog_warn!("Duplicate work item id {} ignored", item.id);
                    return false;
                }
                !item.passes
            })
            .cloned()
            .collect();
        items.sort_by_key(|item| item.priority);
        items
    }
}
