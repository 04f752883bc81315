//! Compressed iteration context for the next prompt.
//!
//! Small histories are rendered in full. Once the history reaches the
//! threshold, older iterations collapse to one line each and only the most
//! recent ones keep their detail, optionally preceded by memory snippets.

use std::fmt::Write;

use super::memory::MemorySnippet;
use super::record::IterationRecord;
use crate::config::ContextConfig;

/// Longest memory snippet body carried into the context.
const SNIPPET_MAX_CHARS: usize = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextOptions {
    /// Iterations kept in full detail once compressing.
    pub recent_count: usize,
    /// History size at which compression starts.
    pub threshold: usize,
    /// Maximum number of memory snippets.
    pub memory_limit: usize,
    /// Memory query; derived from the newest record when unset.
    pub query: Option<String>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            recent_count: 3,
            threshold: 5,
            memory_limit: 3,
            query: None,
        }
    }
}

impl From<&ContextConfig> for ContextOptions {
    fn from(config: &ContextConfig) -> Self {
        Self {
            recent_count: config.recent_count,
            threshold: config.threshold,
            memory_limit: config.memory_limit,
            query: None,
        }
    }
}

impl ContextOptions {
    pub fn should_compress(&self, total: usize) -> bool {
        total > 0 && total >= self.threshold
    }

    /// Query for the memory service given history sorted oldest first.
    pub fn memory_query(&self, records: &[IterationRecord]) -> Option<String> {
        if let Some(query) = &self.query {
            return Some(query.clone());
        }
        records
            .last()
            .map(|r| format!("{} {}", r.task_id, r.task_title))
    }
}

/// Full detail block for one iteration.
pub fn render_full(record: &IterationRecord) -> String {
    let mut out = format!(
        "### Iteration {} - {}: {}\n",
        record.iteration, record.task_id, record.task_title
    );
    let _ = writeln!(out, "- Status: {}", record.status);
    let _ = writeln!(out, "- Duration: {:.1}s", record.duration_ms as f64 / 1000.0);
    let _ = writeln!(out, "- Quality: {}", record.quality_checks.summary());
    if let Some(tool) = &record.tool {
        let _ = writeln!(out, "- Tool: {}", tool);
    }
    if let Some(commit) = &record.git_commit {
        let _ = writeln!(out, "- Commit: {}", commit);
    }
    if let Some(error) = &record.error {
        let _ = writeln!(out, "- Error: {}", error);
    }
    out
}

/// One-line summary for an older iteration.
pub fn render_summary(record: &IterationRecord) -> String {
    format!(
        "- #{} [{}] {}: {} ({})",
        record.iteration,
        record.status,
        record.task_id,
        record.task_title,
        record.quality_checks.summary()
    )
}

fn render_snippet(snippet: &MemorySnippet) -> String {
    let content = snippet.content.trim().replace('\n', " ");
    let content: String = if content.chars().count() > SNIPPET_MAX_CHARS {
        let cut: String = content.chars().take(SNIPPET_MAX_CHARS).collect();
        format!("{}...", cut)
    } else {
        content
    };
    if snippet.tags.is_empty() {
        format!("- **{}**: {}", snippet.title, content)
    } else {
        format!(
            "- **{}** [{}]: {}",
            snippet.title,
            snippet.tags.join(", "),
            content
        )
    }
}

/// Render `records` (sorted oldest first) as prompt context.
///
/// Snippets are only used when compressing and are capped at
/// `options.memory_limit`.
pub fn compress(
    records: &[IterationRecord],
    snippets: &[MemorySnippet],
    options: &ContextOptions,
) -> String {
    if records.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    if !options.should_compress(records.len()) {
        out.push_str("## Iteration History\n\n");
        for record in records {
            out.push_str(&render_full(record));
            out.push('\n');
        }
        return out;
    }

    let snippets = &snippets[..snippets.len().min(options.memory_limit)];
    if !snippets.is_empty() {
        out.push_str("## Relevant Memory\n\n");
        for snippet in snippets {
            out.push_str(&render_snippet(snippet));
            out.push('\n');
        }
        out.push('\n');
    }

    let recent = options.recent_count.min(records.len());
    let (older, newest) = records.split_at(records.len() - recent);
    if !older.is_empty() {
        out.push_str("## Earlier Iterations\n\n");
        for record in older {
            out.push_str(&render_summary(record));
            out.push('\n');
        }
        out.push('\n');
    }

    out.push_str("## Recent Iterations\n\n");
    for record in newest {
        out.push_str(&render_full(record));
        out.push('\n');
    }
    out
}
