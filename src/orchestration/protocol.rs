//! Streaming output protocols of the supported agent tools.
//!
//! All three tools write one JSON object per line to stdout. [`LineFramer`]
//! turns raw reads into complete lines and [`StreamParser`] decodes each line
//! into zero or more [`StreamEvent`]s while accumulating the final result.
//!
//! | Tool     | Completion event                          |
//! |----------|-------------------------------------------|
//! | claude   | `{"type":"result"}`                       |
//! | codex    | `turn.completed`, `turn.failed`, `error`  |
//! | opencode | `step_finish` with reason `stop`, `error` |

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::tools::ToolKind;
use crate::error::{Error, Result};
use crate::llog_warn;

/// Longest partial line kept while waiting for its newline.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Splits a byte stream into `\n`-terminated lines.
///
/// A trailing partial line is kept until more bytes arrive or [`finish`] is
/// called at end of stream. A partial line that outgrows the cap is dropped
/// together with the rest of that line.
///
/// [`finish`]: LineFramer::finish
#[derive(Debug)]
pub struct LineFramer {
    buf: Vec<u8>,
    /// Bytes of `buf` already known to hold no newline.
    scanned: usize,
    max_line: usize,
    discarding: bool,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            max_line: max_line.max(1),
            discarding: false,
        }
    }

    /// Append `chunk` and return every line it completed, `\r` trimmed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut chunk = chunk;
        if self.discarding {
            match chunk.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    chunk = &chunk[pos + 1..];
                    self.discarding = false;
                }
                None => return Vec::new(),
            }
        }
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buf[self.scanned..].iter().position(|&b| b == b'\n') {
            let end = self.scanned + offset;
            lines.push(decode_line(&self.buf[start..end]));
            start = end + 1;
            self.scanned = start;
        }
        self.buf.drain(..start);
        self.scanned = self.buf.len();

        if self.buf.len() > self.max_line {
            llog_warn!(
                "Dropping stream line longer than {} bytes",
                self.max_line
            );
            self.buf.clear();
            self.scanned = 0;
            self.discarding = true;
        }
        lines
    }

    /// The unterminated remainder, if any.
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) || self.buf.is_empty() {
            self.buf.clear();
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(decode_line(&rest))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamEventKind {
    Text,
    Tool,
    Completion,
}

/// One decoded step of agent output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamEvent {
    pub kind: StreamEventKind,
    pub message: String,
}

impl StreamEvent {
    fn text(message: impl Into<String>) -> Self {
        Self {
            kind: StreamEventKind::Text,
            message: message.into(),
        }
    }

    fn tool(message: impl Into<String>) -> Self {
        Self {
            kind: StreamEventKind::Tool,
            message: message.into(),
        }
    }

    fn completion(message: impl Into<String>) -> Self {
        Self {
            kind: StreamEventKind::Completion,
            message: message.into(),
        }
    }
}

/// What a finished stream amounted to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOutcome {
    /// A completion event was seen.
    pub completed: bool,
    /// The completion event reported success.
    pub success: bool,
    pub text: String,
    pub tool_calls: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct ParseState {
    text: Vec<String>,
    final_text: Option<String>,
    tool_calls: Vec<String>,
    completed: bool,
    success: bool,
    error: Option<String>,
}

impl ParseState {
    fn add_text(&mut self, text: &str, events: &mut Vec<StreamEvent>) {
        if text.trim().is_empty() {
            return;
        }
        self.text.push(text.to_string());
        events.push(StreamEvent::text(text));
    }

    fn add_tool(&mut self, name: &str, events: &mut Vec<StreamEvent>) {
        self.tool_calls.push(name.to_string());
        events.push(StreamEvent::tool(name));
    }

    /// First completion wins; later ones are ignored.
    fn complete(&mut self, success: bool, error: Option<String>, events: &mut Vec<StreamEvent>) {
        if self.completed {
            return;
        }
        self.completed = true;
        self.success = success;
        self.error = error;
        let message = match &self.error {
            Some(e) => format!("failed: {}", e),
            None => "success".to_string(),
        };
        events.push(StreamEvent::completion(message));
    }

    fn into_outcome(self) -> ParseOutcome {
        let text = match self.final_text {
            Some(t) if !t.trim().is_empty() => t,
            _ => self.text.join("\n"),
        };
        ParseOutcome {
            completed: self.completed,
            success: self.completed && self.success,
            text,
            tool_calls: self.tool_calls,
            error: self.error,
        }
    }
}

/// Incremental decoder for one tool's stream.
#[derive(Debug)]
pub enum StreamParser {
    Claude(ParseState),
    Codex(ParseState),
    OpenCode(ParseState),
}

impl StreamParser {
    pub fn new(tool: ToolKind) -> Self {
        match tool {
            ToolKind::Claude => StreamParser::Claude(ParseState::default()),
            ToolKind::Codex => StreamParser::Codex(ParseState::default()),
            ToolKind::OpenCode => StreamParser::OpenCode(ParseState::default()),
        }
    }

    pub fn tool(&self) -> ToolKind {
        match self {
            StreamParser::Claude(_) => ToolKind::Claude,
            StreamParser::Codex(_) => ToolKind::Codex,
            StreamParser::OpenCode(_) => ToolKind::OpenCode,
        }
    }

    fn state(&self) -> &ParseState {
        match self {
            StreamParser::Claude(s) | StreamParser::Codex(s) | StreamParser::OpenCode(s) => s,
        }
    }

    /// Decode one line.
    ///
    /// Blank lines and unknown event types produce no events. A line that is
    /// not valid JSON for the tool's schema is `Error::ProtocolParse`; the
    /// parser state is unchanged and the caller may keep feeding lines.
    pub fn process_line(&mut self, line: &str) -> Result<Vec<StreamEvent>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Vec::new());
        }
        let tool = self.tool();
        let parse_err = |e: serde_json::Error| Error::ProtocolParse {
            tool: tool.name().to_string(),
            message: e.to_string(),
        };

        let mut events = Vec::new();
        match self {
            StreamParser::Claude(state) => {
                let event: ClaudeEvent = serde_json::from_str(line).map_err(parse_err)?;
                apply_claude(state, event, &mut events);
            }
            StreamParser::Codex(state) => {
                let event: CodexEvent = serde_json::from_str(line).map_err(parse_err)?;
                apply_codex(state, event, &mut events);
            }
            StreamParser::OpenCode(state) => {
                let event: OpenCodeEvent = serde_json::from_str(line).map_err(parse_err)?;
                apply_opencode(state, event, &mut events);
            }
        }
        Ok(events)
    }

    pub fn is_completed(&self) -> bool {
        self.state().completed
    }

    pub fn finish(self) -> ParseOutcome {
        match self {
            StreamParser::Claude(s) | StreamParser::Codex(s) | StreamParser::OpenCode(s) => {
                s.into_outcome()
            }
        }
    }
}

// ========== claude --output-format stream-json ==========

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClaudeEvent {
    Assistant {
        message: ClaudeMessage,
    },
    Result {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        result: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ClaudeMessage {
    #[serde(default)]
    content: Vec<ClaudeBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClaudeBlock {
    Text { text: String },
    ToolUse { name: String },
    #[serde(other)]
    Other,
}

fn apply_claude(state: &mut ParseState, event: ClaudeEvent, events: &mut Vec<StreamEvent>) {
    match event {
        ClaudeEvent::Assistant { message } => {
            for block in message.content {
                match block {
                    ClaudeBlock::Text { text } => state.add_text(&text, events),
                    ClaudeBlock::ToolUse { name } => state.add_tool(&name, events),
                    ClaudeBlock::Other => {}
                }
            }
        }
        ClaudeEvent::Result {
            subtype,
            is_error,
            result,
        } => {
            let subtype = subtype.unwrap_or_else(|| "success".to_string());
            let failed = is_error || subtype.starts_with("error");
            let error = failed.then(|| match &result {
                Some(r) if !r.trim().is_empty() => r.clone(),
                _ => format!("claude reported {}", subtype),
            });
            if !failed {
                state.final_text = result;
            }
            state.complete(!failed, error, events);
        }
        ClaudeEvent::Other => {}
    }
}

// ========== codex exec --json ==========

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum CodexEvent {
    #[serde(rename = "item.completed")]
    ItemCompleted { item: CodexItem },
    #[serde(rename = "turn.completed")]
    TurnCompleted,
    #[serde(rename = "turn.failed")]
    TurnFailed {
        #[serde(default)]
        error: Option<CodexError>,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct CodexError {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CodexItem {
    AgentMessage {
        #[serde(default)]
        text: String,
    },
    CommandExecution {
        #[serde(default)]
        command: String,
    },
    FileChange,
    McpToolCall {
        #[serde(default)]
        tool: Option<String>,
    },
    WebSearch,
    #[serde(other)]
    Other,
}

fn apply_codex(state: &mut ParseState, event: CodexEvent, events: &mut Vec<StreamEvent>) {
    match event {
        CodexEvent::ItemCompleted { item } => match item {
            CodexItem::AgentMessage { text } => state.add_text(&text, events),
            CodexItem::CommandExecution { command } => {
                let name = if command.is_empty() {
                    "command".to_string()
                } else {
                    format!("command: {}", command)
                };
                state.add_tool(&name, events);
            }
            CodexItem::FileChange => state.add_tool("file_change", events),
            CodexItem::McpToolCall { tool } => {
                state.add_tool(tool.as_deref().unwrap_or("mcp_tool_call"), events)
            }
            CodexItem::WebSearch => state.add_tool("web_search", events),
            CodexItem::Other => {}
        },
        CodexEvent::TurnCompleted => state.complete(true, None, events),
        CodexEvent::TurnFailed { error } => {
            let message = error
                .and_then(|e| e.message)
                .unwrap_or_else(|| "turn failed".to_string());
            state.complete(false, Some(message), events);
        }
        CodexEvent::Error { message } => {
            let message = message.unwrap_or_else(|| "codex error".to_string());
            state.complete(false, Some(message), events);
        }
        CodexEvent::Other => {}
    }
}

// ========== opencode run --format json ==========

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenCodeEvent {
    Text {
        part: OpenCodeTextPart,
    },
    ToolUse {
        part: OpenCodeToolPart,
    },
    StepFinish {
        part: OpenCodeStepPart,
    },
    Error {
        #[serde(default)]
        error: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct OpenCodeTextPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct OpenCodeToolPart {
    #[serde(default)]
    tool: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenCodeStepPart {
    #[serde(default)]
    reason: Option<String>,
}

/// opencode errors nest the message at varying depths.
fn opencode_error_message(error: &Value) -> String {
    error
        .pointer("/data/message")
        .or_else(|| error.get("message"))
        .or_else(|| error.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| error.as_str().map(str::to_string))
        .unwrap_or_else(|| "opencode error".to_string())
}

fn apply_opencode(state: &mut ParseState, event: OpenCodeEvent, events: &mut Vec<StreamEvent>) {
    match event {
        OpenCodeEvent::Text { part } => state.add_text(&part.text, events),
        OpenCodeEvent::ToolUse { part } => {
            state.add_tool(part.tool.as_deref().unwrap_or("tool"), events)
        }
        // Intermediate steps finish with reason "tool-calls".
        OpenCodeEvent::StepFinish { part } => {
            if part.reason.as_deref() == Some("stop") {
                state.complete(true, None, events);
            }
        }
        OpenCodeEvent::Error { error } => {
            state.complete(false, Some(opencode_error_message(&error)), events)
        }
        OpenCodeEvent::Other => {}
    }
}
