//! Orchestration layer for the agent loop.
//!
//! The scheduler plans batches of work items, the bridge runs one agent CLI
//! process per item and decodes its stream, and the runner drives batches
//! through the bridge into the iteration ledger.

pub mod bridge;
pub mod protocol;
pub mod runner;
pub mod scheduler;
pub mod tools;

pub use bridge::{
    AgentBridge, ExecuteOptions, ExecutionResult, ExecutionState, TERMINATION_GRACE,
};
pub use protocol::{LineFramer, ParseOutcome, StreamEvent, StreamEventKind, StreamParser};
pub use runner::{build_instruction, LoopRunner, RunSummary, StopHandle};
pub use scheduler::{schedule_batches, Batch, BatchKind, BatchScheduler};
pub use tools::{detect_cli_tools, inspect_tool, ToolInfo, ToolKind};
