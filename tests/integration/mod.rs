//! Integration test suite for loopsmith.
//!
//! These tests drive the public API end to end: backlogs are written to
//! disk, agents are fake shell scripts that speak each tool's stream
//! protocol, and iterations land in a temporary git repository.
//!
//! # Test Categories
//!
//! - `scheduling`: Backlog to batch planning
//! - `bridge`: Agent process lifecycle against fake CLIs
//! - `ledger`: History, statistics and compressed context on disk
//! - `loop_run`: Full loop from backlog to recorded iterations
//!
//! # CI Compatibility
//!
//! No real agent CLI is ever started. The process tests need `/bin/sh` and
//! are compiled on unix only.

mod fixtures;

mod ledger;
mod scheduling;

#[cfg(unix)]
mod loop_run;
