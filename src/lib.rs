pub mod config;
pub mod core;
pub mod error;
pub mod git;
pub mod ledger;
pub mod log;
pub mod orchestration;
pub mod quality;

pub use error::{Error, Result};
