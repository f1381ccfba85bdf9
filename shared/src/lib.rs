//! Shared types and utilities for gputrace
//!
//! This crate contains the record model passed from producers to the trace
//! writer, plus time and parsing helpers used across the workspace.

pub mod types;
pub mod utils;

// Re-export commonly used types
pub use types::events::*;
