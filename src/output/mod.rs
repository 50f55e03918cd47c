//! Output module for run summaries
//!
//! This module handles:
//! - Condensing a run outcome into summary statistics
//! - Printing the summary for the CLI
//!
//! Persisting artifacts is left to downstream writers; every structure here
//! derives `Serialize` for that purpose.

pub mod stats;

pub use stats::{print_summary, HostSummary, RunSummary};
