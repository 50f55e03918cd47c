//! URL handling module for Sumi-Delve
//!
//! This module provides the keys the resilience layer is indexed by:
//! normalized URLs for deduplication and per-URL breaker state, and
//! lowercase hosts for per-host breaker, policy and rate-limit state.

mod host;
mod matcher;
mod normalize;

// Re-export main functions
pub use host::{host_of, host_of_url};
pub use matcher::{matches_any, matches_wildcard};
pub use normalize::{dedup_key, normalize_url};
