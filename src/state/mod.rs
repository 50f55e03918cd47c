//! State module for tracking research progress
//!
//! This module provides the small state machines shared across the crate.
//!
//! # Components
//!
//! - `Phase` / `PhaseSignal`: the research pipeline stages and the signals that move between them
//! - `HostState` / `HostRecord`: per-host access state kept by the host policy
//! - `CircuitState`: host-level circuit breaker state

mod circuit;
mod host_state;
mod phase;

// Re-export main types
pub use circuit::CircuitState;
pub use host_state::{HostRecord, HostState};
pub use phase::{Phase, PhaseSignal};
