//! Sumi-Delve: an autonomous multi-round research pipeline
//!
//! This crate drives a research query through discovery, claim normalization,
//! evidence gathering and verification rounds, deciding for itself when another
//! round is worth its cost. Every outbound fetch goes through a resilience layer
//! (circuit breaking, host policy, rate limiting, HTTP-aware retries and
//! content extraction) so the run survives hostile or unreliable hosts.

pub mod config;
pub mod crawler;
pub mod output;
pub mod research;
pub mod state;
pub mod url;

use thiserror::Error;

/// Main error type for Sumi-Delve operations
#[derive(Debug, Error)]
pub enum DelveError {
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Reasoning collaborator failed: {0}")]
    Reasoner(String),

    #[error("Search collaborator failed: {0}")]
    Search(String),

    #[error("Phase {phase} failed: {message}")]
    Phase { phase: state::Phase, message: String },

    #[error("Termination history error: {0}")]
    Termination(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid host pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Sumi-Delve operations
pub type Result<T> = std::result::Result<T, DelveError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{FetchOrchestrator, FetchResult};
pub use research::{PhaseRunner, ResearchSession, RunOutcome, TerminationEvaluator};
pub use state::{HostRecord, HostState, Phase, PhaseSignal};
pub use url::{dedup_key, host_of, normalize_url};
