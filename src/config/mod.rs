//! Configuration module for Sumi-Delve
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Only `[user-agent]` is mandatory; every other section falls back to defaults.
//!
//! # Example
//!
//! ```no_run
//! use sumi_delve::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("delve.toml")).unwrap();
//! println!("Target coverage: {}", config.termination.target_coverage);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    BreakerConfig, BudgetConfig, Config, FetchConfig, HostPolicyConfig, PhaseConfig,
    RateLimitConfig, RetryConfig, SourceEntry, TerminationConfig, UserAgentConfig,
    UtilityWeights,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate;
