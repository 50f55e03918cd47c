use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigResult;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration from TOML text
pub fn parse_config(content: &str) -> ConfigResult<Config> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Logged at startup so a research run can be tied back to the exact knobs
/// it ran with.
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> ConfigResult<String> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> ConfigResult<(Config, String)> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConfigError;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
[user-agent]
crawler-name = "TestDelver"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"
"#;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_minimal_config_uses_defaults() {
        let file = create_temp_config(MINIMAL);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.user_agent.crawler_name, "TestDelver");
        assert_eq!(config.retry.max_attempts_per_url, 3);
        assert_eq!(config.breaker.host_fail_threshold, 3);
        assert_eq!(config.phases.max_rollbacks, 2);
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_load_full_config() {
        let content = format!(
            r#"{}
[fetch]
max-bytes-per-fetch = 500000

[retry]
max-attempts-per-url = 4
base-backoff-secs = 0.5

[rate-limit]
min-interval-sec = 2.5
max-concurrent-per-host = 1
max-concurrent-global = 4

[breaker]
url-block-threshold = 1
host-fail-threshold = 5
permanent-host-block = true

[host-policy]
host-block-threshold = 2
deny = ["*.pinterest.com"]
allow = ["docs.rs"]

[budget]
max-urls = 50
max-fetches = 80

[termination]
target-coverage = 0.9
tau = 3
low-mu-streak = 3

[termination.weights]
coverage = 2.0

[phases]
max-rollbacks = 1

[[source]]
url = "https://example.com/a"
title = "A"
published-at = "2024-05-01T00:00:00Z"
"#,
            MINIMAL
        );

        let file = create_temp_config(&content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.fetch.max_bytes_per_fetch, 500_000);
        assert_eq!(config.retry.max_attempts_per_url, 4);
        assert_eq!(config.rate_limit.max_concurrent_per_host, 1);
        assert_eq!(config.breaker.url_block_threshold, 1);
        assert!(config.breaker.cooldown().is_none());
        assert_eq!(config.host_policy.deny, vec!["*.pinterest.com".to_string()]);
        assert_eq!(config.budget.max_urls, 50);
        assert_eq!(config.termination.tau, 3);
        assert_eq!(config.termination.weights.coverage, 2.0);
        assert_eq!(config.termination.weights.status, 0.5);
        assert_eq!(config.phases.max_rollbacks, 1);
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].title, "A");
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/delve.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_missing_user_agent() {
        let file = create_temp_config("[retry]\nmax-attempts-per-url = 2\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let content = format!("{}\n[rate-limit]\nmax-concurrent-global = 0\n", MINIMAL);
        let file = create_temp_config(&content);
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        assert_ne!(
            compute_config_hash(file1.path()).unwrap(),
            compute_config_hash(file2.path()).unwrap()
        );
    }

    #[test]
    fn test_load_config_with_hash() {
        let file = create_temp_config(MINIMAL);
        let (config, hash) = load_config_with_hash(file.path()).unwrap();
        assert_eq!(config.user_agent.crawler_version, "1.0");
        assert_eq!(hash.len(), 64);
    }
}
