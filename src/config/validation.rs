use crate::config::types::{
    BreakerConfig, BudgetConfig, Config, PhaseConfig, RateLimitConfig, RetryConfig,
    SourceEntry, TerminationConfig, UserAgentConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_user_agent_config(&config.user_agent)?;
    validate_retry_config(&config.retry)?;
    validate_rate_limit_config(&config.rate_limit)?;
    validate_breaker_config(&config.breaker)?;
    validate_host_patterns(&config.host_policy.deny)?;
    validate_host_patterns(&config.host_policy.allow)?;
    validate_budget_config(&config.budget)?;
    validate_termination_config(&config.termination)?;
    validate_phase_config(&config.phases)?;
    validate_sources(&config.sources)?;

    if config.fetch.max_bytes_per_fetch == 0 {
        return Err(ConfigError::Validation(
            "max_bytes_per_fetch must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts_per_url < 1 {
        return Err(ConfigError::Validation(
            "max_attempts_per_url must be >= 1".to_string(),
        ));
    }

    if config.base_backoff_secs < 0.0 || config.max_backoff_secs < config.base_backoff_secs {
        return Err(ConfigError::Validation(format!(
            "backoff must satisfy 0 <= base ({}) <= max ({})",
            config.base_backoff_secs, config.max_backoff_secs
        )));
    }

    if !(0.0..=1.0).contains(&config.jitter_fraction) {
        return Err(ConfigError::Validation(format!(
            "jitter_fraction must be between 0 and 1, got {}",
            config.jitter_fraction
        )));
    }

    if config.max_wait_secs < config.max_backoff_secs {
        return Err(ConfigError::Validation(format!(
            "max_wait_secs ({}) must be >= max_backoff_secs ({})",
            config.max_wait_secs, config.max_backoff_secs
        )));
    }

    Ok(())
}

fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<(), ConfigError> {
    if config.max_concurrent_global < 1 || config.max_concurrent_global > 256 {
        return Err(ConfigError::Validation(format!(
            "max_concurrent_global must be between 1 and 256, got {}",
            config.max_concurrent_global
        )));
    }

    if config.max_concurrent_per_host < 1 {
        return Err(ConfigError::Validation(
            "max_concurrent_per_host must be >= 1".to_string(),
        ));
    }

    if config.min_interval_sec < 0.0 {
        return Err(ConfigError::Validation(format!(
            "min_interval_sec cannot be negative, got {}",
            config.min_interval_sec
        )));
    }

    Ok(())
}

fn validate_breaker_config(config: &BreakerConfig) -> Result<(), ConfigError> {
    if config.url_block_threshold < 1 {
        return Err(ConfigError::Validation(
            "url_block_threshold must be >= 1".to_string(),
        ));
    }

    if config.host_fail_threshold < 1 {
        return Err(ConfigError::Validation(
            "host_fail_threshold must be >= 1".to_string(),
        ));
    }

    if config.window_seconds == 0 {
        return Err(ConfigError::Validation(
            "window_seconds must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_budget_config(config: &BudgetConfig) -> Result<(), ConfigError> {
    if config.max_urls == 0 || config.max_fetches == 0 {
        return Err(ConfigError::Validation(
            "max_urls and max_fetches must be >= 1".to_string(),
        ));
    }

    if config.max_fetches < config.max_urls {
        return Err(ConfigError::Validation(format!(
            "max_fetches ({}) cannot be smaller than max_urls ({})",
            config.max_fetches, config.max_urls
        )));
    }

    if config.max_time_sec == 0 || config.max_bytes == 0 {
        return Err(ConfigError::Validation(
            "max_time_sec and max_bytes must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_termination_config(config: &TerminationConfig) -> Result<(), ConfigError> {
    for (name, value) in [
        ("target_coverage", config.target_coverage),
        ("min_coverage", config.min_coverage),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(ConfigError::Validation(format!(
                "{} must be between 0 and 1, got {}",
                name, value
            )));
        }
    }

    if config.min_coverage > config.target_coverage {
        return Err(ConfigError::Validation(format!(
            "min_coverage ({}) cannot exceed target_coverage ({})",
            config.min_coverage, config.target_coverage
        )));
    }

    if config.tau == 0 || config.top_k == 0 || config.low_mu_streak == 0 {
        return Err(ConfigError::Validation(
            "tau, top_k and low_mu_streak must be >= 1".to_string(),
        ));
    }

    if config.eps <= 0.0 || config.cost_floor <= 0.0 {
        return Err(ConfigError::Validation(
            "eps and cost_floor must be positive".to_string(),
        ));
    }

    if config.hard_cap_rounds == 0 {
        return Err(ConfigError::Validation(
            "hard_cap_rounds must be >= 1".to_string(),
        ));
    }

    let w = &config.weights;
    if [w.coverage, w.evidence, w.telephone, w.status]
        .iter()
        .any(|v| *v < 0.0)
    {
        return Err(ConfigError::Validation(
            "utility weights cannot be negative".to_string(),
        ));
    }

    Ok(())
}

fn validate_phase_config(config: &PhaseConfig) -> Result<(), ConfigError> {
    if config.max_steps < 5 {
        return Err(ConfigError::Validation(format!(
            "max_steps must leave room for every phase (>= 5), got {}",
            config.max_steps
        )));
    }

    if !(0.0..=1.0).contains(&config.rollback_insufficient_fraction) {
        return Err(ConfigError::Validation(format!(
            "rollback_insufficient_fraction must be between 0 and 1, got {}",
            config.rollback_insufficient_fraction
        )));
    }

    if config.deep_urls_per_round == 0 || config.max_claims == 0 {
        return Err(ConfigError::Validation(
            "deep_urls_per_round and max_claims must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_sources(sources: &[SourceEntry]) -> Result<(), ConfigError> {
    for source in sources {
        let url = Url::parse(&source.url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid source URL '{}': {}", source.url, e))
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Validation(format!(
                "Source URL '{}' must use HTTP or HTTPS",
                source.url
            )));
        }

        if let Some(published) = &source.published_at {
            chrono::DateTime::parse_from_rfc3339(published).map_err(|e| {
                ConfigError::Validation(format!(
                    "Invalid published-at '{}' for {}: {}",
                    published, source.url, e
                ))
            })?;
        }
    }
    Ok(())
}

/// Validates host patterns (supports a leading "*." wildcard)
fn validate_host_patterns(patterns: &[String]) -> Result<(), ConfigError> {
    for pattern in patterns {
        validate_host_pattern(pattern)?;
    }
    Ok(())
}

fn validate_host_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Host pattern cannot be empty".to_string(),
        ));
    }

    let host = pattern.strip_prefix("*.").unwrap_or(pattern);

    if host.is_empty() {
        return Err(ConfigError::InvalidPattern("Host cannot be empty".to_string()));
    }

    if !host
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Host '{}' contains invalid characters",
            host
        )));
    }

    if host.starts_with('.')
        || host.ends_with('.')
        || host.starts_with('-')
        || host.ends_with('-')
        || host.contains("..")
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Host '{}' is malformed",
            host
        )));
    }

    if !host.contains('.') {
        return Err(ConfigError::InvalidPattern(format!(
            "Host '{}' must contain at least one dot (e.g., 'example.com')",
            host
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !parts[1].contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
