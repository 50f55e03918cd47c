//! Sumi-Delve main entry point
//!
//! This is the command-line interface for the Sumi-Delve research pipeline.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use sumi_delve::config::{load_config_with_hash, Config};
use sumi_delve::crawler::HttpFetcher;
use sumi_delve::output::{print_summary, RunSummary};
use sumi_delve::research::{run_research, HeuristicReasoner, StaticSearch};
use tracing_subscriber::EnvFilter;

/// Sumi-Delve: an autonomous multi-round research pipeline
///
/// Sumi-Delve searches, fetches and cross-checks sources for a research
/// query, round after round, until the evidence converges or further rounds
/// stop paying for themselves. Hostile hosts are rate limited, retried,
/// circuit broken and finally avoided.
#[derive(Parser, Debug)]
#[command(name = "sumi-delve")]
#[command(version = "1.0.0")]
#[command(about = "An autonomous multi-round research pipeline", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// The research question
    #[arg(value_name = "QUERY")]
    query: String,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show the effective settings without fetching anything
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    if cli.dry_run {
        handle_dry_run(&config, &cli.query);
        return Ok(());
    }

    let succeeded = handle_research(config, &cli.query).await?;
    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_delve=info,warn"),
            1 => EnvFilter::new("sumi_delve=debug,info"),
            2 => EnvFilter::new("sumi_delve=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the effective settings
fn handle_dry_run(config: &Config, query: &str) {
    println!("=== Sumi-Delve Dry Run ===\n");
    println!("Query: {}", query);

    println!("\nUser Agent: {}", config.user_agent.header_value());

    println!("\nBudgets:");
    println!("  Max URLs: {}", config.budget.max_urls);
    println!("  Max fetches: {}", config.budget.max_fetches);
    println!("  Max time: {}s", config.budget.max_time_sec);
    println!("  Max bytes: {}", config.budget.max_bytes);

    println!("\nResilience:");
    println!(
        "  Retries: {} attempts, {}s base backoff",
        config.retry.max_attempts_per_url, config.retry.base_backoff_secs
    );
    println!(
        "  Rate limit: {}s per host, {} per host, {} global",
        config.rate_limit.min_interval_sec,
        config.rate_limit.max_concurrent_per_host,
        config.rate_limit.max_concurrent_global
    );
    println!(
        "  Breaker: URL after {}, host after {} in {}s, cooldown {}",
        config.breaker.url_block_threshold,
        config.breaker.host_fail_threshold,
        config.breaker.window_seconds,
        if config.breaker.permanent_host_block {
            "never".to_string()
        } else {
            format!("{}s", config.breaker.cooldown_seconds)
        }
    );

    println!("\nTermination:");
    let t = &config.termination;
    println!(
        "  Coverage target {} (min {}), eps {}, tau {}, top-k {}",
        t.target_coverage, t.min_coverage, t.eps, t.tau, t.top_k
    );
    println!(
        "  Low utility: mu < {} for {} rounds",
        t.mu_threshold, t.low_mu_streak
    );
    println!(
        "  Hard caps: {} rounds, {} budget",
        t.hard_cap_rounds, t.hard_cap_budget
    );

    println!("\nDenied hosts ({}):", config.host_policy.deny.len());
    for pattern in &config.host_policy.deny {
        println!("  - {}", pattern);
    }

    println!("\nSources ({}):", config.sources.len());
    for source in &config.sources {
        println!("  - {}", source.url);
    }

    println!("\n✓ Configuration is valid");
}

/// Runs the research pipeline; returns false if the run aborted
async fn handle_research(config: Config, query: &str) -> anyhow::Result<bool> {
    if config.sources.is_empty() {
        tracing::warn!("No [[source]] entries configured; discovery will find nothing");
    }

    let fetcher =
        HttpFetcher::new(&config.user_agent, &config.fetch).context("failed to build HTTP client")?;
    let search = StaticSearch::from_sources(&config.sources);
    tracing::info!("Researching '{}' over {} sources", query, search.len());

    let outcome = run_research(
        &config,
        query,
        Arc::new(fetcher),
        Arc::new(HeuristicReasoner::new()),
        Arc::new(search),
    )
    .await;

    print_summary(&RunSummary::from_outcome(&outcome));
    if let Some(report) = &outcome.report {
        println!("\n{}", report);
    }

    Ok(outcome.succeeded)
}
