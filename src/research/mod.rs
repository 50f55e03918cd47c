//! Research module: the control plane of a run
//!
//! This module contains everything above the crawler:
//! - Claims, evidence, gaps and per-round snapshots
//! - The reasoning and search collaborator boundaries
//! - The termination evaluator deciding when another round is not worth it
//! - The per-run session and the phase state machine

mod collaborators;
mod model;
mod phases;
mod session;
mod termination;

pub use collaborators::{
    claim_key, content_terms, is_negated, ExtractedClaim, HeuristicReasoner, Reasoner, ReportData,
    SearchHit, SearchProvider, StaticSearch,
};
pub use model::{
    Claim, ClaimSnapshot, ClaimStatus, Evidence, Gap, GapState, RoundSnapshot, Stance,
};
pub use phases::{
    default_handlers, DeepHandler, IntegrateHandler, NormalizeHandler, PhaseHandler, PhaseResult,
    PhaseRunner, RunOutcome, VerifyHandler, WideHandler,
};
pub use session::{evidence_weight, FetchedPage, RawClaim, ResearchSession, StepCounter};
pub use termination::{evaluate, StopReason, TerminationEvaluator, TerminationResult};

use crate::config::Config;
use crate::crawler::{FetchOrchestrator, PageFetcher};
use std::sync::Arc;

/// Runs one research query end to end with fresh per-run state
///
/// # Example
///
/// ```no_run
/// use sumi_delve::config::load_config;
/// use sumi_delve::crawler::HttpFetcher;
/// use sumi_delve::research::{run_research, HeuristicReasoner, StaticSearch};
/// use std::path::Path;
/// use std::sync::Arc;
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new("delve.toml"))?;
/// let fetcher = HttpFetcher::new(&config.user_agent, &config.fetch)?;
/// let outcome = run_research(
///     &config,
///     "does coffee protect the liver",
///     Arc::new(fetcher),
///     Arc::new(HeuristicReasoner::new()),
///     Arc::new(StaticSearch::from_sources(&config.sources)),
/// )
/// .await;
/// println!("{}", outcome.reason);
/// # Ok(())
/// # }
/// ```
pub async fn run_research(
    config: &Config,
    query: &str,
    fetcher: Arc<dyn PageFetcher>,
    reasoner: Arc<dyn Reasoner>,
    search: Arc<dyn SearchProvider>,
) -> RunOutcome {
    let orchestrator = Arc::new(FetchOrchestrator::new(config, fetcher));
    let mut session = ResearchSession::new(query, config, orchestrator, reasoner, search);
    PhaseRunner::with_default_handlers(&config.phases)
        .run(&mut session)
        .await
}
