//! Per-run research state
//!
//! A [`ResearchSession`] is created at the start of a run, mutated by every
//! phase handler and dropped at COMPLETE. The resilience components live in
//! its orchestrator, so nothing learned about hosts outlives the run.

use crate::config::{Config, PhaseConfig};
use crate::crawler::{FetchOrchestrator, FetchResult, QualityGrade};
use crate::research::collaborators::{Reasoner, SearchHit, SearchProvider};
use crate::research::model::{Claim, Evidence, Gap, GapState, RoundSnapshot, Stance};
use crate::research::termination::{TerminationEvaluator, TerminationResult};
use crate::state::Phase;
use crate::url::host_of;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Step and trace counters owned by one session
#[derive(Debug, Clone, Default)]
pub struct StepCounter {
    steps: u32,
    trace_seq: u64,
}

impl StepCounter {
    /// Counts one phase invocation and returns the new total
    pub fn tick(&mut self) -> u32 {
        self.steps += 1;
        self.steps
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Next sequence number for trace events
    pub fn next_trace(&mut self) -> u64 {
        self.trace_seq += 1;
        self.trace_seq
    }
}

/// Evidence weight for a page of the given extraction quality
pub fn evidence_weight(grade: QualityGrade) -> f64 {
    match grade {
        QualityGrade::High => 1.0,
        QualityGrade::Medium => 0.75,
        QualityGrade::Low => 0.5,
        QualityGrade::Empty => 0.0,
    }
}

/// Extracted text of a successfully fetched page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub host: String,
    pub text: String,
    pub weight: f64,
}

impl FetchedPage {
    /// Keeps results with usable text; weight follows extraction quality
    pub fn from_result(result: &FetchResult) -> Option<Self> {
        let text = result.usable_text()?;
        let url = result.final_url.clone().unwrap_or_else(|| result.url.clone());
        let weight = result
            .metrics
            .as_ref()
            .map_or(0.5, |m| evidence_weight(m.quality_grade));
        if weight <= 0.0 {
            return None;
        }
        Some(Self {
            host: host_of(&url).unwrap_or_default(),
            url,
            text: text.to_string(),
            weight,
        })
    }

    pub fn evidence(&self, stance: Stance, excerpt: &str) -> Evidence {
        Evidence {
            url: self.url.clone(),
            host: self.host.clone(),
            stance,
            weight: self.weight,
            excerpt: excerpt.chars().take(300).collect(),
        }
    }
}

/// A claim as first seen in discovery, before normalization
#[derive(Debug, Clone)]
pub struct RawClaim {
    pub text: String,
    pub evidence: Evidence,
}

/// Everything one research run knows
pub struct ResearchSession {
    pub query: String,
    pub phase: Phase,
    pub claims: Vec<Claim>,
    pub gaps: Vec<Gap>,
    pub raw_claims: Vec<RawClaim>,
    /// Search results gathered during discovery
    pub candidates: Vec<SearchHit>,
    /// Pages fetched during discovery, reused when normalizing
    pub pages: Vec<FetchedPage>,
    /// Counter queries waiting for the next DEEP round, as (claim id, query)
    pub pending_queries: Vec<(String, String)>,
    pub evaluator: TerminationEvaluator,
    pub orchestrator: Arc<FetchOrchestrator>,
    pub reasoner: Arc<dyn Reasoner>,
    pub search: Arc<dyn SearchProvider>,
    pub config: PhaseConfig,
    pub hard_cap_rounds: u32,
    pub counter: StepCounter,
    pub rollbacks: u32,
    /// DEEP rounds run so far
    pub rounds: u32,
    /// Successfully fetched URLs, in fetch order
    pub sources: Vec<String>,
    pub report: Option<String>,
    next_claim_id: usize,
}

impl ResearchSession {
    pub fn new(
        query: impl Into<String>,
        config: &Config,
        orchestrator: Arc<FetchOrchestrator>,
        reasoner: Arc<dyn Reasoner>,
        search: Arc<dyn SearchProvider>,
    ) -> Self {
        Self {
            query: query.into(),
            phase: Phase::Wide,
            claims: Vec::new(),
            gaps: Vec::new(),
            raw_claims: Vec::new(),
            candidates: Vec::new(),
            pages: Vec::new(),
            pending_queries: Vec::new(),
            evaluator: TerminationEvaluator::new(config.termination.clone()),
            orchestrator,
            reasoner,
            search,
            config: config.phases.clone(),
            hard_cap_rounds: config.termination.hard_cap_rounds,
            counter: StepCounter::default(),
            rollbacks: 0,
            rounds: 0,
            sources: Vec::new(),
            report: None,
            next_claim_id: 1,
        }
    }

    /// Adds a claim with a fresh id and opens its gap
    pub fn add_claim(&mut self, text: String) -> &mut Claim {
        let id = format!("c{}", self.next_claim_id);
        self.next_claim_id += 1;
        let claim = Claim::new(id, text);
        self.gaps.push(Gap::for_claim(&claim));
        self.claims.push(claim);
        let last = self.claims.len() - 1;
        &mut self.claims[last]
    }

    pub fn claim(&self, id: &str) -> Option<&Claim> {
        self.claims.iter().find(|c| c.id == id)
    }

    pub fn gap_for(&self, claim_id: &str) -> Option<&Gap> {
        self.gaps.iter().find(|g| g.claim_id == claim_id)
    }

    pub fn set_gap_state(&mut self, claim_id: &str, state: GapState) {
        if let Some(gap) = self.gaps.iter_mut().find(|g| g.claim_id == claim_id) {
            gap.state = state;
        }
    }

    pub fn open_gap_count(&self) -> usize {
        self.gaps.iter().filter(|g| g.state == GapState::Open).count()
    }

    /// Records a fetched URL once
    pub fn note_source(&mut self, url: &str) {
        if !self.sources.iter().any(|s| s == url) {
            self.sources.push(url.to_string());
        }
    }

    /// Network attempts spent so far
    pub fn budget_used(&self) -> f64 {
        self.orchestrator.budget().fetches() as f64
    }

    /// Snapshot of the current round for the termination evaluator
    pub fn round_snapshot(&self, round_index: u32, cost: f64) -> RoundSnapshot {
        let gap_states: BTreeMap<String, GapState> =
            self.gaps.iter().map(|g| (g.id.clone(), g.state)).collect();
        let claims = self
            .claims
            .iter()
            .map(|c| (c.id.clone(), c.snapshot()))
            .collect();
        RoundSnapshot {
            round_index,
            gap_states,
            claims,
            cost,
            cumulative_budget_used: self.budget_used(),
            budget_limit: self.orchestrator.budget().max_fetches() as f64,
            hard_cap_rounds: self.hard_cap_rounds,
        }
    }

    pub fn last_termination(&self) -> Option<&TerminationResult> {
        self.evaluator.last_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserAgentConfig;
    use crate::crawler::{FetchError, PageFetcher, RawResponse};
    use crate::research::collaborators::{HeuristicReasoner, StaticSearch};
    use async_trait::async_trait;

    struct NoFetch;

    #[async_trait]
    impl PageFetcher for NoFetch {
        async fn fetch(&self, _url: &str) -> Result<RawResponse, FetchError> {
            Err(FetchError::new(crate::crawler::ErrorClass::Dns, "offline"))
        }
    }

    fn create_test_session() -> ResearchSession {
        let config = Config::new(UserAgentConfig {
            crawler_name: "TestDelver".to_string(),
            crawler_version: "1.0".to_string(),
            contact_url: "https://example.com/about".to_string(),
            contact_email: "admin@example.com".to_string(),
        });
        let orchestrator = Arc::new(FetchOrchestrator::new(&config, Arc::new(NoFetch)));
        ResearchSession::new(
            "test query",
            &config,
            orchestrator,
            Arc::new(HeuristicReasoner::new()),
            Arc::new(StaticSearch::default()),
        )
    }

    #[test]
    fn test_step_counter() {
        let mut counter = StepCounter::default();
        assert_eq!(counter.tick(), 1);
        assert_eq!(counter.tick(), 2);
        assert_eq!(counter.steps(), 2);
        assert_eq!(counter.next_trace(), 1);
        assert_eq!(counter.next_trace(), 2);
    }

    #[tokio::test]
    async fn test_add_claim_opens_gap() {
        let mut session = create_test_session();
        session.add_claim("First claim.".to_string());
        let id = session.add_claim("Second claim.".to_string()).id.clone();

        assert_eq!(id, "c2");
        assert_eq!(session.gaps.len(), 2);
        assert_eq!(session.gap_for("c2").unwrap().id, "gap-c2");
        assert_eq!(session.open_gap_count(), 2);

        session.set_gap_state("c1", GapState::Closed);
        assert_eq!(session.open_gap_count(), 1);
    }

    #[tokio::test]
    async fn test_round_snapshot() {
        let mut session = create_test_session();
        session.add_claim("A claim.".to_string());
        session.set_gap_state("c1", GapState::Closed);

        let snapshot = session.round_snapshot(1, 3.0);
        assert_eq!(snapshot.round_index, 1);
        assert_eq!(snapshot.coverage(), 1.0);
        assert_eq!(snapshot.cost, 3.0);
        assert_eq!(snapshot.cumulative_budget_used, 0.0);
        assert_eq!(snapshot.budget_limit, 400.0);
        assert_eq!(snapshot.hard_cap_rounds, 8);
        assert!(snapshot.claims.contains_key("c1"));
    }

    #[tokio::test]
    async fn test_note_source_once() {
        let mut session = create_test_session();
        session.note_source("https://a.org/");
        session.note_source("https://a.org/");
        assert_eq!(session.sources.len(), 1);
    }

    #[test]
    fn test_evidence_weight() {
        assert_eq!(evidence_weight(QualityGrade::High), 1.0);
        assert_eq!(evidence_weight(QualityGrade::Low), 0.5);
        assert_eq!(evidence_weight(QualityGrade::Empty), 0.0);
    }
}
