//! Built-in phase handlers

use super::runner::{PhaseHandler, PhaseResult};
use crate::research::collaborators::{claim_key, ReportData, SearchHit, SearchProvider};
use crate::research::model::{ClaimStatus, GapState, Stance};
use crate::research::session::{FetchedPage, RawClaim, ResearchSession};
use crate::state::Phase;
use crate::url::dedup_key;
use crate::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

/// One handler per non-terminal phase
pub fn default_handlers() -> Vec<Box<dyn PhaseHandler>> {
    vec![
        Box::new(WideHandler),
        Box::new(NormalizeHandler),
        Box::new(DeepHandler),
        Box::new(VerifyHandler),
        Box::new(IntegrateHandler),
    ]
}

/// Runs every query, keeping the first hit per normalized URL
///
/// A failing query only loses its own results.
async fn search_all(search: Arc<dyn SearchProvider>, queries: &[String]) -> Vec<(usize, SearchHit)> {
    let mut seen = HashSet::new();
    let mut hits = Vec::new();

    for (i, query) in queries.iter().enumerate() {
        match search.search_web(query).await {
            Ok(results) => {
                for hit in results {
                    let key = dedup_key(&hit.url).unwrap_or_else(|| hit.url.clone());
                    if seen.insert(key) {
                        hits.push((i, hit));
                    }
                }
            }
            Err(e) => tracing::warn!("Search for '{}' failed: {}", query, e),
        }
    }
    hits
}

/// Discovery: queries, search, skim the top results for raw claims
pub struct WideHandler;

#[async_trait]
impl PhaseHandler for WideHandler {
    fn phase(&self) -> Phase {
        Phase::Wide
    }

    async fn execute(&self, session: &mut ResearchSession) -> Result<PhaseResult> {
        let reasoner = session.reasoner.clone();
        let queries = match reasoner.generate_queries(&session.query).await {
            Ok(queries) if !queries.is_empty() => queries,
            Ok(_) => vec![session.query.clone()],
            Err(e) => {
                tracing::warn!("Query generation failed, searching the raw query: {}", e);
                vec![session.query.clone()]
            }
        };

        let hits = search_all(session.search.clone(), &queries).await;
        session.candidates = hits.into_iter().map(|(_, hit)| hit).collect();

        let urls: Vec<String> = session
            .candidates
            .iter()
            .take(session.config.wide_fetch_limit)
            .map(|hit| hit.url.clone())
            .collect();
        let orchestrator = session.orchestrator.clone();
        let results = orchestrator.fetch_all(urls).await;

        for result in &results {
            let Some(page) = FetchedPage::from_result(result) else {
                continue;
            };
            session.note_source(&page.url);

            let extracted = reasoner.extract_claims(&page.text, &session.query).await?;
            tracing::debug!("{} raw claims from {}", extracted.len(), page.url);
            for claim in extracted {
                let evidence = page.evidence(Stance::Supports, &claim.text);
                session.raw_claims.push(RawClaim {
                    text: claim.text,
                    evidence,
                });
            }
            session.pages.push(page);
        }

        let output = format!(
            "{} queries, {} candidates, {} pages, {} raw claims",
            queries.len(),
            session.candidates.len(),
            session.pages.len(),
            session.raw_claims.len()
        );
        Ok(PhaseResult::next(Phase::Wide, output).with_actions(queries))
    }
}

/// Canonical claims, one gap each, with evidence from the discovery pages
pub struct NormalizeHandler;

#[async_trait]
impl PhaseHandler for NormalizeHandler {
    fn phase(&self) -> Phase {
        Phase::Normalize
    }

    async fn execute(&self, session: &mut ResearchSession) -> Result<PhaseResult> {
        let reasoner = session.reasoner.clone();
        let raw = std::mem::take(&mut session.raw_claims);
        let raw_count = raw.len();

        let mut index: HashMap<String, usize> = session
            .claims
            .iter()
            .enumerate()
            .map(|(i, c)| (claim_key(&c.text), i))
            .collect();
        let mut dropped = 0;

        for claim in raw {
            let text = reasoner.normalize_claim(&claim.text).await?;
            let key = claim_key(&text);
            if key.is_empty() {
                continue;
            }
            if let Some(&i) = index.get(&key) {
                session.claims[i].add_evidence(claim.evidence);
                continue;
            }
            if session.claims.len() >= session.config.max_claims {
                dropped += 1;
                continue;
            }
            session.add_claim(text).add_evidence(claim.evidence);
            index.insert(key, session.claims.len() - 1);
        }

        // Discovery pages may back claims found elsewhere.
        let pages = session.pages.clone();
        for i in 0..session.claims.len() {
            let claim_text = session.claims[i].text.clone();
            for page in &pages {
                if session.claims[i].evidence.iter().any(|e| e.url == page.url) {
                    continue;
                }
                let matches = reasoner.extract_claims(&page.text, &claim_text).await?;
                if let Some(found) = matches.first() {
                    let stance = if found.negated { Stance::Refutes } else { Stance::Supports };
                    session.claims[i].add_evidence(page.evidence(stance, &found.text));
                }
            }
        }

        let verify_mass = session.config.verify_evidence_mass;
        for claim in &mut session.claims {
            claim.recompute(verify_mass);
        }

        if dropped > 0 {
            tracing::info!(
                "Claim limit of {} reached, dropped {} claims",
                session.config.max_claims,
                dropped
            );
        }

        let output = format!(
            "{} raw claims -> {} claims, {} open gaps",
            raw_count,
            session.claims.len(),
            session.open_gap_count()
        );
        Ok(PhaseResult::next(Phase::Normalize, output))
    }
}

/// One evidence round per invocation, gated by the termination evaluator
pub struct DeepHandler;

#[async_trait]
impl PhaseHandler for DeepHandler {
    fn phase(&self) -> Phase {
        Phase::Deep
    }

    async fn execute(&self, session: &mut ResearchSession) -> Result<PhaseResult> {
        if session.claims.is_empty() {
            return Ok(PhaseResult::next(Phase::Deep, "no claims to investigate"));
        }

        let round = session.rounds + 1;
        let budget_before = session.budget_used();

        let targets: Vec<String> = session
            .gaps
            .iter()
            .filter(|g| g.state == GapState::Open)
            .map(|g| g.claim_id.clone())
            .collect();

        // (claim id, query) for every open gap plus queued counter queries
        let mut requests: Vec<(String, String)> = targets
            .iter()
            .filter_map(|id| session.claim(id).map(|c| (id.clone(), c.text.clone())))
            .collect();
        requests.append(&mut session.pending_queries);

        let queries: Vec<String> = requests.iter().map(|(_, q)| q.clone()).collect();
        let hits = search_all(session.search.clone(), &queries).await;

        let orchestrator = session.orchestrator.clone();
        let mut requested_by: HashMap<String, String> = HashMap::new();
        let mut urls = Vec::new();
        for (i, hit) in hits {
            if urls.len() >= session.config.deep_urls_per_round {
                break;
            }
            if orchestrator.has_seen(&hit.url) {
                continue;
            }
            requested_by.insert(hit.url.clone(), requests[i].0.clone());
            urls.push(hit.url);
        }

        let results = orchestrator.fetch_all(urls).await;
        let mut pages = Vec::new();
        let mut fed: HashSet<String> = HashSet::new();
        for result in &results {
            if let Some(page) = FetchedPage::from_result(result) {
                if let Some(claim_id) = requested_by.get(&result.url) {
                    fed.insert(claim_id.clone());
                }
                session.note_source(&page.url);
                pages.push(page);
            }
        }

        let reasoner = session.reasoner.clone();
        let verify_mass = session.config.verify_evidence_mass;
        let mut added = 0usize;
        for claim_id in &targets {
            let Some(i) = session.claims.iter().position(|c| &c.id == claim_id) else {
                continue;
            };
            let claim_text = session.claims[i].text.clone();
            let mut gained = 0usize;

            for page in &pages {
                let matches = reasoner.extract_claims(&page.text, &claim_text).await?;
                if let Some(found) = matches.first() {
                    let stance = if found.negated { Stance::Refutes } else { Stance::Supports };
                    if session.claims[i].add_evidence(page.evidence(stance, &found.text)) {
                        gained += 1;
                    }
                }
            }
            added += gained;

            let claim = &mut session.claims[i];
            claim.recompute(verify_mass);
            let state = if claim.status.is_settled() {
                GapState::Closed
            } else if gained == 0 && !fed.contains(claim_id) {
                GapState::Blocked
            } else {
                GapState::Open
            };
            tracing::debug!(
                "Round {}: {} is {} ({:.2} mass, gap {})",
                round,
                claim.id,
                claim.status,
                claim.evidence_mass(),
                state
            );
            session.set_gap_state(claim_id, state);
        }

        session.rounds = round;
        let cost = session.budget_used() - budget_before;
        let snapshot = session.round_snapshot(round, cost);
        let decision = session.evaluator.should_stop(snapshot)?;

        let output = format!(
            "round {}: {} pages, {} new evidence, coverage {:.2}, {}",
            round,
            pages.len(),
            added,
            decision.coverage,
            decision.reason
        );

        if decision.should_stop {
            return Ok(PhaseResult::next(Phase::Deep, output));
        }
        if session.open_gap_count() == 0 && session.pending_queries.is_empty() {
            return Ok(PhaseResult::next(Phase::Deep, format!("{}, no open gaps", output)));
        }
        Ok(PhaseResult::continue_in(Phase::Deep, output))
    }
}

/// Checks evidence sufficiency and may send the run back to DEEP
pub struct VerifyHandler;

#[async_trait]
impl PhaseHandler for VerifyHandler {
    fn phase(&self) -> Phase {
        Phase::Verify
    }

    async fn execute(&self, session: &mut ResearchSession) -> Result<PhaseResult> {
        if session.claims.is_empty() {
            return Ok(PhaseResult::next(Phase::Verify, "no claims to verify"));
        }

        let min_mass = session.config.min_evidence_mass;
        let insufficient: Vec<(String, String)> = session
            .claims
            .iter()
            .filter(|c| c.evidence_mass() < min_mass || c.status == ClaimStatus::Contested)
            .map(|c| (c.id.clone(), c.text.clone()))
            .collect();

        let fraction = insufficient.len() as f64 / session.claims.len() as f64;
        let wants_rollback = fraction > session.config.rollback_insufficient_fraction
            && session.rollbacks < session.config.max_rollbacks;

        if !wants_rollback {
            let output = format!(
                "{}/{} claims insufficiently supported, proceeding",
                insufficient.len(),
                session.claims.len()
            );
            return Ok(PhaseResult::next(Phase::Verify, output));
        }

        let reasoner = session.reasoner.clone();
        let mut actions = Vec::new();
        for (claim_id, text) in &insufficient {
            for query in reasoner.generate_counter_queries(text).await? {
                actions.push(query.clone());
                session.pending_queries.push((claim_id.clone(), query));
            }
            session.set_gap_state(claim_id, GapState::Open);
        }

        let output = format!(
            "{}/{} claims insufficiently supported, {} counter queries queued",
            insufficient.len(),
            session.claims.len(),
            actions.len()
        );
        Ok(PhaseResult::rollback(Phase::Verify, Phase::Deep, output).with_actions(actions))
    }
}

/// Builds the final report
pub struct IntegrateHandler;

#[async_trait]
impl PhaseHandler for IntegrateHandler {
    fn phase(&self) -> Phase {
        Phase::Integrate
    }

    async fn execute(&self, session: &mut ResearchSession) -> Result<PhaseResult> {
        let data = ReportData {
            query: session.query.clone(),
            claims: session.claims.clone(),
            gaps: session.gaps.clone(),
            sources: session.sources.clone(),
            termination_reason: session
                .last_termination()
                .map(|t| t.reason.as_code().to_string()),
            rounds: session.rounds,
        };

        let report = match session.reasoner.generate_report(&data).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!("Report generation failed, writing a plain report: {}", e);
                plain_report(&data)
            }
        };
        let output = format!("report of {} chars", report.len());
        session.report = Some(report);
        Ok(PhaseResult::next(Phase::Integrate, output))
    }
}

/// Status-per-line fallback report
fn plain_report(data: &ReportData) -> String {
    let mut report = format!("Research report: {}\n\n", data.query);
    for claim in &data.claims {
        let _ = writeln!(
            report,
            "[{}] {} (evidence {:.2})",
            claim.status,
            claim.text,
            claim.evidence_mass()
        );
    }
    report
}
