//! Round-by-round stop/continue decisions
//!
//! The evaluator owns the history of [`RoundSnapshot`]s for one session.
//! Every decision is a pure function of that history and the configuration,
//! so replaying the same snapshots always yields the same decisions.

use crate::config::TerminationConfig;
use crate::research::model::RoundSnapshot;
use crate::{DelveError, Result};
use serde::Serialize;
use std::fmt;

/// Why the evaluator stopped (or did not stop) the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    Continue,
    CoverageConverged,
    CoverageLowUtility,
    BudgetExceeded,
    HardCapRounds,
    HardCapBudget,
}

impl StopReason {
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Continue => "CONTINUE",
            Self::CoverageConverged => "COVERAGE_CONVERGED",
            Self::CoverageLowUtility => "COVERAGE_LOW_UTILITY",
            Self::BudgetExceeded => "BUDGET_EXCEEDED",
            Self::HardCapRounds => "HARD_CAP_ROUNDS",
            Self::HardCapBudget => "HARD_CAP_BUDGET",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_code())
    }
}

/// Decision for one round
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TerminationResult {
    pub should_stop: bool,
    pub coverage: f64,
    pub converged: bool,
    pub utility: f64,
    pub marginal_utility: f64,
    pub low_mu_streak: u32,
    pub low_mu_streak_confirmed: bool,
    pub budget_exceeded: bool,
    pub hard_cap: bool,
    pub reason: StopReason,
    pub round_index: u32,
}

/// Owns the snapshot history of one research session
#[derive(Debug, Clone)]
pub struct TerminationEvaluator {
    config: TerminationConfig,
    history: Vec<RoundSnapshot>,
    low_mu_streak: u32,
    last: Option<TerminationResult>,
}

impl TerminationEvaluator {
    pub fn new(config: TerminationConfig) -> Self {
        Self {
            config,
            history: Vec::new(),
            low_mu_streak: 0,
            last: None,
        }
    }

    pub fn config(&self) -> &TerminationConfig {
        &self.config
    }

    pub fn history(&self) -> &[RoundSnapshot] {
        &self.history
    }

    /// Most recent decision, if any round was evaluated
    pub fn last_result(&self) -> Option<&TerminationResult> {
        self.last.as_ref()
    }

    /// Appends a round and decides whether to stop
    ///
    /// # Errors
    ///
    /// Returns [`DelveError::Termination`] when `round.round_index` does not
    /// strictly increase. The history is left untouched in that case.
    pub fn should_stop(&mut self, round: RoundSnapshot) -> Result<TerminationResult> {
        if let Some(prev) = self.history.last() {
            if round.round_index <= prev.round_index {
                return Err(DelveError::Termination(format!(
                    "round index {} does not follow {}",
                    round.round_index, prev.round_index
                )));
            }
        }

        self.history.push(round);
        let result = decide(&self.history, &self.config, self.low_mu_streak);
        self.low_mu_streak = result.low_mu_streak;

        if result.should_stop {
            tracing::info!(
                "Round {}: stopping with {} (coverage {:.2}, mu {:.4}, streak {})",
                result.round_index,
                result.reason,
                result.coverage,
                result.marginal_utility,
                result.low_mu_streak
            );
        } else {
            tracing::debug!(
                "Round {}: continue (coverage {:.2}, converged {}, mu {:.4}, streak {})",
                result.round_index,
                result.coverage,
                result.converged,
                result.marginal_utility,
                result.low_mu_streak
            );
        }

        self.last = Some(result.clone());
        Ok(result)
    }
}

/// Replays a whole history and returns the decision for its last round
///
/// Returns `None` for an empty history.
///
/// # Errors
///
/// Returns [`DelveError::Termination`] if round indices do not strictly increase.
pub fn evaluate(
    history: &[RoundSnapshot],
    config: &TerminationConfig,
) -> Result<Option<TerminationResult>> {
    let mut evaluator = TerminationEvaluator::new(config.clone());
    let mut last = None;
    for round in history {
        last = Some(evaluator.should_stop(round.clone())?);
    }
    Ok(last)
}

/// Decision for the last round of `history` given the streak before it
fn decide(history: &[RoundSnapshot], config: &TerminationConfig, prior_streak: u32) -> TerminationResult {
    let Some(current) = history.last() else {
        return TerminationResult {
            should_stop: false,
            coverage: 0.0,
            converged: false,
            utility: 0.0,
            marginal_utility: 0.0,
            low_mu_streak: prior_streak,
            low_mu_streak_confirmed: false,
            budget_exceeded: false,
            hard_cap: false,
            reason: StopReason::Continue,
            round_index: 0,
        };
    };
    let previous = history.len().checked_sub(2).map(|i| &history[i]);

    let coverage = current.coverage();
    let converged = is_converged(history, config);

    let utility = previous.map_or(0.0, |prev| round_utility(prev, current, config));
    let marginal_utility = utility / current.cost.max(config.cost_floor);

    // The first round has no baseline to compare against.
    let low_mu_streak = match previous {
        None => prior_streak,
        Some(_) if marginal_utility < config.mu_threshold => prior_streak + 1,
        Some(_) => 0,
    };
    let low_mu_streak_confirmed = low_mu_streak >= config.low_mu_streak;

    let budget_exceeded = current.cumulative_budget_used >= current.budget_limit;
    let hard_cap_rounds = current.round_index >= current.hard_cap_rounds;
    let hard_cap_budget = current.cumulative_budget_used >= config.hard_cap_budget;

    let reason = if coverage >= config.target_coverage && converged {
        StopReason::CoverageConverged
    } else if coverage >= config.target_coverage && low_mu_streak_confirmed {
        StopReason::CoverageLowUtility
    } else if budget_exceeded && coverage >= config.min_coverage {
        StopReason::BudgetExceeded
    } else if hard_cap_rounds {
        StopReason::HardCapRounds
    } else if hard_cap_budget {
        StopReason::HardCapBudget
    } else {
        StopReason::Continue
    };

    TerminationResult {
        should_stop: reason != StopReason::Continue,
        coverage,
        converged,
        utility,
        marginal_utility,
        low_mu_streak,
        low_mu_streak_confirmed,
        budget_exceeded,
        hard_cap: hard_cap_rounds || hard_cap_budget,
        reason,
        round_index: current.round_index,
    }
}

/// Top-K claim ids by evidence mass in the latest round (ties by id)
fn watched_claims(round: &RoundSnapshot, top_k: usize) -> Vec<&str> {
    let mut ranked: Vec<(&str, f64)> = round
        .claims
        .iter()
        .map(|(id, c)| (id.as_str(), c.evidence_mass))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.into_iter().take(top_k).map(|(id, _)| id).collect()
}

/// Average absolute confidence change of the watched set over the last `tau`
/// transitions is below `eps`
///
/// Needs `tau + 1` rounds of history and at least one watched claim seen in
/// both rounds of some transition.
fn is_converged(history: &[RoundSnapshot], config: &TerminationConfig) -> bool {
    if config.tau == 0 || history.len() < config.tau + 1 {
        return false;
    }
    let Some(latest) = history.last() else {
        return false;
    };
    let watched = watched_claims(latest, config.top_k);

    let window = &history[history.len() - config.tau - 1..];
    let mut total = 0.0;
    let mut samples = 0usize;
    for pair in window.windows(2) {
        for id in &watched {
            if let (Some(before), Some(after)) = (pair[0].claims.get(*id), pair[1].claims.get(*id)) {
                total += (after.confidence - before.confidence).abs();
                samples += 1;
            }
        }
    }

    samples > 0 && total / (samples as f64) < config.eps
}

/// Weighted information gain between two consecutive rounds
fn round_utility(prev: &RoundSnapshot, current: &RoundSnapshot, config: &TerminationConfig) -> f64 {
    let weights = &config.weights;
    let coverage_gain = (current.coverage() - prev.coverage()).max(0.0);

    let common: Vec<_> = current
        .claims
        .iter()
        .filter_map(|(id, now)| prev.claims.get(id).map(|before| (before, now)))
        .collect();

    let (evidence_gain, telephone_gain, status_gain) = if common.is_empty() {
        (0.0, 0.0, 0.0)
    } else {
        let n = common.len() as f64;
        let evidence = common
            .iter()
            .map(|(before, now)| now.evidence_mass - before.evidence_mass)
            .sum::<f64>()
            / n;
        let telephone = common
            .iter()
            .map(|(before, now)| {
                let drop = before.telephone_risk - now.telephone_risk;
                if drop >= config.telephone_drop_threshold {
                    drop
                } else {
                    0.0
                }
            })
            .sum::<f64>()
            / n;
        let status = common
            .iter()
            .map(|(before, now)| (f64::from(now.status.rank()) - f64::from(before.status.rank())).max(0.0))
            .sum::<f64>()
            / n;
        (evidence, telephone, status)
    };

    weights.coverage * coverage_gain
        + weights.evidence * evidence_gain
        + weights.telephone * telephone_gain
        + weights.status * status_gain
}
