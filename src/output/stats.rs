//! Statistics generated from a finished run

use crate::crawler::BudgetUsage;
use crate::research::{ClaimStatus, GapState, RunOutcome};
use crate::state::{CircuitState, HostState};
use serde::Serialize;
use std::collections::BTreeMap;

/// Host that ended the run in a non-Ok state
#[derive(Debug, Clone, Serialize)]
pub struct HostSummary {
    pub host: String,
    pub state: HostState,
    pub reason: Option<String>,
    pub last_status: Option<u16>,
}

/// Run summary statistics
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub succeeded: bool,
    pub reason: String,
    pub error: Option<String>,
    pub steps: u32,
    pub rounds: u32,
    pub rollbacks: u32,

    /// Count of claims by final status
    pub claims_by_status: BTreeMap<ClaimStatus, usize>,

    /// Count of gaps by final state
    pub gaps_by_state: BTreeMap<String, usize>,

    /// Closed gaps over all gaps
    pub coverage: f64,

    pub sources: usize,
    pub budget: BudgetUsage,

    pub urls_exhausted: usize,
    pub hosts_open: usize,

    /// Hosts denied by policy or breaker at the end of the run
    pub denied_hosts: Vec<HostSummary>,
}

impl RunSummary {
    pub fn from_outcome(outcome: &RunOutcome) -> Self {
        let mut claims_by_status = BTreeMap::new();
        for claim in &outcome.claims {
            *claims_by_status.entry(claim.status).or_insert(0) += 1;
        }

        let mut gaps_by_state = BTreeMap::new();
        for gap in &outcome.gaps {
            *gaps_by_state.entry(gap.state.to_string()).or_insert(0) += 1;
        }
        let closed = outcome
            .gaps
            .iter()
            .filter(|g| g.state == GapState::Closed)
            .count();
        let coverage = if outcome.gaps.is_empty() {
            0.0
        } else {
            closed as f64 / outcome.gaps.len() as f64
        };

        let mut denied_hosts: Vec<HostSummary> = outcome
            .hosts
            .iter()
            .filter(|(_, record)| record.state.denies())
            .map(|(host, record)| HostSummary {
                host: host.clone(),
                state: record.state,
                reason: record.reason.clone(),
                last_status: record.last_status,
            })
            .collect();
        for view in &outcome.breaker.hosts {
            if view.state == CircuitState::Open && !denied_hosts.iter().any(|h| h.host == view.host) {
                denied_hosts.push(HostSummary {
                    host: view.host.clone(),
                    state: HostState::Blocked,
                    reason: Some("host_blocked".to_string()),
                    last_status: None,
                });
            }
        }
        denied_hosts.sort_by(|a, b| a.host.cmp(&b.host));

        Self {
            succeeded: outcome.succeeded,
            reason: outcome.reason.clone(),
            error: outcome.error.clone(),
            steps: outcome.steps,
            rounds: outcome.rounds,
            rollbacks: outcome.rollbacks,
            claims_by_status,
            gaps_by_state,
            coverage,
            sources: outcome.sources.len(),
            budget: outcome.budget.clone(),
            urls_exhausted: outcome.breaker.urls_exhausted,
            hosts_open: outcome.breaker.hosts_open,
            denied_hosts,
        }
    }

    pub fn total_claims(&self) -> usize {
        self.claims_by_status.values().sum()
    }
}

/// Prints the summary to stdout in a formatted manner
pub fn print_summary(summary: &RunSummary) {
    println!("=== Research Summary ===\n");

    println!("Outcome:");
    println!(
        "  Status: {}",
        if summary.succeeded { "completed" } else { "aborted" }
    );
    println!("  Reason: {}", summary.reason);
    if let Some(error) = &summary.error {
        println!("  Error: {}", error);
    }
    println!(
        "  Steps: {} ({} deep rounds, {} rollbacks)",
        summary.steps, summary.rounds, summary.rollbacks
    );
    println!();

    println!("Claims ({}):", summary.total_claims());
    // Best status first
    for (status, count) in summary.claims_by_status.iter().rev() {
        println!("  {}: {}", status, count);
    }
    println!();

    println!("Gaps (coverage {:.1}%):", summary.coverage * 100.0);
    for (state, count) in &summary.gaps_by_state {
        println!("  {}: {}", state, count);
    }
    println!();

    let budget = &summary.budget;
    println!("Budget:");
    println!("  URLs: {} / {}", budget.urls, budget.max_urls);
    println!("  Fetches: {} / {}", budget.fetches, budget.max_fetches);
    println!("  Bytes: {} / {}", budget.bytes, budget.max_bytes);
    println!(
        "  Time: {:.1}s / {}s",
        budget.elapsed_secs, budget.max_time_secs
    );
    if let Some(kind) = budget.exhausted {
        println!("  Exhausted: {}", kind);
    }
    println!();

    println!("Sources used: {}", summary.sources);
    println!(
        "URLs exhausted: {}, hosts open: {}",
        summary.urls_exhausted, summary.hosts_open
    );

    if !summary.denied_hosts.is_empty() {
        println!();
        println!("Denied Hosts ({}):", summary.denied_hosts.len());
        for host in &summary.denied_hosts {
            println!(
                "  - {} [{}] {}",
                host.host,
                host.state,
                host.reason.as_deref().unwrap_or("-")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::{BreakerStats, HostCircuitView};
    use crate::research::{Claim, Gap};
    use crate::state::{HostRecord, Phase};

    fn create_test_outcome() -> RunOutcome {
        let mut verified = Claim::new("c1", "Verified claim.");
        verified.status = ClaimStatus::Verified;
        let open = Claim::new("c2", "Open claim.");
        let mut closed_gap = Gap::for_claim(&verified);
        closed_gap.state = GapState::Closed;

        RunOutcome {
            succeeded: true,
            reason: "COVERAGE_CONVERGED".to_string(),
            error: None,
            final_phase: Phase::Complete,
            steps: 7,
            rollbacks: 1,
            rounds: 3,
            phase_results: Vec::new(),
            gaps: vec![closed_gap, Gap::for_claim(&open)],
            claims: vec![verified, open],
            termination: None,
            report: None,
            sources: vec!["https://a.org/".to_string()],
            budget: BudgetUsage {
                urls: 4,
                max_urls: 10,
                fetches: 6,
                max_fetches: 20,
                bytes: 1000,
                max_bytes: 100_000,
                elapsed_secs: 1.5,
                max_time_secs: 60,
                exhausted: None,
            },
            breaker: BreakerStats {
                hosts_open: 1,
                hosts: vec![HostCircuitView {
                    host: "bad.example".to_string(),
                    state: CircuitState::Open,
                    recent_failures: 3,
                    times_opened: 1,
                }],
                ..BreakerStats::default()
            },
            hosts: vec![
                ("ok.example".to_string(), HostRecord::new()),
                ("deny.example".to_string(), HostRecord::blocked("denylisted")),
            ],
        }
    }

    #[test]
    fn test_summary_from_outcome() {
        let summary = RunSummary::from_outcome(&create_test_outcome());

        assert_eq!(summary.total_claims(), 2);
        assert_eq!(summary.claims_by_status.get(&ClaimStatus::Verified), Some(&1));
        assert_eq!(summary.claims_by_status.get(&ClaimStatus::Unsupported), Some(&1));
        assert_eq!(summary.gaps_by_state.get("CLOSED"), Some(&1));
        assert_eq!(summary.gaps_by_state.get("OPEN"), Some(&1));
        assert_eq!(summary.coverage, 0.5);
        assert_eq!(summary.sources, 1);
        assert_eq!(summary.hosts_open, 1);
    }

    #[test]
    fn test_denied_hosts_merge_policy_and_breaker() {
        let summary = RunSummary::from_outcome(&create_test_outcome());
        let hosts: Vec<&str> = summary.denied_hosts.iter().map(|h| h.host.as_str()).collect();
        assert_eq!(hosts, vec!["bad.example", "deny.example"]);
        assert_eq!(summary.denied_hosts[0].reason.as_deref(), Some("host_blocked"));
        assert_eq!(summary.denied_hosts[1].reason.as_deref(), Some("denylisted"));
    }
}
