//! Claims, evidence, gaps and round snapshots

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Verification status of a claim, ordered from worst to best
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimStatus {
    Refuted,
    Unsupported,
    Contested,
    Conditioned,
    Verified,
}

impl ClaimStatus {
    /// Ordinal used for status-improvement utility
    pub fn rank(&self) -> u8 {
        match self {
            Self::Refuted => 0,
            Self::Unsupported => 1,
            Self::Contested => 2,
            Self::Conditioned => 3,
            Self::Verified => 4,
        }
    }

    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Refuted => "REFUTED",
            Self::Unsupported => "UNSUPPORTED",
            Self::Contested => "CONTESTED",
            Self::Conditioned => "CONDITIONED",
            Self::Verified => "VERIFIED",
        }
    }

    /// True once nothing more needs to be learned about the claim
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Verified | Self::Refuted)
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_code())
    }
}

/// Whether a piece of evidence backs or contradicts its claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    Supports,
    Refutes,
}

/// One source's contribution to a claim
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evidence {
    pub url: String,
    pub host: String,
    pub stance: Stance,
    /// Contribution to evidence mass (derived from extraction quality)
    pub weight: f64,
    pub excerpt: String,
}

/// A discrete factual assertion under investigation
#[derive(Debug, Clone, Serialize)]
pub struct Claim {
    pub id: String,
    pub text: String,
    pub status: ClaimStatus,
    /// Net support in `[-1, 1]`
    pub confidence: f64,
    pub evidence: Vec<Evidence>,
    /// Estimated distance from a primary source; 1.0 when nothing backs the claim
    pub telephone_risk: f64,
}

impl Claim {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            status: ClaimStatus::Unsupported,
            confidence: 0.0,
            evidence: Vec::new(),
            telephone_risk: 1.0,
        }
    }

    pub fn evidence_mass(&self) -> f64 {
        self.evidence.iter().map(|e| e.weight).sum()
    }

    pub fn support_mass(&self) -> f64 {
        self.mass_for(Stance::Supports)
    }

    pub fn refute_mass(&self) -> f64 {
        self.mass_for(Stance::Refutes)
    }

    fn mass_for(&self, stance: Stance) -> f64 {
        self.evidence
            .iter()
            .filter(|e| e.stance == stance)
            .map(|e| e.weight)
            .sum()
    }

    /// Distinct hosts with supporting evidence
    pub fn supporting_hosts(&self) -> usize {
        self.evidence
            .iter()
            .filter(|e| e.stance == Stance::Supports)
            .map(|e| e.host.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Adds evidence unless this URL already contributed; returns true if added
    pub fn add_evidence(&mut self, evidence: Evidence) -> bool {
        if self.evidence.iter().any(|e| e.url == evidence.url) {
            return false;
        }
        self.evidence.push(evidence);
        true
    }

    /// Recomputes status, confidence and telephone risk from the evidence
    ///
    /// | Condition | Status |
    /// |-----------|--------|
    /// | no evidence | Unsupported |
    /// | refuting mass > 2x supporting mass | Refuted |
    /// | both supporting and refuting evidence | Contested |
    /// | support from 2+ hosts with mass >= `verify_mass` | Verified |
    /// | otherwise | Conditioned |
    pub fn recompute(&mut self, verify_mass: f64) {
        let support = self.support_mass();
        let refute = self.refute_mass();
        let total = support + refute;

        self.confidence = if total > 0.0 {
            ((support - refute) / total).clamp(-1.0, 1.0)
        } else {
            0.0
        };

        let hosts = self.supporting_hosts();
        self.telephone_risk = if hosts == 0 { 1.0 } else { 1.0 / hosts as f64 };

        self.status = if self.evidence.is_empty() {
            ClaimStatus::Unsupported
        } else if refute > 2.0 * support {
            ClaimStatus::Refuted
        } else if refute > 0.0 && support > 0.0 {
            ClaimStatus::Contested
        } else if hosts >= 2 && support >= verify_mass {
            ClaimStatus::Verified
        } else {
            ClaimStatus::Conditioned
        };
    }

    pub fn snapshot(&self) -> ClaimSnapshot {
        ClaimSnapshot {
            status: self.status,
            confidence: self.confidence,
            evidence_mass: self.evidence_mass(),
            telephone_risk: self.telephone_risk,
        }
    }
}

/// State of a research gap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GapState {
    Open,
    Closed,
    Blocked,
}

impl fmt::Display for GapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
            Self::Blocked => "BLOCKED",
        };
        write!(f, "{}", code)
    }
}

/// An open question the research must resolve; one per claim
#[derive(Debug, Clone, Serialize)]
pub struct Gap {
    pub id: String,
    pub claim_id: String,
    pub question: String,
    pub state: GapState,
}

impl Gap {
    pub fn for_claim(claim: &Claim) -> Self {
        Self {
            id: format!("gap-{}", claim.id),
            claim_id: claim.id.clone(),
            question: format!("Is it supported that: {}", claim.text),
            state: GapState::Open,
        }
    }
}

/// Per-claim values recorded in a round snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClaimSnapshot {
    pub status: ClaimStatus,
    pub confidence: f64,
    pub evidence_mass: f64,
    pub telephone_risk: f64,
}

/// Research state at the end of one DEEP round
///
/// Snapshots are appended to the termination history and never modified.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundSnapshot {
    /// 1-based, strictly increasing across the history
    pub round_index: u32,
    pub gap_states: BTreeMap<String, GapState>,
    pub claims: BTreeMap<String, ClaimSnapshot>,
    /// Network attempts spent in this round
    pub cost: f64,
    pub cumulative_budget_used: f64,
    pub budget_limit: f64,
    pub hard_cap_rounds: u32,
}

impl RoundSnapshot {
    /// Closed gaps over all gaps; 0 when there are no gaps
    pub fn coverage(&self) -> f64 {
        if self.gap_states.is_empty() {
            return 0.0;
        }
        let closed = self
            .gap_states
            .values()
            .filter(|s| **s == GapState::Closed)
            .count();
        closed as f64 / self.gap_states.len() as f64
    }
}
