/// Research phase definitions
///
/// This module defines the stages a research run moves through and the
/// signals a phase handler returns to steer the runner.
use serde::Serialize;
use std::fmt;

/// A stage of the research pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Broad discovery: generate queries, search, skim top results
    Wide,

    /// Normalize raw claims and open one gap per claim
    Normalize,

    /// Evidence gathering rounds, gated by the termination evaluator
    Deep,

    /// Check evidence sufficiency, possibly rolling back to Deep
    Verify,

    /// Assemble the final report
    Integrate,

    /// Terminal state
    Complete,
}

impl Phase {
    /// Returns the phase that follows this one on a NEXT signal
    ///
    /// `Complete` is terminal and maps to itself.
    pub fn next(&self) -> Phase {
        match self {
            Self::Wide => Self::Normalize,
            Self::Normalize => Self::Deep,
            Self::Deep => Self::Verify,
            Self::Verify => Self::Integrate,
            Self::Integrate => Self::Complete,
            Self::Complete => Self::Complete,
        }
    }

    /// Returns true for the terminal phase
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Default rollback destination for a phase, if it may roll back at all
    pub fn default_rollback_target(&self) -> Option<Phase> {
        match self {
            Self::Verify => Some(Self::Deep),
            _ => None,
        }
    }

    /// Stable machine-readable code for this phase
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Wide => "WIDE",
            Self::Normalize => "NORMALIZE",
            Self::Deep => "DEEP",
            Self::Verify => "VERIFY",
            Self::Integrate => "INTEGRATE",
            Self::Complete => "COMPLETE",
        }
    }

    /// Parses a phase from its code (case-insensitive)
    pub fn from_code(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "WIDE" => Some(Self::Wide),
            "NORMALIZE" => Some(Self::Normalize),
            "DEEP" => Some(Self::Deep),
            "VERIFY" => Some(Self::Verify),
            "INTEGRATE" => Some(Self::Integrate),
            "COMPLETE" => Some(Self::Complete),
            _ => None,
        }
    }

    /// All phases in forward order
    pub fn all() -> [Phase; 6] {
        [
            Self::Wide,
            Self::Normalize,
            Self::Deep,
            Self::Verify,
            Self::Integrate,
            Self::Complete,
        ]
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_code())
    }
}

/// Control signal emitted by a phase handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseSignal {
    /// Advance along the forward transition table
    Next,
    /// Stay in the current phase for another round
    Continue,
    /// Re-run the current phase after a recoverable hiccup
    Retry,
    /// Jump back to the result's rollback target
    Rollback,
    /// Give up: the run completes in a failed state
    Abort,
}

impl PhaseSignal {
    /// Returns true if the signal keeps the runner on the same phase
    pub fn stays(&self) -> bool {
        matches!(self, Self::Continue | Self::Retry)
    }

    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Next => "NEXT",
            Self::Continue => "CONTINUE",
            Self::Retry => "RETRY",
            Self::Rollback => "ROLLBACK",
            Self::Abort => "ABORT",
        }
    }
}

impl fmt::Display for PhaseSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_code())
    }
}
