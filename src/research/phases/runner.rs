//! The phase state machine
//!
//! WIDE -> NORMALIZE -> DEEP -> VERIFY -> INTEGRATE -> COMPLETE, one handler
//! invocation per step. Handlers steer the runner with a [`PhaseSignal`];
//! errors and panics inside a handler are turned into ABORT results here and
//! never escape the runner.

use crate::config::PhaseConfig;
use crate::crawler::{BreakerStats, BudgetUsage};
use crate::research::model::{Claim, Gap};
use crate::research::session::ResearchSession;
use crate::research::termination::TerminationResult;
use crate::state::{HostRecord, Phase, PhaseSignal};
use crate::{DelveError, Result};
use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

/// Outcome of one handler invocation
#[derive(Debug, Clone, Serialize)]
pub struct PhaseResult {
    pub phase: Phase,
    pub success: bool,
    pub signal: PhaseSignal,
    /// Destination of a ROLLBACK; the phase's default target when unset
    pub rollback_target: Option<Phase>,
    /// Follow-up work the handler queued (queries, gap ids)
    pub required_actions: Vec<String>,
    /// Short human-readable summary
    pub output: String,
    pub error: Option<String>,
}

impl PhaseResult {
    pub fn next(phase: Phase, output: impl Into<String>) -> Self {
        Self::with_signal(phase, PhaseSignal::Next, output)
    }

    pub fn continue_in(phase: Phase, output: impl Into<String>) -> Self {
        Self::with_signal(phase, PhaseSignal::Continue, output)
    }

    pub fn rollback(phase: Phase, target: Phase, output: impl Into<String>) -> Self {
        Self {
            rollback_target: Some(target),
            ..Self::with_signal(phase, PhaseSignal::Rollback, output)
        }
    }

    pub fn abort(phase: Phase, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            output: format!("{} aborted", phase),
            error: Some(error),
            ..Self::with_signal(phase, PhaseSignal::Abort, "")
        }
    }

    pub fn with_actions(mut self, actions: Vec<String>) -> Self {
        self.required_actions = actions;
        self
    }

    fn with_signal(phase: Phase, signal: PhaseSignal, output: impl Into<String>) -> Self {
        Self {
            phase,
            success: true,
            signal,
            rollback_target: None,
            required_actions: Vec::new(),
            output: output.into(),
            error: None,
        }
    }
}

/// One phase of the pipeline
#[async_trait]
pub trait PhaseHandler: Send + Sync {
    /// The phase this handler runs
    fn phase(&self) -> Phase;

    async fn execute(&self, session: &mut ResearchSession) -> Result<PhaseResult>;
}

/// Everything a run produced, also on forced termination
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub succeeded: bool,
    /// Machine-readable reason the run ended
    pub reason: String,
    pub error: Option<String>,
    pub final_phase: Phase,
    pub steps: u32,
    pub rollbacks: u32,
    pub rounds: u32,
    pub phase_results: Vec<PhaseResult>,
    pub claims: Vec<Claim>,
    pub gaps: Vec<Gap>,
    pub termination: Option<TerminationResult>,
    pub report: Option<String>,
    pub sources: Vec<String>,
    pub budget: BudgetUsage,
    pub breaker: BreakerStats,
    pub hosts: Vec<(String, HostRecord)>,
}

/// Drives a session through the phase table
pub struct PhaseRunner {
    handlers: HashMap<Phase, Box<dyn PhaseHandler>>,
    max_rollbacks: u32,
    max_steps: u32,
}

impl PhaseRunner {
    /// Creates a runner with no handlers registered
    pub fn new(config: &PhaseConfig) -> Self {
        Self {
            handlers: HashMap::new(),
            max_rollbacks: config.max_rollbacks,
            max_steps: config.max_steps.max(1),
        }
    }

    /// Creates a runner with the built-in handler for every phase
    pub fn with_default_handlers(config: &PhaseConfig) -> Self {
        let mut runner = Self::new(config);
        for handler in super::handlers::default_handlers() {
            runner.register(handler);
        }
        runner
    }

    /// Registers a handler, replacing any previous one for its phase
    pub fn register(&mut self, handler: Box<dyn PhaseHandler>) {
        self.handlers.insert(handler.phase(), handler);
    }

    /// Runs the session to COMPLETE
    ///
    /// Always returns; the outcome carries whatever was gathered.
    pub async fn run(&self, session: &mut ResearchSession) -> RunOutcome {
        let mut results = Vec::new();
        let mut failure: Option<String> = None;
        let mut stop_reason: Option<&'static str> = None;

        tracing::info!("Starting research run for '{}'", session.query);

        while !session.phase.is_terminal() {
            if session.counter.steps() >= self.max_steps {
                tracing::warn!(
                    "Step limit of {} reached in {}, completing run",
                    self.max_steps,
                    session.phase
                );
                stop_reason = Some("MAX_STEPS");
                session.phase = Phase::Complete;
                break;
            }

            let phase = session.phase;
            let step = session.counter.tick();
            let trace = session.counter.next_trace();
            tracing::debug!("Step {} (trace {}): entering {}", step, trace, phase);

            let result = self.invoke(phase, session).await;
            tracing::info!(
                "{} -> {}{}",
                phase,
                result.signal,
                if result.output.is_empty() {
                    String::new()
                } else {
                    format!(": {}", result.output)
                }
            );

            session.phase = self.transition(session, &result);
            if result.signal == PhaseSignal::Abort {
                failure = result.error.clone().or_else(|| Some(format!("{} aborted", phase)));
            }
            results.push(result);
        }

        let succeeded = failure.is_none();
        let reason = if !succeeded {
            "ABORTED".to_string()
        } else if let Some(reason) = stop_reason {
            reason.to_string()
        } else if let Some(last) = session.last_termination().filter(|t| t.should_stop) {
            last.reason.as_code().to_string()
        } else {
            "COMPLETED".to_string()
        };

        if succeeded {
            tracing::info!("Run complete after {} steps: {}", session.counter.steps(), reason);
        } else {
            tracing::error!(
                "Run aborted after {} steps: {}",
                session.counter.steps(),
                failure.as_deref().unwrap_or("unknown error")
            );
        }

        RunOutcome {
            succeeded,
            reason,
            error: failure,
            final_phase: session.phase,
            steps: session.counter.steps(),
            rollbacks: session.rollbacks,
            rounds: session.rounds,
            phase_results: results,
            claims: session.claims.clone(),
            gaps: session.gaps.clone(),
            termination: session.last_termination().cloned(),
            report: session.report.clone(),
            sources: session.sources.clone(),
            budget: session.orchestrator.budget_usage(),
            breaker: session.orchestrator.breaker().get_stats(),
            hosts: session.orchestrator.policy().records(),
        }
    }

    /// Runs one handler, converting errors and panics into ABORT results
    async fn invoke(&self, phase: Phase, session: &mut ResearchSession) -> PhaseResult {
        let Some(handler) = self.handlers.get(&phase) else {
            let error = DelveError::Phase {
                phase,
                message: "no handler registered".to_string(),
            };
            return PhaseResult::abort(phase, error.to_string());
        };

        match AssertUnwindSafe(handler.execute(session)).catch_unwind().await {
            Ok(Ok(mut result)) => {
                result.phase = phase;
                result
            }
            Ok(Err(e)) => {
                tracing::warn!("{} failed: {}", phase, e);
                PhaseResult::abort(phase, e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!("{} panicked: {}", phase, message);
                PhaseResult::abort(phase, format!("handler panicked: {}", message))
            }
        }
    }

    /// Applies a signal to the transition table
    fn transition(&self, session: &mut ResearchSession, result: &PhaseResult) -> Phase {
        let phase = result.phase;
        match result.signal {
            PhaseSignal::Next => phase.next(),
            PhaseSignal::Continue | PhaseSignal::Retry => phase,
            PhaseSignal::Abort => Phase::Complete,
            PhaseSignal::Rollback => {
                let target = result
                    .rollback_target
                    .or_else(|| phase.default_rollback_target());
                match target {
                    Some(target) if session.rollbacks < self.max_rollbacks => {
                        session.rollbacks += 1;
                        tracing::info!(
                            "Rolling back {} -> {} ({}/{})",
                            phase,
                            target,
                            session.rollbacks,
                            self.max_rollbacks
                        );
                        target
                    }
                    Some(_) => {
                        tracing::info!(
                            "Rollback limit of {} reached, {} proceeds to {}",
                            self.max_rollbacks,
                            phase,
                            phase.next()
                        );
                        phase.next()
                    }
                    None => {
                        tracing::warn!("{} requested a rollback without a target", phase);
                        phase.next()
                    }
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
