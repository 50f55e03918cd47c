//! Phase handlers and the runner that sequences them

mod handlers;
mod runner;

pub use handlers::{
    default_handlers, DeepHandler, IntegrateHandler, NormalizeHandler, VerifyHandler, WideHandler,
};
pub use runner::{PhaseHandler, PhaseResult, PhaseRunner, RunOutcome};
