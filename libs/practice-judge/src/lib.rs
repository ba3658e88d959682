pub mod api;
pub mod boundary;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod harness;
pub mod orchestrator;
pub mod session;

#[cfg(test)]
mod engine_tests;

pub use error::{ApiError, RunRejected, SessionError};
pub use orchestrator::{JudgeState, Orchestrator};
