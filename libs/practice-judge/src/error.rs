//! Caller-visible error types.
//!
//! Judge failures (load errors, per-fixture errors, timeouts, crashes) are
//! never errors: they arrive as `RunReport` data. What remains here is the
//! busy rejection and the Session API transport failures that leave session
//! state untouched.

use crate::session::SessionPhase;
use thiserror::Error;

/// `Orchestrator::run` was called while another run was in flight
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("A run is already in flight (run {in_flight})")]
pub struct RunRejected {
    pub in_flight: u64,
}

/// External Session API failure; the caller may retry
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Session API request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Session API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Failed to decode Session API response: {0}")]
    Decode(String),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Cannot {action} while the session is {phase}")]
    InvalidState { action: &'static str, phase: SessionPhase },
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Busy(#[from] RunRejected),
}
