/// Practice Session - Timer, Hints and Single Submission
///
/// **Lifecycle:**
/// `Created -> Active -> Submitted`, or `Active -> Expired -> Submitted`
/// when the clock runs out. Nothing leaves `Submitted`.
///
/// **Clock Authority:**
/// The server is authoritative. Every pushed tick overwrites the local
/// remaining time; the local one-second countdown only runs while the push
/// channel is disconnected. The client never writes time back.
///
/// **Submission:**
/// Sends the last known `RunReport`. Idempotent: a call while one is pending
/// or after the session is submitted does nothing. Reaching zero while
/// active triggers exactly one automatic submit.
///
/// **Failures:**
/// Session API errors leave the state as it was; the caller retries.
use crate::api::SessionApi;
use crate::error::SessionError;
use crate::orchestrator::Orchestrator;
use practice_common::config::JudgeConfig;
use practice_common::redis::connect_session_events;
use practice_common::types::{
    Difficulty, HintGrant, Question, RunJob, RunReport, Session, SessionEvent, SessionResult, SessionStatus,
};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Created,
    Active,
    Expired,
    Submitted,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionPhase::Created => "created",
            SessionPhase::Active => "active",
            SessionPhase::Expired => "expired",
            SessionPhase::Submitted => "submitted",
        };
        f.write_str(label)
    }
}

/// What a clock update asks the driver to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSignal {
    Continue,
    /// The session just expired; submit it
    Expired,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Submitted(Option<SessionResult>),
    AlreadyPending,
    AlreadySubmitted,
}

/// Point-in-time copy of the session for display
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub id: Option<String>,
    pub question: Option<Question>,
    pub phase: SessionPhase,
    pub hints_used: u32,
    pub hints: Vec<String>,
    pub remaining_sec: u64,
    pub last_report: Option<RunReport>,
    pub result: Option<SessionResult>,
    pub submit_pending: bool,
}

struct SessionState {
    phase: SessionPhase,
    id: Option<String>,
    question: Option<Question>,
    hints_used: u32,
    hints: Vec<String>,
    remaining_sec: u64,
    last_report: Option<RunReport>,
    result: Option<SessionResult>,
    submit_pending: bool,
}

impl SessionState {
    fn set_remaining(&mut self, remaining_sec: u64) -> ClockSignal {
        if self.phase != SessionPhase::Active {
            return ClockSignal::Continue;
        }
        self.remaining_sec = remaining_sec;
        if remaining_sec == 0 {
            self.phase = SessionPhase::Expired;
            return ClockSignal::Expired;
        }
        ClockSignal::Continue
    }

    fn apply_hint(&mut self, hint: String, hints_used: u32) {
        // A REST response and its push echo carry the same count
        if hints_used > self.hints_used {
            self.hints_used = hints_used;
            self.hints.push(hint);
        }
    }

    fn mark_submitted(&mut self, session: &Session) {
        self.phase = SessionPhase::Submitted;
        self.submit_pending = false;
        self.result = session.result.clone();
        self.hints_used = self.hints_used.max(session.hints_used);
    }

    fn apply_session(&mut self, session: &Session) -> ClockSignal {
        if self.phase == SessionPhase::Submitted {
            return ClockSignal::Continue;
        }
        self.hints_used = self.hints_used.max(session.hints_used);
        match session.status {
            SessionStatus::Submitted => {
                self.mark_submitted(session);
                ClockSignal::Continue
            }
            SessionStatus::Expired => self.set_remaining(0),
            SessionStatus::Active => self.set_remaining(session.remaining_sec),
        }
    }
}

pub struct PracticeSession {
    api: Arc<dyn SessionApi>,
    state: Mutex<SessionState>,
}

impl PracticeSession {
    pub fn new(api: Arc<dyn SessionApi>) -> Self {
        Self {
            api,
            state: Mutex::new(SessionState {
                phase: SessionPhase::Created,
                id: None,
                question: None,
                hints_used: 0,
                hints: Vec::new(),
                remaining_sec: 0,
                last_report: None,
                result: None,
                submit_pending: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock().phase
    }

    pub fn remaining_sec(&self) -> u64 {
        self.lock().remaining_sec
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.lock();
        SessionSnapshot {
            id: state.id.clone(),
            question: state.question.clone(),
            phase: state.phase,
            hints_used: state.hints_used,
            hints: state.hints.clone(),
            remaining_sec: state.remaining_sec,
            last_report: state.last_report.clone(),
            result: state.result.clone(),
            submit_pending: state.submit_pending,
        }
    }

    fn require(&self, action: &'static str, allowed: &[SessionPhase]) -> Result<String, SessionError> {
        let state = self.lock();
        match (&state.id, allowed.contains(&state.phase)) {
            (Some(id), true) => Ok(id.clone()),
            _ => Err(SessionError::InvalidState {
                action,
                phase: state.phase,
            }),
        }
    }

    /// Created -> Active with a question from the backend
    #[instrument(skip(self))]
    pub async fn start(&self, difficulty: Difficulty, topic: &str) -> Result<SessionSnapshot, SessionError> {
        {
            let state = self.lock();
            if state.phase != SessionPhase::Created {
                return Err(SessionError::InvalidState {
                    action: "start",
                    phase: state.phase,
                });
            }
        }

        let session = self.api.start(difficulty, topic).await?;

        {
            let mut state = self.lock();
            state.id = Some(session.id.clone());
            state.question = Some(session.question.clone());
            state.hints_used = session.hints_used;
            state.hints = session.hints.clone();
            state.remaining_sec = session.remaining_sec;
            state.phase = SessionPhase::Active;
        }

        info!(
            session_id = %session.id,
            title = %session.question.title,
            remaining_sec = session.remaining_sec,
            "Session started"
        );
        Ok(self.snapshot())
    }

    /// Apply one server push event
    pub fn apply_event(&self, event: SessionEvent) -> ClockSignal {
        let mut state = self.lock();
        match event {
            SessionEvent::Tick { remaining_sec } => state.set_remaining(remaining_sec),
            SessionEvent::SessionUpdated { session } => state.apply_session(&session),
            SessionEvent::HintGranted { hint, hints_used } => {
                state.apply_hint(hint, hints_used);
                ClockSignal::Continue
            }
            SessionEvent::SessionSubmitted { session } => {
                if state.phase != SessionPhase::Submitted {
                    state.mark_submitted(&session);
                    info!(session_id = %session.id, "Session submitted by server");
                }
                ClockSignal::Continue
            }
        }
    }

    /// Local one-second estimate, used only without a server connection
    pub fn tick_local(&self) -> ClockSignal {
        let mut state = self.lock();
        let remaining = state.remaining_sec.saturating_sub(1);
        state.set_remaining(remaining)
    }

    #[instrument(skip(self))]
    pub async fn request_hint(&self) -> Result<String, SessionError> {
        let id = self.require("request a hint", &[SessionPhase::Active])?;

        let HintGrant { hint, hints_used } = self.api.request_hint(&id).await?;

        self.lock().apply_hint(hint.clone(), hints_used);
        debug!(session_id = %id, hints_used, "Hint granted");
        Ok(hint)
    }

    /// Keep the newest report; a report from an older run never replaces it
    pub fn record_report(&self, report: RunReport) {
        let mut state = self.lock();
        if state.phase == SessionPhase::Submitted {
            return;
        }
        let newer = state
            .last_report
            .as_ref()
            .map_or(true, |current| report.run_id > current.run_id);
        if newer {
            state.last_report = Some(report);
        }
    }

    /// Run the current source against the question's fixtures
    pub async fn run_code(&self, orchestrator: &Orchestrator, source: &str) -> Result<RunReport, SessionError> {
        self.require("run code", &[SessionPhase::Active])?;
        let question = self.lock().question.clone();
        let Some(question) = question else {
            return Err(SessionError::InvalidState {
                action: "run code",
                phase: self.phase(),
            });
        };

        let report = orchestrator.run(RunJob::for_question(&question, source)).await?;
        self.record_report(report.clone());
        Ok(report)
    }

    #[instrument(skip(self))]
    pub async fn submit(&self) -> Result<SubmitOutcome, SessionError> {
        let (id, report) = {
            let mut state = self.lock();
            match state.phase {
                SessionPhase::Submitted => return Ok(SubmitOutcome::AlreadySubmitted),
                SessionPhase::Created => {
                    return Err(SessionError::InvalidState {
                        action: "submit",
                        phase: state.phase,
                    })
                }
                SessionPhase::Active | SessionPhase::Expired => {}
            }
            if state.submit_pending {
                return Ok(SubmitOutcome::AlreadyPending);
            }
            let Some(id) = state.id.clone() else {
                return Err(SessionError::InvalidState {
                    action: "submit",
                    phase: state.phase,
                });
            };
            state.submit_pending = true;
            (id, state.last_report.clone())
        };

        let response = self.api.submit(&id, report.as_ref()).await;

        let mut state = self.lock();
        state.submit_pending = false;
        match response {
            Ok(session) => {
                if state.phase != SessionPhase::Submitted {
                    state.mark_submitted(&session);
                }
                info!(
                    session_id = %id,
                    passed = session.result.as_ref().map(|r| r.passed_count),
                    total = session.result.as_ref().map(|r| r.total_tests),
                    "Session submitted"
                );
                Ok(SubmitOutcome::Submitted(state.result.clone()))
            }
            Err(e) => {
                warn!(session_id = %id, error = %e, "Submit failed, session unchanged");
                Err(e.into())
            }
        }
    }

    /// Subscribe to this session's push events on `config.redis_url`.
    ///
    /// `None` before `start` or when Redis is unreachable; pass the result
    /// straight to `run_clock`.
    pub async fn connect_events(&self, config: &JudgeConfig) -> Option<mpsc::Receiver<SessionEvent>> {
        let id = self.lock().id.clone()?;
        connect_session_events(&config.redis_url, &id).await
    }

    /// Drive the clock until the session is submitted.
    ///
    /// Consumes server events while `events` is connected; once it closes
    /// (or when `None`), counts down locally once per second. Expiry submits
    /// automatically, exactly once.
    pub async fn run_clock(&self, mut events: Option<mpsc::Receiver<SessionEvent>>) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        // The first tick completes immediately
        interval.tick().await;

        while self.phase() != SessionPhase::Submitted {
            let signal = tokio::select! {
                event = next_event(&mut events) => match event {
                    Some(event) => self.apply_event(event),
                    None => {
                        warn!("Push channel closed, counting down locally");
                        events = None;
                        ClockSignal::Continue
                    }
                },
                _ = interval.tick() => {
                    if events.is_none() {
                        self.tick_local()
                    } else {
                        ClockSignal::Continue
                    }
                }
            };

            if signal == ClockSignal::Expired {
                info!("Time is up, submitting automatically");
                if let Err(e) = self.submit().await {
                    warn!(error = %e, "Automatic submit failed; waiting for an explicit retry");
                }
            }
        }
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<SessionEvent>>) -> Option<SessionEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
