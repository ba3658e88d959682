/// Run Orchestrator - Boundary Lifecycle, Deadline and Generation Guard
///
/// **Responsibility:**
/// Own the isolation boundary for a single learner: create a fresh boundary
/// per run, send the command, race the reply against the deadline and keep
/// the current `RunReport`.
///
/// **State Machine:**
/// `Idle -> Running -> {Completed, TimedOut, Crashed} -> Idle`
///
/// **Guarantees:**
/// - At most one run in flight; a second `run` is rejected, not queued
/// - Every accepted run resolves with a report (real or synthetic) within
///   the deadline
/// - Replies are honored only for the current run id. All boundaries share
///   one reply channel, so a late reply from an abandoned boundary can
///   arrive during a newer run and is dropped.
/// - At most one live boundary at a time
use crate::boundary::{Boundary, BoundaryEvent, BoundaryFactory};
use crate::error::RunRejected;
use crate::evaluator;
use chrono::{DateTime, Utc};
use practice_common::types::{RunCommand, RunJob, RunReply, RunReport};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

const EVENT_LOG_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JudgeState {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum JudgeEventKind {
    Started,
    Completed,
    TimedOut,
    Crashed,
    StaleDiscarded,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeLogEntry {
    pub at: DateTime<Utc>,
    pub run_id: u64,
    pub kind: JudgeEventKind,
}

struct Inner {
    state: JudgeState,
    last_run_id: u64,
    current_run_id: u64,
    boundary: Option<Box<dyn Boundary>>,
    current_report: Option<RunReport>,
    log: VecDeque<JudgeLogEntry>,
}

impl Inner {
    fn record(&mut self, run_id: u64, kind: JudgeEventKind) {
        if self.log.len() == EVENT_LOG_CAPACITY {
            self.log.pop_front();
        }
        self.log.push_back(JudgeLogEntry {
            at: Utc::now(),
            run_id,
            kind,
        });
    }

    fn release_boundary(&mut self) {
        if let Some(boundary) = self.boundary.take() {
            boundary.terminate();
        }
    }
}

enum Settled {
    Reply(RunReply),
    Crashed(String),
    TimedOut,
}

pub struct Orchestrator {
    factory: Arc<dyn BoundaryFactory>,
    deadline: Duration,
    inner: Mutex<Inner>,
    events_tx: mpsc::UnboundedSender<BoundaryEvent>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<BoundaryEvent>>,
    reports: watch::Sender<Option<RunReport>>,
}

impl Orchestrator {
    pub fn new(factory: Arc<dyn BoundaryFactory>, deadline: Duration) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (reports, _) = watch::channel(None);
        Self {
            factory,
            deadline,
            inner: Mutex::new(Inner {
                state: JudgeState::Idle,
                last_run_id: 0,
                current_run_id: 0,
                boundary: None,
                current_report: None,
                log: VecDeque::with_capacity(EVENT_LOG_CAPACITY),
            }),
            events_tx,
            events_rx: tokio::sync::Mutex::new(events_rx),
            reports,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves plain data behind; keep going
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn state(&self) -> JudgeState {
        self.lock().state
    }

    pub fn current_report(&self) -> Option<RunReport> {
        self.lock().current_report.clone()
    }

    pub fn last_run_id(&self) -> u64 {
        self.lock().last_run_id
    }

    pub fn event_log(&self) -> Vec<JudgeLogEntry> {
        self.lock().log.iter().cloned().collect()
    }

    /// Watch the current report; updated once per finished run
    pub fn subscribe(&self) -> watch::Receiver<Option<RunReport>> {
        self.reports.subscribe()
    }

    /// Execute one job. Resolves with a report within the deadline, or is
    /// rejected immediately when a run is already in flight.
    #[instrument(skip(self, job), fields(entry = %job.submission.entry_name, fixtures = job.fixtures.len()))]
    pub async fn run(&self, job: RunJob) -> Result<RunReport, RunRejected> {
        let run_id = self.begin(&job)?;
        let mut guard = RunGuard {
            orchestrator: self,
            run_id,
            armed: true,
        };

        let started = Instant::now();
        let settled = self.await_reply(run_id).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        guard.armed = false;
        Ok(self.finish(run_id, settled, elapsed_ms))
    }

    /// Idle -> Running: recycle the boundary and send the command
    fn begin(&self, job: &RunJob) -> Result<u64, RunRejected> {
        let mut inner = self.lock();
        if inner.state == JudgeState::Running {
            let in_flight = inner.current_run_id;
            inner.record(in_flight, JudgeEventKind::Rejected);
            debug!(in_flight, "Run rejected, another run is in flight");
            return Err(RunRejected { in_flight });
        }

        inner.last_run_id += 1;
        let run_id = inner.last_run_id;
        inner.current_run_id = run_id;
        inner.state = JudgeState::Running;
        inner.record(run_id, JudgeEventKind::Started);
        inner.release_boundary();

        match self.factory.create(self.events_tx.clone()) {
            Ok(mut boundary) => {
                boundary.post(RunCommand::new(run_id, job));
                inner.boundary = Some(boundary);
            }
            Err(e) => {
                warn!(run_id, error = %e, "Failed to create boundary");
                // Surfaces through the channel like any other crash
                let _ = self.events_tx.send(BoundaryEvent::Crashed {
                    run_id,
                    reason: format!("{:#}", e),
                });
            }
        }

        info!(run_id, deadline_ms = self.deadline.as_millis() as u64, "Run started");
        Ok(run_id)
    }

    /// Race the current run's reply against the deadline
    async fn await_reply(&self, run_id: u64) -> Settled {
        let mut events = self.events_rx.lock().await;
        let deadline = tokio::time::sleep(self.deadline);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) if event.run_id() == run_id => {
                        return match event {
                            BoundaryEvent::Reply(reply) => Settled::Reply(reply),
                            BoundaryEvent::Crashed { reason, .. } => Settled::Crashed(reason),
                        };
                    }
                    Some(stale) => {
                        debug!(run_id, stale_run_id = stale.run_id(), "Discarding stale boundary event");
                        self.lock().record(stale.run_id(), JudgeEventKind::StaleDiscarded);
                    }
                    // Unreachable while we hold a sender
                    None => return Settled::Crashed("boundary channel closed".to_string()),
                },
                _ = &mut deadline => return Settled::TimedOut,
            }
        }
    }

    /// Running -> Idle: store the report and release the boundary
    fn finish(&self, run_id: u64, settled: Settled, elapsed_ms: f64) -> RunReport {
        let (reply, kind) = match settled {
            Settled::Reply(reply) => (reply, JudgeEventKind::Completed),
            Settled::TimedOut => {
                warn!(run_id, "Run timed out, discarding boundary");
                (evaluator::timeout_reply(run_id, self.deadline), JudgeEventKind::TimedOut)
            }
            Settled::Crashed(reason) => {
                warn!(run_id, reason = %reason, "Boundary crashed before replying");
                (evaluator::crash_reply(run_id, &reason, elapsed_ms), JudgeEventKind::Crashed)
            }
        };
        let report = RunReport::from(reply);

        let mut inner = self.lock();
        inner.record(run_id, kind);
        inner.release_boundary();
        if inner.current_run_id == run_id {
            inner.state = JudgeState::Idle;
        }
        let newest = inner
            .current_report
            .as_ref()
            .map_or(true, |current| current.run_id < run_id);
        if newest {
            inner.current_report = Some(report.clone());
            self.reports.send_replace(Some(report.clone()));
        }
        drop(inner);

        info!(
            run_id,
            status = %report.status,
            passed = report.passed_count(),
            total = report.outcomes.len(),
            elapsed_ms = report.total_elapsed_ms,
            "Run finished"
        );
        report
    }

    /// A run future dropped before settling: abandon its boundary
    fn abandon(&self, run_id: u64) {
        let mut inner = self.lock();
        if inner.current_run_id == run_id && inner.state == JudgeState::Running {
            debug!(run_id, "Run abandoned by caller");
            inner.release_boundary();
            inner.state = JudgeState::Idle;
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.lock().release_boundary();
    }
}

/// Returns the orchestrator to idle if the caller stops awaiting `run`
struct RunGuard<'a> {
    orchestrator: &'a Orchestrator,
    run_id: u64,
    armed: bool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.orchestrator.abandon(self.run_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::EventSender;
    use practice_common::types::{CodeSubmission, RunStatus, TestFixture, TestOutcome};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DEADLINE: Duration = Duration::from_millis(5000);

    /// What a scripted boundary does with its command
    #[derive(Clone)]
    enum Script {
        Reply { after: Duration, passed: bool },
        Silent,
        Crash { after: Duration },
    }

    struct ScriptedFactory {
        scripts: Mutex<VecDeque<Script>>,
        created: AtomicUsize,
        terminated: Arc<AtomicUsize>,
    }

    impl ScriptedFactory {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                created: AtomicUsize::new(0),
                terminated: Arc::new(AtomicUsize::new(0)),
            })
        }
    }

    impl BoundaryFactory for ScriptedFactory {
        fn create(&self, events: EventSender) -> anyhow::Result<Box<dyn Boundary>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("no boundary available"))?;
            Ok(Box::new(ScriptedBoundary {
                script,
                events,
                terminated: self.terminated.clone(),
            }))
        }
    }

    struct ScriptedBoundary {
        script: Script,
        events: EventSender,
        terminated: Arc<AtomicUsize>,
    }

    impl Boundary for ScriptedBoundary {
        fn post(&mut self, command: RunCommand) {
            let events = self.events.clone();
            // Sender tasks outlive termination, like a slow-to-die sandbox
            match self.script.clone() {
                Script::Reply { after, passed } => {
                    tokio::spawn(async move {
                        tokio::time::sleep(after).await;
                        let outcomes = command
                            .fixtures
                            .iter()
                            .map(|f| TestOutcome {
                                fixture_id: Some(f.id),
                                description: f.description.clone(),
                                input: f.input.clone(),
                                expected: f.expected.clone(),
                                actual: Some(f.expected.clone()),
                                error_message: None,
                                passed,
                                elapsed_ms: 1.0,
                            })
                            .collect();
                        let _ = events.send(BoundaryEvent::Reply(RunReply {
                            run_id: command.run_id,
                            status: RunStatus::Completed,
                            outcomes,
                            total_elapsed_ms: after.as_millis() as f64,
                        }));
                    });
                }
                Script::Crash { after } => {
                    tokio::spawn(async move {
                        tokio::time::sleep(after).await;
                        let _ = events.send(BoundaryEvent::Crashed {
                            run_id: command.run_id,
                            reason: "container exited".to_string(),
                        });
                    });
                }
                Script::Silent => {}
            }
        }

        fn terminate(self: Box<Self>) {
            self.terminated.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn make_job(fixtures: usize) -> RunJob {
        RunJob {
            submission: CodeSubmission {
                source: "function twoSum(nums, target) { return [0, 1]; }".to_string(),
                entry_name: "twoSum".to_string(),
            },
            fixtures: (0..fixtures)
                .map(|i| TestFixture {
                    id: i as u32 + 1,
                    description: format!("case {}", i + 1),
                    input: json!({"nums": [2, 7, 11, 15], "target": 9}),
                    expected: json!([0, 1]),
                })
                .collect(),
            parameters: None,
        }
    }

    fn reply_after(ms: u64, passed: bool) -> Script {
        Script::Reply {
            after: Duration::from_millis(ms),
            passed,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_completes_run() {
        let factory = ScriptedFactory::new(vec![reply_after(50, true)]);
        let orchestrator = Orchestrator::new(factory.clone(), DEADLINE);

        let report = orchestrator.run(make_job(3)).await.unwrap();

        assert_eq!(report.run_id, 1);
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.outcomes.len(), 3);
        assert!(report.all_passed());
        assert_eq!(orchestrator.state(), JudgeState::Idle);
        assert_eq!(orchestrator.current_report(), Some(report));
        // Boundary released after completion
        assert_eq!(factory.terminated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_boundary_times_out_within_deadline() {
        let factory = ScriptedFactory::new(vec![Script::Silent, reply_after(10, true)]);
        let orchestrator = Orchestrator::new(factory.clone(), DEADLINE);

        let started = Instant::now();
        let report = orchestrator.run(make_job(2)).await.unwrap();
        let waited = started.elapsed();

        assert!(waited >= DEADLINE);
        assert!(waited < DEADLINE + Duration::from_millis(50));
        assert_eq!(report.status, RunStatus::TimedOut);
        assert_eq!(report.outcomes.len(), 1);
        assert!(!report.outcomes[0].passed);
        assert_eq!(
            report.outcomes[0].error_message.as_deref(),
            Some("Execution timed out after 5000 ms")
        );
        assert_eq!(orchestrator.state(), JudgeState::Idle);

        // Subsequent run works on a fresh boundary
        let next = orchestrator.run(make_job(2)).await.unwrap();
        assert_eq!(next.run_id, 2);
        assert!(next.all_passed());
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_is_rejected_while_running() {
        let factory = ScriptedFactory::new(vec![reply_after(1000, true), reply_after(10, true)]);
        let orchestrator = Arc::new(Orchestrator::new(factory.clone(), DEADLINE));

        let first = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.run(make_job(1)).await })
        };
        while orchestrator.state() != JudgeState::Running {
            tokio::task::yield_now().await;
        }

        let rejected = orchestrator.run(make_job(1)).await;
        assert_eq!(rejected.unwrap_err().in_flight, 1);

        let report = first.await.unwrap().unwrap();
        assert_eq!(report.run_id, 1);
        // Rejection neither created a boundary nor consumed a run id
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.last_run_id(), 1);
        assert!(orchestrator
            .event_log()
            .iter()
            .any(|e| e.kind == JudgeEventKind::Rejected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_reply_never_overwrites_newer_report() {
        // Run 1 answers at 6s, after its 5s deadline; run 2 answers 2s after it starts
        let factory = ScriptedFactory::new(vec![reply_after(6000, true), reply_after(2000, false)]);
        let orchestrator = Orchestrator::new(factory.clone(), DEADLINE);

        let first = orchestrator.run(make_job(1)).await.unwrap();
        assert_eq!(first.status, RunStatus::TimedOut);

        let second = orchestrator.run(make_job(1)).await.unwrap();
        assert_eq!(second.run_id, 2);
        assert_eq!(second.status, RunStatus::Completed);
        assert!(!second.outcomes[0].passed);

        let current = orchestrator.current_report().unwrap();
        assert_eq!(current.run_id, 2);
        assert_eq!(current, second);
        assert!(orchestrator
            .event_log()
            .iter()
            .any(|e| e.kind == JudgeEventKind::StaleDiscarded && e.run_id == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_becomes_synthetic_report() {
        let factory = ScriptedFactory::new(vec![Script::Crash {
            after: Duration::from_millis(20),
        }]);
        let orchestrator = Orchestrator::new(factory, DEADLINE);

        let report = orchestrator.run(make_job(4)).await.unwrap();

        assert_eq!(report.status, RunStatus::Crashed);
        assert_eq!(report.outcomes.len(), 1);
        assert!(report.outcomes[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("container exited"));
        assert_eq!(orchestrator.state(), JudgeState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_factory_failure_becomes_synthetic_report() {
        let factory = ScriptedFactory::new(vec![]);
        let orchestrator = Orchestrator::new(factory, DEADLINE);

        let report = orchestrator.run(make_job(1)).await.unwrap();

        assert_eq!(report.status, RunStatus::Crashed);
        assert_eq!(orchestrator.state(), JudgeState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_runs_are_deterministic() {
        let factory = ScriptedFactory::new(vec![reply_after(5, true), reply_after(5, true)]);
        let orchestrator = Orchestrator::new(factory, DEADLINE);

        let a = orchestrator.run(make_job(3)).await.unwrap();
        let b = orchestrator.run(make_job(3)).await.unwrap();

        let pattern = |r: &RunReport| r.outcomes.iter().map(|o| o.passed).collect::<Vec<_>>();
        assert_eq!(pattern(&a), pattern(&b));
        assert!(b.run_id > a.run_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_run_returns_to_idle() {
        let factory = ScriptedFactory::new(vec![Script::Silent]);
        let orchestrator = Orchestrator::new(factory.clone(), DEADLINE);

        let abandoned = tokio::time::timeout(Duration::from_millis(100), orchestrator.run(make_job(1))).await;
        assert!(abandoned.is_err());

        assert_eq!(orchestrator.state(), JudgeState::Idle);
        assert_eq!(factory.terminated.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.current_report(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_latest_report() {
        let factory = ScriptedFactory::new(vec![reply_after(5, true)]);
        let orchestrator = Orchestrator::new(factory, DEADLINE);
        let mut reports = orchestrator.subscribe();

        orchestrator.run(make_job(1)).await.unwrap();

        assert!(reports.has_changed().unwrap());
        let latest = reports.borrow_and_update().clone().unwrap();
        assert_eq!(latest.run_id, 1);
    }
}
