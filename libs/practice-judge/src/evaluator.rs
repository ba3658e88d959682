/// Test Evaluator - Grading Raw Invocation Results
///
/// **Core Responsibility:**
/// Turn what the sandboxed runner reported (load failure, or one raw
/// invocation per fixture) into graded `TestOutcome`s and a `RunReply`.
///
/// **Critical Properties:**
/// - Knows nothing about Docker or containers
/// - Pure function: (command, raw runner reply) -> reply
/// - Whole-run failures (load errors, timeouts, crashes) yield exactly one
///   synthetic outcome; otherwise there is one outcome per fixture, in
///   fixture order
use crate::harness::{self, ReturnValue};
use practice_common::types::{RunCommand, RunReply, RunStatus, TestFixture, TestOutcome};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Runner-side reply, before grading
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerReply {
    pub run_id: u64,
    #[serde(default)]
    pub load: Option<LoadFailure>,
    #[serde(default)]
    pub invocations: Vec<Invocation>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoadFailure {
    pub kind: LoadFailureKind,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoadFailureKind {
    Syntax,
    Evaluation,
    MissingEntry,
}

/// Raw outcome of calling the entry point once
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    pub fixture_id: u32,
    pub elapsed_ms: f64,
    #[serde(flatten)]
    pub result: InvocationResult,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum InvocationResult {
    Ok { value: Value },
    Undefined,
    Unserializable,
    Threw { error: String },
}

pub const LOAD_FAILURE_DESCRIPTION: &str = "Load";
pub const TIMEOUT_DESCRIPTION: &str = "Time Limit Exceeded";
pub const CRASH_DESCRIPTION: &str = "Sandbox Failure";

pub fn missing_entry_message(entry_name: &str) -> String {
    format!("{} is not defined or not a function", entry_name)
}

/// User-facing message for a load failure
pub fn load_error_message(failure: &LoadFailure, entry_name: &str) -> String {
    match failure.kind {
        LoadFailureKind::Syntax => format!("Syntax Error: {}", failure.message),
        LoadFailureKind::Evaluation => format!("Load Error: {}", failure.message),
        LoadFailureKind::MissingEntry => missing_entry_message(entry_name),
    }
}

/// Whole-run load failure: one synthetic outcome, zero elapsed time
pub fn load_failure(run_id: u64, message: impl Into<String>) -> RunReply {
    RunReply {
        run_id,
        status: RunStatus::LoadError,
        outcomes: vec![TestOutcome::synthetic(LOAD_FAILURE_DESCRIPTION, message, 0.0)],
        total_elapsed_ms: 0.0,
    }
}

/// Synthetic reply for a run whose boundary did not answer in time
pub fn timeout_reply(run_id: u64, deadline: Duration) -> RunReply {
    let deadline_ms = deadline.as_millis() as f64;
    RunReply {
        run_id,
        status: RunStatus::TimedOut,
        outcomes: vec![TestOutcome::synthetic(
            TIMEOUT_DESCRIPTION,
            format!("Execution timed out after {} ms", deadline.as_millis()),
            deadline_ms,
        )],
        total_elapsed_ms: deadline_ms,
    }
}

/// Synthetic reply for a boundary that died before replying
pub fn crash_reply(run_id: u64, reason: &str, elapsed_ms: f64) -> RunReply {
    RunReply {
        run_id,
        status: RunStatus::Crashed,
        outcomes: vec![TestOutcome::synthetic(
            CRASH_DESCRIPTION,
            format!("Sandbox terminated before replying: {}", reason),
            elapsed_ms,
        )],
        total_elapsed_ms: elapsed_ms,
    }
}

fn describe(fixture: &TestFixture, index: usize) -> String {
    if fixture.description.is_empty() {
        format!("Test {}", index + 1)
    } else {
        fixture.description.clone()
    }
}

/// Grade one invocation against its fixture
pub fn evaluate_invocation(fixture: &TestFixture, index: usize, invocation: &Invocation) -> TestOutcome {
    let (actual, error_message, passed) = match &invocation.result {
        InvocationResult::Threw { error } => (None, Some(error.clone()), false),
        InvocationResult::Unserializable => (
            None,
            Some("Returned a value that cannot be compared".to_string()),
            false,
        ),
        result => {
            let returned = match result {
                InvocationResult::Ok { value } => ReturnValue::Value(value.clone()),
                _ => ReturnValue::Undefined,
            };
            let passed = harness::values_match(&returned, &fixture.expected);
            (returned.as_actual(), None, passed)
        }
    };

    TestOutcome {
        fixture_id: Some(fixture.id),
        description: describe(fixture, index),
        input: fixture.input.clone(),
        expected: fixture.expected.clone(),
        actual,
        error_message,
        passed,
        elapsed_ms: invocation.elapsed_ms,
    }
}

fn missing_invocation(fixture: &TestFixture, index: usize) -> TestOutcome {
    TestOutcome {
        fixture_id: Some(fixture.id),
        description: describe(fixture, index),
        input: fixture.input.clone(),
        expected: fixture.expected.clone(),
        actual: None,
        error_message: Some("No result reported for this test".to_string()),
        passed: false,
        elapsed_ms: 0.0,
    }
}

/// Combine a command with the runner's raw reply.
///
/// Invocations are matched to fixtures positionally; the runner executes
/// calls in the order it received them.
pub fn aggregate(command: &RunCommand, raw: &RunnerReply, total_elapsed_ms: f64) -> RunReply {
    if let Some(failure) = &raw.load {
        let message = load_error_message(failure, &command.entry_name);
        debug!(run_id = command.run_id, message = %message, "Load failure");
        return load_failure(command.run_id, message);
    }

    let outcomes: Vec<TestOutcome> = command
        .fixtures
        .iter()
        .enumerate()
        .map(|(idx, fixture)| match raw.invocations.get(idx) {
            Some(invocation) => evaluate_invocation(fixture, idx, invocation),
            None => missing_invocation(fixture, idx),
        })
        .collect();

    debug!(
        run_id = command.run_id,
        passed = outcomes.iter().filter(|o| o.passed).count(),
        total = outcomes.len(),
        "Evaluation complete"
    );

    RunReply {
        run_id: command.run_id,
        status: RunStatus::Completed,
        outcomes,
        total_elapsed_ms,
    }
}
