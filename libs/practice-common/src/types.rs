use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Keeps an explicit JSON `null` as `Some(Value::Null)` so it stays distinct
/// from an absent field.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Candidate's current source text plus the entry point to call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSubmission {
    pub source: String,
    pub entry_name: String,
}

/// One hidden or sample test case supplied by a Question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestFixture {
    #[serde(default)]
    pub id: u32,
    #[serde(default)]
    pub description: String,
    pub input: Value,
    pub expected: Value,
}

/// Graded result of one fixture.
///
/// `actual` absent with no `error_message` means the entry point returned
/// `undefined`; `Some(Value::Null)` is a real `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixture_id: Option<u32>,
    pub description: String,
    pub input: Value,
    pub expected: Value,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub passed: bool,
    pub elapsed_ms: f64,
}

impl TestOutcome {
    /// Whole-run failure entry that stands in for every fixture
    pub fn synthetic(description: &str, error_message: impl Into<String>, elapsed_ms: f64) -> Self {
        Self {
            fixture_id: None,
            description: description.to_string(),
            input: Value::Null,
            expected: Value::Null,
            actual: None,
            error_message: Some(error_message.into()),
            passed: false,
            elapsed_ms,
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    #[default]
    Completed,
    LoadError,
    TimedOut,
    Crashed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunStatus::Completed => "completed",
            RunStatus::LoadError => "load_error",
            RunStatus::TimedOut => "timed_out",
            RunStatus::Crashed => "crashed",
        };
        f.write_str(label)
    }
}

/// Immutable aggregate result of one execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: u64,
    #[serde(default)]
    pub status: RunStatus,
    pub outcomes: Vec<TestOutcome>,
    pub total_elapsed_ms: f64,
}

impl RunReport {
    pub fn passed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed).count()
    }

    pub fn all_passed(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(|o| o.passed)
    }
}

/// What the orchestrator hands to a run: code, fixtures and an optional
/// ordered parameter schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunJob {
    #[serde(flatten)]
    pub submission: CodeSubmission,
    pub fixtures: Vec<TestFixture>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<String>>,
}

impl RunJob {
    pub fn for_question(question: &Question, source: impl Into<String>) -> Self {
        Self {
            submission: CodeSubmission {
                source: source.into(),
                entry_name: question.entry_name.clone(),
            },
            fixtures: question.fixtures.clone(),
            parameters: question.parameters.clone(),
        }
    }
}

/// Orchestrator -> boundary: `{ runId, source, entryName, fixtures, parameters? }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCommand {
    pub run_id: u64,
    pub source: String,
    pub entry_name: String,
    pub fixtures: Vec<TestFixture>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<String>>,
}

impl RunCommand {
    pub fn new(run_id: u64, job: &RunJob) -> Self {
        Self {
            run_id,
            source: job.submission.source.clone(),
            entry_name: job.submission.entry_name.clone(),
            fixtures: job.fixtures.clone(),
            parameters: job.parameters.clone(),
        }
    }
}

/// Boundary -> orchestrator: `{ runId, status, outcomes, totalElapsedMs }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReply {
    pub run_id: u64,
    #[serde(default)]
    pub status: RunStatus,
    pub outcomes: Vec<TestOutcome>,
    pub total_elapsed_ms: f64,
}

impl From<RunReply> for RunReport {
    fn from(reply: RunReply) -> Self {
        RunReport {
            run_id: reply.run_id,
            status: reply.status,
            outcomes: reply.outcomes,
            total_elapsed_ms: reply.total_elapsed_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Easy => write!(f, "Easy"),
            Difficulty::Medium => write!(f, "Medium"),
            Difficulty::Hard => write!(f, "Hard"),
        }
    }
}

/// Problem definition owned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    pub difficulty: Difficulty,
    pub topic: String,
    pub prompt: String,
    #[serde(default)]
    pub starter_code: String,
    pub entry_name: String,
    #[serde(default)]
    pub fixtures: Vec<TestFixture>,
    #[serde(default)]
    pub hints: Vec<String>,
    /// Ordered parameter names of the entry point, when the backend knows them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Expired,
    Submitted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    pub feedback: String,
    pub passed_count: u32,
    pub total_tests: u32,
}

/// One timed practice attempt as the backend sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub question: Question,
    pub status: SessionStatus,
    #[serde(default)]
    pub hints_used: u32,
    pub remaining_sec: u64,
    #[serde(default)]
    pub hints: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<SessionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HintGrant {
    pub hint: String,
    pub hints_used: u32,
}

/// Push events published by the backend for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    Tick {
        #[serde(rename = "remainingSec")]
        remaining_sec: u64,
    },
    SessionUpdated {
        session: Session,
    },
    HintGranted {
        hint: String,
        #[serde(rename = "hintsUsed")]
        hints_used: u32,
    },
    SessionSubmitted {
        session: Session,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_keeps_null_distinct_from_absent() {
        let with_null: TestOutcome = serde_json::from_value(json!({
            "description": "d", "input": 1, "expected": null,
            "actual": null, "passed": true, "elapsedMs": 0.5
        }))
        .unwrap();
        assert_eq!(with_null.actual, Some(Value::Null));

        let without: TestOutcome = serde_json::from_value(json!({
            "description": "d", "input": 1, "expected": null,
            "passed": false, "elapsedMs": 0.5
        }))
        .unwrap();
        assert_eq!(without.actual, None);
    }

    #[test]
    fn test_command_wire_shape() {
        let job = RunJob {
            submission: CodeSubmission {
                source: "function f() {}".to_string(),
                entry_name: "f".to_string(),
            },
            fixtures: vec![],
            parameters: None,
        };
        let wire = serde_json::to_value(RunCommand::new(7, &job)).unwrap();
        assert_eq!(wire["runId"], 7);
        assert_eq!(wire["entryName"], "f");
        assert!(wire.get("parameters").is_none());
    }

    #[test]
    fn test_reply_wire_shape() {
        let reply: RunReply = serde_json::from_value(json!({
            "runId": 3,
            "outcomes": [],
            "totalElapsedMs": 1.25
        }))
        .unwrap();
        assert_eq!(reply.run_id, 3);
        assert_eq!(reply.status, RunStatus::Completed);
    }

    #[test]
    fn test_session_event_tags() {
        let tick: SessionEvent = serde_json::from_value(json!({"type": "tick", "remainingSec": 42})).unwrap();
        assert_eq!(tick, SessionEvent::Tick { remaining_sec: 42 });

        let hint: SessionEvent =
            serde_json::from_value(json!({"type": "hintGranted", "hint": "use a map", "hintsUsed": 1})).unwrap();
        assert_eq!(
            hint,
            SessionEvent::HintGranted { hint: "use a map".to_string(), hints_used: 1 }
        );
    }

    #[test]
    fn test_run_job_request_body() {
        let job: RunJob = serde_json::from_value(json!({
            "source": "const twoSum = () => [0, 1];",
            "entryName": "twoSum",
            "fixtures": [{"id": 1, "input": {"nums": [2, 7], "target": 9}, "expected": [0, 1]}],
            "parameters": ["nums", "target"]
        }))
        .unwrap();
        assert_eq!(job.submission.entry_name, "twoSum");
        assert_eq!(job.fixtures.len(), 1);
        assert_eq!(job.parameters.as_deref(), Some(&["nums".to_string(), "target".to_string()][..]));
    }

    #[test]
    fn test_difficulty_wire_matches_display() {
        for difficulty in [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard] {
            assert_eq!(serde_json::to_value(difficulty).unwrap(), json!(difficulty.to_string()));
        }
        assert!(serde_json::from_value::<Difficulty>(json!("Trivial")).is_err());
    }
}
