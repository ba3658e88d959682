/// End-to-end tests against a real sandbox container
///
/// These verify the full path from `Orchestrator::run` to a `RunReport`:
/// 1. Correct code passes every fixture
/// 2. Syntax errors become a single load-error outcome
/// 3. A missing entry function is reported by name
/// 4. An infinite loop times out and the next run still works
/// 5. One throwing fixture does not affect its neighbours
/// 6. `undefined`, `null` and unserializable returns are told apart
/// 7. An entry name that only matches a built-in is reported missing

#[cfg(test)]
mod sandbox_tests {
    use crate::engine::DockerSandbox;
    use crate::orchestrator::{JudgeState, Orchestrator};
    use practice_common::config::JudgeConfig;
    use practice_common::types::{CodeSubmission, RunJob, RunStatus, TestFixture};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    async fn make_orchestrator() -> Orchestrator {
        let config = JudgeConfig::default();
        let sandbox = DockerSandbox::new(config.sandbox.clone()).expect("Failed to connect to Docker");
        sandbox.prepare().await.expect("Failed to prepare sandbox image");
        Orchestrator::new(Arc::new(sandbox), config.deadline())
    }

    fn two_sum_job(source: &str) -> RunJob {
        RunJob {
            submission: CodeSubmission {
                source: source.to_string(),
                entry_name: "twoSum".to_string(),
            },
            fixtures: vec![
                TestFixture {
                    id: 1,
                    description: "example".to_string(),
                    input: json!({"nums": [2, 7, 11, 15], "target": 9}),
                    expected: json!([0, 1]),
                },
                TestFixture {
                    id: 2,
                    description: "middle pair".to_string(),
                    input: json!({"nums": [3, 2, 4], "target": 6}),
                    expected: json!([1, 2]),
                },
            ],
            parameters: None,
        }
    }

    fn make_job(source: &str, entry_name: &str, cases: &[(Value, Value)]) -> RunJob {
        RunJob {
            submission: CodeSubmission {
                source: source.to_string(),
                entry_name: entry_name.to_string(),
            },
            fixtures: cases
                .iter()
                .enumerate()
                .map(|(i, (input, expected))| TestFixture {
                    id: i as u32 + 1,
                    description: format!("case {}", i + 1),
                    input: input.clone(),
                    expected: expected.clone(),
                })
                .collect(),
            parameters: None,
        }
    }

    const TWO_SUM: &str = r#"
function twoSum(nums, target) {
  const seen = new Map();
  for (let i = 0; i < nums.length; i++) {
    if (seen.has(target - nums[i])) return [seen.get(target - nums[i]), i];
    seen.set(nums[i], i);
  }
  return [];
}
"#;

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_correct_solution_passes() {
        let orchestrator = make_orchestrator().await;

        let report = orchestrator.run(two_sum_job(TWO_SUM)).await.unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.outcomes.len(), 2);
        assert!(report.all_passed(), "outcomes: {:?}", report.outcomes);
        assert_eq!(report.outcomes[0].actual, Some(json!([0, 1])));
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_syntax_error_is_single_load_outcome() {
        let orchestrator = make_orchestrator().await;

        let report = orchestrator
            .run(two_sum_job("function twoSum(nums, target) { return [0, 1]"))
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::LoadError);
        assert_eq!(report.outcomes.len(), 1);
        assert!(!report.outcomes[0].passed);
        let message = report.outcomes[0].error_message.clone().unwrap_or_default();
        assert!(message.starts_with("Syntax Error:"), "got {}", message);
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_missing_entry_is_reported() {
        let orchestrator = make_orchestrator().await;

        let report = orchestrator
            .run(two_sum_job("function addTwo(a, b) { return a + b; }"))
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::LoadError);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(
            report.outcomes[0].error_message.as_deref(),
            Some("twoSum is not defined or not a function")
        );
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_infinite_loop_times_out_then_recovers() {
        let orchestrator = make_orchestrator().await;

        let started = Instant::now();
        let report = orchestrator
            .run(two_sum_job("function twoSum(nums, target) { while (true) {} }"))
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::TimedOut);
        assert!(started.elapsed() < orchestrator.deadline() + Duration::from_millis(500));
        assert_eq!(orchestrator.state(), JudgeState::Idle);

        let next = orchestrator.run(two_sum_job(TWO_SUM)).await.unwrap();
        assert!(next.all_passed());
        assert!(next.run_id > report.run_id);
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_throwing_fixture_is_isolated() {
        let orchestrator = make_orchestrator().await;
        let source = r#"
function scale(x) {
  if (x === 2) throw new Error("bad input");
  return x * 10;
}
"#;
        let job = make_job(
            source,
            "scale",
            &[(json!(1), json!(10)), (json!(2), json!(20)), (json!(3), json!(30))],
        );

        let report = orchestrator.run(job).await.unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        let passed: Vec<bool> = report.outcomes.iter().map(|o| o.passed).collect();
        assert_eq!(passed, vec![true, false, true]);
        assert_eq!(report.outcomes[1].error_message.as_deref(), Some("bad input"));
        assert_eq!(report.outcomes[2].actual, Some(json!(30)));
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_undefined_null_and_unserializable_returns() {
        let orchestrator = make_orchestrator().await;
        let source = r#"
function pick(kind) {
  if (kind === "undefined") return undefined;
  if (kind === "null") return null;
  const cycle = {};
  cycle.self = cycle;
  return cycle;
}
"#;
        let job = make_job(
            source,
            "pick",
            &[
                (json!("undefined"), Value::Null),
                (json!("null"), Value::Null),
                (json!("cycle"), json!({})),
            ],
        );

        let report = orchestrator.run(job).await.unwrap();

        assert_eq!(report.outcomes.len(), 3);
        // undefined never equals null and reports no actual value
        assert!(!report.outcomes[0].passed);
        assert_eq!(report.outcomes[0].actual, None);
        assert!(report.outcomes[1].passed);
        assert_eq!(report.outcomes[1].actual, Some(Value::Null));
        assert!(!report.outcomes[2].passed);
        assert!(report.outcomes[2].error_message.is_some());
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_builtin_name_is_not_an_entry() {
        let orchestrator = make_orchestrator().await;
        let job = make_job("function sumTwo(a, b) { return a + b; }", "constructor", &[(json!(5), json!(5))]);

        let report = orchestrator.run(job).await.unwrap();

        assert_eq!(report.status, RunStatus::LoadError);
        assert_eq!(
            report.outcomes[0].error_message.as_deref(),
            Some("constructor is not defined or not a function")
        );
    }
}
