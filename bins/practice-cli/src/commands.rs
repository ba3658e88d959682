// CLI commands for the practice judge
use anyhow::{bail, Context, Result};
use practice_common::config::JudgeConfig;
use practice_common::types::{CodeSubmission, RunJob, RunReport, Session, SessionStatus, TestFixture, TestOutcome};
use practice_judge::api::{HttpSessionApi, SessionApi};
use practice_judge::engine::DockerSandbox;
use practice_judge::harness;
use practice_judge::Orchestrator;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Load a fixture file, numbering fixtures that carry no id
fn load_fixtures(path: &Path) -> Result<Vec<TestFixture>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read fixtures from {}", path.display()))?;
    let mut fixtures: Vec<TestFixture> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse fixtures in {}", path.display()))?;
    if fixtures.is_empty() {
        bail!("{} contains no fixtures", path.display());
    }
    for (index, fixture) in fixtures.iter_mut().enumerate() {
        if fixture.id == 0 {
            fixture.id = index as u32 + 1;
        }
    }
    Ok(fixtures)
}

fn compact(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
}

fn format_outcome(index: usize, outcome: &TestOutcome) -> String {
    let mark = if outcome.passed { "PASS" } else { "FAIL" };
    let description = if outcome.description.is_empty() {
        format!("Test {}", index + 1)
    } else {
        outcome.description.clone()
    };
    let mut line = format!("  [{}] {} ({:.1} ms)", mark, description, outcome.elapsed_ms);
    if !outcome.passed {
        line.push_str(&format!("\n         expected: {}", compact(&outcome.expected)));
        match (&outcome.actual, &outcome.error_message) {
            (_, Some(message)) => line.push_str(&format!("\n         error:    {}", message)),
            (Some(actual), None) => line.push_str(&format!("\n         actual:   {}", compact(actual))),
            (None, None) => line.push_str("\n         actual:   undefined"),
        }
    }
    line
}

fn print_report(report: &RunReport) {
    println!("Run {} ({})", report.run_id, report.status);
    for (index, outcome) in report.outcomes.iter().enumerate() {
        println!("{}", format_outcome(index, outcome));
    }
    println!(
        "\n{}/{} passed in {:.1} ms",
        report.passed_count(),
        report.outcomes.len(),
        report.total_elapsed_ms
    );
}

/// Execute a submission in the sandbox. Returns whether every fixture passed.
pub async fn run_submission(
    source_path: &Path,
    entry: &str,
    fixtures_path: &Path,
    params: Option<Vec<String>>,
    deadline_ms: Option<u64>,
) -> Result<bool> {
    let source = fs::read_to_string(source_path)
        .with_context(|| format!("Failed to read source from {}", source_path.display()))?;
    let fixtures = load_fixtures(fixtures_path)?;

    let mut config = JudgeConfig::load_default()?;
    if let Some(deadline_ms) = deadline_ms {
        config.deadline_ms = deadline_ms;
        config.validate()?;
    }

    println!("Preparing sandbox image {}...", config.sandbox.image);
    let sandbox = DockerSandbox::new(config.sandbox.clone())?;
    sandbox.prepare().await?;

    let orchestrator = Orchestrator::new(Arc::new(sandbox), config.deadline());
    let job = RunJob {
        submission: CodeSubmission {
            source,
            entry_name: entry.to_string(),
        },
        fixtures,
        parameters: params,
    };

    let report = orchestrator.run(job).await?;
    print_report(&report);
    Ok(report.all_passed())
}

/// Print the argument list inferred for each fixture
pub fn preview_args(fixtures_path: &Path, params: Option<&[String]>) -> Result<()> {
    let fixtures = load_fixtures(fixtures_path)?;
    for fixture in &fixtures {
        let args = harness::build_args(&fixture.input, params);
        let rendered: Vec<String> = args.iter().map(compact).collect();
        println!("#{} {} -> ({})", fixture.id, fixture.description, rendered.join(", "));
    }
    Ok(())
}

fn format_session(session: &Session) -> String {
    let started = session
        .started_at
        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    let score = session
        .result
        .as_ref()
        .map(|r| format!("{}/{}", r.passed_count, r.total_tests))
        .unwrap_or_else(|| "-".to_string());
    let status = match session.status {
        SessionStatus::Active => "active",
        SessionStatus::Expired => "expired",
        SessionStatus::Submitted => "submitted",
    };
    format!(
        "{:<16}  {:<10}  {:<6}  {:<32}  {:<6}  hints {}",
        started,
        status,
        session.question.difficulty.to_string(),
        session.question.title,
        score,
        session.hints_used
    )
}

/// List past sessions through the Session API
pub async fn show_history(user: &str) -> Result<()> {
    let config = JudgeConfig::load_default()?;
    let api = HttpSessionApi::new(&config.api)?;
    let sessions = api.history(user).await?;

    if sessions.is_empty() {
        println!("No sessions found for {}", user);
        return Ok(());
    }
    for session in &sessions {
        println!("{}", format_session(session));
    }
    println!("\n{} session(s)", sessions.len());
    Ok(())
}
