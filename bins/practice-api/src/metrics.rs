// Prometheus metrics for the judge
use lazy_static::lazy_static;
use practice_common::types::RunReport;
use prometheus::{register_histogram, register_int_counter_vec, Encoder, Histogram, IntCounterVec, TextEncoder};
use std::time::Duration;

pub const REJECTED_OUTCOME: &str = "rejected";

lazy_static! {
    pub static ref RUNS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "judge_runs_total",
        "Runs handled by the judge, by outcome",
        &["outcome"]
    )
    .expect("judge_runs_total registers once");
    pub static ref RUN_DURATION: Histogram = register_histogram!(
        "judge_run_duration_seconds",
        "Wall time from accepting a run to its report",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 3.0, 5.0, 7.5, 10.0]
    )
    .expect("judge_run_duration_seconds registers once");
}

pub fn record_run(report: &RunReport, elapsed: Duration) {
    RUNS_TOTAL
        .with_label_values(&[report.status.to_string().as_str()])
        .inc();
    RUN_DURATION.observe(elapsed.as_secs_f64());
}

pub fn record_rejection() {
    RUNS_TOTAL.with_label_values(&[REJECTED_OUTCOME]).inc();
}

/// Render every registered metric in the text exposition format
pub fn render() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
