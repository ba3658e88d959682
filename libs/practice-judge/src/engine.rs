/// Docker Boundary - Disposable Container per Run
///
/// **Core Responsibility:**
/// Implement the isolation boundary with one throwaway container per run:
/// load the candidate's source, resolve the entry point, call it once per
/// fixture and report graded outcomes on the event channel.
///
/// **Isolation Rules:**
/// 1. A fresh container per run, never reused (`practice-run-<uuid>`)
/// 2. Network disabled, read-only root filesystem, unprivileged user
/// 3. All capabilities dropped, `no-new-privileges`
/// 4. Memory, CPU and pids caps enforced by the container runtime
/// 5. Container removed when the run completes, fails or is abandoned
///
/// **What Stays on the Host:**
/// Argument inference and grading (harness/evaluator). The container only
/// receives prepared argument lists and returns raw values.
use crate::boundary::{Boundary, BoundaryEvent, BoundaryFactory, EventSender};
use crate::evaluator::{self, RunnerReply};
use crate::harness;
use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use practice_common::config::SandboxConfig;
use practice_common::types::{RunCommand, RunReply};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// In-container runner, executed with `node -e`
const RUNNER_SCRIPT: &str = include_str!("../runtime/runner.js");

const PAYLOAD_ENV: &str = "PRACTICE_PAYLOAD";

/// One prepared call of the entry point
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunnerCall {
    fixture_id: u32,
    args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunnerPayload<'a> {
    run_id: u64,
    source: &'a str,
    entry_name: &'a str,
    calls: Vec<RunnerCall>,
}

/// Whether `name` can be referenced as a plain JavaScript identifier
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Validate a command and encode the runner payload.
///
/// Returns the finished reply instead when the command cannot be executed
/// at all (bad entry name, oversized submission).
fn preflight(command: &RunCommand, max_payload_bytes: usize) -> std::result::Result<String, RunReply> {
    if !is_identifier(&command.entry_name) {
        return Err(evaluator::load_failure(
            command.run_id,
            evaluator::missing_entry_message(&command.entry_name),
        ));
    }

    let calls = command
        .fixtures
        .iter()
        .map(|fixture| RunnerCall {
            fixture_id: fixture.id,
            args: harness::build_args(&fixture.input, command.parameters.as_deref()),
        })
        .collect();

    let payload = RunnerPayload {
        run_id: command.run_id,
        source: &command.source,
        entry_name: &command.entry_name,
        calls,
    };

    let json = match serde_json::to_string(&payload) {
        Ok(json) => json,
        Err(e) => return Err(evaluator::load_failure(command.run_id, format!("Load Error: {}", e))),
    };

    let encoded = general_purpose::STANDARD.encode(json);
    if encoded.len() > max_payload_bytes {
        return Err(evaluator::load_failure(
            command.run_id,
            format!(
                "Submission too large: {} bytes exceeds {}",
                encoded.len(),
                max_payload_bytes
            ),
        ));
    }

    Ok(encoded)
}

/// The runner prints its reply as the last non-empty stdout line
fn parse_runner_output(stdout: &str) -> Result<RunnerReply> {
    let line = stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .context("Runner produced no output")?;
    serde_json::from_str(line.trim()).context("Runner output is not a valid reply")
}

/// Explains a runner exit that produced no reply
fn describe_exit(code: Option<i64>, stderr: &str) -> String {
    let detail = stderr.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    match code {
        Some(137) => "killed, likely exceeded the memory limit".to_string(),
        Some(139) => "segmentation fault".to_string(),
        Some(code) if detail.is_empty() => format!("runner exited with code {}", code),
        Some(code) => format!("runner exited with code {}: {}", code, detail),
        None => "runner exit status unknown".to_string(),
    }
}

/// Spawn `cleanup` once `task`, if any, has fully stopped
fn spawn_after<F>(task: Option<JoinHandle<()>>, cleanup: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    // Drop may run outside a runtime during shutdown
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return;
    };
    handle.spawn(async move {
        if let Some(task) = task {
            let _ = task.await;
        }
        cleanup.await;
    });
}

async fn remove_container(docker: Docker, container: String) {
    let options = RemoveContainerOptions {
        force: true,
        ..Default::default()
    };
    if let Err(e) = docker.remove_container(&container, Some(options)).await {
        debug!(container = %container, error = %e, "Container removal skipped");
    }
}

fn remove_container_detached(docker: Docker, container: String) {
    spawn_after(None, remove_container(docker, container));
}

/// Container cleanup guard - guarantees container removal on drop,
/// including when the run task is aborted
struct ContainerGuard {
    docker: Docker,
    container_id: String,
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        remove_container_detached(self.docker.clone(), self.container_id.clone());
    }
}

/// Factory of Docker-backed boundaries
pub struct DockerSandbox {
    docker: Docker,
    config: SandboxConfig,
}

impl DockerSandbox {
    pub fn new(config: SandboxConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")?;
        Ok(Self { docker, config })
    }

    /// Ensure the sandbox image is present so no run is charged for a pull
    pub async fn prepare(&self) -> Result<()> {
        let image = self.config.image.as_str();
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image = %image, "Image cache hit");
            return Ok(());
        }

        warn!(image = %image, "Image cache miss, pulling");
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });
        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.context("Failed to pull sandbox image")?;
        }

        info!(image = %image, "Image pulled successfully");
        Ok(())
    }
}

impl BoundaryFactory for DockerSandbox {
    fn create(&self, events: EventSender) -> Result<Box<dyn Boundary>> {
        Ok(Box::new(DockerBoundary {
            docker: self.docker.clone(),
            config: self.config.clone(),
            events,
            container_name: format!("practice-run-{}", uuid::Uuid::new_v4()),
            task: None,
        }))
    }
}

/// One run's container
pub struct DockerBoundary {
    docker: Docker,
    config: SandboxConfig,
    events: EventSender,
    container_name: String,
    task: Option<JoinHandle<()>>,
}

impl Boundary for DockerBoundary {
    fn post(&mut self, command: RunCommand) {
        if self.task.is_some() {
            warn!(run_id = command.run_id, "Boundary already received a command, ignoring");
            return;
        }

        let payload = match preflight(&command, self.config.max_payload_bytes) {
            Ok(payload) => payload,
            Err(reply) => {
                let _ = self.events.send(BoundaryEvent::Reply(reply));
                return;
            }
        };

        let docker = self.docker.clone();
        let config = self.config.clone();
        let events = self.events.clone();
        let container_name = self.container_name.clone();

        self.task = Some(tokio::spawn(async move {
            let run_id = command.run_id;
            let started = Instant::now();
            let event = match execute(&docker, &config, &container_name, &command, payload).await {
                Ok(reply) => BoundaryEvent::Reply(reply),
                Err(e) => {
                    warn!(run_id, error = %e, "Sandbox run failed");
                    BoundaryEvent::Crashed {
                        run_id,
                        reason: format!("{:#}", e),
                    }
                }
            };
            debug!(run_id, elapsed_ms = started.elapsed().as_millis() as u64, "Boundary finished");
            // The orchestrator may have moved on already
            let _ = events.send(event);
        }));
    }

    fn terminate(mut self: Box<Self>) {
        let task = self.task.take();
        if let Some(task) = &task {
            if !task.is_finished() {
                debug!(container = %self.container_name, "Abandoning running boundary");
            }
            task.abort();
        }
        // The aborted task may still be inside create_container; remove by
        // name only after it has stopped
        spawn_after(task, remove_container(self.docker.clone(), self.container_name.clone()));
    }
}

/// Create, start and drain one container, then grade its reply
async fn execute(
    docker: &Docker,
    config: &SandboxConfig,
    container_name: &str,
    command: &RunCommand,
    payload: String,
) -> Result<RunReply> {
    let memory_bytes = i64::from(config.memory_limit_mb) * 1024 * 1024;
    // Leave V8 headroom below the cgroup cap so the heap limit trips first
    let heap_mb = (config.memory_limit_mb * 3 / 4).max(16);

    let container_config = Config {
        image: Some(config.image.clone()),
        cmd: Some(vec![
            "node".to_string(),
            format!("--max-old-space-size={}", heap_mb),
            "-e".to_string(),
            RUNNER_SCRIPT.to_string(),
        ]),
        entrypoint: Some(vec![]),
        env: Some(vec![format!("{}={}", PAYLOAD_ENV, payload)]),
        user: Some(config.user.clone()),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        network_disabled: Some(true),
        host_config: Some(bollard::models::HostConfig {
            memory: Some(memory_bytes),
            memory_swap: Some(memory_bytes),
            nano_cpus: Some((f64::from(config.cpu_limit) * 1_000_000_000.0) as i64),
            pids_limit: Some(config.pids_limit),
            readonly_rootfs: Some(true),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    };

    let create_options = CreateContainerOptions {
        name: container_name,
        platform: None,
    };

    let container = docker
        .create_container(Some(create_options), container_config)
        .await
        .context("Failed to create sandbox container")?;

    let _guard = ContainerGuard {
        docker: docker.clone(),
        container_id: container.id.clone(),
    };

    let started = Instant::now();
    docker
        .start_container(&container.id, None::<StartContainerOptions<String>>)
        .await
        .context("Failed to start sandbox container")?;

    let mut stdout = String::new();
    let mut stderr = String::new();
    let logs_options = Some(LogsOptions::<String> {
        stdout: true,
        stderr: true,
        follow: true,
        ..Default::default()
    });
    let mut logs = docker.logs(&container.id, logs_options);
    while let Some(output) = logs.next().await {
        match output {
            Ok(LogOutput::StdOut { message }) => stdout.push_str(&String::from_utf8_lossy(&message)),
            Ok(LogOutput::StdErr { message }) => stderr.push_str(&String::from_utf8_lossy(&message)),
            Ok(_) => {}
            Err(e) => {
                warn!(container = %container_name, error = %e, "Error reading container logs");
                break;
            }
        }
    }

    let wait_options = WaitContainerOptions {
        condition: "not-running",
    };
    let exit_code = match docker.wait_container(&container.id, Some(wait_options)).next().await {
        Some(Ok(response)) => Some(response.status_code),
        Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Some(code),
        Some(Err(e)) => {
            warn!(container = %container_name, error = %e, "Failed to read exit code");
            None
        }
        None => None,
    };
    let total_elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    let raw = match parse_runner_output(&stdout) {
        Ok(raw) => raw,
        Err(e) => bail!("{} ({:#})", describe_exit(exit_code, &stderr), e),
    };
    if raw.run_id != command.run_id {
        bail!("Runner answered for run {} instead of {}", raw.run_id, command.run_id);
    }

    Ok(evaluator::aggregate(command, &raw, total_elapsed_ms))
}
