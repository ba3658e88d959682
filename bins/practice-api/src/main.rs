mod handlers;
mod metrics;
mod routes;

use anyhow::Context;
use axum::Router;
use practice_common::config::JudgeConfig;
use practice_judge::engine::DockerSandbox;
use practice_judge::Orchestrator;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Practice judge API booting...");

    let config = JudgeConfig::load_default().map_err(|e| {
        error!("Failed to load judge configuration: {:#}", e);
        e
    })?;
    info!(
        deadline_ms = config.deadline_ms,
        image = %config.sandbox.image,
        memory_mb = config.sandbox.memory_limit_mb,
        "Configuration loaded"
    );

    // Warm the image so the first run is not charged for a pull
    let sandbox = DockerSandbox::new(config.sandbox.clone())?;
    sandbox
        .prepare()
        .await
        .context("Failed to prepare sandbox image")?;

    let state = Arc::new(AppState {
        orchestrator: Arc::new(Orchestrator::new(Arc::new(sandbox), config.deadline())),
    });

    let app = Router::new().merge(routes::routes()).with_state(state);

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.listen_addr))?;

    info!("HTTP server listening on {}", config.listen_addr);

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install CTRL+C signal handler");
            std::future::pending::<()>().await;
        }
        warn!("Received shutdown signal, stopping server");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    info!("Practice judge API stopped");
    Ok(())
}
