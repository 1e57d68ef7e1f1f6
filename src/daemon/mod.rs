//! Daemon mode: the orchestrator behind an IPC socket, plus schedules.

pub mod handler;
pub mod scheduler;

use crate::config::Config;
use crate::error::{FeedcastError, Result};
use crate::ipc::server::IpcServer;
use crate::pipeline::orchestrator::{Orchestrator, Stages};
use crate::pipeline::store::FileEpisodeStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// Build the production orchestrator for `config`.
///
/// Episodes are stored under `<data_dir>/episodes`, audio under
/// `<data_dir>/audio`.
pub fn build_orchestrator(config: &Config) -> Result<Arc<Orchestrator>> {
    let data_dir = config.data_dir();
    let store = FileEpisodeStore::new(data_dir.join("episodes"))?;
    let stages = Stages::from_config(config)?;
    let orchestrator = Orchestrator::new(Arc::new(config.clone()), Arc::new(store), stages, data_dir)
        .with_stage_timeout(config.timeouts.stage());
    Ok(Arc::new(orchestrator))
}

/// Run the daemon until SIGINT, SIGTERM or a `shutdown` command.
pub async fn run_daemon(config: Config, socket_path: Option<PathBuf>) -> Result<()> {
    let orchestrator = build_orchestrator(&config)?;

    for episode in orchestrator.interrupted()? {
        warn!(
            episode_id = %episode.id,
            podcast_id = %episode.podcast_id,
            state = %episode.state,
            "Interrupted run found; resume it with `feedcast retry`"
        );
    }

    let schedules = scheduler::spawn_all(&orchestrator, &config.podcasts)?;

    let socket_path = socket_path
        .or_else(|| config.daemon.socket.clone())
        .unwrap_or_else(IpcServer::default_socket_path);
    let server = Arc::new(IpcServer::new(socket_path));
    let shutdown = Arc::new(Notify::new());
    let handler = Arc::new(handler::DaemonCommandHandler::new(
        Arc::clone(&orchestrator),
        Arc::clone(&shutdown),
    ));

    let running = Arc::clone(&server);
    let server_handle = tokio::spawn(async move { running.start(handler).await });

    info!(
        socket = %server.socket_path().display(),
        podcasts = config.podcasts.len(),
        version = %crate::version_string(),
        "Daemon ready"
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
        _ = wait_for_sigterm() => info!("Received SIGTERM, shutting down"),
        _ = shutdown.notified() => info!("Shutting down"),
    }

    for task in &schedules {
        task.abort();
    }
    server.stop()?;
    match server_handle.await {
        Ok(Err(e)) => error!(error = %e, "IPC server stopped with error"),
        Err(e) => error!(error = %e, "IPC server task failed"),
        Ok(Ok(())) => {}
    }

    let active = orchestrator
        .list(None)?
        .into_iter()
        .filter(|e| orchestrator.is_running(&e.id))
        .count();
    if active > 0 {
        warn!(active, "Active runs abandoned; they will be reported as interrupted");
    }
    info!("Daemon stopped");
    Ok(())
}

/// Wait for SIGTERM (sent by service managers).
///
/// If the handler cannot be registered this never completes, leaving SIGINT
/// and the `shutdown` command as the ways out.
async fn wait_for_sigterm() {
    match register_sigterm() {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!(error = %e, "Signal handler setup failed");
            std::future::pending::<()>().await;
        }
    }
}

fn register_sigterm() -> Result<tokio::signal::unix::Signal> {
    use tokio::signal::unix::{SignalKind, signal};
    signal(SignalKind::terminate())
        .map_err(|e| FeedcastError::Other(format!("Failed to register SIGTERM handler: {e}")))
}
