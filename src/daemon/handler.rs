//! Command handler implementation for the daemon.

use crate::error::Result;
use crate::ipc::protocol::{Command, EpisodeSummary, Response};
use crate::ipc::server::CommandHandler;
use crate::pipeline::orchestrator::{Orchestrator, RunHandle};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

/// Maps IPC commands onto orchestrator operations.
pub struct DaemonCommandHandler {
    orchestrator: Arc<Orchestrator>,
    shutdown: Arc<Notify>,
}

impl DaemonCommandHandler {
    /// `shutdown` is notified when a client asks the daemon to exit.
    pub fn new(orchestrator: Arc<Orchestrator>, shutdown: Arc<Notify>) -> Self {
        Self {
            orchestrator,
            shutdown,
        }
    }

    /// Runs continue in the background; the client only learns the id.
    fn started(result: Result<RunHandle>) -> Response {
        match result {
            Ok(handle) => Response::Started {
                episode_id: handle.episode_id().to_string(),
            },
            Err(e) => error_response(e),
        }
    }

    fn status(&self, episode_id: &str) -> Response {
        match self.orchestrator.status(episode_id) {
            Ok(episode) => Response::Episode {
                episode: EpisodeSummary::new(&episode, self.orchestrator.is_running(episode_id)),
            },
            Err(e) => error_response(e),
        }
    }

    fn list(&self, podcast_id: Option<&str>) -> Response {
        match self.orchestrator.list(podcast_id) {
            Ok(episodes) => Response::Episodes {
                episodes: episodes
                    .iter()
                    .map(|e| EpisodeSummary::new(e, self.orchestrator.is_running(&e.id)))
                    .collect(),
            },
            Err(e) => error_response(e),
        }
    }
}

fn error_response(error: crate::error::FeedcastError) -> Response {
    Response::Error {
        message: error.to_string(),
    }
}

#[async_trait::async_trait]
impl CommandHandler for DaemonCommandHandler {
    async fn handle(&self, command: Command) -> Response {
        match command {
            Command::Generate { podcast_id } => Self::started(self.orchestrator.generate(&podcast_id)),
            Command::Retry { episode_id } => Self::started(self.orchestrator.retry(&episode_id)),
            Command::Regenerate { episode_id } => {
                Self::started(self.orchestrator.regenerate(&episode_id))
            }
            Command::Cancel { episode_id } => match self.orchestrator.cancel(&episode_id) {
                Ok(()) => Response::Ok,
                Err(e) => error_response(e),
            },
            Command::Status { episode_id } => self.status(&episode_id),
            Command::List { podcast_id } => self.list(podcast_id.as_deref()),
            Command::Shutdown => {
                info!("Shutdown requested over IPC");
                self.shutdown.notify_one();
                Response::Ok
            }
        }
    }
}
