//! Async Unix socket IPC server for daemon control.

use crate::error::{FeedcastError, Result};
use crate::ipc::protocol::{Command, Response};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

/// Handler trait for processing IPC commands.
#[async_trait::async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: Command) -> Response;
}

/// IPC server for handling daemon control commands via Unix socket.
pub struct IpcServer {
    socket_path: PathBuf,
    shutdown: AtomicBool,
}

impl IpcServer {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// `$XDG_RUNTIME_DIR/feedcast.sock`, or `/tmp/feedcast-<uid>.sock`.
    pub fn default_socket_path() -> PathBuf {
        match std::env::var("XDG_RUNTIME_DIR") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir).join("feedcast.sock"),
            _ => PathBuf::from(format!("/tmp/feedcast-{}.sock", crate::sys::current_uid())),
        }
    }

    /// Accept connections until [`IpcServer::stop`] is called.
    pub async fn start<H>(&self, handler: Arc<H>) -> Result<()>
    where
        H: CommandHandler + 'static,
    {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| FeedcastError::IpcSocket {
                message: format!("Failed to remove existing socket: {e}"),
            })?;
        }

        let listener =
            UnixListener::bind(&self.socket_path).map_err(|e| FeedcastError::IpcSocket {
                message: format!("Failed to bind to {}: {e}", self.socket_path.display()),
            })?;

        while !self.shutdown.load(Ordering::SeqCst) {
            // Poll so a stop request is noticed without a new connection.
            let accepted =
                tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;

            match accepted {
                Ok(Ok((stream, _))) => {
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, handler).await {
                            warn!(error = %e, "IPC client error");
                        }
                    });
                }
                Ok(Err(e)) => {
                    return Err(FeedcastError::IpcConnection {
                        message: format!("Failed to accept connection: {e}"),
                    });
                }
                Err(_) => continue,
            }
        }

        Ok(())
    }

    /// Stop accepting connections and remove the socket file.
    pub fn stop(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| FeedcastError::IpcSocket {
                message: format!("Failed to remove socket file: {e}"),
            })?;
        }

        Ok(())
    }
}

/// Read one command line, answer with one response line.
async fn handle_client<H>(stream: UnixStream, handler: Arc<H>) -> Result<()>
where
    H: CommandHandler + ?Sized,
{
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    reader
        .read_line(&mut line)
        .await
        .map_err(|e| FeedcastError::IpcConnection {
            message: format!("Failed to read from client: {e}"),
        })?;

    let response = match Command::from_json(line.trim()) {
        Ok(command) => {
            debug!(?command, "IPC command");
            handler.handle(command).await
        }
        Err(e) => Response::Error {
            message: format!("Invalid command: {e}"),
        },
    };

    let mut response_json = response.to_json().map_err(|e| FeedcastError::IpcProtocol {
        message: format!("Failed to serialize response: {e}"),
    })?;
    response_json.push('\n');

    writer
        .write_all(response_json.as_bytes())
        .await
        .map_err(|e| FeedcastError::IpcConnection {
            message: format!("Failed to write to client: {e}"),
        })?;
    writer
        .flush()
        .await
        .map_err(|e| FeedcastError::IpcConnection {
            message: format!("Failed to flush writer: {e}"),
        })?;

    Ok(())
}
