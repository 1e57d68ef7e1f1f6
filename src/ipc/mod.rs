//! Daemon control over a Unix socket.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::send_command;
pub use protocol::{Command, EpisodeSummary, Response};
pub use server::{CommandHandler, IpcServer};
