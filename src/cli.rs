//! Command-line interface for feedcast
//!
//! Provides argument parsing using clap derive macros, and the plain-text
//! rendering of episodes shared by the client commands.

use crate::ipc::protocol::EpisodeSummary;
use crate::logging::LogFormat;
use crate::pipeline::episode::EpisodeState;
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use std::path::PathBuf;

/// RSS feeds in, podcast episodes out
#[derive(Parser, Debug)]
#[command(name = "feedcast", version, about = "Turn RSS feeds into podcast episodes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Daemon socket (default: $XDG_RUNTIME_DIR/feedcast.sock)
    #[arg(long, global = true, value_name = "PATH")]
    pub socket: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Run the generation daemon in the foreground
    Daemon,

    /// Create an episode for a podcast and start generating it
    Generate { podcast_id: String },

    /// Resume a failed, cancelled or interrupted episode
    Retry { episode_id: String },

    /// Stop an episode's run at the next stage boundary
    Cancel { episode_id: String },

    /// Discard an episode's outputs and generate it again
    Regenerate { episode_id: String },

    /// Show one episode
    Status { episode_id: String },

    /// List episodes, newest first
    Episodes {
        /// Only episodes of this podcast
        #[arg(long, value_name = "ID")]
        podcast: Option<String>,
    },

    /// List configured podcasts (reads the config file, no daemon needed)
    Podcasts,

    /// Generate one episode in this process, without a daemon
    Run { podcast_id: String },

    /// Ask the daemon to exit
    Shutdown,
}

/// State name, coloured by outcome when `color` is set.
pub fn format_state(state: &EpisodeState, color: bool) -> String {
    let text = state.to_string();
    if !color {
        return text;
    }
    match state {
        EpisodeState::Published => text.green().to_string(),
        EpisodeState::Failed { .. } => text.red().to_string(),
        EpisodeState::Cancelled { .. } | EpisodeState::PublishPartial => {
            text.yellow().to_string()
        }
        _ => text.cyan().to_string(),
    }
}

/// One line per episode for `feedcast episodes`.
pub fn format_summary_line(summary: &EpisodeSummary, color: bool) -> String {
    let running = if summary.running { " (running)" } else { "" };
    format!(
        "{}  {:<12} {}  {}{}",
        summary.id,
        summary.podcast_id,
        summary.created_at.format("%Y-%m-%d %H:%M"),
        format_state(&summary.state, color),
        running
    )
}

/// Multi-line detail view for `feedcast status`.
pub fn format_summary(summary: &EpisodeSummary, color: bool) -> String {
    let label = |name: &str| {
        if color {
            name.dimmed().to_string()
        } else {
            name.to_string()
        }
    };
    let mut lines = vec![
        format!("{}  {}", label("Episode:"), summary.id),
        format!("{}  {}", label("Podcast:"), summary.podcast_id),
        format!("{}    {}", label("State:"), format_state(&summary.state, color)),
        format!(
            "{}  {}",
            label("Running:"),
            if summary.running { "yes" } else { "no" }
        ),
        format!("{}  {}", label("Created:"), summary.created_at.to_rfc3339()),
        format!("{}  {}", label("Updated:"), summary.updated_at.to_rfc3339()),
    ];
    if let Some(url) = &summary.url {
        lines.push(format!("{}      {url}", label("URL:")));
    }
    for warning in &summary.warnings {
        lines.push(format!("{}  {warning}", label("Warning:")));
    }
    if let Some(failure) = &summary.last_error {
        lines.push(format!(
            "{}    {} ({})",
            label("Error:"),
            failure.message,
            failure.stage
        ));
    }
    lines.join("\n")
}
