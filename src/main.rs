use anyhow::{Result, bail};
use clap::Parser;
use owo_colors::OwoColorize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use feedcast::cli::{Cli, Commands, format_summary, format_summary_line};
use feedcast::config::Config;
use feedcast::daemon::{build_orchestrator, run_daemon};
use feedcast::ipc::client::send_command;
use feedcast::ipc::protocol::{Command, EpisodeSummary, Response};
use feedcast::ipc::server::IpcServer;
use feedcast::pipeline::EpisodeState;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    feedcast::logging::init(cli.verbose, cli.quiet, cli.log_format);

    let socket = cli.socket.clone();
    match cli.command {
        Commands::Daemon => {
            let config = load_config(cli.config.as_deref())?;
            run_daemon(config, socket).await?;
        }
        Commands::Generate { podcast_id } => {
            handle_ipc_command(socket, cli.config.as_deref(), Command::Generate { podcast_id }).await?;
        }
        Commands::Retry { episode_id } => {
            handle_ipc_command(socket, cli.config.as_deref(), Command::Retry { episode_id }).await?;
        }
        Commands::Cancel { episode_id } => {
            handle_ipc_command(socket, cli.config.as_deref(), Command::Cancel { episode_id }).await?;
        }
        Commands::Regenerate { episode_id } => {
            handle_ipc_command(socket, cli.config.as_deref(), Command::Regenerate { episode_id })
                .await?;
        }
        Commands::Status { episode_id } => {
            handle_ipc_command(socket, cli.config.as_deref(), Command::Status { episode_id }).await?;
        }
        Commands::Episodes { podcast } => {
            handle_ipc_command(
                socket,
                cli.config.as_deref(),
                Command::List {
                    podcast_id: podcast,
                },
            )
            .await?;
        }
        Commands::Shutdown => {
            handle_ipc_command(socket, cli.config.as_deref(), Command::Shutdown).await?;
        }
        Commands::Podcasts => {
            let config = load_config(cli.config.as_deref())?;
            list_podcasts(&config);
        }
        Commands::Run { podcast_id } => {
            let config = load_config(cli.config.as_deref())?;
            run_once(&config, &podcast_id).await?;
        }
    }

    Ok(())
}

fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path())?
    };

    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Socket from the flag, then the config file, then the default.
fn resolve_socket(socket: Option<PathBuf>, config_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(socket) = socket {
        return Ok(socket);
    }
    let config = load_config(config_path)?;
    Ok(config
        .daemon
        .socket
        .unwrap_or_else(IpcServer::default_socket_path))
}

fn use_color() -> bool {
    std::io::stdout().is_terminal()
}

async fn handle_ipc_command(
    socket: Option<PathBuf>,
    config_path: Option<&Path>,
    command: Command,
) -> Result<()> {
    let socket_path = resolve_socket(socket, config_path)?;
    let color = use_color();

    match send_command(&socket_path, command).await? {
        Response::Ok => println!("{}", if color { "ok".green().to_string() } else { "ok".to_string() }),
        Response::Started { episode_id } => println!("{episode_id}"),
        Response::Episode { episode } => println!("{}", format_summary(&episode, color)),
        Response::Episodes { episodes } => {
            if episodes.is_empty() {
                eprintln!("No episodes");
            }
            for episode in &episodes {
                println!("{}", format_summary_line(episode, color));
            }
        }
        Response::Error { message } => bail!(message),
    }
    Ok(())
}

fn list_podcasts(config: &Config) {
    if config.podcasts.is_empty() {
        eprintln!(
            "No podcasts configured in {}",
            Config::default_path().display()
        );
        return;
    }
    for podcast in &config.podcasts {
        let schedule = podcast
            .schedule
            .as_deref()
            .map(|s| format!("daily at {s} UTC"))
            .unwrap_or_else(|| "manual".to_string());
        println!(
            "{:<16} {}  ({} feeds, {}s, {})",
            podcast.id,
            podcast.name,
            podcast.feed_urls.len(),
            podcast.target_duration_seconds,
            schedule
        );
    }
}

/// Generate one episode in-process and wait for it.
async fn run_once(config: &Config, podcast_id: &str) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let episode = orchestrator.generate(podcast_id)?.wait().await?;
    println!(
        "{}",
        format_summary(&EpisodeSummary::new(&episode, false), use_color())
    );
    if episode.state != EpisodeState::Published {
        bail!("episode {} stopped in state {}", episode.id, episode.state);
    }
    Ok(())
}
