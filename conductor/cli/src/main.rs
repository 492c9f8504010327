//! Nebula Chat - Terminal front end for the Nebula conductor
//!
//! Runs dialogue turns against the configured completion backends and
//! renders the avatar to the terminal.
//!
//! # Usage
//!
//! ```bash
//! # Interactive session (one question per line, Ctrl-C cancels a turn)
//! nebula-chat
//!
//! # One streamed turn
//! nebula-chat "1+1=?"
//!
//! # Ask about an image (uses the vision backend)
//! nebula-chat --image https://example.com/triangle.png "这是什么图形？"
//!
//! # Non-streaming answer, no avatar
//! nebula-chat ask "什么是质数？"
//!
//! # Speak the greeting
//! nebula-chat welcome
//!
//! # Verbose logging
//! RUST_LOG=debug nebula-chat
//! ```
//!
//! # Environment Variables
//!
//! - `NEBULA_API_KEY`: API key for the reasoning backend
//! - `NEBULA_VISION_API_KEY`: API key for the vision backend (defaults to
//!   `NEBULA_API_KEY`)
//! - `NEBULA_BASE_URL`: completion endpoint
//! - `NEBULA_CONFIG`: configuration file path

mod console;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;

use nebula_conductor::{
    default_config_path, load_config_from_path, AvatarService, BackendKind, ConfigOverrides,
    Conductor, ConductorError, NebulaConfig, TurnEvent, TurnOutcome, UserInput,
};

use console::ConsoleAvatar;

/// Nebula Chat - talk to the Nebula tutor from a terminal
#[derive(Parser, Debug)]
#[command(name = "nebula-chat")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Question for a single streamed turn (interactive when omitted)
    message: Option<String>,

    /// Image URL or data URI to ask about
    #[arg(short = 'i', long, value_name = "URL")]
    image: Option<String>,

    /// Backend for text-only turns (reasoning, vision)
    #[arg(short = 'b', long)]
    backend: Option<BackendKind>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "NEBULA_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// API key (overrides config file and environment)
    #[arg(long, value_name = "KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Completion endpoint base URL
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// Speech flush interval in milliseconds
    #[arg(long, value_name = "MS")]
    flush_interval_ms: Option<u64>,

    /// Print streamed text instead of rendering the console avatar
    #[arg(long)]
    no_avatar: bool,

    /// Print reasoning fragments to stderr
    #[arg(long)]
    show_reasoning: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask once without streaming and print the answer
    Ask {
        /// Question text
        text: String,
    },
    /// Speak the built-in greeting
    Welcome,
    /// Print the resolved configuration
    Config,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(ref key) = self.api_key {
            overrides = overrides.with_api_key(key.clone());
        }
        if let Some(ref url) = self.base_url {
            overrides = overrides.with_base_url(url.clone());
        }
        if let Some(kind) = self.backend {
            overrides = overrides.with_default_backend(kind);
        }
        if let Some(ms) = self.flush_interval_ms {
            overrides = overrides.with_flush_interval_ms(ms);
        }
        overrides
    }

    fn load_config(&self) -> Result<NebulaConfig> {
        let path = self.config.clone().or_else(default_config_path);
        let mut config = load_config_from_path(path).context("Failed to load configuration")?;
        self.overrides().apply(&mut config);
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nebula_cli=info".parse()?)
                .add_directive("nebula_conductor=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let cli = Cli::parse();
    let config = cli.load_config()?;
    info!(source = %config.source(), "Configuration loaded");

    if matches!(cli.command, Some(Command::Config)) {
        print_config(&config);
        return Ok(());
    }

    let avatar = Arc::new(AvatarService::new(
        Arc::new(ConsoleAvatar::stdout()),
        config.avatar.clone(),
    ));
    if !cli.no_avatar {
        avatar.init().await;
    }

    let (tx, rx) = mpsc::channel(100);
    let conductor = Conductor::new(
        config.conductor.clone(),
        Arc::clone(&avatar),
        config.backend_selector()?,
        tx,
    );
    let printer = tokio::spawn(print_events(rx, cli.no_avatar, cli.show_reasoning));

    let result = match cli.command {
        Some(Command::Ask { ref text }) => {
            let answer = conductor.ask(text).await.map_err(explain)?;
            println!("{answer}");
            Ok(())
        }
        Some(Command::Welcome) => conductor.welcome().await.map_err(explain),
        Some(Command::Config) => Ok(()),
        None => match cli.message.clone() {
            Some(text) => {
                let input = with_image(UserInput::text(text), cli.image.clone());
                run_turn(&conductor, input).await.map(|_| ())
            }
            None => interactive(&conductor, cli.image.as_deref()).await,
        },
    };

    avatar.destroy().await;
    drop(conductor);
    let _ = printer.await;
    result
}

/// Read questions from stdin until EOF
async fn interactive(conductor: &Conductor, image: Option<&str>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprintln!("Ask a question (Ctrl-D to quit, Ctrl-C to stop an answer)");

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            return Ok(());
        };

        match line.trim() {
            "" => continue,
            "/clear" => {
                conductor.clear_history();
                eprintln!("History cleared");
            }
            text => {
                let input = with_image(UserInput::text(text), image.map(str::to_string));
                if let Err(e) = run_turn(conductor, input).await {
                    eprintln!("error: {e:#}");
                }
            }
        }
    }
}

/// Run one streamed turn; Ctrl-C cancels it
async fn run_turn(conductor: &Conductor, input: UserInput) -> Result<TurnOutcome> {
    let turn = conductor.handle_user_input(input);
    tokio::pin!(turn);

    let outcome = tokio::select! {
        outcome = &mut turn => outcome,
        _ = tokio::signal::ctrl_c() => {
            conductor.cancel();
            let outcome = turn.await;
            if let Err(e) = conductor.avatar().interactive_idle().await {
                tracing::warn!(error = %e, "Failed to return avatar to interactive idle");
            }
            outcome
        }
    }
    .map_err(explain)?;

    match outcome {
        TurnOutcome::Busy => eprintln!("(still answering the previous question)"),
        TurnOutcome::Cancelled { .. } => eprintln!("(cancelled)"),
        TurnOutcome::Failed { ref error, .. } => anyhow::bail!("turn failed: {error}"),
        TurnOutcome::Completed { .. } => {}
    }
    Ok(outcome)
}

fn print_config(config: &NebulaConfig) {
    let path = config
        .config_file_path
        .as_ref()
        .map_or_else(|| "(none)".to_string(), |p| p.display().to_string());
    println!("source:          {}", config.source());
    println!("config file:     {path}");
    for kind in [BackendKind::Reasoning, BackendKind::Vision] {
        let backend = config.backend(kind);
        let label = format!("{kind}:");
        println!(
            "{label:<16} {} @ {} (api key {})",
            backend.model,
            backend.base_url,
            if backend.has_api_key() { "set" } else { "missing" }
        );
    }
    println!("default backend: {}", config.conductor.default_backend);
    println!("flush interval:  {:?}", config.conductor.flush_interval);
    println!("history limit:   {}", config.conductor.history_limit);
    println!(
        "avatar:          {}",
        if config.avatar.has_valid_config() { "configured" } else { "not configured" }
    );
}

fn with_image(input: UserInput, image: Option<String>) -> UserInput {
    match image {
        Some(url) => input.with_image(url),
        None => input,
    }
}

fn explain(error: ConductorError) -> anyhow::Error {
    if error.is_config() {
        anyhow::Error::new(error)
            .context("Set NEBULA_API_KEY or add an api_key to the config file")
    } else {
        anyhow::Error::new(error)
    }
}

/// Render turn events; speech itself is rendered by the console avatar
async fn print_events(mut rx: mpsc::Receiver<TurnEvent>, print_content: bool, show_reasoning: bool) {
    use std::io::Write;

    while let Some(event) = rx.recv().await {
        match event {
            TurnEvent::Reasoning { delta, .. } if show_reasoning => {
                eprint!("{delta}");
            }
            TurnEvent::Responding { delta, .. } if print_content => {
                print!("{delta}");
                let _ = std::io::stdout().flush();
            }
            TurnEvent::Done { .. } if print_content => println!(),
            TurnEvent::Error { turn_id, error } => {
                tracing::debug!(%turn_id, error = %error, "Turn error event");
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_one_shot_turn() {
        let cli = Cli::try_parse_from(["nebula-chat", "--image", "a.png", "-b", "vision", "这是什么？"])
            .unwrap();
        assert_eq!(cli.message.as_deref(), Some("这是什么？"));
        assert_eq!(cli.image.as_deref(), Some("a.png"));
        assert_eq!(cli.backend, Some(BackendKind::Vision));
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_parses_ask_subcommand() {
        let cli = Cli::try_parse_from(["nebula-chat", "ask", "什么是质数？"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Ask { ref text }) if text == "什么是质数？"));
    }

    #[test]
    fn test_cli_rejects_unknown_backend() {
        assert!(Cli::try_parse_from(["nebula-chat", "--backend", "audio"]).is_err());
    }

    #[test]
    fn test_overrides_reach_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conductor.toml");
        std::fs::write(&path, "[reasoning]\nmodel = \"file-model\"\n").unwrap();

        let cli = Cli::try_parse_from([
            "nebula-chat",
            "--config",
            path.to_str().unwrap(),
            "--api-key",
            "sk-cli",
            "--flush-interval-ms",
            "150",
        ])
        .unwrap();
        let config = cli.load_config().unwrap();

        assert_eq!(config.reasoning.model, "file-model");
        assert_eq!(config.reasoning.api_key, "sk-cli");
        assert_eq!(
            config.conductor.flush_interval,
            std::time::Duration::from_millis(150)
        );
    }
}
