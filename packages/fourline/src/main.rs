use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

use fourline_session::{Mode, SessionId};

mod cli;
mod config;
mod render;

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "fourline")]
#[command(about = "Play two-party grid game sessions from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.fourline)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Join a game and follow it live
    Play(PlayArgs),

    /// Check whether a game exists
    Check(GameArgs),

    /// Fetch and print a game's board once
    Show(GameArgs),

    /// Print the resolved configuration
    Config,
}

#[derive(Parser)]
struct PlayArgs {
    /// Game id
    game_id: SessionId,

    /// `create` if you started this game, `join` otherwise (default: join)
    #[arg(short, long)]
    mode: Option<Mode>,
}

#[derive(Parser)]
struct GameArgs {
    /// Game id
    game_id: SessionId,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout is the board
    let default_directive = if cli.debug {
        "fourline=debug,fourline_session=debug,info"
    } else {
        "fourline=info,fourline_session=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config = AppConfig::new(cli.data_dir.clone())?;

    match cli.command {
        Commands::Play(args) => cli::play_command(&config, args.game_id, args.mode).await,
        Commands::Check(args) => cli::check_command(&config, args.game_id).await,
        Commands::Show(args) => cli::show_command(&config, args.game_id).await,
        Commands::Config => cli::config_command(&config),
    }
}
