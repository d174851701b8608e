pub mod play;

use anyhow::{Context, Result};
use tracing::debug;

use fourline_session::{ApiError, ExistenceCheck, FetchOutcome, HttpGameApi, SessionId, StateFetcher};

use crate::config::AppConfig;
use crate::render::BoardView;

pub use play::play_command;

fn game_api(config: &AppConfig) -> Result<HttpGameApi> {
    HttpGameApi::new(&config.settings.api).context("Failed to build HTTP client")
}

fn describe(err: &ApiError, config: &AppConfig) -> String {
    match err {
        ApiError::Unavailable => format!("game server at {} is unavailable", config.settings.api.base_url),
        other => other.to_string(),
    }
}

/// `fourline check <id>`: does the session exist?
pub async fn check_command(config: &AppConfig, game_id: SessionId) -> Result<()> {
    let api = game_api(config)?;
    match api.check(&game_id).await {
        Ok(true) => println!("Game {game_id} exists."),
        Ok(false) => println!("Game {game_id} not found."),
        Err(e) => anyhow::bail!("Could not check game {game_id}: {}", describe(&e, config)),
    }
    Ok(())
}

/// `fourline show <id>`: one-shot fetch and render.
pub async fn show_command(config: &AppConfig, game_id: SessionId) -> Result<()> {
    let api = game_api(config)?;
    debug!(url = %api.fetch_url(&game_id), "fetching game");
    match api.fetch(&game_id).await {
        Ok(FetchOutcome::Found(state)) => {
            println!("Game {game_id}");
            println!("Next: player {}", state.next.player_code());
            print!("{}", BoardView(&state.board));
            println!("Share: {}", config.settings.share_link(&game_id));
        }
        Ok(FetchOutcome::NotFound) => println!("Game {game_id} not found."),
        Err(e) => anyhow::bail!("Could not load game {game_id}: {}", describe(&e, config)),
    }
    Ok(())
}

/// `fourline config`: print the resolved configuration.
pub fn config_command(config: &AppConfig) -> Result<()> {
    let text = toml::to_string_pretty(&config.file).context("Failed to serialize configuration")?;
    println!("# data dir: {}", config.data_dir.display());
    println!("# file: {}", config.config_toml_path().display());
    print!("{text}");
    Ok(())
}
