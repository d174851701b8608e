use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::time::{self, Instant};
use tracing::{info, warn};

use fourline_session::{
    ControllerEvent, EntryContext, HttpGameApi, Mode, SessionController, SessionId,
    SocketIoChannel,
};

use crate::config::AppConfig;
use crate::render::SessionScreen;

/// Notices close themselves after this long.
const NOTICE_TTL: Duration = Duration::from_secs(5);

/// `fourline play <id>`: run a controller until redirected, quit, or Ctrl-C.
pub async fn play_command(config: &AppConfig, game_id: SessionId, mode: Option<Mode>) -> Result<()> {
    let settings = &config.settings;
    let api = Arc::new(HttpGameApi::new(&settings.api).context("Failed to build HTTP client")?);
    let channel = Arc::new(SocketIoChannel::new(settings.channel.clone()));
    let board_size = api.board_size();
    let controller = SessionController::new(api.clone(), api, channel).with_board_size(board_size);

    let share_link = settings.share_link(&game_id);
    let entry = EntryContext {
        game_id: Some(game_id.clone()),
        mode,
    };
    let mut handle = controller.start(Some(entry));
    let mut state = handle.watch();
    let mut input = Some(BufReader::new(tokio::io::stdin()).lines());
    let mut expiring: VecDeque<(Instant, u64)> = VecDeque::new();

    info!(game_id = %game_id, "joining game");
    println!("Commands: r = reload, q = quit");
    print!("{}", SessionScreen { snapshot: &handle.snapshot(), share_link: &share_link });

    loop {
        let next_expiry = expiring.front().map(|(at, _)| *at);

        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = state.borrow_and_update().clone();
                println!();
                print!("{}", SessionScreen { snapshot: &snapshot, share_link: &share_link });
            }

            event = handle.next_event() => match event {
                Some(ControllerEvent::Notice(notice)) => {
                    expiring.push_back((Instant::now() + NOTICE_TTL, notice.id));
                }
                Some(ControllerEvent::Redirect(route)) => {
                    println!("Game {game_id} is not available, returning {route}.");
                    break;
                }
                None => break,
            },

            () = sleep_until(next_expiry) => {
                if let Some((_, id)) = expiring.pop_front() {
                    handle.dismiss_notice(id).await;
                }
            }

            line = next_line(&mut input) => match line {
                Ok(Some(line)) => match line.trim() {
                    "r" => {
                        if let Err(e) = handle.refetch().await {
                            println!("Cannot reload: {e}");
                        }
                    }
                    "q" => break,
                    "" => {}
                    other => println!("Unknown command: {other}"),
                },
                // stdin closed; keep playing until interrupted
                Ok(None) => input = None,
                Err(e) => {
                    warn!(error = %e, "failed to read stdin");
                    break;
                }
            },

            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, leaving game");
                break;
            }
        }
    }

    handle.dispose().await;
    Ok(())
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn next_line(input: &mut Option<Lines<BufReader<Stdin>>>) -> std::io::Result<Option<String>> {
    match input {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}
