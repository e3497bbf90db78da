//! Demo binary: follow one game's reconciled state on the console.

use std::env;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kwiz_sync::config::SyncConfig;
use kwiz_sync::services::sync_service::QuizSyncClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let game_id = env::args()
        .nth(1)
        .or_else(|| env::var("KWIZ_GAME_ID").ok())
        .context("pass a game id as the first argument or set KWIZ_GAME_ID")?;
    let quiz_id = env::args().nth(2).or_else(|| env::var("KWIZ_QUIZ_ID").ok());

    let config = SyncConfig::load();
    let client = QuizSyncClient::new(config);
    client.initialize_game(&game_id, quiz_id.as_deref()).await;

    let mut updates = client.updates();
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(view) => {
                    info!(
                        game_id = %view.game_id,
                        phase = ?view.phase,
                        question = view.snapshot.current_question_text.as_deref().unwrap_or("-"),
                        remaining = view.snapshot.remaining_seconds.unwrap_or(0),
                        leaders = ?view
                            .leaderboard
                            .iter()
                            .map(|entry| format!("{} {}", entry.player_name, entry.score))
                            .collect::<Vec<_>>(),
                        "reconciled state"
                    );
                }
                Err(_) => break,
            },
            _ = shutdown_signal() => break,
        }
    }

    client.leave_game().await;
    Ok(())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,kwiz_sync=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
