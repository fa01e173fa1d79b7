use crate::chat::ChatCommand;
use crate::config::ServerConfig;
use crate::persistence::{spawn_record, RoundRecorder};
use crate::round::{RoundManager, RoundState};
use axum::body::Bytes;
use marble_shared::protocol::{NotificationMsg, ServerMsg};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;

/// Commands from client connections to the game loop
pub enum GameCommand {
    /// A viewer connected. Answered with the full snapshot and a receiver
    /// subscribed right after it, so no delta is missed or repeated.
    Join {
        response: oneshot::Sender<(Bytes, broadcast::Receiver<GameBroadcast>)>,
    },
    Chat {
        user_id: String,
        username: String,
        content: String,
    },
}

/// Pre-encoded frames from the game loop to all sessions
#[derive(Debug, Clone)]
pub enum GameBroadcast {
    /// MessagePack snapshot
    Snapshot(Bytes),
    /// JSON notification
    Notification(String),
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn handle_chat(
    manager: &mut RoundManager,
    config: &ServerConfig,
    user_id: &str,
    username: &str,
    content: &str,
) {
    let Some(command) = ChatCommand::parse(content) else {
        return;
    };
    if command.developer_only() && !config.is_developer(user_id) {
        tracing::debug!("Ignoring {:?} from non-developer {}", command, user_id);
        return;
    }

    let now = Instant::now();
    match command {
        ChatCommand::Marble { color } => {
            manager.add_player_entry(user_id, username, color.as_deref(), now);
        }
        ChatCommand::End => {
            if !manager.end(now) {
                tracing::debug!("!end ignored in state {}", manager.state());
            }
        }
        ChatCommand::LotsOfBots(count) => {
            if matches!(manager.state(), RoundState::Waiting | RoundState::Enter) {
                let spawned = manager.spawn_bots(count, now);
                tracing::info!("{} spawned {} bots", username, spawned);
            }
        }
    }
}

/// Sends queued notifications and hands finished rounds to the recorder.
fn flush_outputs(
    manager: &mut RoundManager,
    broadcast_tx: &broadcast::Sender<GameBroadcast>,
    recorder: &Arc<dyn RoundRecorder>,
) {
    for content in manager.take_notifications() {
        match serde_json::to_string(&ServerMsg::Notification(NotificationMsg { content })) {
            Ok(json) => {
                let _ = broadcast_tx.send(GameBroadcast::Notification(json));
            }
            Err(e) => tracing::warn!("Failed to encode notification: {}", e),
        }
    }
    for completed in manager.take_completed() {
        spawn_record(Arc::clone(recorder), completed);
    }
}

fn broadcast_snapshots(manager: &mut RoundManager, broadcast_tx: &broadcast::Sender<GameBroadcast>) {
    for snapshot in manager.take_snapshots() {
        match snapshot.encode() {
            Ok(bytes) => {
                // No receivers is fine
                let _ = broadcast_tx.send(GameBroadcast::Snapshot(Bytes::from(bytes)));
            }
            Err(e) => {
                tracing::warn!("Failed to encode snapshot, skipping tick: {}", e);
                return;
            }
        }
    }
}

/// Flushes pending deltas to existing viewers, then builds the newcomer's
/// full snapshot and subscribes it after that flush.
fn join(
    manager: &mut RoundManager,
    broadcast_tx: &broadcast::Sender<GameBroadcast>,
) -> Option<(Bytes, broadcast::Receiver<GameBroadcast>)> {
    broadcast_snapshots(manager, broadcast_tx);
    match manager.full_snapshot(Instant::now()).encode() {
        Ok(bytes) => Some((Bytes::from(bytes), broadcast_tx.subscribe())),
        Err(e) => {
            tracing::warn!("Failed to encode full snapshot: {}", e);
            None
        }
    }
}

/// Run the main game loop. Owns all game state.
pub async fn run_game_loop(
    mut cmd_rx: mpsc::Receiver<GameCommand>,
    broadcast_tx: broadcast::Sender<GameBroadcast>,
    config: ServerConfig,
    mut manager: RoundManager,
    recorder: Arc<dyn RoundRecorder>,
) {
    let physics_period = Duration::from_secs_f64(1.0 / config.physics_rate_hz as f64);
    let broadcast_period = Duration::from_secs_f64(1.0 / config.broadcast_rate_hz as f64);

    let mut physics_interval = tokio::time::interval(physics_period);
    physics_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut broadcast_interval = tokio::time::interval(broadcast_period);
    broadcast_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!("Game loop running on level {}", manager.level_id());

    loop {
        let deadline = manager.next_deadline();

        tokio::select! {
            _ = physics_interval.tick() => {
                manager.step_physics(Instant::now());
            }

            _ = broadcast_interval.tick() => {
                broadcast_snapshots(&mut manager, &broadcast_tx);
            }

            _ = sleep_until_deadline(deadline) => {
                manager.run_due(Instant::now());
            }

            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    GameCommand::Join { response } => {
                        if let Some(welcome) = join(&mut manager, &broadcast_tx) {
                            let _ = response.send(welcome);
                        }
                    }
                    GameCommand::Chat { user_id, username, content } => {
                        handle_chat(&mut manager, &config, &user_id, &username, &content);
                    }
                }
            }
        }

        flush_outputs(&mut manager, &broadcast_tx, &recorder);
    }

    tracing::info!("Game loop ended");
}
