use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use marble_shared::protocol::ClientMsg;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::game_loop::{GameBroadcast, GameCommand};

/// Largest text frame a client may send (bytes)
pub const MAX_TEXT_FRAME: usize = 1024;
/// Unparseable messages tolerated before disconnecting
pub const MAX_PARSE_ERRORS: u32 = 5;

/// Shared app state passed to each WebSocket handler
#[derive(Clone)]
pub struct AppState {
    pub game_tx: mpsc::Sender<GameCommand>,
}

/// HTTP handler for WebSocket upgrade
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, app_state))
}

async fn handle_socket(socket: WebSocket, app_state: AppState) {
    let (mut sink, mut stream) = socket.split();

    let (resp_tx, resp_rx) = oneshot::channel();
    if app_state
        .game_tx
        .send(GameCommand::Join { response: resp_tx })
        .await
        .is_err()
    {
        tracing::error!("Failed to send Join command");
        return;
    }

    let (full_snapshot, mut broadcast_rx) = match resp_rx.await {
        Ok(result) => result,
        Err(_) => {
            tracing::error!("Failed to receive full snapshot");
            return;
        }
    };

    tracing::info!("Viewer connected");

    if sink.send(Message::Binary(full_snapshot)).await.is_err() {
        return;
    }

    let mut parse_errors = 0;

    loop {
        tokio::select! {
            // Client -> Server
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > MAX_TEXT_FRAME {
                            tracing::warn!("Dropping viewer: {} byte message", text.len());
                            break;
                        }
                        match serde_json::from_str::<ClientMsg>(&text) {
                            Ok(ClientMsg::Chat { user_id, username, content }) => {
                                let _ = app_state.game_tx.send(GameCommand::Chat {
                                    user_id,
                                    username,
                                    content,
                                }).await;
                            }
                            Err(e) => {
                                parse_errors += 1;
                                tracing::debug!("Bad client message: {}", e);
                                if parse_errors > MAX_PARSE_ERRORS {
                                    tracing::warn!("Dropping viewer after {} bad messages", parse_errors);
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {} // Ignore ping/pong/binary
                }
            }

            // Server -> Client (broadcast)
            result = broadcast_rx.recv() => {
                match result {
                    Ok(broadcast) => {
                        let message = match broadcast {
                            GameBroadcast::Snapshot(bytes) => Message::Binary(bytes),
                            GameBroadcast::Notification(json) => Message::Text(json.into()),
                        };
                        if sink.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Transforms are resent every tick; missed marble
                        // deltas are not
                        tracing::warn!("Viewer lagged by {} frames", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::info!("Viewer disconnected");
}
