//! WebSocket subscription endpoint
//!
//! `GET /ws/:session_id?mode=<view mode>` sends one `snapshot` message with
//! the full state, then a `state_update` per applied event. Each message
//! carries the view for the connection's selected mode, which the client
//! may change with `{"type": "select_mode", "mode": "..."}`.

use super::hub::{StateUpdate, Subscription};
use super::server::{ApiError, AppState};
use crate::session::{SessionState, StateDelta};
use crate::types::SessionId;
use crate::whiteboard::{project, ViewMode, ViewPayload};
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Close code sent to a subscriber that fell behind (1013: try again later)
const CLOSE_OVERRUN: u16 = 1013;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    #[serde(default)]
    pub mode: Option<String>,
}

/// Server → client frames
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage<'a> {
    Snapshot {
        session_id: &'a SessionId,
        sequence: u64,
        mode: ViewMode,
        state: &'a SessionState,
        view: ViewPayload,
    },
    StateUpdate {
        session_id: &'a SessionId,
        sequence: u64,
        mode: ViewMode,
        state: &'a SessionState,
        view: ViewPayload,
        delta: &'a StateDelta,
    },
    Error {
        error: &'a str,
        message: String,
    },
}

/// Client → server frames
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    SelectMode { mode: String },
}

/// WebSocket upgrade handler
pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    let mode = match params.mode.as_deref().map(str::parse::<ViewMode>) {
        None => ViewMode::default(),
        Some(Ok(mode)) => mode,
        Some(Err(e)) => return ApiError::bad_request("unknown_mode", e.to_string()).into_response(),
    };

    let session_id = SessionId::new(session_id);
    let (snapshot, subscription) = match state.sessions.subscribe(&session_id).await {
        Ok(subscribed) => subscribed,
        Err(e) => return ApiError::from(e).into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, session_id, snapshot, subscription, mode))
}

/// Drive one subscriber until either side goes away
async fn handle_socket(
    mut socket: WebSocket,
    session_id: SessionId,
    snapshot: Arc<SessionState>,
    mut subscription: Subscription,
    mut mode: ViewMode,
) {
    debug!("WebSocket subscriber attached to session {}", session_id);
    let mut current = snapshot;

    if send_snapshot(&mut socket, &current, mode).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            update = subscription.next() => match update {
                Ok(Some(update)) => {
                    if send_update(&mut socket, &update, mode).await.is_err() {
                        break;
                    }
                    current = update.state;
                }
                Ok(None) => {
                    debug!("Session {} closed, ending subscription", session_id);
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
                Err(overrun) => {
                    warn!("Dropping subscriber of session {}: {}", session_id, overrun);
                    let frame = encode(&ServerMessage::Error {
                        error: "subscriber_overrun",
                        message: format!("{}; reconnect to resynchronize", overrun),
                    });
                    if let Some(frame) = frame {
                        let _ = socket.send(frame).await;
                    }
                    let _ = socket
                        .send(Message::Close(Some(CloseFrame {
                            code: CLOSE_OVERRUN,
                            reason: "subscriber overrun".into(),
                        })))
                        .await;
                    break;
                }
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(ClientMessage::SelectMode { mode: requested }) => {
                            match requested.parse::<ViewMode>() {
                                Ok(selected) => {
                                    mode = selected;
                                    if send_snapshot(&mut socket, &current, mode).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => {
                                    if send_error(&mut socket, "unknown_mode", e.to_string()).await.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            if send_error(&mut socket, "invalid_message", e.to_string()).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!("WebSocket read error on session {}: {}", session_id, e);
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("WebSocket subscriber left session {}", session_id);
}

async fn send_snapshot(
    socket: &mut WebSocket,
    state: &SessionState,
    mode: ViewMode,
) -> Result<(), axum::Error> {
    let message = ServerMessage::Snapshot {
        session_id: &state.session_id,
        sequence: state.last_sequence,
        mode,
        state,
        view: project(state, mode),
    };
    send(socket, &message).await
}

async fn send_update(
    socket: &mut WebSocket,
    update: &StateUpdate,
    mode: ViewMode,
) -> Result<(), axum::Error> {
    let message = ServerMessage::StateUpdate {
        session_id: &update.session_id,
        sequence: update.sequence,
        mode,
        state: &update.state,
        view: project(&update.state, mode),
        delta: &update.delta,
    };
    send(socket, &message).await
}

async fn send_error(
    socket: &mut WebSocket,
    error: &str,
    message: String,
) -> Result<(), axum::Error> {
    send(socket, &ServerMessage::Error { error, message }).await
}

async fn send(socket: &mut WebSocket, message: &ServerMessage<'_>) -> Result<(), axum::Error> {
    match encode(message) {
        Some(frame) => socket.send(frame).await,
        None => Ok(()),
    }
}

fn encode(message: &ServerMessage<'_>) -> Option<Message> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Message::Text(json)),
        Err(e) => {
            warn!("Failed to encode WebSocket message: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_frame_shape() {
        let state = SessionState::new("s1".into());
        let message = ServerMessage::Snapshot {
            session_id: &state.session_id,
            sequence: 0,
            mode: ViewMode::Weather,
            state: &state,
            view: project(&state, ViewMode::Weather),
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&message).unwrap()).unwrap();
        assert_eq!(json["type"], "snapshot");
        assert_eq!(json["mode"], "weather");
        assert_eq!(json["view"]["mode"], "weather");
        assert_eq!(json["state"]["session_id"], "s1");
    }

    #[test]
    fn test_client_select_mode_parses() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"select_mode","mode":"heat_map"}"#).unwrap();
        let ClientMessage::SelectMode { mode } = msg;
        assert_eq!(mode.parse::<ViewMode>().unwrap(), ViewMode::HeatMap);
    }
}
