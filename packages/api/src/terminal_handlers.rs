// ABOUTME: Terminal WebSocket endpoint and session introspection
// ABOUTME: Text frames carry JSON control messages, binary frames carry raw terminal bytes

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use roost_terminal::SessionEvent;

use crate::auth::CurrentUser;
use crate::{ApiError, AppState};

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientControl {
    Connect { instance_id: String },
    Resize { cols: u16, rows: u16 },
}

/// Number of active terminal sessions across all instances (admin only)
pub async fn active_sessions(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !user.is_admin {
        return Err(ApiError::Forbidden(
            "Session introspection requires admin".to_string(),
        ));
    }
    let active = state.broker.active_session_count().await;
    Ok(Json(serde_json::json!({ "active": active })))
}

/// Upgrade to the terminal channel. The first text frame must be a `connect`
/// control message naming the instance.
pub async fn terminal_ws(
    State(state): State<AppState>,
    user: CurrentUser,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, user, socket))
}

async fn handle_socket(state: AppState, user: CurrentUser, mut socket: WebSocket) {
    let instance_id = match wait_for_connect(&mut socket).await {
        Some(id) => id,
        None => return,
    };

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let session_id = match state
        .broker
        .create_session(&instance_id, &user.id, user.is_admin, events_tx)
        .await
    {
        Ok(id) => id,
        Err(e) => {
            let _ = send_control(
                &mut socket,
                serde_json::json!({ "type": "error", "message": e.to_string() }),
            )
            .await;
            return;
        }
    };

    if send_control(
        &mut socket,
        serde_json::json!({ "type": "ready", "session_id": session_id }),
    )
    .await
    .is_err()
    {
        state.broker.destroy_session(&session_id).await;
        return;
    }

    loop {
        tokio::select! {
            event = events_rx.recv() => match event {
                Some(SessionEvent::Data(data)) => {
                    if socket.send(Message::Binary(data)).await.is_err() {
                        break;
                    }
                }
                Some(SessionEvent::Exit) => {
                    let _ = send_control(
                        &mut socket,
                        serde_json::json!({ "type": "exit" }),
                    )
                    .await;
                    break;
                }
                None => break,
            },
            msg = socket.recv() => match msg {
                Some(Ok(Message::Binary(data))) => {
                    if let Err(e) = state.broker.write_input(&session_id, &data).await {
                        warn!("Terminal input failed for session {}: {}", session_id, e);
                        break;
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientControl>(&text) {
                        Ok(ClientControl::Resize { cols, rows }) => {
                            let _ = state.broker.resize(&session_id, cols, rows).await;
                        }
                        Ok(ClientControl::Connect { .. }) => {
                            debug!("Ignoring duplicate connect on session {}", session_id);
                        }
                        Err(e) => {
                            debug!("Ignoring malformed control message: {}", e);
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // ping/pong are answered by axum
                Some(Err(e)) => {
                    debug!("Terminal socket error on session {}: {}", session_id, e);
                    break;
                }
            },
        }
    }

    state.broker.destroy_session(&session_id).await;
    debug!("Terminal socket closed for session {}", session_id);
}

/// Read frames until the `connect` control message arrives. Anything else
/// first is a protocol violation and ends the channel.
async fn wait_for_connect(socket: &mut WebSocket) -> Option<String> {
    while let Some(msg) = socket.recv().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientControl>(&text) {
                Ok(ClientControl::Connect { instance_id }) => return Some(instance_id),
                _ => {
                    let _ = send_control(
                        socket,
                        serde_json::json!({
                            "type": "error",
                            "message": "Expected a connect message",
                        }),
                    )
                    .await;
                    return None;
                }
            },
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(Message::Binary(_)) => {
                let _ = send_control(
                    socket,
                    serde_json::json!({
                        "type": "error",
                        "message": "Expected a connect message",
                    }),
                )
                .await;
                return None;
            }
        }
    }
    None
}

async fn send_control(
    socket: &mut WebSocket,
    value: serde_json::Value,
) -> Result<(), axum::Error> {
    socket.send(Message::Text(value.to_string().into())).await
}
