//! WebSocket session transport.
//!
//! One text frame per envelope in both directions. The connection task owns
//! the socket: it drains the session's outbound queue and feeds inbound
//! frames to the session's [`SessionInbound`].

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use tracing::{debug, error, info, warn};
use voxrelay_core::envelope::Envelope;

use super::AppState;
use super::dispatch::SessionInbound;
use crate::registry::Registration;

/// `GET /ws`
pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let max_frame_bytes = state.max_frame_bytes;
    ws.max_message_size(max_frame_bytes)
        .on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, mut socket: WebSocket) {
    let registry = state.broker.registry().clone();
    let Registration {
        session_id,
        mut outbound_rx,
    } = registry.register().await;

    let mut inbound = match SessionInbound::new(session_id, &state.engine) {
        Ok(inbound) => inbound,
        Err(e) => {
            error!(session_id = %session_id, error = %e, "Cannot set up session");
            registry.unregister(session_id).await;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    match Envelope::welcome(session_id.to_string()).to_frame() {
        Ok(welcome) => {
            if socket.send(Message::Text(welcome.into())).await.is_err() {
                registry.unregister(session_id).await;
                return;
            }
        }
        Err(e) => warn!(session_id = %session_id, error = %e, "Failed to encode welcome"),
    }

    loop {
        tokio::select! {
            maybe_outbound = outbound_rx.recv() => {
                let Some(frame) = maybe_outbound else {
                    // Unregistered elsewhere (liveness sweep or failed delivery).
                    debug!(session_id = %session_id, "Outbound queue closed");
                    break;
                };
                if socket.send(Message::Text(frame.to_string().into())).await.is_err() {
                    break;
                }
            }
            maybe_message = socket.recv() => {
                let message = match maybe_message {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        debug!(session_id = %session_id, error = %e, "Socket error");
                        break;
                    }
                    None => break,
                };
                registry.touch(session_id).await;
                match message {
                    Message::Text(text) => {
                        if let Err(e) = inbound.handle_frame(&state.broker, text.as_str()).await {
                            warn!(session_id = %session_id, error = %e, "Dropping invalid frame");
                        }
                    }
                    Message::Binary(_) => {
                        warn!(session_id = %session_id, "Dropping binary frame");
                    }
                    Message::Ping(_) | Message::Pong(_) => {}
                    Message::Close(_) => break,
                }
            }
        }
    }

    registry.unregister(session_id).await;
    inbound.close(&state.broker).await;
    let _ = socket.send(Message::Close(None)).await;
    info!(session_id = %session_id, "Session closed");
}
