//! `GET /ws` — duplex pairing channel for desktop pages.
//!
//! Each socket is registered with the [`ConnectionRegistry`] for as long as
//! it is open. Outbound frames are queued on an unbounded mpsc outbox and
//! written by a dedicated send task; inbound text frames are handed to
//! [`ConnectionRegistry::on_message`].

use super::AppState;
use crate::pairing::{ConnectionRegistry, MessageOutcome, ServerMessage};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

pub(super) async fn handle_ws(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let registry = Arc::clone(state.service.registry());
    ws.on_upgrade(move |socket| handle_ws_connection(socket, registry))
}

async fn handle_ws_connection(socket: WebSocket, registry: Arc<ConnectionRegistry>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbox, mut outbox_rx) = tokio::sync::mpsc::unbounded_channel::<ServerMessage>();
    let id = registry.connect(outbox);

    // Forward registry notifications to this socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbox_rx.recv().await {
            if ws_sender
                .send(Message::Text(msg.to_wire().into()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_receiver.next().await {
        match msg {
            Message::Text(text) => {
                if registry.on_message(id, text.as_str()) == MessageOutcome::UnknownConnection {
                    // Pruned after a failed send; the socket is unusable.
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    registry.disconnect(id);
    send_task.abort();
    tracing::debug!(connection = id, "Pairing WebSocket closed");
}
