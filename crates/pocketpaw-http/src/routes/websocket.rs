//! `GET /api/v1/ws/chat` — duplex chat over a raw WebSocket.
//!
//! Each upgraded connection gets a generated id, registers with
//! [`crate::websocket_channel::WebSocketChannel`] under that id, and runs
//! two concurrent halves until either the socket closes or the bus side
//! ends: inbound text frames are parsed as `{"message": "..."}` and
//! published with `channel: "websocket"`, `chat_id: <conn_id>`; outbound
//! chunks/stream-end markers from the dispatcher are serialized back as
//! `{"type": "chunk"|"stream_end", "content": "..."}` frames.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Extension, State};
use axum::response::Response;
use serde_json::json;
use tracing::debug;

use pocketpaw_core::bus::types::InboundMessage;

use crate::auth::AuthContext;
use crate::state::AppState;

#[derive(serde::Deserialize)]
struct ClientFrame {
    message: String,
}

/// `GET /api/v1/ws/chat` upgrade entry point.
pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, ctx))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, ctx: AuthContext) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let mut rx = state.websocket_channel.register(&conn_id).await;

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let content = match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(frame) => frame.message,
                            Err(_) => text.to_string(),
                        };
                        if content.is_empty() {
                            continue;
                        }
                        let inbound = InboundMessage::new(
                            "websocket",
                            ctx.actor.clone(),
                            conn_id.clone(),
                            content,
                        );
                        if let Err(e) = state.bus.publish_inbound(inbound).await {
                            debug!(error = %e, "websocket: failed to publish inbound message");
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong/binary: ignored
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket: read error");
                        break;
                    }
                }
            }
            outgoing = rx.recv() => {
                match outgoing {
                    Some(msg) if msg.is_stream_end => {
                        let frame = json!({"type": "stream_end"}).to_string();
                        if socket.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(msg) => {
                        let frame = json!({"type": "chunk", "content": msg.content}).to_string();
                        if socket.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    state.websocket_channel.unregister(&conn_id).await;
}
