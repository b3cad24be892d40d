//! `/chat/stream`, `/chat/stop`, `/events/stream`.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::{Extension, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use pocketpaw_core::bus::queue::SubscriptionId;
use pocketpaw_core::bus::types::{InboundMessage, OutboundMessage, SystemEvent};

use crate::auth::{require_scope, AuthContext};
use crate::error::{ApiResult, PocketPawError};
use crate::state::AppState;
use crate::virtual_channel::VirtualApiChannel;

#[derive(Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: Option<String>,
}

/// Forwards one chat turn's `stream_chunk`/`stream_end` traffic as SSE
/// events, unregistering the virtual channel's forwarder on drop so a
/// client that disconnects mid-turn doesn't leak an entry forever.
struct ChatEventStream {
    rx: mpsc::UnboundedReceiver<OutboundMessage>,
    virtual_channel: Arc<VirtualApiChannel>,
    chat_id: String,
    started: bool,
    done: bool,
}

impl Stream for ChatEventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        if !self.started {
            self.started = true;
            let data = json!({"session_id": self.chat_id}).to_string();
            return Poll::Ready(Some(Ok(Event::default().event("stream_start").data(data))));
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(msg)) if msg.is_stream_end => {
                self.done = true;
                let data = json!({"session_id": self.chat_id}).to_string();
                Poll::Ready(Some(Ok(Event::default().event("stream_end").data(data))))
            }
            Poll::Ready(Some(msg)) => {
                let data = json!({"content": msg.content}).to_string();
                Poll::Ready(Some(Ok(Event::default().event("chunk").data(data))))
            }
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ChatEventStream {
    fn drop(&mut self) {
        let vc = self.virtual_channel.clone();
        let chat_id = self.chat_id.clone();
        tokio::spawn(async move { vc.unregister(&chat_id).await });
    }
}

/// `POST /api/v1/chat/stream` — publish an inbound turn on the virtual
/// `"api"` channel and stream the agent loop's reply back as SSE.
pub async fn stream(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<ChatRequest>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    require_scope(&ctx, "chat")?;

    let chat_id = body
        .session_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let rx = state.virtual_channel.register(&chat_id).await;

    let inbound = InboundMessage::new("api", ctx.actor.clone(), chat_id.clone(), body.message.clone());
    state
        .bus
        .publish_inbound(inbound)
        .await
        .map_err(PocketPawError::from)?;

    let body_stream = ChatEventStream {
        rx,
        virtual_channel: state.virtual_channel.clone(),
        chat_id,
        started: false,
        done: false,
    };

    Ok(Sse::new(body_stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(30)).text("keepalive")))
}

#[derive(Deserialize)]
pub struct StopQuery {
    pub session_id: String,
}

/// `POST /api/v1/chat/stop?session_id=` — interrupt the turn in flight.
/// Trips the agent loop's cancellation token for this session so it stops
/// consuming LLM deltas and discards any in-flight tool output; the loop's
/// own unwind still emits the final `stream_end` through the registered
/// forwarder. If no turn is found in flight (already finished, or never
/// started), drop the forwarder directly so a stale stream still closes.
pub async fn stop(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<StopQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    require_scope(&ctx, "chat")?;
    let session_key = format!("api:{}", query.session_id);
    let cancelled = state.agent_loop.cancel(&session_key);
    if !cancelled {
        state.virtual_channel.unregister(&query.session_id).await;
    }
    Ok(Json(json!({"stopped": query.session_id, "cancelled": cancelled})))
}

struct SystemEventStream {
    rx: mpsc::UnboundedReceiver<SystemEvent>,
    bus: Arc<pocketpaw_core::bus::queue::MessageBus>,
    id: SubscriptionId,
}

impl Stream for SystemEventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(evt)) => {
                let data = serde_json::to_string(&evt).unwrap_or_else(|_| "{}".to_string());
                Poll::Ready(Some(Ok(Event::default().event(evt.event_type.clone()).data(data))))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for SystemEventStream {
    fn drop(&mut self) {
        let bus = self.bus.clone();
        let id = self.id;
        tokio::spawn(async move { bus.unsubscribe_system(id).await });
    }
}

/// `GET /api/v1/events/stream` — every system event (tool use, plan
/// proposals, errors, audit mirrors) as SSE, for a live UI.
pub async fn events_stream(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    require_scope(&ctx, "chat")?;
    let (id, rx) = state.bus.subscribe_system().await;
    let body_stream = SystemEventStream {
        rx,
        bus: state.bus.clone(),
        id,
    };
    Ok(Sse::new(body_stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(30)).text("keepalive")))
}
