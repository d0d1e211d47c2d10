//! Websocket endpoints.
//!
//! `/devices/{address}/realtime` relays live punches from one terminal for
//! a bounded time. `/ws` streams every [`HubMessage`] to the subscriber
//! until either side goes away.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::api::DeviceTarget;
use crate::hub::{HubMessage, Subscription};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RealtimeQuery {
    /// Subscription lifetime in seconds
    pub timeout: Option<u64>,
}

pub(crate) async fn realtime(
    State(state): State<AppState>,
    target: DeviceTarget,
    Query(query): Query<RealtimeQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let deadline = query
        .timeout
        .map_or(state.realtime_timeout, Duration::from_secs);
    ws.on_upgrade(move |socket| relay_live_events(socket, state, target, deadline))
}

async fn relay_live_events(
    socket: WebSocket,
    state: AppState,
    target: DeviceTarget,
    deadline: Duration,
) {
    let (sink, mut incoming) = socket.split();
    let sink = Arc::new(Mutex::new(sink));
    let cancel = state.shutdown.child_token();

    // The client closing its side ends the capture early
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            while let Some(Ok(message)) = incoming.next().await {
                if matches!(message, Message::Close(_)) {
                    break;
                }
            }
            cancel.cancel();
        })
    };

    info!(
        device = %target.address,
        deadline_secs = deadline.as_secs(),
        "Realtime subscription opened"
    );

    let hub = state.hub.clone();
    let result = state
        .realtime
        .stream(
            &target.address,
            target.credential,
            deadline,
            cancel,
            |event| {
                hub.broadcast(HubMessage::LiveEvent(event.clone()));
                let sink = sink.clone();
                async move {
                    let text = serde_json::to_string(&event).map_err(axum::Error::new)?;
                    sink.lock().await.send(Message::Text(text.into())).await
                }
            },
        )
        .await;

    let mut sink = sink.lock().await;
    match result {
        Ok(summary) => info!(
            device = %target.address,
            received = summary.received,
            delivered = summary.delivered,
            exit = ?summary.exit,
            "Realtime subscription closed"
        ),
        Err(e) => {
            warn!(device = %target.address, error = %e, "Realtime subscription failed");
            let body = json!({ "error": e.to_string() }).to_string();
            if let Err(send_err) = sink.send(Message::Text(body.into())).await {
                warn!(device = %target.address, error = %send_err, "Could not report failure to client");
            }
        }
    }

    // The client may already be gone
    let _ = sink.send(Message::Close(None)).await;
    watcher.abort();
}

pub(crate) async fn subscribe(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| forward_hub(socket, state))
}

async fn forward_hub(socket: WebSocket, state: AppState) {
    let (mut sink, mut incoming) = socket.split();
    let Subscription { id, mut messages } = state.hub.subscribe();
    info!(subscriber = %id, "Websocket subscriber connected");

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            message = messages.recv() => {
                let Some(message) = message else { break };
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        error!(subscriber = %id, error = %e, "Failed to encode hub message");
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            frame = incoming.next() => match frame {
                // Subscribers have nothing to say; anything they send is ignored
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    state.hub.unregister(id);
    info!(subscriber = %id, "Websocket subscriber disconnected");
}
