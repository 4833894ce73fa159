/// WebSocket event streaming
///
/// `GET /api/runs/{id}/ws[?from=N]` upgrades to a socket that receives
/// `{"type": "connected"}`, then one JSON event per message in sequence order,
/// and is closed by the server after the run's terminal event. Without `from`
/// only events emitted after connecting are sent. Clients may send
/// `{"type": "ping"}` at any time and get `{"type": "pong"}` back.

use crate::api::{ApiError, AppState};
use crate::runtime::{
    events::{EventStream, SubscribeFrom},
    run::RunId,
};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Replay from this sequence number (0 = full history)
    pub from: Option<u64>,
}

pub async fn stream_run_events(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Result<Response, ApiError> {
    let run_id = RunId::from(id);
    let from = match query.from {
        Some(sequence) => SubscribeFrom::Sequence(sequence),
        None => SubscribeFrom::Now,
    };
    // Subscribe before upgrading so nothing emitted during the handshake is lost
    let events = state.engine.subscribe(&run_id, from).await?;

    Ok(ws.on_upgrade(move |socket| forward_events(socket, run_id, events)))
}

async fn forward_events(socket: WebSocket, run_id: RunId, mut events: EventStream) {
    tracing::info!("🔌 WebSocket subscriber attached to run {}", run_id);
    let (mut tx, mut rx) = socket.split();

    let connected = json!({"type": "connected", "run_id": run_id}).to_string();
    if tx.send(Message::Text(connected.into())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else {
                    let _ = tx.send(Message::Close(None)).await;
                    break;
                };
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::error!("❌ Failed to encode event {} of run {}: {}", event.sequence, run_id, e);
                        continue;
                    }
                };
                if tx.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            incoming = rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let is_ping = serde_json::from_str::<Value>(text.as_str())
                        .map(|frame| frame["type"] == "ping")
                        .unwrap_or(false);
                    if is_ping {
                        let pong = json!({"type": "pong"}).to_string();
                        if tx.send(Message::Text(pong.into())).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!("WebSocket read error on run {}: {}", run_id, e);
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    tracing::info!("🔌 WebSocket subscriber detached from run {}", run_id);
}
