//! WebSocket handler for live readings.
//!
//! Each message is one mapped reading:
//!
//! ```json
//! {"kind":"co","value":3.5,"unit":"ppm","quality":"good","timestamp":"2024-06-01T12:00:00Z"}
//! ```

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use airstation_core::{HistoryStore, QualityLevel, Reading, SensorKind};

use crate::state::AppState;

/// Create the WebSocket router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/ws", get(ws_handler))
}

/// A live reading as sent to clients.
#[derive(Debug, Clone, Serialize)]
pub struct LiveMessage {
    pub kind: SensorKind,
    pub value: f64,
    pub unit: &'static str,
    pub quality: QualityLevel,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl From<&Reading> for LiveMessage {
    fn from(reading: &Reading) -> Self {
        Self {
            kind: reading.kind,
            value: reading.value,
            unit: reading.unit(),
            quality: QualityLevel::of(reading),
            timestamp: reading.timestamp,
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Latest stored reading of every known kind, oldest first.
async fn snapshot(state: &AppState) -> Vec<Reading> {
    let mut latest = Vec::new();
    for kind in SensorKind::ALL {
        if kind == SensorKind::Unknown {
            continue;
        }
        match state.history.latest(kind).await {
            Ok(Some(row)) => latest.push(row.reading),
            Ok(None) => {}
            Err(e) => warn!("Failed to load latest {} for WebSocket snapshot: {}", kind, e),
        }
    }
    latest.sort_by_key(|reading| reading.timestamp);
    latest
}

fn encode(reading: &Reading) -> Option<Message> {
    match serde_json::to_string(&LiveMessage::from(reading)) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            warn!("Failed to serialize reading: {}", e);
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the snapshot so nothing published meanwhile is lost.
    let mut rx = state.readings_tx.subscribe();

    info!("WebSocket client connected");

    for reading in snapshot(&state).await {
        if let Some(message) = encode(&reading)
            && sender.send(message).await.is_err()
        {
            info!("WebSocket client disconnected during initial snapshot");
            return;
        }
    }
    debug!("Sent initial snapshot to WebSocket client");

    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(reading) => {
                    let Some(message) = encode(&reading) else {
                        continue;
                    };
                    if sender.send(message).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("WebSocket client lagged by {} readings", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        },
        _ = &mut recv_task => {
            send_task.abort();
        },
    }

    info!("WebSocket client disconnected");
}
