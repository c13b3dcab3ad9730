//! WebSocket progress feed with backpressure support.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use genbatch_models::BatchEvent;
use genbatch_queue::ProgressEvent;

use crate::metrics;
use crate::state::AppState;

const ENDPOINT: &str = "batch_events";

/// Global counter for active WebSocket connections.
static ACTIVE_WS_CONNECTIONS: AtomicI64 = AtomicI64::new(0);

const WS_SEND_BUFFER_SIZE: usize = 32;
const WS_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const WS_CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

/// Send a progress event with backpressure handling.
async fn send_event(tx: &mpsc::Sender<Message>, event: &ProgressEvent) -> bool {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            warn!("Failed to serialize progress event: {}", e);
            return true;
        }
    };
    match tx.try_send(Message::Text(json)) {
        Ok(_) => true,
        Err(mpsc::error::TrySendError::Full(msg)) => {
            debug!("WebSocket send buffer full, applying backpressure");
            tx.send(msg).await.is_ok()
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// `GET /api/batch/events`: stream batch events as JSON text frames.
pub async fn ws_batch_events(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let count = ACTIVE_WS_CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
    metrics::set_ws_active_connections(count);
    metrics::record_ws_connection(ENDPOINT);

    ws.on_upgrade(|socket| async move {
        handle_events_socket(socket, state).await;
        let count = ACTIVE_WS_CONNECTIONS.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_ws_active_connections(count);
    })
}

async fn handle_events_socket(socket: WebSocket, state: AppState) {
    let (ws_sender, mut receiver) = socket.split();

    // Subscribe before reading the snapshot so nothing published in between is lost
    let mut events = state.batches.progress_channel().subscribe_stream();

    let (tx, mut rx) = mpsc::channel::<Message>(WS_SEND_BUFFER_SIZE);
    let send_task = tokio::spawn(async move {
        let mut ws_sender = ws_sender;
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
        ws_sender
    });

    info!("Batch event subscriber connected");

    if let Ok(handle) = state.batches.current().await {
        let initial = ProgressEvent {
            batch_id: handle.batch_id().clone(),
            event: BatchEvent::progress(handle.snapshot()),
        };
        if send_event(&tx, &initial).await {
            metrics::record_ws_message_sent(ENDPOINT, initial.event.kind());
        }
    }

    let mut heartbeat = interval(WS_HEARTBEAT_INTERVAL);
    let mut last_activity = Instant::now();
    let mut last_client_activity = Instant::now();

    loop {
        tokio::select! {
            event = events.next() => {
                match event {
                    Some(event) => {
                        last_activity = Instant::now();
                        metrics::record_ws_message_sent(ENDPOINT, event.event.kind());
                        if !send_event(&tx, &event).await {
                            warn!("WebSocket send failed, client disconnected");
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = heartbeat.tick() => {
                if last_client_activity.elapsed() > WS_CLIENT_TIMEOUT {
                    warn!("WebSocket client timed out");
                    break;
                }
                if last_activity.elapsed() > WS_HEARTBEAT_INTERVAL / 2
                    && tx.send(Message::Ping(vec![])).await.is_err()
                {
                    warn!("Heartbeat failed, client disconnected");
                    break;
                }
            }
            client_msg = receiver.next() => {
                match client_msg {
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Client closed connection");
                        break;
                    }
                    Some(Ok(_)) => {
                        last_client_activity = Instant::now();
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket receive error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    drop(tx);
    let _ = send_task.await;
    info!("Batch event subscriber disconnected");
}
