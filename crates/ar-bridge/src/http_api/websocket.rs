use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::{extract::State, response::IntoResponse};
use futures_util::{SinkExt, StreamExt};
use tracing::debug;

use super::state::ApiState;

/// Server-initiated keepalive interval.
const PING_INTERVAL: Duration = Duration::from_secs(30);
/// A subscriber silent for this long (no pong, no message) is evicted.
const EVICT_AFTER: Duration = Duration::from_secs(90);

/// GET /api/ws — subscribe to the hub's event stream.
pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ApiState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: Arc<ApiState>) {
    let subscription = state.hub.subscribe();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await; // the first tick fires immediately
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            // Forward frames from the hub to this subscriber.
            frame = subscription.rx.recv_async() => {
                match frame {
                    Ok(json) => {
                        if ws_tx.send(Message::Text(json.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }

            // Keepalive: ping on an interval, evict the unresponsive.
            _ = ping.tick() => {
                if last_seen.elapsed() > EVICT_AFTER {
                    debug!("evicting unresponsive websocket subscriber");
                    break;
                }
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }

            // Any inbound traffic counts as liveness.
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => last_seen = Instant::now(),
                    Some(Err(_)) => break,
                }
            }
        }
    }

    state.hub.unsubscribe(subscription.id);
}
