use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use ar_bridge::event_bus::Hub;
use ar_bridge::http_api::{api_router, ApiState};
use ar_bridge::protocol::HubFrame;
use ar_core::store::Store;
use ar_core::types::Issue;
use ar_core::usage_limit::UsageLimiter;
use ar_core::wake::WakeSignal;

async fn spawn_api() -> (std::net::SocketAddr, Arc<ApiState>) {
    let store = Arc::new(Store::open_in_memory().await.expect("open store"));
    let state = Arc::new(ApiState::new(
        store,
        Hub::new(),
        WakeSignal::new(),
        UsageLimiter::new(),
    ));
    let router = api_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    (addr, state)
}

async fn wait_for_clients(state: &ApiState, expected: usize) {
    for _ in 0..100 {
        if state.hub.client_count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "hub never reached {expected} clients (now {})",
        state.hub.client_count()
    );
}

#[tokio::test]
async fn websocket_subscribers_receive_broadcast_frames() {
    let (addr, state) = spawn_api().await;

    let (mut socket, _response) = connect_async(format!("ws://{addr}/api/ws"))
        .await
        .expect("websocket upgrade");
    wait_for_clients(&state, 1).await;

    let issue = Issue::new(Uuid::new_v4(), "ext-1", "RLP-1", "Add login");
    state.hub.broadcast(&HubFrame::new_issue(&issue));

    let frame = loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("frame before timeout")
            .expect("stream open")
            .expect("frame");
        match message {
            Message::Text(text) => break serde_json::from_str::<serde_json::Value>(&text).unwrap(),
            // Keepalive traffic is not a payload frame.
            _ => continue,
        }
    };
    assert_eq!(frame["type"], "new_issue");
    assert_eq!(frame["payload"]["identifier"], "RLP-1");
    assert!(frame["timestamp"].is_string());

    drop(socket);
    // A dead subscriber is dropped from the hub on a later broadcast.
    for _ in 0..100 {
        state.hub.broadcast(&HubFrame::new_issue(&issue));
        if state.hub.client_count() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("closed subscriber was never evicted");
}
