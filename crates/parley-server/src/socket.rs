use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use parley_core::ids::ConnectionId;
use parley_core::protocol::ServerEvent;
use parley_hub::Hub;

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Drive one WebSocket through the hub. Admission happens before any state
/// is created; `hub.disconnect` fires exactly once when either side closes.
pub async fn handle_socket(socket: WebSocket, hub: Arc<Hub>, remote_addr: SocketAddr) {
    let (connection_id, rx) = match hub.connect(remote_addr.ip()) {
        Ok(pair) => pair,
        Err(e) => {
            tracing::info!(%remote_addr, error = %e, "connection refused");
            let mut socket = socket;
            if let Ok(frame) = serde_json::to_string(&ServerEvent::error(e.to_string())) {
                let _ = socket.send(WsMessage::Text(frame.into())).await;
            }
            let _ = socket.close().await;
            return;
        }
    };

    run_loops(socket, &hub, &connection_id, rx).await;
    hub.disconnect(&connection_id);
}

async fn run_loops(
    socket: WebSocket,
    hub: &Arc<Hub>,
    connection_id: &ConnectionId,
    mut rx: mpsc::Receiver<String>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer: drain the hub's outbound queue, ping periodically.
    let writer_cid = connection_id.clone();
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(PING_INTERVAL);
        ping_interval.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    match frame {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(connection_id = %writer_cid, "ping sent");
                }
            }
        }
    });

    // Reader: forward frames into the hub, count pongs as activity.
    let reader_cid = connection_id.clone();
    let reader_hub = Arc::clone(hub);
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    reader_hub.handle(&reader_cid, &text);
                }
                WsMessage::Pong(_) => {
                    reader_hub.connections().touch(&reader_cid);
                }
                WsMessage::Close(_) => break,
                // axum answers pings itself
                WsMessage::Ping(_) => {}
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {}
        _ = reader => {}
    }
}
