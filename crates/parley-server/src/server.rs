use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_hub::{spawn_reaper, Hub};

use crate::config::Config;
use crate::rest;
use crate::socket;

/// Build the full router: socket endpoint, health probe, REST mirror.
pub fn build_router(hub: Arc<Hub>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .nest("/api/v1", rest::router())
        .with_state(hub)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve. The returned handle keeps the server and the reaper
/// alive; dropping it stops both.
pub async fn start(config: &Config, hub: Arc<Hub>) -> Result<ServerHandle, std::io::Error> {
    let reaper = spawn_reaper(Arc::clone(&hub), config.reap_interval());

    let router = build_router(hub);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    info!(port = local_addr.port(), "parley server started");

    let server = tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server,
        _reaper: reaper,
    })
}

/// Keeps background tasks alive for the lifetime of the process.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
    _reaper: tokio::task::JoinHandle<()>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    State(hub): State<Arc<Hub>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| socket::handle_socket(socket, hub, remote_addr))
}

async fn health_handler(State(hub): State<Arc<Hub>>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "connections": hub.connections().count(),
        "sessions": hub.sessions().len(),
    }))
}
