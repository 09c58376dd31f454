//! HTTP and websocket handlers for the livedoc server.
//!
//! A watch session is one websocket per route: the client names the route
//! when upgrading, receives a `Connected` frame, then an `Update` frame for
//! every change to that document.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::watcher::{self, ContentStore, ContentWatcher};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures_util::StreamExt;
use livedoc_core::{Hub, Message, Route};
use livedoc_protocol::Frame;
use livedoc_transport::{read_until_closed, WebSocketTransport};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Longest a `/stats` request waits for the hub to answer.
const STATS_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared server state.
pub struct AppState {
    /// Handle to the update hub.
    pub hub: Hub,
    /// Server configuration.
    pub config: Config,
}

/// Query string naming the route a request is about.
#[derive(Debug, Deserialize)]
pub struct RouteQuery {
    /// The document route, e.g. `/docs/a`.
    pub route: String,
}

impl RouteQuery {
    fn parse(&self) -> Result<Route, Response> {
        Route::parse(&self.route).map_err(|reason| {
            debug!(route = %self.route, reason, "Rejected route");
            (StatusCode::BAD_REQUEST, reason).into_response()
        })
    }
}

/// Run the HTTP/websocket server.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the server fails to
/// start.
pub async fn run_server(config: Config) -> Result<()> {
    let store = ContentStore::new(&config.content.root, config.content.max_document_size);
    let (watcher, changes) = ContentWatcher::new(store.clone(), config.content.poll_interval());
    let hub = Hub::spawn(Arc::new(watcher), config.hub_config())
        .context("Invalid hub configuration")?;

    tokio::spawn(watcher::forward_changes(
        store,
        changes,
        hub.clone(),
        config.transport.encoding,
    ));
    info!("Watching content under {}", config.content.root.display());

    // Start metrics server if enabled
    if config.metrics.enabled {
        match metrics::start_metrics_server(config.metrics.port) {
            Ok(()) => {
                tokio::spawn(metrics::sample_hub_stats(
                    hub.clone(),
                    config.metrics.sample_interval(),
                ));
            }
            Err(e) => error!("Failed to start metrics server: {:#}", e),
        }
    }

    let addr = config.bind_addr()?;
    let websocket_path = config.transport.websocket_path.clone();
    let app = router(Arc::new(AppState { hub, config }));

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("livedoc server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, websocket_path);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/publish", post(publish_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Hub statistics handler.
///
/// Queries are the hub's lowest priority, so a busy hub answers 503 rather
/// than holding the request open.
async fn stats_handler(State(state): State<Arc<AppState>>) -> Response {
    match tokio::time::timeout(STATS_TIMEOUT, state.hub.stats()).await {
        Ok(Ok(stats)) => Json(stats).into_response(),
        Ok(Err(e)) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
        Err(_) => {
            warn!("Hub stats query timed out");
            (StatusCode::SERVICE_UNAVAILABLE, "hub busy").into_response()
        }
    }
}

/// Push a rendered document to everyone watching its route.
///
/// Never waits on the hub: a full broadcast queue answers 503.
async fn publish_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RouteQuery>,
    body: Bytes,
) -> Response {
    let route = match query.parse() {
        Ok(route) => route,
        Err(response) => return response,
    };

    if body.len() > state.config.transport.max_publish_size {
        return StatusCode::PAYLOAD_TOO_LARGE.into_response();
    }

    if !state.config.transport.encoding.can_carry(&body) {
        debug!(route = %route, "Rejected body the session encoding cannot carry");
        return (StatusCode::BAD_REQUEST, "body must be UTF-8 text").into_response();
    }

    let size = body.len();
    if !state.hub.try_broadcast(Message::new(route.clone(), body)) {
        metrics::record_error("publish");
        warn!(route = %route, "Publish dropped");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    metrics::record_publish(size);
    debug!(route = %route, bytes = size, "Published");
    StatusCode::ACCEPTED.into_response()
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<RouteQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match query.parse() {
        Ok(route) => ws.on_upgrade(move |socket| handle_websocket(socket, route, state)),
        Err(response) => response,
    }
}

/// Run one watch session.
async fn handle_websocket(socket: WebSocket, route: Route, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (connection, outbox) = match state.hub.connect(route.clone()) {
        Ok(pair) => pair,
        Err(e) => {
            error!(route = %route, error = %e, "Failed to create connection");
            return;
        }
    };
    let handle = connection.handle();
    debug!(connection = %handle.id(), route = %route, "WebSocket connected");

    let (sink, stream) = socket.split();
    let mut transport = WebSocketTransport::new(sink, state.config.transport.encoding);

    // Registered before the client learns it is connected, so anything the
    // client triggers afterwards is delivered.
    state.hub.subscribe(connection).await;

    let connected = Frame::connected(handle.id().to_string(), route.as_str());
    if let Err(e) = transport.send_frame(&connected).await {
        warn!(connection = %handle.id(), error = %e, "Failed to send Connected frame");
        metrics::record_error("websocket");
        state.hub.unsubscribe(&handle).await;
        return;
    }

    let mut drain = tokio::spawn(outbox.drain(transport));

    let reason = tokio::select! {
        result = read_until_closed(stream) => {
            if result.is_err() {
                metrics::record_error("websocket");
            }
            state.hub.unsubscribe(&handle).await;
            (&mut drain).await
        }
        reason = &mut drain => {
            // Evicted or the socket failed while writing.
            state.hub.unsubscribe(&handle).await;
            reason
        }
    };

    match reason {
        Ok(reason) => {
            metrics::record_close(reason);
            debug!(connection = %handle.id(), reason = %reason, "WebSocket disconnected");
        }
        Err(e) => error!(connection = %handle.id(), error = %e, "Drain task failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use livedoc_core::HubConfig;
    use livedoc_protocol::codec::decode_json;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::{self, Message as WsMessage};

    fn state_with(config: Config) -> Arc<AppState> {
        let store = ContentStore::new(&config.content.root, config.content.max_document_size);
        let (watcher, _changes) = ContentWatcher::new(store, config.content.poll_interval());
        let hub = Hub::spawn(Arc::new(watcher), config.hub_config()).unwrap();
        Arc::new(AppState { hub, config })
    }

    async fn serve(state: Arc<AppState>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        addr
    }

    async fn next_frame<S>(socket: &mut S) -> Frame
    where
        S: futures_util::Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
    {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        match message {
            WsMessage::Text(text) => decode_json(&text).unwrap(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    async fn publish(state: &Arc<AppState>, route: &str, body: &'static str) -> StatusCode {
        publish_handler(
            State(state.clone()),
            Query(RouteQuery {
                route: route.to_string(),
            }),
            Bytes::from_static(body.as_bytes()),
        )
        .await
        .status()
    }

    #[tokio::test]
    async fn test_watch_session_receives_updates() {
        let state = state_with(Config::default());
        let addr = serve(state.clone()).await;

        let (mut socket, _) =
            tokio_tungstenite::connect_async(format!("ws://{}/ws?route=/docs/a", addr))
                .await
                .unwrap();

        match next_frame(&mut socket).await {
            Frame::Connected { route, .. } => assert_eq!(route, "/docs/a"),
            other => panic!("expected Connected, got {:?}", other),
        }

        assert_eq!(publish(&state, "/docs/b", "<p>other</p>").await, StatusCode::ACCEPTED);
        assert_eq!(publish(&state, "/docs/a", "<p>v1</p>").await, StatusCode::ACCEPTED);
        assert_eq!(publish(&state, "/docs/a", "<p>v2</p>").await, StatusCode::ACCEPTED);

        assert_eq!(next_frame(&mut socket).await, Frame::update("/docs/a", "<p>v1</p>"));
        assert_eq!(next_frame(&mut socket).await, Frame::update("/docs/a", "<p>v2</p>"));
    }

    #[tokio::test]
    async fn test_client_close_unsubscribes() {
        let state = state_with(Config::default());
        let addr = serve(state.clone()).await;

        let (mut socket, _) =
            tokio_tungstenite::connect_async(format!("ws://{}/ws?route=/docs/a", addr))
                .await
                .unwrap();
        next_frame(&mut socket).await;
        assert_eq!(state.hub.stats().await.unwrap().connections, 1);

        socket.close(None).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while state.hub.stats().await.unwrap().connections != 0 {
            assert!(tokio::time::Instant::now() < deadline, "connection never removed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_invalid_route_rejected() {
        let state = state_with(Config::default());
        let addr = serve(state.clone()).await;

        match tokio_tungstenite::connect_async(format!("ws://{}/ws?route=docs/a", addr)).await {
            Err(tungstenite::Error::Http(response)) => {
                assert_eq!(response.status().as_u16(), 400);
            }
            other => panic!("expected HTTP 400, got {:?}", other.map(|(_, r)| r)),
        }

        assert_eq!(publish(&state, "/docs/../etc", "x").await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_binary_publish_rejected_for_json_sessions() {
        let state = state_with(Config::default());
        let addr = serve(state.clone()).await;

        let (mut socket, _) =
            tokio_tungstenite::connect_async(format!("ws://{}/ws?route=/docs/a", addr))
                .await
                .unwrap();
        next_frame(&mut socket).await;

        let status = publish_handler(
            State(state.clone()),
            Query(RouteQuery {
                route: "/docs/a".to_string(),
            }),
            Bytes::from_static(&[0xff, 0xfe]),
        )
        .await
        .status();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert_eq!(publish(&state, "/docs/a", "<p>ok</p>").await, StatusCode::ACCEPTED);
        assert_eq!(next_frame(&mut socket).await, Frame::update("/docs/a", "<p>ok</p>"));
        assert_eq!(state.hub.stats().await.unwrap().connections, 1);
    }

    #[tokio::test]
    async fn test_binary_publish_accepted_for_messagepack() {
        let mut config = Config::default();
        config.transport.encoding = livedoc_protocol::Encoding::MessagePack;
        let state = state_with(config);

        let status = publish_handler(
            State(state.clone()),
            Query(RouteQuery {
                route: "/docs/a".to_string(),
            }),
            Bytes::from_static(&[0xff, 0xfe]),
        )
        .await
        .status();
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_times_out_when_hub_does_not_answer() {
        // The runner exists but is never driven, so the query is never answered.
        let (hub, _runner) = Hub::new(
            Arc::new(livedoc_core::NoopWatcher),
            HubConfig::default(),
        )
        .unwrap();
        let state = Arc::new(AppState {
            hub,
            config: Config::default(),
        });

        let response = stats_handler(State(state)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_publish_limits() {
        let mut config = Config::default();
        config.transport.max_publish_size = 4;
        let state = state_with(config);

        assert_eq!(publish(&state, "/docs/a", "too long").await, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(publish(&state, "/docs/a", "ok").await, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_publish_when_hub_stopped() {
        let (hub, runner) = Hub::new(
            Arc::new(livedoc_core::NoopWatcher),
            HubConfig::default(),
        )
        .unwrap();
        drop(runner);
        let state = Arc::new(AppState {
            hub,
            config: Config::default(),
        });

        assert_eq!(publish(&state, "/docs/a", "v1").await, StatusCode::SERVICE_UNAVAILABLE);
        let response = stats_handler(State(state)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_stats_and_health() {
        let state = state_with(Config::default());
        assert_eq!(publish(&state, "/docs/a", "v1").await, StatusCode::ACCEPTED);

        let response = stats_handler(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let stats: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(stats["broadcasts"], 1);
        assert_eq!(stats["connections"], 0);

        let health = health_handler().await.into_response();
        assert_eq!(health.status(), StatusCode::OK);
    }
}
