use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use duel_engine::DEFAULT_BASE_DAMAGE;
use duel_store::Storage;

use crate::connection;
use crate::handlers::HandlerState;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    /// Capacity of each session's outbound queue.
    pub queue_capacity: usize,
    /// Longest a sender waits for room in another player's queue.
    pub send_timeout: Duration,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub handshake_timeout: Duration,
    pub base_damage: i64,
}

/// Pings a client may miss before its session is dropped.
pub const MISSED_PINGS_ALLOWED: u32 = 3;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("ping interval must be greater than zero")]
    ZeroPingInterval,
    #[error("pong timeout ({pong:?}) must exceed the ping interval ({ping:?})")]
    PongTimeoutTooShort { ping: Duration, pong: Duration },
}

impl ServerConfig {
    /// Set the ping interval and derive the pong timeout from it.
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self.pong_timeout = interval * MISSED_PINGS_ALLOWED;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ping_interval.is_zero() {
            return Err(ConfigError::ZeroPingInterval);
        }
        if self.pong_timeout <= self.ping_interval {
            return Err(ConfigError::PongTimeoutTooShort {
                ping: self.ping_interval,
                pong: self.pong_timeout,
            });
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3003,
            queue_capacity: 4,
            send_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(90),
            handshake_timeout: Duration::from_secs(10),
            base_damage: DEFAULT_BASE_DAMAGE,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub handler_state: Arc<HandlerState>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/battle", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve. Returns once the listener is up.
pub async fn start(config: ServerConfig, storage: Arc<dyn Storage>) -> Result<ServerHandle, std::io::Error> {
    config
        .validate()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let addr = format!("0.0.0.0:{}", config.port);
    let handler_state = Arc::new(HandlerState::new(storage, config));
    let router = build_router(AppState {
        handler_state: Arc::clone(&handler_state),
    });

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(port = local_addr.port(), "duel server started");

    let shutdown = CancellationToken::new();
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        state: handler_state,
        shutdown,
        server,
    })
}

/// Handle returned by `start()`. Keeps the server task alive.
pub struct ServerHandle {
    pub port: u16,
    pub state: Arc<HandlerState>,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for the server task to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.server.await {
            tracing::warn!(error = %e, "server task ended abnormally");
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    tracing::debug!("websocket client connected");
    let (sink, stream) = socket.split();
    connection::run_session(sink, stream, state.handler_state).await;
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    sessions: usize,
    queue_size: usize,
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        sessions: state.handler_state.registry.count(),
        queue_size: state.handler_state.queue.size(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use duel_store::SqliteStorage;

    fn storage() -> Arc<dyn Storage> {
        Arc::new(SqliteStorage::in_memory().unwrap())
    }

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 3003);
        assert_eq!(config.queue_capacity, 4);
        assert_eq!(config.send_timeout, Duration::from_secs(5));
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.base_damage, 10);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn pong_timeout_follows_ping_interval() {
        let config = ServerConfig::default().with_ping_interval(Duration::from_secs(120));
        assert_eq!(config.pong_timeout, Duration::from_secs(360));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn validate_rejects_bad_liveness_settings() {
        let zero = ServerConfig::default().with_ping_interval(Duration::ZERO);
        assert_eq!(zero.validate(), Err(ConfigError::ZeroPingInterval));

        let short = ServerConfig {
            ping_interval: Duration::from_secs(120),
            ..Default::default()
        };
        assert!(matches!(
            short.validate(),
            Err(ConfigError::PongTimeoutTooShort { .. })
        ));
    }

    #[tokio::test]
    async fn start_rejects_invalid_config() {
        let config = ServerConfig {
            port: 0,
            ..Default::default()
        }
        .with_ping_interval(Duration::ZERO);
        let err = start(config, storage()).await.err().unwrap();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let config = ServerConfig {
            port: 0, // Random port
            ..Default::default()
        };

        let handle = start(config, storage()).await.unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sessions"], 0);
        assert_eq!(body["queue_size"], 0);

        handle.shutdown().await;
    }

    #[test]
    fn build_router_creates_routes() {
        let state = AppState {
            handler_state: Arc::new(HandlerState::new(storage(), ServerConfig::default())),
        };
        let _router = build_router(state);
    }
}
