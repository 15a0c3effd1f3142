use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use parley_core::events::Topic;
use parley_core::ids::{MessageId, SessionId};
use parley_core::settings::ServerSettings;
use parley_core::store::{MessageStore, Paging};

use crate::hub::TopicHub;
use crate::socket;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub heartbeat: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".into(), port: 8090, heartbeat: Duration::from_secs(30) }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            heartbeat: Duration::from_secs(s.heartbeat_secs.max(1)),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<TopicHub>,
    pub messages: Arc<dyn MessageStore>,
    pub heartbeat: Duration,
    pub start_time: Instant,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/{session_id}", get(ws_handler))
        .route("/sessions/{session_id}/messages", get(messages_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve in the background until the handle is shut down.
pub async fn start(
    config: ServerConfig,
    hub: Arc<TopicHub>,
    messages: Arc<dyn MessageStore>,
) -> Result<ServerHandle, std::io::Error> {
    let state = AppState { hub, messages, heartbeat: config.heartbeat, start_time: Instant::now() };
    let router = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, "parley server started");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server stopped with error");
        }
    });

    Ok(ServerHandle { addr: local_addr, shutdown, server })
}

/// Handle returned by `start()`. Keeps the server task alive.
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.server.await {
            tracing::warn!(error = %e, "server task did not exit cleanly");
        }
    }
}

/// WebSocket upgrade handler. The path names the session whose turn events
/// the client follows.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let topic = Topic::for_session(&SessionId::from_raw(session_id));
    ws.on_upgrade(move |socket| socket::handle_ws_connection(socket, state.hub, topic, state.heartbeat))
}

#[derive(Debug, Default, Deserialize)]
struct CatchUpQuery {
    /// Only messages with a greater id are returned.
    after: Option<String>,
}

/// Stored messages of a session, ascending by id. A client joining mid-turn
/// reads the persisted prefix here, then follows the socket.
async fn messages_handler(
    Path(session_id): Path<String>,
    Query(query): Query<CatchUpQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let session_id = SessionId::from_raw(session_id);
    let after = query.after.map(MessageId::from_raw);
    match state.messages.list_session_messages(&session_id, after.as_ref(), Paging::All).await {
        Ok(messages) => (StatusCode::OK, axum::Json(serde_json::json!({ "messages": messages }))),
        Err(e) => {
            tracing::error!(%session_id, error = %e, "failed to list session messages");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(serde_json::json!({ "error": e.to_string() })),
            )
        }
    }
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "topics": state.hub.topic_count(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use parley_core::events::{Notifier, StreamMessage, TurnEvent};
    use parley_core::ids::{SpaceId, UserId};
    use parley_core::messages::{ChatMessage, MessageKind, Progress};
    use parley_store::{Database, MessageRepo};
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn test_config() -> ServerConfig {
        ServerConfig { port: 0, ..Default::default() }
    }

    fn repo() -> Arc<MessageRepo> {
        Arc::new(MessageRepo::new(Database::in_memory().unwrap()))
    }

    fn user_message(seq: i64, text: &str) -> ChatMessage {
        ChatMessage::user_text(
            MessageId::from_raw(format!("msg_{seq:04}")),
            SpaceId::from_raw("space_a"),
            SessionId::from_raw("sess_a"),
            UserId::from_raw("user_a"),
            seq,
            text,
        )
    }

    /// Poll `check` until it holds or the test times out.
    async fn eventually(check: impl Fn() -> bool) {
        tokio::time::timeout(TIMEOUT, async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let hub = Arc::new(TopicHub::new(16));
        let handle = start(test_config(), hub, repo()).await.unwrap();
        assert!(handle.port() > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port());
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["topics"], 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn ws_route_requires_upgrade() {
        let hub = Arc::new(TopicHub::new(16));
        let handle = start(test_config(), hub.clone(), repo()).await.unwrap();

        let url = format!("http://127.0.0.1:{}/ws/sess_a", handle.port());
        let resp = reqwest::get(&url).await.unwrap();
        assert!(resp.status().is_client_error());
        assert_eq!(hub.topic_count(), 0);

        let missing = format!("http://127.0.0.1:{}/nope", handle.port());
        assert_eq!(reqwest::get(&missing).await.unwrap().status(), 404);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn ws_client_follows_session_and_topic_is_released_on_close() {
        let hub = Arc::new(TopicHub::new(16));
        let handle = start(test_config(), hub.clone(), repo()).await.unwrap();
        let topic = Topic::for_session(&SessionId::from_raw("sess_a"));

        let url = format!("ws://127.0.0.1:{}/ws/sess_a", handle.port());
        let (mut ws, _) = connect_async(url).await.unwrap();
        eventually(|| hub.subscriber_count(&topic) == 1).await;

        let event = TurnEvent::AssistantContinue(StreamMessage {
            message_id: MessageId::from_raw("msg_0002"),
            session_id: SessionId::from_raw("sess_a"),
            message: "hel".into(),
            start_at: 0,
            progress: Progress::Generating,
            kind: MessageKind::Text,
        });
        hub.publish(&topic, &event).await.unwrap();

        let received = loop {
            let msg = tokio::time::timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
            if let Message::Text(text) = msg {
                break serde_json::from_str::<serde_json::Value>(&text).unwrap();
            }
        };
        assert_eq!(received["event"], "assistant_continue");
        assert_eq!(received["data"]["message"], "hel");

        ws.close(None).await.unwrap();
        eventually(|| hub.topic_count() == 0).await;

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn messages_route_returns_stored_history_after_anchor() {
        let messages = repo();
        for (seq, text) in [(1, "first"), (2, "second"), (3, "third")] {
            messages.create(&user_message(seq, text)).await.unwrap();
        }
        let handle = start(test_config(), Arc::new(TopicHub::new(4)), messages).await.unwrap();
        let base = format!("http://127.0.0.1:{}/sessions/sess_a/messages", handle.port());

        let body: serde_json::Value = reqwest::get(&base).await.unwrap().json().await.unwrap();
        let all = body["messages"].as_array().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0]["message"], "first");

        let body: serde_json::Value =
            reqwest::get(format!("{base}?after=msg_0002")).await.unwrap().json().await.unwrap();
        let tail = body["messages"].as_array().unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0]["message"], "third");

        let other = format!("http://127.0.0.1:{}/sessions/sess_b/messages", handle.port());
        let body: serde_json::Value = reqwest::get(&other).await.unwrap().json().await.unwrap();
        assert!(body["messages"].as_array().unwrap().is_empty());

        handle.shutdown().await;
    }

    #[test]
    fn config_from_settings() {
        let settings = ServerSettings {
            host: "0.0.0.0".into(),
            port: 9000,
            max_send_queue: 64,
            heartbeat_secs: 0,
        };
        let cfg = ServerConfig::from(&settings);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.heartbeat, Duration::from_secs(1));
    }
}
