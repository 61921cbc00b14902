//! Push sync server: a loopback-only HTTP listener plus an SSE fan-out so a
//! browser-extension peer can pull, push, and subscribe to profile changes.
//!
//! No authentication; the listener binds 127.0.0.1 only.  CORS is permissive
//! because the peer runs in a browser context.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use anyhow::Result;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

use prosync_profiles::{ChangeOrigin, ProfileStore, ProfilesConfig, config_from_value};

pub const DEFAULT_PORT: u16 = 8765;

/// Fan-out capacity.  A subscriber that lags past this loses old events with
/// a warning rather than stalling the rest.
const EVENT_CAP: usize = 64;

/// Frames pushed over the `/sync` stream as `data: <json>` lines.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    /// Sent once immediately after a subscriber connects.
    Connected { timestamp: DateTime<Utc> },
    ProfilesUpdated {
        profiles: ProfilesConfig,
        source: &'static str,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Clone)]
struct ServerState {
    store: Arc<ProfileStore>,
    events: broadcast::Sender<PushEvent>,
}

pub struct PushSyncServer {
    store: Arc<ProfileStore>,
    port: u16,
    events: broadcast::Sender<PushEvent>,
    shutdown: StdMutex<Option<watch::Sender<bool>>>,
}

impl PushSyncServer {
    pub fn new(store: Arc<ProfileStore>, port: u16) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAP);
        Self {
            store,
            port,
            events,
            shutdown: StdMutex::new(None),
        }
    }

    /// Direct subscription to the push feed (the SSE handler and tests use
    /// the same channel).
    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.events.subscribe()
    }

    /// Bind the loopback listener and serve.  Idempotent: a second call on a
    /// running server is a no-op returning `true`.  A bind failure (port
    /// already taken) is reported once and degrades to "network sync
    /// disabled": it returns `Ok(false)` instead of failing the host.
    pub async fn start(&self) -> Result<bool> {
        if let Ok(guard) = self.shutdown.lock() {
            if guard.is_some() {
                debug!("push sync server already running");
                return Ok(true);
            }
        }

        let addr = SocketAddr::from(([127, 0, 0, 1], self.port));
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(err) => {
                warn!(%addr, %err, "push sync port unavailable; network sync disabled");
                return Ok(false);
            }
        };

        let state = ServerState {
            store: self.store.clone(),
            events: self.events.clone(),
        };
        let app = build_router(state);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });
        tokio::spawn(async move {
            if let Err(err) = server.await {
                error!(?err, "push sync server exited with error");
            }
        });

        spawn_store_listener(
            self.store.clone(),
            self.events.clone(),
            shutdown_tx.subscribe(),
        );
        if let Ok(mut guard) = self.shutdown.lock() {
            *guard = Some(shutdown_tx);
        }
        info!(port = self.port, "push sync server listening on loopback");
        Ok(true)
    }

    /// Graceful shutdown: stop accepting, let open SSE streams close, release
    /// the port.  Safe to call repeatedly or before `start`.
    pub fn stop(&self) {
        if let Ok(mut guard) = self.shutdown.lock() {
            if let Some(tx) = guard.take() {
                let _ = tx.send(true);
                info!("push sync server stopping");
            }
        }
    }

    /// Write `event` to every open subscriber.  Delivery is per-receiver: a
    /// slow or vanished subscriber only affects itself (it sees a lag error
    /// or is dropped), never the rest of the fan-out.
    pub fn broadcast(&self, event: PushEvent) {
        send_push(&self.events, event);
    }

    /// Proactively push the current collection, tagged as a local change,
    /// used when local edits should reach subscribers without waiting for a
    /// poll.
    pub async fn notify_changed(&self) -> Result<()> {
        let profiles = self.store.get_all().await?;
        self.broadcast(PushEvent::ProfilesUpdated {
            profiles,
            source: "local",
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

fn send_push(events: &broadcast::Sender<PushEvent>, event: PushEvent) {
    match events.send(event) {
        Ok(subscribers) => debug!(subscribers, "push event delivered"),
        Err(_) => debug!("no push subscribers connected"),
    }
}

/// Forward store change events into the push feed.  Network-originated saves
/// are skipped since the POST handler already broadcast those.
fn spawn_store_listener(
    store: Arc<ProfileStore>,
    events: broadcast::Sender<PushEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut rx = store.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Ok(changed) => {
                            if changed.origin == ChangeOrigin::Network {
                                continue;
                            }
                            send_push(&events, PushEvent::ProfilesUpdated {
                                profiles: changed.config,
                                source: changed.origin.as_str(),
                                timestamp: Utc::now(),
                            });
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(n, "push store listener lagged; events dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("push store listener stopped");
    });
}

fn build_router(state: ServerState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/profiles", get(get_profiles).post(post_profiles))
        .route("/sync", get(sync_stream))
        .layer(cors)
        .with_state(state)
}

// ── handlers ─────────────────────────────────────────────────────────────────

struct ApiError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

fn bad_request(err: impl std::fmt::Display) -> ApiError {
    warn!(%err, "rejecting push sync payload");
    ApiError {
        status: StatusCode::BAD_REQUEST,
        message: err.to_string(),
    }
}

fn internal(err: impl std::fmt::Display) -> ApiError {
    error!(%err, "push sync request failed");
    ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: err.to_string(),
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "prosync",
    }))
}

async fn get_profiles(State(state): State<ServerState>) -> Result<Json<ProfilesConfig>, ApiError> {
    let config = state.store.get_all().await.map_err(internal)?;
    Ok(Json(config))
}

async fn post_profiles(
    State(state): State<ServerState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let config = config_from_value(body).map_err(bad_request)?;
    let accepted = config.list.len();

    state
        .store
        .save(config.clone(), ChangeOrigin::Network)
        .await
        .map_err(internal)?;

    let _ = state.events.send(PushEvent::ProfilesUpdated {
        profiles: config,
        source: "network",
        timestamp: Utc::now(),
    });

    Ok(Json(json!({ "status": "ok", "profiles": accepted })))
}

async fn sync_stream(
    State(state): State<ServerState>,
) -> Sse<impl tokio_stream::Stream<Item = std::result::Result<SseEvent, Infallible>>> {
    let rx = state.events.subscribe();

    let hello = tokio_stream::once(Ok(sse_frame(&PushEvent::Connected {
        timestamp: Utc::now(),
    })));
    let updates = BroadcastStream::new(rx).filter_map(|item| match item {
        Ok(event) => Some(Ok(sse_frame(&event))),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(skipped, "push subscriber lagged; events dropped");
            None
        }
    });

    Sse::new(hello.chain(updates)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(10))
            .text("keep-alive"),
    )
}

fn sse_frame(event: &PushEvent) -> SseEvent {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    SseEvent::default().data(data)
}
