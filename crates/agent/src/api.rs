//! HTTP and WebSocket surface
//!
//! Health checks, Prometheus metrics, the `/monitor` payload other agents poll,
//! the `/logs` tail, the self-heal policy endpoints and the `/ws`
//! monitoring session.

use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use chrono::Utc;
use futures_util::stream::{self, Stream};
use futures_util::{SinkExt, StreamExt};
use healwatch_lib::{
    anomaly::AnomalyDetector,
    collector::{Collector, CollectorProvider, MonitorPayload, Throughput, ThroughputTracker},
    healing::SelfHealingController,
    health::{ComponentStatus, HealthRegistry},
    observability::{MonitorMetrics, StructuredLogger},
    session::{ChannelPublisher, Session, SessionConfig, SessionInfo, SessionLoop, SessionRegistry},
    PolicyUpdate,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};

use crate::logs::{LogRing, REPLAY_LINES};

/// Control frames buffered per session
const CONTROL_BUFFER: usize = 16;

/// Minimum gap between two `monitor_served` log lines
const MONITOR_LOG_INTERVAL: Duration = Duration::from_millis(1500);

/// Throttled throughput logging for `/monitor`
#[derive(Debug, Default)]
pub struct MonitorLog {
    tracker: ThroughputTracker,
    last_logged: Option<Instant>,
}

impl MonitorLog {
    /// Returns whether to log now, and the rates since the previous logged reading
    fn observe(&mut self, payload: &MonitorPayload, now: Instant) -> Option<Option<Throughput>> {
        if let Some(last) = self.last_logged {
            if now.saturating_duration_since(last) < MONITOR_LOG_INTERVAL {
                return None;
            }
        }
        self.last_logged = Some(now);

        let rates = match (payload.io_read_bytes, payload.io_write_bytes) {
            (Some(read), Some(written)) => self.tracker.observe(read, written, now),
            _ => None,
        };
        Some(rates)
    }
}

/// Shared application state
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: MonitorMetrics,
    pub logger: StructuredLogger,
    pub controller: Arc<SelfHealingController>,
    pub provider: Arc<dyn CollectorProvider>,
    pub sessions: Arc<SessionRegistry>,
    pub session_config: SessionConfig,
    pub restart_target: String,
    pub shutdown: broadcast::Sender<()>,
    pub logs: LogRing,
    /// Dedicated local collector so `/monitor` keeps its own I/O baseline
    pub monitor_collector: Arc<dyn Collector>,
    pub monitor_log: Mutex<MonitorLog>,
}

impl AppState {
    /// Push controller and session state into the health registry and gauges
    async fn refresh(&self) {
        let snapshot = self.controller.snapshot();
        self.metrics.set_policy_state(&snapshot);
        self.health_registry.observe_policy(&snapshot).await;
        self.health_registry.observe_sessions(self.sessions.len()).await;
    }
}

/// Returns 200 while operational, 503 if any component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.refresh().await;
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    state.metrics.set_policy_state(&state.controller.snapshot());

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Liveness ping with the server clock
async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true, "ts": Utc::now().timestamp_millis() }))
}

/// Fresh local sample in the payload shape remote collectors expect
async fn monitor(State(state): State<Arc<AppState>>) -> Response {
    let sample = match state.monitor_collector.sample().await {
        Ok(sample) => sample,
        Err(e) => {
            warn!(error = %e, "Local sample for /monitor failed");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    let counters = state.monitor_collector.counters().await;
    let payload =
        MonitorPayload::from_sample(&sample, state.logger.node_name()).with_counters(counters);

    let to_log = state
        .monitor_log
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .observe(&payload, Instant::now());
    if let Some(throughput) = to_log {
        state.logger.log_monitor_served(&payload, throughput);
    }

    Json(payload).into_response()
}

/// Server-sent tail of the agent log: a greeting, the recent backlog, then new lines
async fn logs(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (backlog, rx) = state.logs.follow(REPLAY_LINES);

    let replay = stream::iter(std::iter::once("[logs] connected".to_string()).chain(backlog))
        .map(|line| Ok::<_, Infallible>(Event::default().data(line)));

    let live = stream::unfold(rx, |mut rx| async move {
        match rx.recv().await {
            Ok(line) => Some((Ok::<_, Infallible>(Event::default().data(line)), rx)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => Some((
                Ok(Event::default().comment(format!("skipped {} lines", skipped))),
                rx,
            )),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    });

    Sse::new(replay.chain(live)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

async fn get_self_heal(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.controller.snapshot())
}

async fn set_self_heal(
    State(state): State<Arc<AppState>>,
    Json(update): Json<PolicyUpdate>,
) -> Response {
    match state.controller.set_config(update) {
        Ok(_) => {
            let snapshot = state.controller.snapshot();
            state.logger.log_policy_change(&snapshot);
            state.metrics.set_policy_state(&snapshot);
            Json(snapshot).into_response()
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn list_sessions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.sessions.list())
}

async fn ws_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Run one monitoring session for the lifetime of the socket
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let (publisher, mut outbound_rx) = ChannelPublisher::channel(state.session_config.buffer_size);
    let session = Session::new(
        Arc::clone(&state.controller),
        Arc::clone(&state.provider),
        Arc::new(publisher),
        state.logger.clone(),
    )
    .with_detector(AnomalyDetector::new().with_restart_target(state.restart_target.clone()))
    .with_fallback_threshold(state.session_config.fallback_threshold)
    .with_registry(Arc::clone(&state.sessions));

    let session_id = session.id().to_string();
    state.sessions.register(SessionInfo::new(session_id.clone(), None));

    let (control_tx, control_rx) = mpsc::channel::<String>(CONTROL_BUFFER);
    let session_loop = SessionLoop::new(session, &state.session_config, state.logger.clone());
    let session_task = tokio::spawn(session_loop.run(control_rx, state.shutdown.subscribe()));

    // Forward session output to the client
    let forward_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(Message::Text(message.to_json())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                if control_tx.send(text).await.is_err() {
                    break;
                }
            }
            Message::Binary(_) => {
                debug!(session_id = %session_id, "Ignoring binary WebSocket message");
            }
            Message::Ping(_) | Message::Pong(_) => {
                trace!(session_id = %session_id, "WebSocket keepalive");
            }
            Message::Close(_) => {
                debug!(session_id = %session_id, "Client closed WebSocket connection");
                break;
            }
        }
    }

    // Closing the control channel ends the session loop
    drop(control_tx);
    if let Err(e) = session_task.await {
        warn!(session_id = %session_id, error = %e, "Session task failed");
    }
    forward_task.abort();
    state.sessions.unregister(&session_id);
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/", get(health))
        .route("/health", get(health))
        .route("/monitor", get(monitor))
        .route("/logs", get(logs))
        .route("/api/self-heal", get(get_self_heal).post(set_self_heal))
        .route("/api/sessions", get(list_sessions))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Serve until the shutdown signal fires
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let mut shutdown = state.shutdown.subscribe();
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
