use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::sync::RwLock;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::info;

use crate::{
    events::{EventSink, ScanEvent},
    ports,
    probe::ProbeSet,
    session::ScanController,
    targets,
    types::{ProbeResult, ScanOutcome, ScanRequest},
};

/// Collects the events of the current scan for polling clients.
///
/// Each scan writes through a [`ScanLog`] tagged with its generation; events
/// from a scan that has since been replaced are dropped.
#[derive(Debug, Default)]
pub struct EventLog {
    inner: Mutex<EventLogInner>,
}

#[derive(Debug, Default)]
struct EventLogInner {
    generation: u64,
    results: Vec<ProbeResult>,
    progress: f64,
}

impl EventLog {
    fn reset(&self, generation: u64) {
        if let Ok(mut g) = self.inner.lock() {
            *g = EventLogInner {
                generation,
                ..EventLogInner::default()
            };
        }
    }

    fn snapshot(&self) -> (Vec<ProbeResult>, f64) {
        self.inner
            .lock()
            .map(|g| (g.results.clone(), g.progress))
            .unwrap_or_default()
    }

    fn record(&self, generation: Option<u64>, event: ScanEvent) {
        let Ok(mut g) = self.inner.lock() else {
            return;
        };
        if generation.is_some_and(|tag| tag != g.generation) {
            return;
        }
        match event {
            ScanEvent::ScanResult(r) => g.results.push(r),
            ScanEvent::ScanProgress(p) => g.progress = g.progress.max(p),
        }
    }

    /// A sink that only records while `generation` is current.
    fn scan_log(self: &Arc<Self>, generation: u64) -> ScanLog {
        ScanLog {
            generation,
            log: Arc::clone(self),
        }
    }
}

/// Untagged events (the `cancelled` marker) belong to the current scan.
impl EventSink for EventLog {
    fn emit(&self, event: ScanEvent) {
        self.record(None, event);
    }
}

/// The [`EventLog`] view handed to a single scan.
struct ScanLog {
    generation: u64,
    log: Arc<EventLog>,
}

impl EventSink for ScanLog {
    fn emit(&self, event: ScanEvent) {
        self.log.record(Some(self.generation), event);
    }
}

#[derive(Clone)]
pub struct AppState {
    controller: Arc<ScanController>,
    events: Arc<EventLog>,
    inner: Arc<RwLock<ServerState>>, // status of the most recent scan
}

#[derive(Debug, Default)]
struct ServerState {
    generation: u64,
    status: Status,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct Status {
    pub state: String, // "idle" | "running" | "done"
    pub total: u64,
    pub finished: u64,
    pub progress: f64,
    pub outcome: Option<ScanOutcome>,
    pub started_at: Option<String>,
}

impl AppState {
    pub fn new() -> Self {
        Self::with_probes(ProbeSet::default())
    }

    pub fn with_probes(probes: ProbeSet) -> Self {
        let events = Arc::new(EventLog::default());
        let controller = Arc::new(ScanController::with_probes(events.clone(), probes));
        Self {
            controller,
            events,
            inner: Arc::new(RwLock::new(ServerState {
                generation: 0,
                status: Status {
                    state: "idle".into(),
                    ..Status::default()
                },
            })),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// API routes under `/api` plus static files from `ui/`.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/permission", get(get_permission))
        .route("/status", get(get_status))
        .route("/results", get(get_results))
        .route("/scan", post(post_scan))
        .route("/cancel", post(post_cancel))
        .with_state(state);

    let static_svc = ServeDir::new("ui").append_index_html_on_directories(true);

    Router::new()
        .nest("/api", api)
        .fallback_service(static_svc)
        .layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(bind: &str) -> Result<()> {
    let app = router(AppState::new());
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(%bind, "serving UI");
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct Permission {
    raw_probe: bool,
}

async fn get_permission(State(app): State<AppState>) -> impl IntoResponse {
    Json(Permission {
        raw_probe: app.controller.check_permission(),
    })
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    let (results, progress) = app.events.snapshot();
    let finished = results.iter().filter(|r| r.port != 0).count() as u64;
    let out = Status {
        finished,
        progress,
        ..s.status.clone()
    };
    (StatusCode::OK, Json(out))
}

async fn get_results(State(app): State<AppState>) -> impl IntoResponse {
    let (results, _) = app.events.snapshot();
    (StatusCode::OK, Json(results))
}

async fn post_cancel(State(app): State<AppState>) -> impl IntoResponse {
    if app.controller.cancel_scan() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::NO_CONTENT
    }
}

async fn post_scan(State(app): State<AppState>, Json(req): Json<ScanRequest>) -> impl IntoResponse {
    let total = match (
        targets::count_addresses(&req.addresses),
        ports::count_ports(&req.ports),
    ) {
        (Ok(a), Ok(p)) => (a as u64).saturating_mul(p as u64),
        _ => 0,
    };
    let started_at = OffsetDateTime::now_utc().format(&Rfc3339).ok();

    let (generation, snapshot) = {
        let mut s = app.inner.write().await;
        s.generation += 1;
        s.status = Status {
            state: "running".into(),
            total,
            started_at,
            ..Status::default()
        };
        // Reset under the state lock so concurrent posts cannot reorder generations.
        app.events.reset(s.generation);
        (s.generation, s.status.clone())
    };

    let app2 = app.clone();
    tokio::spawn(async move {
        let sink = Arc::new(app2.events.scan_log(generation));
        let outcome = app2.controller.run_scan_with_sink(&req, sink).await;
        let mut s = app2.inner.write().await;
        if s.generation == generation {
            s.status.state = "done".into();
            s.status.outcome = Some(outcome);
        }
    });

    (StatusCode::ACCEPTED, Json(snapshot))
}
