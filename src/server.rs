//! JSON bridge for the dashboard: starts scans in the background, reports their
//! progress, and runs ping/trace requests on demand.

use std::{sync::atomic::Ordering, sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    latency::{JitterThresholds, LatencyReport},
    ping,
    scanner::{self, SharedProgress},
    services,
    summary::summarize_scan,
    trace,
    types::{PortProbeResult, ScanSummary},
};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<RwLock<ServerState>>, // shared mutable state for progress/results
}

#[derive(Debug)]
struct ServerState {
    status: Status,
    /// Bumped per scan so a superseded scan cannot overwrite a newer one's state.
    scan_id: u64,
    results: Option<ScanResponse>,
    progress: Option<SharedProgress>,
    cancel: Option<CancellationToken>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Status {
    pub host: Option<String>,
    pub total: u64,
    pub scanned: u64,
    pub open: u64,
    pub state: String, // "idle" | "running" | "done" | "cancelled"
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResponse {
    pub results: Vec<PortProbeResult>,
    pub summary: ScanSummary,
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub host: String,
    /// Empty means every port in the service table.
    #[serde(default)]
    pub ports: Vec<u32>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PingRequest {
    pub host: String,
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub interval_ms: Option<u64>,
    #[serde(default)]
    pub thresholds: Option<JitterThresholds>,
}

#[derive(Debug, Deserialize)]
pub struct TraceRequest {
    pub host: String,
    #[serde(default)]
    pub max_hops: Option<u32>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ServiceEntry {
    port: u16,
    service: &'static str,
}

pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_millis(3000);

impl AppState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(ServerState {
                status: Status {
                    state: "idle".into(),
                    ..Default::default()
                },
                scan_id: 0,
                results: None,
                progress: None,
                cancel: None,
            })),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// The API router, without binding a socket.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/scan", post(post_scan))
        .route("/scan/cancel", post(post_cancel))
        .route("/results", get(get_results))
        .route("/ping", post(post_ping))
        .route("/trace", post(post_trace))
        .route("/services", get(get_services))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(bind: &str) -> Result<()> {
    let app = router(AppState::new());
    info!("serving diagnostics API on http://{}", bind);
    axum::serve(tokio::net::TcpListener::bind(bind).await?, app).await?;
    Ok(())
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    let (total, scanned, open) = if let Some(p) = s.progress.as_ref() {
        (
            p.total.load(Ordering::Relaxed),
            p.scanned_done.load(Ordering::Relaxed),
            p.open_count.load(Ordering::Relaxed),
        )
    } else {
        (s.status.total, s.status.scanned, s.status.open)
    };
    let out = Status {
        total,
        scanned,
        open,
        ..s.status.clone()
    };
    (StatusCode::OK, Json(out))
}

async fn get_results(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    if let Some(res) = s.results.as_ref() {
        (StatusCode::OK, Json(res.clone())).into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

async fn post_scan(State(app): State<AppState>, Json(req): Json<ScanRequest>) -> impl IntoResponse {
    let host = req.host.trim().to_string();
    if host.is_empty() {
        return (StatusCode::BAD_REQUEST, "host must not be empty").into_response();
    }

    let ports: Vec<u32> = if req.ports.is_empty() {
        services::common_service_ports()
            .into_iter()
            .map(|(p, _)| u32::from(p))
            .collect()
    } else {
        req.ports
    };

    let concurrency = req.concurrency.unwrap_or(scanner::DEFAULT_MAX_CONCURRENCY);
    let timeout = req
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_SCAN_TIMEOUT);

    let progress = SharedProgress::new();
    let cancel = CancellationToken::new();

    let scan_id = {
        let mut s = app.inner.write().await;
        // Cancel any existing scan
        if let Some(c) = s.cancel.take() {
            c.cancel();
        }
        s.scan_id += 1;
        s.status = Status {
            host: Some(host.clone()),
            total: 0,
            scanned: 0,
            open: 0,
            state: "running".into(),
        };
        s.results = None;
        s.progress = Some(progress.clone());
        s.cancel = Some(cancel.clone());
        s.scan_id
    };

    let app2 = app.clone();
    let scan_host = host.clone();
    tokio::spawn(async move {
        let results = scanner::scan_ports_with_shared(
            &scan_host,
            &ports,
            timeout,
            concurrency,
            cancel.clone(),
            progress.clone(),
        )
        .await;

        let mut s = app2.inner.write().await;
        if s.scan_id != scan_id {
            return;
        }
        let summary = summarize_scan(&results);
        s.status.total = results.len() as u64;
        s.status.scanned = progress.scanned_done.load(Ordering::Relaxed);
        s.status.open = summary.open_count as u64;
        s.status.state = if cancel.is_cancelled() { "cancelled" } else { "done" }.into();
        s.results = Some(ScanResponse { results, summary });
        s.progress = None;
        s.cancel = None;
    });

    let status = Status {
        host: Some(host),
        state: "running".into(),
        ..Default::default()
    };
    (StatusCode::ACCEPTED, Json(status)).into_response()
}

async fn post_cancel(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    match s.cancel.as_ref() {
        Some(c) => {
            c.cancel();
            (StatusCode::OK, "scan cancelling").into_response()
        }
        None => (StatusCode::CONFLICT, "no scan is running").into_response(),
    }
}

async fn post_ping(Json(req): Json<PingRequest>) -> impl IntoResponse {
    let count = req.count.unwrap_or(ping::DEFAULT_COUNT);
    let timeout = req
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(ping::DEFAULT_TIMEOUT);
    let interval = req
        .interval_ms
        .map(Duration::from_millis)
        .unwrap_or(ping::DEFAULT_INTERVAL);
    let thresholds = req.thresholds.unwrap_or_default();

    match ping::ping_host(&req.host, count, timeout, interval).await {
        Ok(stats) => {
            (StatusCode::OK, Json(LatencyReport::from_stats(&stats, &thresholds))).into_response()
        }
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

async fn post_trace(Json(req): Json<TraceRequest>) -> impl IntoResponse {
    let max_hops = req.max_hops.unwrap_or(trace::DEFAULT_MAX_HOPS);
    let timeout = req
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(trace::DEFAULT_HOP_TIMEOUT);

    match trace::trace_path(&req.host, max_hops, timeout).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => {
            info!("trace rejected: {e}");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

async fn get_services() -> impl IntoResponse {
    let entries: Vec<ServiceEntry> = services::common_service_ports()
        .into_iter()
        .map(|(port, service)| ServiceEntry { port, service })
        .collect();
    Json(entries)
}
