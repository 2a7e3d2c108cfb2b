// =============================================================================
// Health Endpoint — minimal loopback HTTP surface
// =============================================================================
//
// The only remote-control surface the engine exposes:
//
//   GET  /health   -> engine status snapshot (JSON)
//   POST /shutdown -> request a graceful stop at the next cycle boundary
//
// Binds to loopback only.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::snapshot::{DecisionRecord, ErrorRecord};

/// Status payload served at GET /health.
#[derive(Debug, Clone, Serialize)]
pub struct HealthView {
    pub ok: bool,
    pub started_at: DateTime<Utc>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub cycle_count: u64,
    pub degraded: bool,
    pub dry_run: bool,
    pub open_positions: usize,
    pub recent_errors: Vec<ErrorRecord>,
    pub recent_decisions: Vec<DecisionRecord>,
}

impl HealthView {
    fn initial(dry_run: bool) -> Self {
        Self {
            ok: true,
            started_at: Utc::now(),
            last_cycle_at: None,
            cycle_count: 0,
            degraded: false,
            dry_run,
            open_positions: 0,
            recent_errors: Vec::new(),
            recent_decisions: Vec::new(),
        }
    }
}

/// Shared handle between the engine (writer) and the HTTP task (reader).
#[derive(Clone)]
pub struct HealthHandle {
    view: Arc<RwLock<HealthView>>,
    shutdown: Arc<AtomicBool>,
}

impl HealthHandle {
    pub fn new(dry_run: bool) -> Self {
        Self {
            view: Arc::new(RwLock::new(HealthView::initial(dry_run))),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Refresh the served status at the end of a cycle.
    pub fn update_cycle(
        &self,
        cycle_count: u64,
        degraded: bool,
        open_positions: usize,
        recent_errors: Vec<ErrorRecord>,
        recent_decisions: Vec<DecisionRecord>,
    ) {
        let mut view = self.view.write();
        view.last_cycle_at = Some(Utc::now());
        view.cycle_count = cycle_count;
        view.degraded = degraded;
        view.ok = !degraded;
        view.open_positions = open_positions;
        view.recent_errors = recent_errors;
        view.recent_decisions = recent_decisions;
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn view(&self) -> HealthView {
        self.view.read().clone()
    }
}

async fn get_health(State(handle): State<HealthHandle>) -> Json<HealthView> {
    Json(handle.view())
}

async fn post_shutdown(State(handle): State<HealthHandle>) -> Json<serde_json::Value> {
    warn!("shutdown requested via health endpoint");
    handle.request_shutdown();
    Json(serde_json::json!({ "shutting_down": true }))
}

pub fn router(handle: HealthHandle) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/shutdown", post(post_shutdown))
        .with_state(handle)
}

/// Serve the health endpoint on loopback. Spawned as a background task; any
/// bind failure is logged and the engine carries on without the endpoint.
pub async fn serve(handle: HealthHandle, port: u16) {
    let addr = format!("127.0.0.1:{port}");
    match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => {
            info!(addr = %addr, "health endpoint listening");
            if let Err(e) = axum::serve(listener, router(handle)).await {
                warn!(error = %e, "health endpoint stopped");
            }
        }
        Err(e) => {
            warn!(addr = %addr, error = %e, "health endpoint could not bind");
        }
    }
}
