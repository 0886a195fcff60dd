//! Camp Bug Hunter Server
//!
//! HTTP server wiring: shared state, router and listener.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::info;

use crate::api;
use crate::config::Config;
use crate::evidence::EvidenceStore;
use crate::session::SessionSigner;
use crate::storage::Storage;

pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub sessions: SessionSigner,
    pub evidence: EvidenceStore,
    pub config: Arc<Config>,
    pub started_at: std::time::Instant,
}

impl AppState {
    pub fn new(config: Config, storage: Arc<dyn Storage>) -> Self {
        let sessions = SessionSigner::new(
            config.auth.session_secret.as_deref(),
            config.auth.session_ttl_hours,
        );
        let evidence = EvidenceStore::new(config.uploads.dir.clone(), config.uploads.max_file_bytes);
        Self {
            storage,
            sessions,
            evidence,
            config: Arc::new(config),
            started_at: std::time::Instant::now(),
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let uploads = ServeDir::new(state.evidence.root());

    Router::new()
        .route("/health", get(health_handler))
        .merge(api::routes(state.evidence.max_file_bytes()))
        .nest_service("/uploads/evidence", uploads)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub healthy: bool,
    pub uptime_secs: u64,
    pub version: String,
    pub backend: String,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        uptime_secs: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend: state.storage.backend().to_string(),
    })
}

pub async fn run_server(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = state.config.bind_addr();
    if !state.sessions.is_enabled() {
        info!("No session secret configured, admin sessions are disabled");
    }

    let app = create_router(state);

    info!("Starting Camp Bug Hunter server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
