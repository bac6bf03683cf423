use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Readiness shared between the controllers and the probe server
#[derive(Debug, Default)]
pub struct HealthState {
    ready: AtomicBool,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

/// Liveness and readiness probe endpoints
pub struct HealthServer {
    addr: SocketAddr,
    state: Arc<HealthState>,
}

impl HealthServer {
    pub fn new(addr: SocketAddr, state: Arc<HealthState>) -> Self {
        Self { addr, state }
    }

    pub fn build_router(&self) -> Router {
        Router::new()
            .route("/healthz", get(healthz))
            .route("/readyz", get(readyz))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve until `token` is cancelled
    pub async fn run(self, token: CancellationToken) -> Result<(), std::io::Error> {
        let app = self.build_router();
        info!("Starting health server on {}", self.addr);
        let listener = TcpListener::bind(self.addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
    }
}

/// Liveness probe
async fn healthz() -> &'static str {
    "ok"
}

/// Readiness probe. Not ready until the controllers are running.
async fn readyz(State(state): State<Arc<HealthState>>) -> (StatusCode, &'static str) {
    if state.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}
