//! Tool service: one repair loop per HTTP request
//!
//! Routes:
//! - `GET /` banner, `GET /health`
//! - `POST /solve` plain JSON
//! - `POST /` and `POST /tools/call` JSON-RPC 2.0 (`ping`, `tools/list`, `tools/call`)

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use eyre::{Context, Result};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

mod handlers;
pub mod rpc;

pub use handlers::{AppState, BANNER, HEALTH, ServiceError, SolveRequest, dispatch};

/// Build the router over shared state
pub fn router(state: Arc<AppState>) -> Router {
    debug!("router: called");
    Router::new()
        .route("/", get(handlers::banner).post(handlers::jsonrpc))
        .route("/health", get(handlers::health))
        .route("/tools/call", post(handlers::jsonrpc))
        .route("/solve", post(handlers::solve))
        .with_state(state)
}

/// Bind `bind` and serve until Ctrl-C
pub async fn serve(state: Arc<AppState>, bind: &str) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .context(format!("Failed to bind {}", bind))?;
    serve_on(listener, state, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` resolves
///
/// In-flight requests are allowed to finish.
pub async fn serve_on<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr().context("Failed to read listener address")?;
    info!("oragent tool server listening on http://{}", addr);
    info!("Available endpoints: /, /health, /solve, /tools/call");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    info!("oragent tool server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C, shutting down"),
        Err(e) => {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
