//! REST API server module
//!
//! Serves the pipeline's caller-facing contracts over HTTP:
//!
//! - `POST /api/download` - Submit a download request
//! - `GET /api/status/{task_id}` - Poll a task's lifecycle state
//! - `GET /api/works` - List the caller's recent tasks
//! - `GET /api/artifact/{task_id}` - Fetch a succeeded task's artifact
//! - `GET /api/health` - Health check (no identity required)
//! - `GET /api/openapi.json` - OpenAPI specification
//!
//! Caller identity arrives in the `x-owner-id` header, installed by whatever
//! authorizer fronts the service; authentication itself is out of scope.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::downloader::NovelDownloader;
use crate::error::{Error, Result};

pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;


/// Create the API router with all route definitions
pub fn create_router(downloader: NovelDownloader, config: Arc<Config>) -> Router {
    let state = AppState::new(downloader, config.clone());

    let mut router = Router::new()
        .route("/api/download", post(routes::submit_download))
        .route("/api/status/:task_id", get(routes::get_status))
        .route("/api/works", get(routes::list_works))
        .route("/api/artifact/:task_id", get(routes::get_artifact))
        .route("/api/health", get(routes::health_check))
        .route("/api/openapi.json", get(routes::openapi_spec))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.api.enable_cors {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router
}

/// Bind and serve the API until the pipeline shuts down
pub async fn start_api_server(downloader: NovelDownloader, config: Arc<Config>) -> Result<()> {
    let addr = config.api.bind_addr;
    let shutdown = downloader.shutdown.clone();
    let router = create_router(downloader, config);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ApiServer(format!("failed to bind {addr}: {e}")))?;

    tracing::info!(%addr, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::ApiServer(format!("server error: {e}")))?;

    Ok(())
}
