//! REST API server module
//!
//! Thin HTTP plumbing over [`MediaHarvester`]: every handler maps onto one
//! facade operation and errors render as [`ApiError`](crate::error::ApiError)
//! bodies with the status from [`ToHttpStatus`](crate::error::ToHttpStatus).

use crate::{MediaHarvester, Result};
use axum::{
    Router,
    http::HeaderValue,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod error_response;
pub mod routes;
pub mod state;

pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// ## Jobs
/// - `POST /extractions` - Start an extraction job
/// - `GET /jobs/:id` - Job status, progress and result
/// - `DELETE /jobs/:id` - Remove a job, its linked downloads and their files
/// - `POST /jobs/:id/downloads` - Start a bulk download from an extraction
/// - `GET /downloads/:id/archive` - Download the finished archive
///
/// ## System
/// - `GET /pool/stats` - Browser pool counters
/// - `GET /health` - Health check
/// - `GET /events` - Server-sent events stream
/// - `POST /shutdown` - Stop accepting work and close the browser pool
pub fn create_router(harvester: Arc<MediaHarvester>) -> Router {
    let api = harvester.config().api.clone();
    let state = AppState::new(harvester);

    let router = Router::new()
        // Jobs
        .route("/extractions", post(routes::start_extraction))
        .route("/jobs/:id", get(routes::get_job))
        .route("/jobs/:id", delete(routes::delete_job))
        .route("/jobs/:id/downloads", post(routes::start_download))
        .route("/downloads/:id/archive", get(routes::get_archive))
        // System
        .route("/pool/stats", get(routes::pool_stats))
        .route("/health", get(routes::health_check))
        .route("/events", get(routes::event_stream))
        .route("/shutdown", post(routes::shutdown))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if api.cors_enabled {
        router.layer(build_cors_layer(&api.cors_origins))
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins
///
/// `"*"` (or an empty list) allows any origin; otherwise only the listed
/// origins are allowed. Methods and headers are unrestricted.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Serve the API on `config.api.bind_address` until the server stops
///
/// # Example
///
/// ```no_run
/// use media_harvest::{Config, MediaHarvester};
/// use media_harvest::browser::testing::ScriptedBrowser;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let harvester = MediaHarvester::new(Config::default(), Arc::new(ScriptedBrowser::new())).await?;
/// media_harvest::api::start_api_server(Arc::new(harvester)).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(harvester: Arc<MediaHarvester>) -> Result<()> {
    let bind_address = harvester.config().api.bind_address;
    tracing::info!(address = %bind_address, "starting API server");

    let app = create_router(harvester);
    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(address = %bind_address, "API server listening");

    axum::serve(listener, app)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!("API server stopped");
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
