//! System handlers: health, pool stats, events, shutdown.

use crate::api::AppState;
use crate::types::Event;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use serde_json::json;
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

/// GET /health - Health check
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let accepting = state.harvester.is_accepting();
    let status = if accepting {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if accepting { "ok" } else { "shutting_down" },
            "version": env!("CARGO_PKG_VERSION"),
            "active_jobs": state.harvester.active_jobs(),
        })),
    )
}

/// GET /pool/stats - Browser pool counters
pub async fn pool_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.harvester.pool_stats())
}

/// SSE event name for a job event
fn event_name(event: &Event) -> &'static str {
    match event {
        Event::ExtractionStarted { .. } => "extraction_started",
        Event::ExtractionComplete { .. } => "extraction_complete",
        Event::DownloadStarted { .. } => "download_started",
        Event::ItemProgress { .. } => "item_progress",
        Event::ItemComplete { .. } => "item_complete",
        Event::ItemFailed { .. } => "item_failed",
        Event::DownloadComplete { .. } => "download_complete",
        Event::ArchiveReady { .. } => "archive_ready",
        Event::JobFailed { .. } => "job_failed",
        Event::JobRemoved { .. } => "job_removed",
        Event::Shutdown => "shutdown",
    }
}

/// GET /events - Server-sent events stream
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = BroadcastStream::new(state.harvester.subscribe());

    let sse_stream = stream.filter_map(|result| match result {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(data) => Some(Ok(SseEvent::default().event(event_name(&event)).data(data))),
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize event");
                None
            }
        },
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "SSE client lagged");
            Some(Ok(SseEvent::default()
                .event("error")
                .data(json!({ "error": "lagged", "skipped": skipped }).to_string())))
        }
    });

    Sse::new(sse_stream).keep_alive(KeepAlive::default())
}

/// POST /shutdown - Stop accepting work and close the browser pool
pub async fn shutdown(State(state): State<AppState>) -> impl IntoResponse {
    tokio::spawn(async move {
        if let Err(e) = state.harvester.shutdown().await {
            tracing::error!(error = %e, "error during shutdown");
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({ "status": "shutdown initiated" })),
    )
}
