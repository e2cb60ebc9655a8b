//! Job handlers: extraction, status, bulk download, archive, cleanup.

use super::{JobCreated, JobsRemoved, StartDownloadRequest, StartExtractionRequest, parse_job_id};
use crate::api::AppState;
use crate::error::{Error, Result};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use tokio_util::io::ReaderStream;

/// POST /extractions - Start scanning a page for media
pub async fn start_extraction(
    State(state): State<AppState>,
    Json(request): Json<StartExtractionRequest>,
) -> Result<impl IntoResponse> {
    let job_id = state
        .harvester
        .start_extraction(&request.url, request.filter)?;
    Ok((StatusCode::ACCEPTED, Json(JobCreated { job_id })))
}

/// GET /jobs/:id - Status, progress and result of any job
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let id = parse_job_id(&id)?;
    let view = state.harvester.get_job_status(&id)?;
    Ok(Json(view))
}

/// POST /jobs/:id/downloads - Download media found by an extraction job
pub async fn start_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<StartDownloadRequest>,
) -> Result<impl IntoResponse> {
    let source = parse_job_id(&id)?;
    let job_id = state.harvester.start_bulk_download(&source, request.urls)?;
    Ok((StatusCode::ACCEPTED, Json(JobCreated { job_id })))
}

/// GET /downloads/:id/archive - Stream the zip archive of a finished download
pub async fn get_archive(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response> {
    let id = parse_job_id(&id)?;
    let path = state.harvester.get_archive(&id)?;

    let file = tokio::fs::File::open(&path).await.map_err(|e| match e.kind() {
        // Swept between lookup and open.
        std::io::ErrorKind::NotFound => Error::JobNotFound(id.to_string()),
        _ => Error::Io(e),
    })?;
    let length = file.metadata().await.map(|m| m.len()).ok();

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{id}.zip\""),
        );
    if let Some(length) = length {
        response = response.header(header::CONTENT_LENGTH, length);
    }

    response
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| Error::Other(format!("failed to build archive response: {e}")))
}

/// DELETE /jobs/:id - Remove a job, linked downloads and their files
pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let id = parse_job_id(&id)?;
    let removed = state.harvester.cleanup(&id).await?;
    Ok(Json(JobsRemoved { removed }))
}
