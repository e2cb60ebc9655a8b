//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`jobs`] - Extraction and download jobs, archives
//! - [`system`] - Health, pool stats, events, shutdown

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{JobId, MediaFilter};

mod jobs;
mod system;

pub use jobs::*;
pub use system::*;

/// Body of POST /extractions
#[derive(Debug, Deserialize, Serialize)]
pub struct StartExtractionRequest {
    /// Page to scan
    pub url: String,
    /// Media filter (defaults accept everything)
    #[serde(default)]
    pub filter: MediaFilter,
}

/// Body of POST /jobs/:id/downloads
#[derive(Debug, Deserialize, Serialize)]
pub struct StartDownloadRequest {
    /// Media URLs to download
    pub urls: Vec<String>,
}

/// Response carrying a freshly created job id
#[derive(Debug, Deserialize, Serialize)]
pub struct JobCreated {
    /// New job id
    pub job_id: JobId,
}

/// Response of DELETE /jobs/:id
#[derive(Debug, Deserialize, Serialize)]
pub struct JobsRemoved {
    /// Every job removed, the requested one first
    pub removed: Vec<JobId>,
}

fn parse_job_id(raw: &str) -> Result<JobId> {
    raw.parse()
        .map_err(|_| Error::InvalidInput(format!("malformed job id '{raw}'")))
}
