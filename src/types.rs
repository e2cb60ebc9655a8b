//! Core types for media-harvest

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ErrorKind;

/// Opaque identifier for an extraction or download job
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub uuid::Uuid);

impl JobId {
    /// Generate a fresh random id
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// First eight hex characters, used to prefix file names
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(uuid::Uuid::parse_str(s)?))
    }
}

/// What a job does
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Page scan producing a list of media descriptors
    Extraction,
    /// Bulk download producing files and an archive
    Download,
}

/// Job lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Work in progress
    Running,
    /// Finished (possibly with per-item failures)
    Completed,
    /// Aborted with an error
    Failed,
}

impl JobStatus {
    /// Whether the job has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

/// Media category
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// Still or animated image
    Image,
    /// Video stream or file
    Video,
}

impl MediaType {
    /// Directory (and archive entry prefix) used for this media type
    pub fn dir_name(&self) -> &'static str {
        match self {
            MediaType::Image => "images",
            MediaType::Video => "videos",
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaType::Image => f.write_str("image"),
            MediaType::Video => f.write_str("video"),
        }
    }
}

/// Normalized metadata for one discovered asset URL
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    /// Absolute asset URL
    pub url: String,
    /// Image or video
    #[serde(rename = "type")]
    pub media_type: MediaType,
    /// Size in bytes if known
    pub size: Option<u64>,
    /// Content type if known
    pub content_type: Option<String>,
    /// Last-Modified if known
    pub last_modified: Option<DateTime<Utc>>,
}

impl MediaDescriptor {
    /// Descriptor with only the URL and type known
    pub fn new(url: impl Into<String>, media_type: MediaType) -> Self {
        Self {
            url: url.into(),
            media_type,
            size: None,
            content_type: None,
            last_modified: None,
        }
    }
}

/// Filter applied to discovered media
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MediaFilter {
    /// Keep images
    #[serde(default = "default_true")]
    pub include_images: bool,
    /// Keep videos
    #[serde(default = "default_true")]
    pub include_videos: bool,
    /// Drop items known to be smaller than this
    #[serde(default)]
    pub min_size_bytes: u64,
    /// Drop items known to be larger than this (None = unbounded)
    #[serde(default)]
    pub max_size_bytes: Option<u64>,
}

impl Default for MediaFilter {
    fn default() -> Self {
        Self {
            include_images: true,
            include_videos: true,
            min_size_bytes: 0,
            max_size_bytes: None,
        }
    }
}

impl MediaFilter {
    /// Whether the media type passes the type flags
    pub fn accepts_type(&self, media_type: MediaType) -> bool {
        match media_type {
            MediaType::Image => self.include_images,
            MediaType::Video => self.include_videos,
        }
    }

    /// Whether a size passes the bounds; unknown sizes always pass
    pub fn accepts_size(&self, size: Option<u64>) -> bool {
        match size {
            None => true,
            Some(size) => {
                size >= self.min_size_bytes && self.max_size_bytes.is_none_or(|max| size <= max)
            }
        }
    }

    /// Whether a descriptor passes both type and size checks
    pub fn accepts(&self, media: &MediaDescriptor) -> bool {
        self.accepts_type(media.media_type) && self.accepts_size(media.size)
    }
}

/// Outcome of a completed extraction job
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Page that was scanned
    pub url: String,
    /// Media that survived normalization, safety checks and filtering
    pub media: Vec<MediaDescriptor>,
    /// Non-fatal problems encountered (rejected URLs, failed probes)
    pub errors: Vec<String>,
    /// Distinct candidate URLs before filtering
    pub candidates: usize,
}

/// A successfully downloaded item
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownloadedItem {
    /// Download job this file belongs to
    pub job_id: JobId,
    /// Source URL
    pub url: String,
    /// Local path of the file
    pub path: PathBuf,
    /// Bytes written
    pub size: u64,
    /// Content type reported by the server
    pub content_type: Option<String>,
    /// Image or video
    pub media_type: MediaType,
    /// Wall-clock time spent on this item
    pub elapsed_ms: u64,
}

/// A download that did not succeed
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailedItem {
    /// Download job this item belongs to
    pub job_id: JobId,
    /// Source URL
    pub url: String,
    /// Error classification
    pub error_kind: ErrorKind,
    /// Human-readable reason
    pub message: String,
    /// HTTP status if the failure came from the server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

/// Aggregate outcome of a bulk download
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Download job id
    pub job_id: JobId,
    /// Items written to disk
    pub completed: Vec<DownloadedItem>,
    /// Items that failed
    pub failed: Vec<FailedItem>,
    /// Sum of completed item sizes
    pub total_bytes: u64,
    /// Wall-clock duration of the whole batch
    pub duration_ms: u64,
}

/// Descriptor of a finished archive
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArchiveInfo {
    /// Archive location on disk
    pub path: PathBuf,
    /// Number of media files inside (manifest excluded)
    pub file_count: usize,
    /// Sum of media file sizes inside
    pub total_size: u64,
}

/// Outcome of a completed download job
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadSummary {
    /// Per-item results
    pub result: JobResult,
    /// Archive, when one was built
    pub archive: Option<ArchiveInfo>,
}

/// Terminal result attached to a job
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobOutcome {
    /// Extraction result
    Extraction(ExtractionResult),
    /// Download result
    Download(DownloadSummary),
}

/// Running totals for a job
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Items in the job
    pub total: usize,
    /// Items finished successfully
    pub completed: usize,
    /// Items failed
    pub failed: usize,
    /// Bytes written so far across items
    pub bytes_downloaded: u64,
    /// Most recent sampled throughput
    pub speed_bps: u64,
}

/// Snapshot returned by status queries
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobStatusView {
    /// Job id
    pub id: JobId,
    /// Job kind
    pub kind: JobKind,
    /// Current status
    pub status: JobStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
    /// Live progress (download jobs)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobProgress>,
    /// Terminal result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobOutcome>,
    /// Failure reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Event emitted during job lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Extraction job accepted
    ExtractionStarted {
        /// Job id
        id: JobId,
        /// Page being scanned
        url: String,
    },

    /// Extraction finished
    ExtractionComplete {
        /// Job id
        id: JobId,
        /// Number of media items kept
        media_count: usize,
    },

    /// Bulk download accepted
    DownloadStarted {
        /// Job id
        id: JobId,
        /// Number of URLs requested
        total: usize,
    },

    /// Per-item throughput sample
    ItemProgress {
        /// Job id
        id: JobId,
        /// Position of the item in the request
        index: usize,
        /// Item URL
        url: String,
        /// Bytes written so far for this item
        bytes: u64,
        /// Declared length if known
        #[serde(skip_serializing_if = "Option::is_none")]
        total_bytes: Option<u64>,
        /// Sampled speed in bytes per second
        speed_bps: u64,
    },

    /// One item finished successfully
    ItemComplete {
        /// Job id
        id: JobId,
        /// Position of the item in the request
        index: usize,
        /// Item URL
        url: String,
        /// Bytes written
        size: u64,
        /// Running count of completed items
        completed: usize,
        /// Running count of failed items
        failed: usize,
        /// Items in the job
        total: usize,
    },

    /// One item failed
    ItemFailed {
        /// Job id
        id: JobId,
        /// Position of the item in the request
        index: usize,
        /// Item URL
        url: String,
        /// Error classification
        error_kind: ErrorKind,
        /// Running count of completed items
        completed: usize,
        /// Running count of failed items
        failed: usize,
        /// Items in the job
        total: usize,
    },

    /// All items settled
    DownloadComplete {
        /// Job id
        id: JobId,
        /// Items written
        completed: usize,
        /// Items failed
        failed: usize,
    },

    /// Archive written
    ArchiveReady {
        /// Job id
        id: JobId,
        /// Archive path
        path: PathBuf,
    },

    /// Job failed as a whole
    JobFailed {
        /// Job id
        id: JobId,
        /// Failure reason
        error: String,
    },

    /// Completed job evicted or swept from the registry
    JobRemoved {
        /// Job id
        id: JobId,
    },

    /// Harvester shutting down
    Shutdown,
}

fn default_true() -> bool {
    true
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_round_trips_through_display() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(id.short().len(), 8);
    }

    #[test]
    fn job_id_rejects_garbage() {
        assert!("not-a-job".parse::<JobId>().is_err());
    }

    #[test]
    fn filter_defaults_accept_everything() {
        let filter = MediaFilter::default();
        assert!(filter.accepts(&MediaDescriptor::new("https://a/b.jpg", MediaType::Image)));
        assert!(filter.accepts(&MediaDescriptor::new("https://a/b.mp4", MediaType::Video)));
    }

    #[test]
    fn filter_size_bounds_ignore_unknown_sizes() {
        let filter = MediaFilter {
            min_size_bytes: 1_000,
            max_size_bytes: Some(10_000),
            ..Default::default()
        };
        assert!(filter.accepts_size(None));
        assert!(filter.accepts_size(Some(1_000)));
        assert!(filter.accepts_size(Some(10_000)));
        assert!(!filter.accepts_size(Some(999)));
        assert!(!filter.accepts_size(Some(10_001)));
    }

    #[test]
    fn filter_deserializes_with_defaults() {
        let filter: MediaFilter = serde_json::from_str(r#"{"include_videos": false}"#).unwrap();
        assert!(filter.include_images);
        assert!(!filter.include_videos);
        assert_eq!(filter.min_size_bytes, 0);
        assert_eq!(filter.max_size_bytes, None);
    }

    #[test]
    fn media_descriptor_serializes_type_field() {
        let json = serde_json::to_value(MediaDescriptor::new("https://a/b.webm", MediaType::Video))
            .unwrap();
        assert_eq!(json["type"], "video");
        assert!(json["size"].is_null());
    }
}
