//! Error types for media-harvest
//!
//! This module provides the crate-wide error type together with:
//! - A coarse [`ErrorKind`] taxonomy used for per-item failure reporting
//! - HTTP status code mapping for API integration
//! - Structured error responses with machine-readable error codes

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::types::JobId;

/// Result type alias for media-harvest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for media-harvest
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "pool.max_sessions")
        key: Option<String>,
    },

    /// The target URL could not be parsed or uses an unsupported scheme
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl {
        /// The rejected URL as supplied by the caller
        url: String,
        /// Why the URL was rejected
        reason: String,
    },

    /// Malformed request input (bad job id, inverted filter bounds, empty list)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The URL failed the SSRF safety check
    #[error("unsafe URL rejected: {0}")]
    UnsafeUrl(String),

    /// No page handle became available within the acquisition timeout
    #[error("timed out after {waited_ms}ms waiting for a browser page")]
    PoolTimeout {
        /// How long the caller waited before giving up
        waited_ms: u64,
    },

    /// The active job ceiling has been reached
    #[error("too many active jobs (limit {limit})")]
    TooManyActiveJobs {
        /// Configured active job ceiling
        limit: usize,
    },

    /// A bulk download request listed more URLs than allowed
    #[error("too many files requested: {requested} (limit {limit})")]
    TooManyFiles {
        /// Number of URLs in the request
        requested: usize,
        /// Configured per-request cap
        limit: usize,
    },

    /// Remote server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    Http {
        /// Status code returned by the server
        status: u16,
        /// URL that produced the status
        url: String,
    },

    /// Transport-level failure (connect, timeout, reset, body stream)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Browser session or page failure
    #[error("browser error: {0}")]
    Browser(String),

    /// A download exceeded the per-file or per-job byte ceiling
    #[error("size limit exceeded for {url}: {size} bytes > {limit} bytes")]
    SizeExceeded {
        /// URL being downloaded
        url: String,
        /// Bytes observed (declared length or running count)
        size: u64,
        /// Ceiling that was crossed
        limit: u64,
    },

    /// Local filesystem write failure while materializing a download
    #[error("failed to write {path}: {source}")]
    Write {
        /// Destination path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Archive creation failed
    #[error("archive error for job {job_id}: {reason}")]
    Archive {
        /// Download job whose archive failed
        job_id: JobId,
        /// The reason archive creation failed
        reason: String,
    },

    /// Job id unknown to the registry (never existed, swept or cleaned up)
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Shutdown in progress - not accepting new jobs
    #[error("shutdown in progress: not accepting new jobs")]
    ShuttingDown,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Coarse error taxonomy used for per-item failures and status reporting
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed URL, bad job id or other caller mistake
    InvalidInput,
    /// SSRF-style rejection
    UnsafeTarget,
    /// Pool timeout, job ceilings, too many files
    ResourceExhausted,
    /// Network failure, 5xx, 429 or 408 (retryable)
    Transient,
    /// 4xx other than 429/408 (not retried)
    Permanent,
    /// Per-file or per-job byte ceiling crossed
    SizeExceeded,
    /// Local filesystem failure
    WriteError,
    /// Archive creation failure
    ArchiveError,
}

impl ErrorKind {
    /// Stable snake_case label
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::UnsafeTarget => "unsafe_target",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::SizeExceeded => "size_exceeded",
            ErrorKind::WriteError => "write_error",
            ErrorKind::ArchiveError => "archive_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns true for 4xx statuses that must not be retried (everything but 408 and 429)
pub fn is_permanent_status(status: u16) -> bool {
    (400..500).contains(&status) && status != 408 && status != 429
}

impl Error {
    /// Classify this error into the coarse taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config { .. }
            | Error::InvalidUrl { .. }
            | Error::InvalidInput(_)
            | Error::JobNotFound(_) => ErrorKind::InvalidInput,
            Error::UnsafeUrl(_) => ErrorKind::UnsafeTarget,
            Error::PoolTimeout { .. }
            | Error::TooManyActiveJobs { .. }
            | Error::TooManyFiles { .. }
            | Error::ShuttingDown => ErrorKind::ResourceExhausted,
            Error::Http { status, .. } if is_permanent_status(*status) => ErrorKind::Permanent,
            Error::Http { .. } | Error::Network(_) | Error::Browser(_) => ErrorKind::Transient,
            Error::SizeExceeded { .. } => ErrorKind::SizeExceeded,
            Error::Write { .. } | Error::Io(_) => ErrorKind::WriteError,
            Error::Archive { .. } => ErrorKind::ArchiveError,
            Error::Serialization(_) => ErrorKind::Permanent,
            Error::Other(_) => ErrorKind::Transient,
        }
    }

    /// HTTP-style status carried by this error, if any
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => Some(*status),
            Error::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// API error response format
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "job_not_found",
///     "message": "job not found: 1f0c...",
///     "details": { "job_id": "1f0c..." }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "job_not_found", "unsafe_url")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - Client error (invalid input)
            Error::Config { .. } => 400,
            Error::InvalidUrl { .. } => 400,
            Error::InvalidInput(_) => 400,
            Error::UnsafeUrl(_) => 400,
            Error::TooManyFiles { .. } => 400,

            // 404 Not Found
            Error::JobNotFound(_) => 404,

            // 413 Payload Too Large
            Error::SizeExceeded { .. } => 413,

            // 429 Too Many Requests - admission control
            Error::TooManyActiveJobs { .. } => 429,

            // 502 Bad Gateway - upstream failures
            Error::Http { .. } => 502,
            Error::Network(_) => 502,
            Error::Browser(_) => 502,

            // 503 Service Unavailable
            Error::PoolTimeout { .. } => 503,
            Error::ShuttingDown => 503,

            // 500 Internal Server Error - Server-side issues
            Error::Write { .. } => 500,
            Error::Archive { .. } => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::Other(_) => 500,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::InvalidUrl { .. } => "invalid_url",
            Error::InvalidInput(_) => "invalid_input",
            Error::UnsafeUrl(_) => "unsafe_url",
            Error::PoolTimeout { .. } => "pool_timeout",
            Error::TooManyActiveJobs { .. } => "too_many_active_jobs",
            Error::TooManyFiles { .. } => "too_many_files",
            Error::Http { .. } => "upstream_http_error",
            Error::Network(_) => "network_error",
            Error::Browser(_) => "browser_error",
            Error::SizeExceeded { .. } => "size_exceeded",
            Error::Write { .. } => "write_error",
            Error::Archive { .. } => "archive_error",
            Error::JobNotFound(_) => "job_not_found",
            Error::ShuttingDown => "shutting_down",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::JobNotFound(id) => Some(serde_json::json!({ "job_id": id })),
            Error::TooManyActiveJobs { limit } => Some(serde_json::json!({ "limit": limit })),
            Error::TooManyFiles { requested, limit } => Some(serde_json::json!({
                "requested": requested,
                "limit": limit,
            })),
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({ "key": key })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
