//! Configuration types for media-harvest

use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};

use crate::error::{Error, Result};

/// Browser resource pool configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of browser sessions (default: 2)
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Maximum pages opened per session (default: 5)
    #[serde(default = "default_max_pages_per_session")]
    pub max_pages_per_session: usize,

    /// How long `acquire` waits for a page before failing (default: 30 seconds)
    #[serde(default = "default_acquire_timeout", with = "duration_serde")]
    pub acquire_timeout: Duration,

    /// Timeout for a single page navigation (default: 30 seconds)
    #[serde(default = "default_navigation_timeout", with = "duration_serde")]
    pub navigation_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            max_pages_per_session: default_max_pages_per_session(),
            acquire_timeout: default_acquire_timeout(),
            navigation_timeout: default_navigation_timeout(),
        }
    }
}

impl PoolConfig {
    /// Upper bound on simultaneously leased pages
    pub fn capacity(&self) -> usize {
        self.max_sessions * self.max_pages_per_session
    }
}

/// Download orchestration configuration (directories, limits, concurrency)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Root directory for downloaded files; `images/` and `videos/` live below it
    /// (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Directory for finished archives (default: "./archives")
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,

    /// Maximum concurrent downloads across all jobs (default: 5)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Maximum redirects followed per request (default: 5)
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Maximum size of a single file in bytes (default: 100 MiB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Maximum bytes written by one job (default: 1 GiB, None = unlimited)
    #[serde(default = "default_max_job_size")]
    pub max_job_size: Option<u64>,

    /// Maximum URLs accepted by one bulk download (default: 100)
    #[serde(default = "default_max_files_per_job")]
    pub max_files_per_job: usize,

    /// Delay between task starts, multiplied by the item index (default: 100 ms)
    #[serde(default = "default_stagger_delay", with = "duration_ms_serde")]
    pub stagger_delay: Duration,

    /// User-Agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            archive_dir: default_archive_dir(),
            max_concurrent_downloads: default_max_concurrent(),
            request_timeout: default_request_timeout(),
            max_redirects: default_max_redirects(),
            max_file_size: default_max_file_size(),
            max_job_size: default_max_job_size(),
            max_files_per_job: default_max_files_per_job(),
            stagger_delay: default_stagger_delay(),
            user_agent: default_user_agent(),
        }
    }
}

/// Job registry limits and retention
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobConfig {
    /// Maximum running jobs; creation beyond this fails (default: 50)
    #[serde(default = "default_max_active_jobs")]
    pub max_active_jobs: usize,

    /// Maximum finished jobs kept; the oldest is evicted first (default: 100)
    #[serde(default = "default_max_completed_jobs")]
    pub max_completed_jobs: usize,

    /// How long finished jobs are kept (default: 1 hour)
    #[serde(default = "default_retention", with = "duration_serde")]
    pub retention: Duration,

    /// Interval between expiry sweeps (default: 5 minutes)
    #[serde(default = "default_sweep_interval", with = "duration_serde")]
    pub sweep_interval: Duration,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            max_active_jobs: default_max_active_jobs(),
            max_completed_jobs: default_max_completed_jobs(),
            retention: default_retention(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_ms_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_ms_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// Extraction pipeline configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Issue HEAD probes to learn size/type/last-modified (default: true)
    #[serde(default = "default_true")]
    pub probe_metadata: bool,

    /// Concurrent metadata probes per extraction (default: 8)
    #[serde(default = "default_probe_concurrency")]
    pub probe_concurrency: usize,

    /// Cap on distinct candidate URLs kept per page (default: 500)
    #[serde(default = "default_max_media_per_page")]
    pub max_media_per_page: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            probe_metadata: true,
            probe_concurrency: default_probe_concurrency(),
            max_media_per_page: default_max_media_per_page(),
        }
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind the API server to (default: 127.0.0.1:3000)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Enable CORS (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
        }
    }
}

/// Main configuration for MediaHarvester
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Browser pool sizing and timeouts
    #[serde(default)]
    pub pool: PoolConfig,

    /// Download directories, ceilings and concurrency
    #[serde(default)]
    pub download: DownloadConfig,

    /// Job registry limits
    #[serde(default)]
    pub jobs: JobConfig,

    /// Retry policy shared by page loads, probes and downloads
    #[serde(default)]
    pub retry: RetryConfig,

    /// Extraction pipeline tuning
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// REST API settings
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Reject configurations that would deadlock or admit nothing
    pub fn validate(&self) -> Result<()> {
        let checks: [(bool, &str, &str); 9] = [
            (self.pool.max_sessions == 0, "pool.max_sessions", "must be at least 1"),
            (
                self.pool.max_pages_per_session == 0,
                "pool.max_pages_per_session",
                "must be at least 1",
            ),
            (
                self.download.max_concurrent_downloads == 0,
                "download.max_concurrent_downloads",
                "must be at least 1",
            ),
            (
                self.download.max_file_size == 0,
                "download.max_file_size",
                "must be greater than zero",
            ),
            (
                self.download.max_files_per_job == 0,
                "download.max_files_per_job",
                "must be at least 1",
            ),
            (
                self.jobs.max_active_jobs == 0,
                "jobs.max_active_jobs",
                "must be at least 1",
            ),
            (
                self.jobs.max_completed_jobs == 0,
                "jobs.max_completed_jobs",
                "must be at least 1",
            ),
            (
                self.retry.backoff_multiplier < 1.0,
                "retry.backoff_multiplier",
                "must be at least 1.0",
            ),
            (
                self.extraction.probe_concurrency == 0,
                "extraction.probe_concurrency",
                "must be at least 1",
            ),
        ];

        for (failed, key, message) in checks {
            if failed {
                return Err(Error::Config {
                    message: format!("{key} {message}"),
                    key: Some(key.to_string()),
                });
            }
        }

        if let Some(job_limit) = self.download.max_job_size
            && job_limit < self.download.max_file_size
        {
            tracing::warn!(
                max_job_size = job_limit,
                max_file_size = self.download.max_file_size,
                "max_job_size is below max_file_size; large single files will hit the job ceiling first"
            );
        }

        Ok(())
    }
}

// Default value functions
fn default_max_sessions() -> usize {
    2
}

fn default_max_pages_per_session() -> usize {
    5
}

fn default_acquire_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_navigation_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("archives")
}

fn default_max_concurrent() -> usize {
    5
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_redirects() -> usize {
    5
}

fn default_max_file_size() -> u64 {
    100 * 1024 * 1024 // 100 MiB
}

fn default_max_job_size() -> Option<u64> {
    Some(1024 * 1024 * 1024) // 1 GiB
}

fn default_max_files_per_job() -> usize {
    100
}

fn default_stagger_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
        .to_string()
}

fn default_max_active_jobs() -> usize {
    50
}

fn default_max_completed_jobs() -> usize {
    100
}

fn default_retention() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_probe_concurrency() -> usize {
    8
}

fn default_max_media_per_page() -> usize {
    500
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".into()]
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds, for sub-second settings)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.pool.max_sessions, 2);
        assert_eq!(config.pool.max_pages_per_session, 5);
        assert_eq!(config.download.max_files_per_job, 100);
        assert_eq!(config.download.stagger_delay, Duration::from_millis(100));
        assert_eq!(config.jobs.retention, Duration::from_secs(3600));
        assert_eq!(config.retry.max_attempts, 3);
        assert!(!config.retry.jitter);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn durations_use_their_declared_units() {
        let config: Config = serde_json::from_str(
            r#"{
                "pool": { "acquire_timeout": 2 },
                "retry": { "initial_delay": 250 },
                "download": { "stagger_delay": 5 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.pool.acquire_timeout, Duration::from_secs(2));
        assert_eq!(config.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(config.download.stagger_delay, Duration::from_millis(5));

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["retry"]["initial_delay"], 250);
        assert_eq!(json["pool"]["acquire_timeout"], 2);
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let mut config = Config::default();
        config.pool.max_sessions = 0;

        match config.validate() {
            Err(Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("pool.max_sessions"));
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_shrinking_backoff() {
        let mut config = Config::default();
        config.retry.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn pool_capacity_is_sessions_times_pages() {
        let pool = PoolConfig {
            max_sessions: 3,
            max_pages_per_session: 4,
            ..Default::default()
        };
        assert_eq!(pool.capacity(), 12);
    }
}
