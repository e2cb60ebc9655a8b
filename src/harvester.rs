//! `MediaHarvester`: the facade owning pool, orchestrator and registry
//!
//! Every public operation is admission-checked and returns immediately with a
//! job id; the work runs on spawned tasks that always settle the job as
//! completed or failed. Progress and lifecycle changes fan out on a broadcast
//! channel (see [`MediaHarvester::subscribe`]).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::archive::ArchiveBuilder;
use crate::browser::{BrowserLauncher, PoolStats, ResourcePool};
use crate::config::Config;
use crate::downloader::{DownloadOrchestrator, build_client};
use crate::error::{Error, Result};
use crate::extract::MediaExtractor;
use crate::jobs::{self, JobPayload, JobRegistry, spawn_sweeper};
use crate::safety::{SsrfGuard, UrlSafety};
use crate::scanner::{HtmlPageScanner, PageScanner};
use crate::types::{
    DownloadSummary, Event, JobId, JobKind, JobOutcome, JobProgress, JobStatusView,
    MediaFilter,
};

/// Buffered events per subscriber before the slowest one starts lagging
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Orchestrator → registry progress channel size, per download job
const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// Media extraction and bulk download service
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct MediaHarvester {
    config: Arc<Config>,
    pool: ResourcePool,
    extractor: MediaExtractor,
    orchestrator: DownloadOrchestrator,
    archiver: ArchiveBuilder,
    registry: Arc<JobRegistry>,
    safety: Arc<dyn UrlSafety>,
    event_tx: broadcast::Sender<Event>,
    accepting: Arc<AtomicBool>,
    cancel_token: CancellationToken,
}

impl MediaHarvester {
    /// Create a harvester with the default HTML scanner and SSRF guard
    pub async fn new(config: Config, launcher: Arc<dyn BrowserLauncher>) -> Result<Self> {
        Self::with_components(
            config,
            launcher,
            Arc::new(HtmlPageScanner),
            Arc::new(SsrfGuard::new()),
        )
        .await
    }

    /// Create a harvester with explicit scanner and safety collaborators
    ///
    /// Validates `config`, creates the download and archive directories and
    /// starts the expiry sweeper.
    pub async fn with_components(
        config: Config,
        launcher: Arc<dyn BrowserLauncher>,
        scanner: Arc<dyn PageScanner>,
        safety: Arc<dyn UrlSafety>,
    ) -> Result<Self> {
        config.validate()?;

        for dir in [&config.download.download_dir, &config.download.archive_dir] {
            tokio::fs::create_dir_all(dir).await.map_err(|source| Error::Write {
                path: dir.clone(),
                source,
            })?;
        }

        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let registry = Arc::new(JobRegistry::new(config.jobs.clone()).with_events(event_tx.clone()));
        let cancel_token = CancellationToken::new();
        spawn_sweeper(registry.clone(), config.jobs.sweep_interval, cancel_token.clone());

        let client = build_client(&config.download, safety.clone())?;
        let pool = ResourcePool::new(launcher.clone(), config.pool.clone());
        let extractor = MediaExtractor::new(
            pool.clone(),
            scanner,
            safety.clone(),
            client.clone(),
            config.retry.clone(),
            config.extraction.clone(),
        );
        let orchestrator = DownloadOrchestrator::new(
            config.download.clone(),
            config.retry.clone(),
            client,
            safety.clone(),
        );
        let archiver = ArchiveBuilder::new(config.download.archive_dir.clone());

        tracing::info!(
            backend = launcher.name(),
            max_sessions = config.pool.max_sessions,
            max_concurrent_downloads = config.download.max_concurrent_downloads,
            "media harvester started"
        );

        Ok(Self {
            config: Arc::new(config),
            pool,
            extractor,
            orchestrator,
            archiver,
            registry,
            safety,
            event_tx,
            accepting: Arc::new(AtomicBool::new(true)),
            cancel_token,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Subscribe to job and progress events
    ///
    /// Subscribers that fall more than the channel capacity behind receive
    /// `RecvError::Lagged` and skip ahead.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Browser pool counters
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Whether new jobs are being accepted
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Number of running jobs
    pub fn active_jobs(&self) -> usize {
        self.registry.active_count()
    }

    fn emit(&self, event: Event) {
        // No subscribers is not an error.
        let _ = self.event_tx.send(event);
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.is_accepting() {
            Ok(())
        } else {
            Err(Error::ShuttingDown)
        }
    }

    /// Start scanning `url` for media; returns the extraction job id
    ///
    /// # Errors
    ///
    /// `InvalidUrl` for unparseable or non-http(s) targets, `UnsafeUrl` when
    /// the safety check rejects the target, `InvalidInput` for inverted size
    /// bounds, `TooManyActiveJobs` at the active ceiling, `ShuttingDown` after
    /// [`shutdown`](Self::shutdown).
    pub fn start_extraction(&self, url: &str, filter: MediaFilter) -> Result<JobId> {
        self.ensure_accepting()?;

        let target = parse_target(url)?;
        if let Some(reason) = self.safety.rejection_reason(&target) {
            return Err(Error::UnsafeUrl(reason));
        }
        if let Some(max) = filter.max_size_bytes
            && max < filter.min_size_bytes
        {
            return Err(Error::InvalidInput(format!(
                "max_size_bytes ({max}) is below min_size_bytes ({})",
                filter.min_size_bytes
            )));
        }

        let id = self
            .registry
            .create(JobPayload::extraction(target.as_str(), filter.clone()))?;
        tracing::info!(job_id = %id, url = %target, "extraction started");
        self.emit(Event::ExtractionStarted {
            id,
            url: target.to_string(),
        });

        let this = self.clone();
        tokio::spawn(async move { this.run_extraction(id, target, filter).await });
        Ok(id)
    }

    async fn run_extraction(self, id: JobId, target: Url, filter: MediaFilter) {
        let extractor = self.extractor.clone();
        let work = tokio::spawn(async move { extractor.extract(&target, &filter).await });

        let outcome = match work.await {
            Ok(outcome) => outcome,
            Err(e) => Err(Error::Other(format!("extraction task aborted: {e}"))),
        };

        match outcome {
            Ok(result) => {
                let media_count = result.media.len();
                match self.registry.complete(&id, JobOutcome::Extraction(result)).await {
                    Ok(()) => self.emit(Event::ExtractionComplete { id, media_count }),
                    Err(e) => tracing::debug!(job_id = %id, error = %e, "extraction finished after removal"),
                }
            }
            Err(e) => self.fail_job(id, &e).await,
        }
    }

    async fn fail_job(&self, id: JobId, error: &Error) {
        tracing::error!(job_id = %id, error = %error, kind = %error.kind(), "job failed");
        match self.registry.fail(&id, error.to_string()).await {
            Ok(()) => self.emit(Event::JobFailed {
                id,
                error: error.to_string(),
            }),
            Err(e) => tracing::debug!(job_id = %id, error = %e, "job failed after removal"),
        }
    }

    /// Current status of any job
    pub fn get_job_status(&self, id: &JobId) -> Result<JobStatusView> {
        self.registry
            .status(id)
            .ok_or_else(|| Error::JobNotFound(id.to_string()))
    }

    /// Download `urls` found by extraction job `source`; returns the download job id
    ///
    /// # Errors
    ///
    /// `JobNotFound` for an unknown source, `InvalidInput` when the source is
    /// not an extraction job or `urls` is empty, `TooManyFiles` above
    /// `max_files_per_job`, plus the admission errors of
    /// [`start_extraction`](Self::start_extraction).
    pub fn start_bulk_download(&self, source: &JobId, urls: Vec<String>) -> Result<JobId> {
        self.ensure_accepting()?;

        let record = self
            .registry
            .get(source)
            .ok_or_else(|| Error::JobNotFound(source.to_string()))?;
        if record.kind() != JobKind::Extraction {
            return Err(Error::InvalidInput(format!(
                "job {source} is not an extraction job"
            )));
        }
        if urls.is_empty() {
            return Err(Error::InvalidInput("no URLs to download".into()));
        }
        let limit = self.config.download.max_files_per_job;
        if urls.len() > limit {
            return Err(Error::TooManyFiles {
                requested: urls.len(),
                limit,
            });
        }

        let id = self
            .registry
            .create(JobPayload::download(Some(*source), urls.clone()))?;
        tracing::info!(job_id = %id, source_job = %source, total = urls.len(), "bulk download started");

        let this = self.clone();
        tokio::spawn(async move { this.run_download(id, urls).await });
        Ok(id)
    }

    async fn run_download(self, id: JobId, urls: Vec<String>) {
        let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let forwarder = tokio::spawn(forward_progress(
            id,
            rx,
            self.registry.clone(),
            self.event_tx.clone(),
        ));

        let orchestrator = self.orchestrator.clone();
        let work = tokio::spawn(async move { orchestrator.download_many(urls, id, Some(tx)).await });
        let joined = work.await;
        // The sender went away with the download task; drain what is left.
        if let Err(e) = forwarder.await {
            tracing::warn!(job_id = %id, error = %e, "progress forwarder aborted");
        }

        let result = match joined {
            Ok(result) => result,
            Err(e) => {
                let error = Error::Other(format!("download task aborted: {e}"));
                self.fail_job(id, &error).await;
                return;
            }
        };

        let mut files: Vec<PathBuf> = result.completed.iter().map(|item| item.path.clone()).collect();
        let archive = if result.completed.is_empty() {
            None
        } else {
            match self.archiver.build(&result).await {
                Ok(info) => {
                    files.push(info.path.clone());
                    Some(info)
                }
                Err(e) => {
                    self.adopt_files(id, files).await;
                    self.fail_job(id, &e).await;
                    return;
                }
            }
        };

        if !self.adopt_files(id, files).await {
            return;
        }

        let archive_path = archive.as_ref().map(|info| info.path.clone());
        let summary = DownloadSummary { result, archive };
        match self.registry.complete(&id, JobOutcome::Download(summary)).await {
            Ok(()) => {
                if let Some(path) = archive_path {
                    self.emit(Event::ArchiveReady { id, path });
                }
            }
            Err(e) => tracing::debug!(job_id = %id, error = %e, "download finished after removal"),
        }
    }

    /// Hand files to the job so they are deleted with it
    ///
    /// Returns false (after deleting the files) when the job is already gone.
    async fn adopt_files(&self, id: JobId, files: Vec<PathBuf>) -> bool {
        if let Err(e) = self.registry.attach_files(&id, files.iter().cloned()) {
            tracing::debug!(job_id = %id, error = %e, "job removed while running, deleting its files");
            jobs::delete_files(&id, &files).await;
            return false;
        }
        true
    }

    /// Archive path of a finished download job
    ///
    /// # Errors
    ///
    /// `JobNotFound` for unknown ids; `InvalidInput` when the job is not a
    /// download, is still running, or produced no archive.
    pub fn get_archive(&self, id: &JobId) -> Result<PathBuf> {
        let record = self
            .registry
            .get(id)
            .ok_or_else(|| Error::JobNotFound(id.to_string()))?;

        match &record.payload {
            JobPayload::Download {
                summary: Some(DownloadSummary {
                    archive: Some(info), ..
                }),
                ..
            } if info.path.exists() => Ok(info.path.clone()),
            JobPayload::Download { .. } => Err(Error::InvalidInput(format!(
                "no archive available for job {id}"
            ))),
            JobPayload::Extraction { .. } => Err(Error::InvalidInput(format!(
                "job {id} is not a download job"
            ))),
        }
    }

    /// Delete a job, every download job started from it, and their files
    ///
    /// Returns the ids removed.
    pub async fn cleanup(&self, id: &JobId) -> Result<Vec<JobId>> {
        let removed = self.registry.remove(id).await?;
        tracing::info!(job_id = %id, removed = removed.len(), "job cleaned up");
        Ok(removed)
    }

    /// Stop accepting jobs, stop the sweeper and close every browser session
    ///
    /// Downloads waiting for admission fail with `ShuttingDown`; running jobs
    /// settle on their own. Calling this more than once is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!("initiating shutdown");

        self.cancel_token.cancel();
        self.orchestrator.close();
        self.pool.shutdown().await;
        self.emit(Event::Shutdown);

        tracing::info!("shutdown complete");
        Ok(())
    }
}

fn parse_target(url: &str) -> Result<Url> {
    let parsed = Url::parse(url.trim()).map_err(|e| Error::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }
    Ok(parsed)
}

/// Running per-item state folded into [`JobProgress`]
#[derive(Default)]
struct ProgressTracker {
    settled_bytes: u64,
    /// Latest (bytes, speed) per item index
    in_flight: HashMap<usize, (u64, u64)>,
}

impl ProgressTracker {
    /// Fold one event in; returns false for events that carry no progress
    fn observe(&mut self, event: &Event, progress: &mut JobProgress) -> bool {
        match event {
            Event::ItemProgress {
                index,
                bytes,
                speed_bps,
                ..
            } => {
                self.in_flight.insert(*index, (*bytes, *speed_bps));
            }
            Event::ItemComplete {
                index,
                size,
                completed,
                failed,
                ..
            } => {
                self.in_flight.remove(index);
                self.settled_bytes += size;
                progress.completed = *completed;
                progress.failed = *failed;
            }
            Event::ItemFailed {
                index,
                completed,
                failed,
                ..
            } => {
                self.in_flight.remove(index);
                progress.completed = *completed;
                progress.failed = *failed;
            }
            _ => return false,
        }
        progress.bytes_downloaded =
            self.settled_bytes + self.in_flight.values().map(|(bytes, _)| bytes).sum::<u64>();
        progress.speed_bps = self.in_flight.values().map(|(_, speed)| speed).sum();
        true
    }
}

/// Apply orchestrator events to the registry and re-broadcast them
async fn forward_progress(
    id: JobId,
    mut rx: mpsc::Receiver<Event>,
    registry: Arc<JobRegistry>,
    event_tx: broadcast::Sender<Event>,
) {
    let mut tracker = ProgressTracker::default();
    while let Some(event) = rx.recv().await {
        let mut updated = None;
        let result = registry.update_progress(&id, |progress| {
            if tracker.observe(&event, progress) {
                updated = Some(progress.clone());
            }
        });
        if result.is_err() {
            // Job removed mid-flight; keep draining so the sender never blocks.
            tracing::trace!(job_id = %id, "dropping progress for removed job");
        } else if let Some(progress) = updated {
            tracing::debug!(
                job_id = %id,
                completed = progress.completed,
                failed = progress.failed,
                bytes = progress.bytes_downloaded,
                "download progress"
            );
        }
        let _ = event_tx.send(event);
    }
}
