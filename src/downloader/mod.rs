//! Download orchestrator split into focused submodules.
//!
//! - [`client`] - HTTP client with safety-checked redirects
//! - [`item`] - Single-item streaming with size ceilings
//! - [`budget`] - Per-job byte budget
//! - [`speed`] - Windowed throughput sampling
//!
//! All downloads pass through one global admission gate, so
//! `max_concurrent_downloads` bounds the whole orchestrator rather than
//! each job.

mod budget;
mod client;
mod item;
mod speed;


pub use budget::JobBudget;
pub use client::build_client;
pub(crate) use client::send_error;
pub use speed::{SAMPLE_WINDOW, SpeedSampler};

use item::ItemSink;

use futures::future::join_all;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::{Semaphore, mpsc};

use crate::config::{DownloadConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::safety::UrlSafety;
use crate::types::{DownloadedItem, Event, FailedItem, JobId, JobResult};

/// Channel receiving per-item and aggregate progress events
///
/// `ItemProgress` samples are dropped when the channel is full; completion
/// events always wait for capacity.
pub type ProgressSink = mpsc::Sender<Event>;

/// Streams media URLs to local storage under a global concurrency cap
#[derive(Clone)]
pub struct DownloadOrchestrator {
    client: reqwest::Client,
    config: Arc<DownloadConfig>,
    retry: RetryConfig,
    safety: Arc<dyn UrlSafety>,
    /// Global admission gate (respects max_concurrent_downloads)
    gate: Arc<Semaphore>,
}

#[derive(Default)]
struct Tally {
    completed: usize,
    failed: usize,
}

impl DownloadOrchestrator {
    /// Create an orchestrator using `client` for all requests
    pub fn new(
        config: DownloadConfig,
        retry: RetryConfig,
        client: reqwest::Client,
        safety: Arc<dyn UrlSafety>,
    ) -> Self {
        let permits = config.max_concurrent_downloads;
        Self {
            client,
            config: Arc::new(config),
            retry,
            safety,
            gate: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Download configuration
    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Directory that receives files of the given type
    pub fn type_dir(&self, media_type: crate::types::MediaType) -> PathBuf {
        self.config.download_dir.join(media_type.dir_name())
    }

    /// Downloads currently holding an admission permit
    pub fn in_flight(&self) -> usize {
        self.config
            .max_concurrent_downloads
            .saturating_sub(self.gate.available_permits())
    }

    /// Stop admitting downloads; waiting items fail with `ShuttingDown`
    pub fn close(&self) {
        self.gate.close();
    }

    /// Download one URL for `job_id` with its own unlimited job budget
    pub async fn download_one(&self, url: &str, job_id: JobId) -> Result<DownloadedItem> {
        let budget = JobBudget::new(None);
        self.download_item(url, job_id, &budget, None).await
    }

    /// Download every URL, never failing as a whole
    ///
    /// Item starts are staggered by `stagger_delay * index`. Each item settles
    /// independently; the result lists successes in input order and failures
    /// with their error classification.
    pub async fn download_many(
        &self,
        urls: Vec<String>,
        job_id: JobId,
        progress: Option<ProgressSink>,
    ) -> JobResult {
        let started = Instant::now();
        let total = urls.len();
        let budget = JobBudget::new(self.config.max_job_size);
        let tally = Mutex::new(Tally::default());

        tracing::info!(job_id = %job_id, total, "starting bulk download");
        emit(progress.as_ref(), Event::DownloadStarted { id: job_id, total }).await;

        let tasks = urls.into_iter().enumerate().map(|(index, url)| {
            let budget = &budget;
            let tally = &tally;
            let progress = progress.as_ref();
            async move {
                let delay = self.config.stagger_delay.saturating_mul(index as u32);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }

                let sink = progress.map(|sink| ItemSink { index, sink });
                let outcome = self.download_item(&url, job_id, budget, sink).await;

                let (completed, failed) = {
                    let mut tally = tally.lock().unwrap_or_else(PoisonError::into_inner);
                    match &outcome {
                        Ok(_) => tally.completed += 1,
                        Err(_) => tally.failed += 1,
                    }
                    (tally.completed, tally.failed)
                };

                let event = match &outcome {
                    Ok(item) => Event::ItemComplete {
                        id: job_id,
                        index,
                        url: url.clone(),
                        size: item.size,
                        completed,
                        failed,
                        total,
                    },
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, url = %url, error = %e, "item failed");
                        Event::ItemFailed {
                            id: job_id,
                            index,
                            url: url.clone(),
                            error_kind: e.kind(),
                            completed,
                            failed,
                            total,
                        }
                    }
                };
                emit(progress, event).await;

                (url, outcome)
            }
        });

        let outcomes = join_all(tasks).await;

        let mut result = JobResult {
            job_id,
            completed: Vec::new(),
            failed: Vec::new(),
            total_bytes: 0,
            duration_ms: 0,
        };
        for (url, outcome) in outcomes {
            match outcome {
                Ok(item) => {
                    result.total_bytes += item.size;
                    result.completed.push(item);
                }
                Err(e) => result.failed.push(FailedItem {
                    job_id,
                    url,
                    error_kind: e.kind(),
                    message: e.to_string(),
                    status: e.http_status(),
                }),
            }
        }
        result.duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            job_id = %job_id,
            completed = result.completed.len(),
            failed = result.failed.len(),
            total_bytes = result.total_bytes,
            duration_ms = result.duration_ms,
            "bulk download settled"
        );
        emit(
            progress.as_ref(),
            Event::DownloadComplete {
                id: job_id,
                completed: result.completed.len(),
                failed: result.failed.len(),
            },
        )
        .await;

        result
    }

    async fn admit(&self) -> Result<tokio::sync::SemaphorePermit<'_>> {
        self.gate.acquire().await.map_err(|_| Error::ShuttingDown)
    }
}

async fn emit(progress: Option<&ProgressSink>, event: Event) {
    if let Some(tx) = progress {
        // Receiver gone means nobody is tracking this job any more.
        let _ = tx.send(event).await;
    }
}

fn emit_sample(progress: Option<&ProgressSink>, event: Event) {
    if let Some(tx) = progress
        && let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(event)
    {
        tracing::trace!("progress channel full, dropping sample");
    }
}
