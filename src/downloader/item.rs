//! Single-item download: admission, streaming and size enforcement

use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use url::Url;

use super::budget::{JobBudget, Reservation};
use super::speed::SpeedSampler;
use super::{DownloadOrchestrator, ProgressSink, emit_sample};
use crate::error::{Error, Result};
use crate::media;
use crate::retry::retry_with_backoff;
use crate::types::{DownloadedItem, Event, JobId};

/// Progress sink tagged with the item's position in its batch
#[derive(Clone, Copy)]
pub(super) struct ItemSink<'a> {
    pub(super) index: usize,
    pub(super) sink: &'a ProgressSink,
}

fn write_err(path: &Path) -> impl FnOnce(std::io::Error) -> Error + '_ {
    move |source| Error::Write {
        path: path.to_path_buf(),
        source,
    }
}

impl DownloadOrchestrator {
    /// Download one URL under the admission gate, retrying transient failures
    ///
    /// A failed attempt never leaves a file behind and gives its bytes back to
    /// the job budget.
    pub(super) async fn download_item(
        &self,
        url: &str,
        job_id: JobId,
        budget: &JobBudget,
        progress: Option<ItemSink<'_>>,
    ) -> Result<DownloadedItem> {
        let parsed = Url::parse(url).map_err(|e| Error::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if let Some(reason) = self.safety.rejection_reason(&parsed) {
            return Err(Error::UnsafeUrl(reason));
        }

        let _permit = self.admit().await?;
        tracing::debug!(job_id = %job_id, url = %parsed, in_flight = self.in_flight(), "download admitted");

        let parsed = &parsed;
        retry_with_backoff(&self.retry, move || {
            self.attempt(parsed, job_id, budget, progress)
        })
        .await
    }

    async fn attempt(
        &self,
        url: &Url,
        job_id: JobId,
        budget: &JobBudget,
        progress: Option<ItemSink<'_>>,
    ) -> Result<DownloadedItem> {
        let started = std::time::Instant::now();
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| super::send_error(url, e))?;

        let status = response.status();
        if !(status.is_success() || status.is_redirection()) {
            return Err(Error::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let limit = self.config.max_file_size;
        let declared = response.content_length();
        if let Some(len) = declared {
            if len > limit {
                tracing::warn!(url = %url, declared = len, limit, "declared size exceeds limit");
                return Err(Error::SizeExceeded {
                    url: url.to_string(),
                    size: len,
                    limit,
                });
            }
            if let Some(job_limit) = budget.limit()
                && !budget.fits(len)
            {
                return Err(Error::SizeExceeded {
                    url: url.to_string(),
                    size: budget.used().saturating_add(len),
                    limit: job_limit,
                });
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let media_type = content_type
            .as_deref()
            .and_then(media::type_from_content_type)
            .or_else(|| media::classify_url(url))
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "{url} is not an image or video ({})",
                    content_type.as_deref().unwrap_or("no content type")
                ))
            })?;

        let dir = self.type_dir(media_type);
        tokio::fs::create_dir_all(&dir).await.map_err(write_err(&dir))?;
        let ext = media::file_extension(url, content_type.as_deref(), media_type);
        let path = dir.join(media::unique_file_name(&job_id, &ext));

        let mut reservation = budget.reservation();
        let streamed = self
            .stream_to_file(response, url, &path, declared, job_id, &mut reservation, progress)
            .await;

        match streamed {
            Ok(size) => {
                reservation.commit();
                let elapsed_ms = started.elapsed().as_millis() as u64;
                tracing::debug!(job_id = %job_id, url = %url, size, elapsed_ms, path = %path.display(), "item downloaded");
                Ok(DownloadedItem {
                    job_id,
                    url: url.to_string(),
                    path,
                    size,
                    content_type,
                    media_type,
                    elapsed_ms,
                })
            }
            Err(e) => {
                remove_partial(&path).await;
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn stream_to_file(
        &self,
        response: reqwest::Response,
        url: &Url,
        path: &PathBuf,
        declared: Option<u64>,
        job_id: JobId,
        reservation: &mut Reservation<'_>,
        progress: Option<ItemSink<'_>>,
    ) -> Result<u64> {
        let limit = self.config.max_file_size;
        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(write_err(path))?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        let mut sampler = SpeedSampler::new(tokio::time::Instant::now());

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            let len = chunk.len() as u64;
            let next = written.saturating_add(len);

            // Covers servers that omit or understate Content-Length.
            if next > limit {
                tracing::warn!(url = %url, bytes = next, limit, "stream exceeded size limit");
                return Err(Error::SizeExceeded {
                    url: url.to_string(),
                    size: next,
                    limit,
                });
            }
            if let Err(would_use) = reservation.grow(len) {
                let job_limit = reservation.limit().unwrap_or(u64::MAX);
                tracing::warn!(url = %url, job_bytes = would_use, job_limit, "job byte budget exhausted");
                return Err(Error::SizeExceeded {
                    url: url.to_string(),
                    size: would_use,
                    limit: job_limit,
                });
            }

            file.write_all(&chunk).await.map_err(write_err(path))?;
            written = next;

            if let Some(speed_bps) = sampler.update(written, tokio::time::Instant::now())
                && let Some(item) = progress
            {
                emit_sample(
                    Some(item.sink),
                    Event::ItemProgress {
                        id: job_id,
                        index: item.index,
                        url: url.to_string(),
                        bytes: written,
                        total_bytes: declared,
                        speed_bps,
                    },
                );
            }
        }

        file.flush().await.map_err(write_err(path))?;
        Ok(written)
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "removed partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove partial download"),
    }
}
