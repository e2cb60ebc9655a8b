//! Extraction pipeline: load a page in a pooled browser tab and turn what it
//! references into filtered [`MediaDescriptor`]s
//!
//! Steps, in order:
//! 1. lease a page from the [`ResourcePool`] (always released, even on error)
//! 2. navigate with retry, treating HTTP >= 400 as a failed load
//! 3. scan DOM and network traffic via the [`PageScanner`]
//! 4. normalize and deduplicate candidates
//! 5. reject unsafe URLs (reported in `errors`, not fatal)
//! 6. optionally HEAD-probe for size, type and modification time
//! 7. apply the [`MediaFilter`]

mod normalize;
mod probe;

pub use normalize::normalize_candidates;
pub use probe::{ProbeInfo, probe};

use futures::StreamExt;
use std::sync::Arc;
use url::Url;

use crate::browser::{PageHandle, ResourcePool};
use crate::config::{ExtractionConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::media;
use crate::retry::retry_with_backoff;
use crate::safety::UrlSafety;
use crate::scanner::{PageScanner, ScanOutput};
use crate::types::{ExtractionResult, MediaDescriptor, MediaFilter};

/// Runs extractions against a shared browser pool
#[derive(Clone)]
pub struct MediaExtractor {
    pool: ResourcePool,
    scanner: Arc<dyn PageScanner>,
    safety: Arc<dyn UrlSafety>,
    client: reqwest::Client,
    retry: RetryConfig,
    config: ExtractionConfig,
}

impl MediaExtractor {
    /// Create an extractor; `client` is only used for metadata probes
    pub fn new(
        pool: ResourcePool,
        scanner: Arc<dyn PageScanner>,
        safety: Arc<dyn UrlSafety>,
        client: reqwest::Client,
        retry: RetryConfig,
        config: ExtractionConfig,
    ) -> Self {
        Self {
            pool,
            scanner,
            safety,
            client,
            retry,
            config,
        }
    }

    /// Extract media referenced by `target`
    ///
    /// Fails only when the page itself cannot be loaded or scanned. Problems
    /// with individual candidates end up in [`ExtractionResult::errors`].
    pub async fn extract(&self, target: &Url, filter: &MediaFilter) -> Result<ExtractionResult> {
        if let Some(reason) = self.safety.rejection_reason(target) {
            return Err(Error::UnsafeUrl(reason));
        }

        let handle = self.pool.acquire().await?;
        let scanned = self.load_and_scan(&handle, target).await;
        self.pool.release(handle).await;
        let scan = scanned?;

        let raw = scan.dom_media_urls.into_iter().chain(scan.network_media_urls);
        let candidates = normalize_candidates(target, raw, self.config.max_media_per_page);
        let candidate_count = candidates.len();

        let mut errors = Vec::new();
        let mut safe = Vec::with_capacity(candidates.len());
        for url in candidates {
            match self.safety.rejection_reason(&url) {
                Some(reason) => errors.push(format!("{url}: rejected: {reason}")),
                None => safe.push(url),
            }
        }

        let described = if self.config.probe_metadata {
            self.describe_with_probes(safe, &mut errors).await
        } else {
            safe.into_iter()
                .filter_map(|url| media::classify_url(&url).map(|t| MediaDescriptor::new(url, t)))
                .collect()
        };

        let media: Vec<_> = described.into_iter().filter(|m| filter.accepts(m)).collect();

        tracing::info!(
            url = %target,
            candidates = candidate_count,
            kept = media.len(),
            errors = errors.len(),
            "extraction finished"
        );

        Ok(ExtractionResult {
            url: target.to_string(),
            media,
            errors,
            candidates: candidate_count,
        })
    }

    async fn load_and_scan(&self, handle: &PageHandle, target: &Url) -> Result<ScanOutput> {
        let page = handle.page();
        let timeout = self.pool.config().navigation_timeout;

        let navigation = retry_with_backoff(&self.retry, move || async move {
            let navigation = page.navigate(target.as_str(), timeout).await?;
            match navigation.status {
                Some(status) if status >= 400 => Err(Error::Http {
                    status,
                    url: target.to_string(),
                }),
                _ => Ok(navigation),
            }
        })
        .await?;

        if let Some(final_url) = navigation.final_url.as_deref()
            && final_url != target.as_str()
        {
            tracing::debug!(url = %target, final_url, "page redirected");
        }

        self.scanner.scan(page, target).await
    }

    async fn describe_with_probes(&self, urls: Vec<Url>, errors: &mut Vec<String>) -> Vec<MediaDescriptor> {
        let client = &self.client;
        let retry = &self.retry;

        let probed: Vec<(Url, Result<ProbeInfo>)> = futures::stream::iter(urls)
            .map(|url| async move {
                let info = probe(client, &url, retry).await;
                (url, info)
            })
            .buffered(self.config.probe_concurrency)
            .collect()
            .await;

        let mut described = Vec::with_capacity(probed.len());
        for (url, info) in probed {
            let info = match info {
                Ok(info) => info,
                Err(e) => {
                    tracing::debug!(url = %url, error = %e, "metadata probe failed");
                    errors.push(format!("{url}: probe failed: {e}"));
                    ProbeInfo::default()
                }
            };

            let media_type = info
                .content_type
                .as_deref()
                .and_then(media::type_from_content_type)
                .or_else(|| media::classify_url(&url));
            let Some(media_type) = media_type else {
                continue;
            };

            described.push(MediaDescriptor {
                url: url.to_string(),
                media_type,
                size: info.size,
                content_type: info.content_type,
                last_modified: info.last_modified,
            });
        }
        described
    }
}
