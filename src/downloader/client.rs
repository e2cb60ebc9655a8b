//! Shared HTTP client for downloads and metadata probes

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use reqwest::redirect;
use std::sync::Arc;
use url::Url;

use crate::config::DownloadConfig;
use crate::error::{Error, Result};
use crate::safety::UrlSafety;

const ACCEPT_MEDIA: &str = "image/avif,image/webp,image/apng,image/*,video/*,*/*;q=0.8";

/// Build the client used for every outbound media request
///
/// Redirects are followed up to `max_redirects` hops and every hop is
/// re-checked against `safety`, so a public URL cannot bounce the fetch
/// into a private network.
pub fn build_client(config: &DownloadConfig, safety: Arc<dyn UrlSafety>) -> Result<reqwest::Client> {
    let max_redirects = config.max_redirects;
    let policy = redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() > max_redirects {
            attempt.error(format!("more than {max_redirects} redirects"))
        } else if !safety.is_safe_url(attempt.url()) {
            let reason = format!("redirect to unsafe URL {}", attempt.url());
            attempt.error(UnsafeRedirect(reason))
        } else {
            attempt.follow()
        }
    });

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_MEDIA));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

    reqwest::Client::builder()
        .timeout(config.request_timeout)
        .connect_timeout(config.request_timeout)
        .user_agent(config.user_agent.clone())
        .default_headers(headers)
        .redirect(policy)
        .build()
        .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))
}

/// Redirect hop refused by the safety policy
#[derive(Debug)]
struct UnsafeRedirect(String);

impl std::fmt::Display for UnsafeRedirect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for UnsafeRedirect {}

/// Map a failed `send()` onto the crate error
///
/// A hop refused by the safety policy becomes [`Error::UnsafeUrl`] and a
/// redirect chain over the limit becomes [`Error::InvalidInput`]; neither is
/// retried.
pub(crate) fn send_error(url: &Url, err: reqwest::Error) -> Error {
    if !err.is_redirect() {
        return Error::Network(err);
    }
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        if let Some(blocked) = cause.downcast_ref::<UnsafeRedirect>() {
            return Error::UnsafeUrl(format!("{url}: {blocked}"));
        }
        source = cause.source();
    }
    Error::InvalidInput(format!("{url}: {err}"))
}
