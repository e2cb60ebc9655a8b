//! HEAD probes filling in size, content type and modification time.

use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, LAST_MODIFIED};
use url::Url;

use crate::config::RetryConfig;
use crate::downloader::send_error;
use crate::error::{Error, Result};
use crate::retry::retry_with_backoff;

/// Metadata learned from a HEAD request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeInfo {
    /// Declared length
    pub size: Option<u64>,
    /// Declared MIME type
    pub content_type: Option<String>,
    /// Last-Modified header
    pub last_modified: Option<DateTime<Utc>>,
}

/// Issue a HEAD request for `url`, retrying transient failures
pub async fn probe(client: &reqwest::Client, url: &Url, retry: &RetryConfig) -> Result<ProbeInfo> {
    let response = retry_with_backoff(retry, move || async move {
        let response = client
            .head(url.clone())
            .send()
            .await
            .map_err(|e| send_error(url, e))?;
        let status = response.status();
        if !(status.is_success() || status.is_redirection()) {
            return Err(Error::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    })
    .await?;

    Ok(parse_headers(response.headers()))
}

fn parse_headers(headers: &HeaderMap) -> ProbeInfo {
    let text = |name| headers.get(name).and_then(|v| v.to_str().ok());

    ProbeInfo {
        size: text(CONTENT_LENGTH).and_then(|v| v.trim().parse().ok()),
        content_type: text(CONTENT_TYPE).map(str::to_string),
        last_modified: text(LAST_MODIFIED)
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|d| d.with_timezone(&Utc)),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn parses_known_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("2048"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("image/jpeg"));
        headers.insert(
            LAST_MODIFIED,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );

        let info = parse_headers(&headers);
        assert_eq!(info.size, Some(2048));
        assert_eq!(info.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(
            info.last_modified.unwrap().to_rfc3339(),
            "2015-10-21T07:28:00+00:00"
        );
    }

    #[test]
    fn missing_or_garbage_headers_are_unknown() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("lots"));
        headers.insert(LAST_MODIFIED, HeaderValue::from_static("yesterday"));

        assert_eq!(parse_headers(&headers), ProbeInfo::default());
    }
}
