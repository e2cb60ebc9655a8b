//! Page scanning: finding candidate media URLs in a loaded page
//!
//! The core only needs the [`PageScanner`] seam. [`HtmlPageScanner`] is a
//! straightforward default that reads the serialized DOM with `scraper` and
//! merges in whatever media the page fetched over the network.

use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

use crate::browser::BrowserPage;
use crate::error::Result;
use crate::media;

/// Raw scan output; URLs may be relative and are normalized by the caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutput {
    /// References found in the DOM, in document order, deduplicated
    pub dom_media_urls: Vec<String>,
    /// Media responses observed on the network, deduplicated
    pub network_media_urls: Vec<String>,
}

/// Finds media references in a loaded page
#[async_trait]
pub trait PageScanner: Send + Sync {
    /// Scan the page currently loaded from `target`
    async fn scan(&self, page: &dyn BrowserPage, target: &Url) -> Result<ScanOutput>;
}

/// Default DOM + network scanner
#[derive(Debug, Clone, Default)]
pub struct HtmlPageScanner;

#[async_trait]
impl PageScanner for HtmlPageScanner {
    async fn scan(&self, page: &dyn BrowserPage, target: &Url) -> Result<ScanOutput> {
        let html = page.content().await?;
        let network = page.network_media_urls().await;

        let dom_media_urls = extract_media_refs(&html);
        tracing::debug!(
            url = %target,
            dom = dom_media_urls.len(),
            network = network.len(),
            "scanned page"
        );

        Ok(ScanOutput {
            dom_media_urls,
            network_media_urls: dedupe(network),
        })
    }
}

/// Attribute-bearing selectors that reference media directly
const DIRECT_SOURCES: &[(&str, &str)] = &[
    ("img[src]", "src"),
    ("img[data-src]", "data-src"),
    ("video[src]", "src"),
    ("video[poster]", "poster"),
    ("video source[src]", "src"),
    ("picture source[srcset]", "srcset"),
    ("img[srcset]", "srcset"),
    ("meta[property=\"og:image\"]", "content"),
    ("meta[property=\"og:video\"]", "content"),
    ("meta[name=\"twitter:image\"]", "content"),
];

/// Media references in an HTML document, in document order
pub fn extract_media_refs(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let mut refs = Vec::new();

    for (selector, attr) in DIRECT_SOURCES {
        let selector = match Selector::parse(selector) {
            Ok(s) => s,
            Err(_) => continue,
        };
        for el in doc.select(&selector) {
            let Some(value) = el.value().attr(attr) else {
                continue;
            };
            if *attr == "srcset" {
                refs.extend(parse_srcset(value));
            } else {
                let value = value.trim();
                if !value.is_empty() {
                    refs.push(value.to_string());
                }
            }
        }
    }

    // Links are only media when their target looks like a media file.
    if let Ok(selector) = Selector::parse("a[href]") {
        for el in doc.select(&selector) {
            let Some(href) = el.value().attr("href").map(str::trim) else {
                continue;
            };
            let looks_like_media = href
                .split(['?', '#'])
                .next()
                .and_then(|path| path.rsplit_once('.'))
                .is_some_and(|(_, ext)| media::type_from_extension(ext).is_some());
            if looks_like_media {
                refs.push(href.to_string());
            }
        }
    }

    dedupe(refs)
}

/// URLs from a `srcset` attribute (`url 1x, url 2x` or `url 480w, ...`)
fn parse_srcset(srcset: &str) -> Vec<String> {
    srcset
        .split(',')
        .filter_map(|candidate| candidate.split_whitespace().next())
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect()
}

fn dedupe(urls: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.into_iter().filter(|u| seen.insert(u.clone())).collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_images_videos_and_meta() {
        let html = r#"
            <html><head>
              <meta property="og:image" content="https://cdn.example.com/og.jpg">
            </head><body>
              <img src="/a.png">
              <img srcset="/b-1x.webp 1x, /b-2x.webp 2x">
              <video poster="/poster.jpg"><source src="/clip.mp4" type="video/mp4"></video>
              <a href="/download/full.jpeg?size=xl">full</a>
              <a href="/about.html">about</a>
            </body></html>
        "#;

        let refs = extract_media_refs(html);
        for expected in [
            "/a.png",
            "/b-1x.webp",
            "/b-2x.webp",
            "/poster.jpg",
            "/clip.mp4",
            "/download/full.jpeg?size=xl",
            "https://cdn.example.com/og.jpg",
        ] {
            assert!(refs.contains(&expected.to_string()), "missing {expected}: {refs:?}");
        }
        assert!(!refs.iter().any(|r| r.contains("about.html")));
    }

    #[test]
    fn duplicates_are_removed() {
        let html = r#"<img src="/same.png"><img src="/same.png"><img data-src="/same.png">"#;
        assert_eq!(extract_media_refs(html), vec!["/same.png".to_string()]);
    }

    #[test]
    fn srcset_descriptors_are_stripped() {
        assert_eq!(
            parse_srcset(" a.jpg 480w , b.jpg 800w,c.jpg"),
            vec!["a.jpg", "b.jpg", "c.jpg"]
        );
    }

    #[tokio::test]
    async fn scanner_merges_network_media() {
        use crate::browser::testing::ScriptedBrowser;
        use crate::browser::{BrowserLauncher, ResourcePool};
        use crate::config::PoolConfig;
        use std::sync::Arc;
        use std::time::Duration;

        let browser = ScriptedBrowser::new()
            .with_page("https://example.com/", r#"<img src="/a.png">"#)
            .with_network_media(
                "https://example.com/",
                &["https://cdn.example.com/v.mp4", "https://cdn.example.com/v.mp4"],
            );
        let launcher: Arc<dyn BrowserLauncher> = Arc::new(browser);
        let pool = ResourcePool::new(launcher, PoolConfig::default());

        let handle = pool.acquire().await.unwrap();
        handle
            .page()
            .navigate("https://example.com/", Duration::from_secs(1))
            .await
            .unwrap();
        let target = Url::parse("https://example.com/").unwrap();
        let output = HtmlPageScanner.scan(handle.page(), &target).await.unwrap();
        pool.release(handle).await;

        assert_eq!(output.dom_media_urls, vec!["/a.png"]);
        assert_eq!(output.network_media_urls, vec!["https://cdn.example.com/v.mp4"]);
    }
}
