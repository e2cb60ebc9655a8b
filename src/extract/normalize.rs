//! Candidate URL normalization.

use std::collections::HashSet;
use url::Url;

/// Resolve, clean and deduplicate raw media references found on `base`
///
/// Relative references are resolved against the page URL, fragments are
/// stripped, inline (`data:`, `blob:`) and non-http(s) references are dropped.
/// First-seen order is preserved and at most `cap` URLs are returned.
pub fn normalize_candidates<I>(base: &Url, raw: I, cap: usize) -> Vec<Url>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for reference in raw {
        if out.len() >= cap {
            tracing::debug!(cap, page = %base, "candidate cap reached, ignoring the rest");
            break;
        }

        let reference = reference.trim();
        if reference.is_empty() {
            continue;
        }
        let Ok(mut url) = base.join(reference) else {
            tracing::trace!(reference, "unparseable media reference");
            continue;
        };
        if !matches!(url.scheme(), "http" | "https") {
            continue;
        }
        url.set_fragment(None);

        if seen.insert(url.as_str().to_owned()) {
            out.push(url);
        }
    }

    out
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn resolves_relative_and_protocol_relative() {
        let base = Url::parse("https://example.com/gallery/index.html").unwrap();
        let urls = normalize_candidates(
            &base,
            strings(&["a.png", "/b.jpg", "//cdn.example.com/c.gif", "https://other.org/d.mp4"]),
            10,
        );
        let urls: Vec<_> = urls.iter().map(Url::as_str).collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/gallery/a.png",
                "https://example.com/b.jpg",
                "https://cdn.example.com/c.gif",
                "https://other.org/d.mp4",
            ]
        );
    }

    #[test]
    fn drops_inline_and_foreign_schemes() {
        let base = Url::parse("https://example.com/").unwrap();
        let urls = normalize_candidates(
            &base,
            strings(&[
                "data:image/png;base64,AAAA",
                "blob:https://example.com/123",
                "javascript:void(0)",
                "ftp://example.com/x.png",
                "  ",
                "/ok.png",
            ]),
            10,
        );
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].as_str(), "https://example.com/ok.png");
    }

    #[test]
    fn dedupes_after_stripping_fragments() {
        let base = Url::parse("https://example.com/").unwrap();
        let urls = normalize_candidates(
            &base,
            strings(&["/x.png#one", "/x.png#two", "https://example.com/x.png", "/y.png"]),
            10,
        );
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[1].as_str(), "https://example.com/y.png");
    }

    #[test]
    fn respects_cap() {
        let base = Url::parse("https://example.com/").unwrap();
        let raw = (0..20).map(|i| format!("/{i}.png"));
        assert_eq!(normalize_candidates(&base, raw, 5).len(), 5);
    }
}
