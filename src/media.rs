//! Media-type classification and on-disk naming

use crate::types::{JobId, MediaType};
use url::Url;

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "avif", "bmp", "svg", "ico", "tif", "tiff", "heic",
];

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "m4v", "mkv", "avi", "ogv", "m3u8", "mpd"];

/// Lowercased extension of the URL's last path segment, if any
pub fn url_extension(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    let (_, ext) = segment.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Classify by file extension
pub fn type_from_extension(ext: &str) -> Option<MediaType> {
    let ext = ext.to_ascii_lowercase();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaType::Image)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaType::Video)
    } else {
        None
    }
}

/// Classify by MIME type, ignoring parameters
pub fn type_from_content_type(content_type: &str) -> Option<MediaType> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if essence.starts_with("image/") {
        Some(MediaType::Image)
    } else if essence.starts_with("video/")
        || essence == "application/x-mpegurl"
        || essence == "application/vnd.apple.mpegurl"
        || essence == "application/dash+xml"
    {
        Some(MediaType::Video)
    } else {
        None
    }
}

/// Best-effort classification of a URL before any metadata is known
pub fn classify_url(url: &Url) -> Option<MediaType> {
    url_extension(url).and_then(|ext| type_from_extension(&ext))
}

/// File extension for a download, preferring the content type over the URL
pub fn file_extension(url: &Url, content_type: Option<&str>, media_type: MediaType) -> String {
    if let Some(ext) = content_type.and_then(extension_for_content_type) {
        return ext.to_string();
    }
    if let Some(ext) = url_extension(url)
        && type_from_extension(&ext).is_some()
    {
        return ext;
    }
    match media_type {
        MediaType::Image => "jpg".to_string(),
        MediaType::Video => "mp4".to_string(),
    }
}

fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let essence = content_type.split(';').next()?.trim().to_ascii_lowercase();
    let ext = match essence.as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/avif" => "avif",
        "image/bmp" => "bmp",
        "image/svg+xml" => "svg",
        "image/x-icon" | "image/vnd.microsoft.icon" => "ico",
        "image/tiff" => "tiff",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        "video/x-matroska" => "mkv",
        "video/ogg" => "ogv",
        "video/x-msvideo" => "avi",
        _ => return None,
    };
    Some(ext)
}

/// Unique file name for one downloaded item: `{job short id}_{random}.{ext}`
pub fn unique_file_name(job_id: &JobId, ext: &str) -> String {
    format!("{}_{}.{}", job_id.short(), uuid::Uuid::new_v4().simple(), ext)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn classifies_by_extension() {
        assert_eq!(classify_url(&url("https://a.com/x/cat.JPG")), Some(MediaType::Image));
        assert_eq!(classify_url(&url("https://a.com/clip.webm?x=1")), Some(MediaType::Video));
        assert_eq!(classify_url(&url("https://a.com/page.html")), None);
        assert_eq!(classify_url(&url("https://a.com/")), None);
    }

    #[test]
    fn classifies_by_content_type() {
        assert_eq!(type_from_content_type("image/png"), Some(MediaType::Image));
        assert_eq!(
            type_from_content_type("Video/MP4; codecs=avc1"),
            Some(MediaType::Video)
        );
        assert_eq!(type_from_content_type("text/html; charset=utf-8"), None);
    }

    #[test]
    fn extension_prefers_content_type() {
        let u = url("https://a.com/download?id=7");
        assert_eq!(file_extension(&u, Some("image/webp"), MediaType::Image), "webp");
        assert_eq!(file_extension(&u, None, MediaType::Video), "mp4");
        let u = url("https://a.com/a.gif");
        assert_eq!(file_extension(&u, Some("application/octet-stream"), MediaType::Image), "gif");
    }

    #[test]
    fn unique_names_carry_job_prefix() {
        let job = JobId::new();
        let a = unique_file_name(&job, "png");
        let b = unique_file_name(&job, "png");
        assert!(a.starts_with(&job.short()));
        assert!(a.ends_with(".png"));
        assert_ne!(a, b);
    }
}
