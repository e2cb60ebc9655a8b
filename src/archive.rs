//! Archive builder: packages a job's downloads plus a manifest into one zip
//!
//! Entries are stored under their type directory (`images/…`, `videos/…`)
//! and a `manifest.json` describing the job is appended last. The archive is
//! written to a temporary name and renamed into place, so a failed build
//! never leaves a truncated `{job_id}.zip` behind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{Error, Result};
use crate::types::{ArchiveInfo, JobId, JobResult, MediaType};

/// Name of the manifest entry inside every archive
pub const MANIFEST_NAME: &str = "manifest.json";

/// Manifest describing an archive's contents
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Download job the archive belongs to
    pub job_id: JobId,
    /// When the archive was built
    pub created_at: DateTime<Utc>,
    /// Number of media entries
    pub file_count: usize,
    /// Sum of media entry sizes in bytes
    pub total_size: u64,
    /// One record per media entry
    pub files: Vec<ManifestEntry>,
}

/// One media entry in the manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    /// Entry name inside the archive
    pub name: String,
    /// URL the file was downloaded from
    pub original_url: String,
    /// Size in bytes
    pub size: u64,
    /// Media type
    #[serde(rename = "type")]
    pub media_type: MediaType,
    /// Content type reported by the server
    pub content_type: Option<String>,
}

/// Writes job archives into one directory
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    archive_dir: PathBuf,
}

impl ArchiveBuilder {
    /// Builder writing into `archive_dir` (created on demand)
    pub fn new(archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive_dir: archive_dir.into(),
        }
    }

    /// Where the archive for `job_id` lives
    pub fn archive_path(&self, job_id: &JobId) -> PathBuf {
        self.archive_dir.join(format!("{job_id}.zip"))
    }

    /// Package every completed item of `job` into `{job_id}.zip`
    ///
    /// Source files that no longer exist are skipped with a warning.
    pub async fn build(&self, job: &JobResult) -> Result<ArchiveInfo> {
        let job_id = job.job_id;
        let target = self.archive_path(&job_id);
        let archive_dir = self.archive_dir.clone();
        let job = job.clone();

        let info = tokio::task::spawn_blocking(move || build_blocking(&archive_dir, &target, &job))
            .await
            .map_err(|e| archive_error(job_id, format!("archive task failed: {e}")))??;

        tracing::info!(
            job_id = %job_id,
            path = %info.path.display(),
            file_count = info.file_count,
            total_size = info.total_size,
            "archive ready"
        );
        Ok(info)
    }
}

fn archive_error(job_id: JobId, reason: impl std::fmt::Display) -> Error {
    Error::Archive {
        job_id,
        reason: reason.to_string(),
    }
}

fn build_blocking(archive_dir: &Path, target: &Path, job: &JobResult) -> Result<ArchiveInfo> {
    std::fs::create_dir_all(archive_dir)
        .map_err(|e| archive_error(job.job_id, format!("failed to create {}: {e}", archive_dir.display())))?;

    let partial = target.with_extension("zip.partial");
    match write_archive(&partial, job) {
        Ok(manifest) => {
            std::fs::rename(&partial, target).map_err(|e| {
                let _ = std::fs::remove_file(&partial);
                archive_error(job.job_id, format!("failed to finalize archive: {e}"))
            })?;
            Ok(ArchiveInfo {
                path: target.to_path_buf(),
                file_count: manifest.file_count,
                total_size: manifest.total_size,
            })
        }
        Err(e) => {
            if let Err(rm) = std::fs::remove_file(&partial)
                && rm.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!(path = %partial.display(), error = %rm, "failed to remove partial archive");
            }
            Err(e)
        }
    }
}

fn write_archive(path: &Path, job: &JobResult) -> Result<Manifest> {
    let job_id = job.job_id;
    let file = File::create(path).map_err(|e| archive_error(job_id, format!("failed to create archive: {e}")))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut files = Vec::with_capacity(job.completed.len());
    for item in &job.completed {
        let mut source = match File::open(&item.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(job_id = %job_id, path = %item.path.display(), "source file missing, skipping");
                continue;
            }
            Err(e) => return Err(archive_error(job_id, format!("failed to open {}: {e}", item.path.display()))),
        };

        let file_name = item
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.bin", files.len()));
        let name = format!("{}/{}", item.media_type.dir_name(), file_name);

        zip.start_file(name.clone(), options)
            .map_err(|e| archive_error(job_id, e))?;
        let size = std::io::copy(&mut source, &mut zip)
            .map_err(|e| archive_error(job_id, format!("failed to add {name}: {e}")))?;

        files.push(ManifestEntry {
            name,
            original_url: item.url.clone(),
            size,
            media_type: item.media_type,
            content_type: item.content_type.clone(),
        });
    }

    let manifest = Manifest {
        job_id,
        created_at: Utc::now(),
        file_count: files.len(),
        total_size: files.iter().map(|f| f.size).sum(),
        files,
    };
    let body = serde_json::to_vec_pretty(&manifest).map_err(|e| archive_error(job_id, e))?;
    zip.start_file(MANIFEST_NAME, options)
        .map_err(|e| archive_error(job_id, e))?;
    zip.write_all(&body)
        .map_err(|e| archive_error(job_id, format!("failed to write manifest: {e}")))?;

    let mut writer = zip.finish().map_err(|e| archive_error(job_id, e))?;
    writer
        .flush()
        .map_err(|e| archive_error(job_id, format!("failed to flush archive: {e}")))?;

    Ok(manifest)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DownloadedItem;
    use std::io::Read;
    use tempfile::TempDir;

    fn item(job_id: JobId, dir: &Path, name: &str, media_type: MediaType, bytes: &[u8]) -> DownloadedItem {
        let type_dir = dir.join(media_type.dir_name());
        std::fs::create_dir_all(&type_dir).unwrap();
        let path = type_dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        DownloadedItem {
            job_id,
            url: format!("https://example.com/{name}"),
            path,
            size: bytes.len() as u64,
            content_type: Some(match media_type {
                MediaType::Image => "image/png".to_string(),
                MediaType::Video => "video/mp4".to_string(),
            }),
            media_type,
            elapsed_ms: 5,
        }
    }

    fn read_entry(archive: &mut zip::ZipArchive<File>, name: &str) -> Vec<u8> {
        let mut entry = archive.by_name(name).unwrap();
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf).unwrap();
        buf
    }

    #[tokio::test]
    async fn manifest_matches_completed_items() {
        let tmp = TempDir::new().unwrap();
        let job_id = JobId::new();
        let downloads = tmp.path().join("downloads");
        let a = item(job_id, &downloads, "a.png", MediaType::Image, &[1u8; 300]);
        let b = item(job_id, &downloads, "b.mp4", MediaType::Video, &[2u8; 700]);

        let job = JobResult {
            job_id,
            completed: vec![a, b],
            failed: Vec::new(),
            total_bytes: 1_000,
            duration_ms: 10,
        };

        let builder = ArchiveBuilder::new(tmp.path().join("archives"));
        let info = builder.build(&job).await.unwrap();

        assert_eq!(info.path, builder.archive_path(&job_id));
        assert_eq!(info.file_count, 2);
        assert_eq!(info.total_size, 1_000);

        let mut archive = zip::ZipArchive::new(File::open(&info.path).unwrap()).unwrap();
        assert_eq!(read_entry(&mut archive, "images/a.png"), vec![1u8; 300]);
        assert_eq!(read_entry(&mut archive, "videos/b.mp4"), vec![2u8; 700]);

        let manifest: Manifest =
            serde_json::from_slice(&read_entry(&mut archive, MANIFEST_NAME)).unwrap();
        assert_eq!(manifest.job_id, job_id);
        assert_eq!(manifest.file_count, 2);
        assert_eq!(manifest.total_size, 1_000);
        for entry in &manifest.files {
            assert!(archive.by_name(&entry.name).is_ok(), "{} missing", entry.name);
        }
        assert_eq!(manifest.files[0].original_url, "https://example.com/a.png");
        assert!(!tmp.path().join("archives").join(format!("{job_id}.zip.partial")).exists());
    }

    #[tokio::test]
    async fn missing_sources_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let job_id = JobId::new();
        let downloads = tmp.path().join("downloads");
        let kept = item(job_id, &downloads, "kept.png", MediaType::Image, &[7u8; 64]);
        let gone = item(job_id, &downloads, "gone.png", MediaType::Image, &[8u8; 32]);
        std::fs::remove_file(&gone.path).unwrap();

        let job = JobResult {
            job_id,
            completed: vec![kept, gone],
            failed: Vec::new(),
            total_bytes: 96,
            duration_ms: 1,
        };
        let info = ArchiveBuilder::new(tmp.path().join("archives"))
            .build(&job)
            .await
            .unwrap();

        assert_eq!(info.file_count, 1);
        assert_eq!(info.total_size, 64);
        let mut archive = zip::ZipArchive::new(File::open(&info.path).unwrap()).unwrap();
        assert!(archive.by_name("images/gone.png").is_err());
    }

    #[tokio::test]
    async fn unwritable_directory_is_an_archive_error() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let job = JobResult {
            job_id: JobId::new(),
            completed: Vec::new(),
            failed: Vec::new(),
            total_bytes: 0,
            duration_ms: 0,
        };
        let err = ArchiveBuilder::new(blocker.join("archives"))
            .build(&job)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Archive { .. }));
    }
}
