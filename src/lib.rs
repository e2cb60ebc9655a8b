//! # media-harvest
//!
//! Media asset extraction and bulk download, backed by a pooled headless browser.
//!
//! A page URL goes in; the harvester loads it in a leased browser tab, collects
//! image and video references from the DOM and the network, filters them, and
//! later streams a chosen subset to disk and packages it as a zip archive with a
//! manifest. Every step runs as a tracked job that callers poll or subscribe to.
//!
//! ## Building blocks
//!
//! - [`browser::ResourcePool`] - bounded set of browser sessions handing out
//!   exclusive page leases, with reset-or-discard on release
//! - [`retry`] - retry with exponential backoff that never retries permanent 4xx
//! - [`downloader::DownloadOrchestrator`] - globally rate-limited streaming with
//!   per-file and per-job byte ceilings
//! - [`archive::ArchiveBuilder`] - zip container plus `manifest.json`
//! - [`jobs::JobRegistry`] - bounded job maps with eviction and expiry sweeps
//!
//! ## Quick Start
//!
//! ```no_run
//! use media_harvest::{Config, MediaFilter, MediaHarvester};
//! use media_harvest::browser::testing::ScriptedBrowser;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Any BrowserLauncher works; enable the `chromium` feature for a real one.
//!     let launcher = Arc::new(ScriptedBrowser::new());
//!     let harvester = MediaHarvester::new(Config::default(), launcher).await?;
//!
//!     let mut events = harvester.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let job = harvester.start_extraction("https://example.com/gallery", MediaFilter::default())?;
//!     println!("{:?}", harvester.get_job_status(&job)?);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Archive creation
pub mod archive;
/// Browser sessions, pages and the resource pool
pub mod browser;
/// Configuration types
pub mod config;
/// Download orchestrator (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Extraction pipeline
pub mod extract;
/// Harvester facade
pub mod harvester;
/// Job registry and expiry sweeper
pub mod jobs;
/// Media classification and file naming
pub mod media;
/// Retry logic with exponential backoff
pub mod retry;
/// SSRF protection for outbound requests
pub mod safety;
/// Page scanning for media references
pub mod scanner;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use browser::{BrowserLauncher, BrowserPage, BrowserSession, PoolStats, ResourcePool};
pub use config::Config;
pub use error::{ApiError, Error, ErrorDetail, ErrorKind, Result, ToHttpStatus};
pub use harvester::MediaHarvester;
pub use safety::{SsrfGuard, UrlSafety};
pub use scanner::{HtmlPageScanner, PageScanner};
pub use types::{
    DownloadSummary, Event, ExtractionResult, JobId, JobKind, JobResult, JobStatus, JobStatusView,
    MediaDescriptor, MediaFilter, MediaType,
};

#[cfg(feature = "chromium")]
pub use browser::chromium::ChromiumLauncher;

/// Run until SIGTERM or Ctrl+C arrives, then shut the harvester down.
///
/// # Example
///
/// ```no_run
/// use media_harvest::{Config, MediaHarvester, run_with_shutdown};
/// use media_harvest::browser::testing::ScriptedBrowser;
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let harvester = MediaHarvester::new(Config::default(), Arc::new(ScriptedBrowser::new())).await?;
///     run_with_shutdown(harvester).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(harvester: MediaHarvester) -> Result<()> {
    run_until(harvester, shutdown_signal()).await
}

/// Run until `signal` resolves, then shut the harvester down
pub async fn run_until(
    harvester: MediaHarvester,
    signal: impl std::future::Future<Output = ()>,
) -> Result<()> {
    signal.await;
    tracing::info!(active_jobs = harvester.active_jobs(), "stopping harvester");
    harvester.shutdown().await
}

async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                // Registration can fail in restricted environments.
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}
