//! Common test utilities for media-harvest integration tests

#![allow(dead_code)]

use media_harvest::browser::testing::ScriptedBrowser;
use media_harvest::{
    Config, Event, HtmlPageScanner, JobId, JobStatus, JobStatusView, MediaHarvester, PageScanner,
    SsrfGuard,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Config rooted in `dir` with fast retries and no stagger
pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.download.download_dir = dir.path().join("downloads");
    config.download.archive_dir = dir.path().join("archives");
    config.download.stagger_delay = Duration::ZERO;
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(50);
    config.extraction.probe_metadata = false;
    config
}

/// Harvester over `browser` that allows loopback targets (for wiremock)
pub async fn create_harvester(
    browser: &ScriptedBrowser,
    tweak: impl FnOnce(&mut Config),
) -> (MediaHarvester, TempDir) {
    create_harvester_with_scanner(browser, Arc::new(HtmlPageScanner), tweak).await
}

/// Same as [`create_harvester`] with a custom page scanner
pub async fn create_harvester_with_scanner(
    browser: &ScriptedBrowser,
    scanner: Arc<dyn PageScanner>,
    tweak: impl FnOnce(&mut Config),
) -> (MediaHarvester, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap_or_else(|e| panic!("failed to create temp dir: {e}"));
    let mut config = test_config(&temp_dir);
    tweak(&mut config);

    let harvester = MediaHarvester::with_components(
        config,
        Arc::new(browser.clone()),
        scanner,
        Arc::new(SsrfGuard::new().allow_host("127.0.0.1")),
    )
    .await
    .unwrap_or_else(|e| panic!("failed to create harvester: {e}"));

    (harvester, temp_dir)
}

/// Poll until the job leaves `Running`, panicking after `timeout`
pub async fn wait_for_terminal(
    harvester: &MediaHarvester,
    id: &JobId,
    timeout: Duration,
) -> JobStatusView {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let view = harvester
            .get_job_status(id)
            .unwrap_or_else(|e| panic!("job {id} vanished: {e}"));
        if view.status != JobStatus::Running {
            return view;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("job {id} still running after {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Collect events until `stop` matches one (inclusive) or `timeout` elapses
pub async fn collect_events_until(
    events: &mut broadcast::Receiver<Event>,
    timeout: Duration,
    stop: impl Fn(&Event) -> bool,
) -> Vec<Event> {
    let mut seen = Vec::new();
    let _ = tokio::time::timeout(timeout, async {
        while let Ok(event) = events.recv().await {
            let done = stop(&event);
            seen.push(event);
            if done {
                break;
            }
        }
    })
    .await;
    seen
}
