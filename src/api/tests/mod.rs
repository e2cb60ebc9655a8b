use super::*;
use crate::Config;
use crate::browser::testing::ScriptedBrowser;
use crate::safety::SsrfGuard;
use crate::scanner::HtmlPageScanner;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

mod system;

/// Harvester over a scripted browser; 127.0.0.1 is allowed so wiremock works
async fn create_test_harvester(browser: ScriptedBrowser) -> (Arc<MediaHarvester>, TempDir) {
    create_test_harvester_with(browser, |_| {}).await
}

async fn create_test_harvester_with(
    browser: ScriptedBrowser,
    tweak: impl FnOnce(&mut Config),
) -> (Arc<MediaHarvester>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.download.download_dir = temp_dir.path().join("downloads");
    config.download.archive_dir = temp_dir.path().join("archives");
    config.download.stagger_delay = Duration::ZERO;
    config.retry.initial_delay = Duration::from_millis(5);
    config.retry.max_delay = Duration::from_millis(20);
    config.extraction.probe_metadata = false;
    tweak(&mut config);

    let harvester = MediaHarvester::with_components(
        config,
        Arc::new(browser),
        Arc::new(HtmlPageScanner),
        Arc::new(SsrfGuard::new().allow_host("127.0.0.1")),
    )
    .await
    .unwrap();
    (Arc::new(harvester), temp_dir)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

/// Poll GET /jobs/:id until the job leaves `running`
async fn wait_for_job(app: &Router, id: &str) -> serde_json::Value {
    for _ in 0..250 {
        let (status, body) = get_json(app, &format!("/jobs/{id}")).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] != "running" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {id} did not finish");
}

#[tokio::test]
async fn test_api_server_spawns() {
    // Port 0 = OS assigns a free port
    let (harvester, _temp_dir) = create_test_harvester_with(ScriptedBrowser::new(), |config| {
        config.api.bind_address = "127.0.0.1:0".parse().unwrap();
    })
    .await;

    let api_handle = tokio::spawn(start_api_server(harvester));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!api_handle.is_finished(), "server should still be running");
    api_handle.abort();
}

#[tokio::test]
async fn test_cors_enabled() {
    let (harvester, _temp_dir) = create_test_harvester(ScriptedBrowser::new()).await;
    let app = create_router(harvester);

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}

#[test]
fn test_cors_specific_origins() {
    // Unparseable origins are skipped rather than failing the layer.
    let _layer = build_cors_layer(&[
        "https://app.example.com".to_string(),
        "bad\norigin".to_string(),
    ]);
}
