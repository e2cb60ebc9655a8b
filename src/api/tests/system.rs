use super::*;

#[tokio::test]
async fn test_health_reports_ok_then_shutting_down() {
    let (harvester, _temp_dir) = create_test_harvester(ScriptedBrowser::new()).await;
    let app = create_router(harvester.clone());

    let (status, body) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["active_jobs"], 0);

    let request = Request::builder()
        .method("POST")
        .uri("/shutdown")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    for _ in 0..50 {
        if !harvester.is_accepting() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let (status, body) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "shutting_down");
}

#[tokio::test]
async fn test_pool_stats_after_extraction() {
    let browser = ScriptedBrowser::new().with_page("https://example.com/", "<p>empty</p>");
    let (harvester, _temp_dir) = create_test_harvester(browser.clone()).await;
    let app = create_router(harvester);

    let (status, body) = get_json(&app, "/pool/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessions"], 0);

    let (_, body) = post_json(
        &app,
        "/extractions",
        serde_json::json!({ "url": "https://example.com/" }),
    )
    .await;
    let id = body["job_id"].as_str().unwrap().to_string();
    wait_for_job(&app, &id).await;

    // Release finishes before the job completes, so the page is idle again.
    let (_, body) = get_json(&app, "/pool/stats").await;
    assert_eq!(body["sessions"], 1);
    assert_eq!(body["busy"], 0);
    assert_eq!(body["available"], 1);
    assert_eq!(body["sessions_launched_total"], 1);
    assert_eq!(browser.launches(), 1);
}

#[tokio::test]
async fn test_sse_event_stream() {
    let (harvester, _temp_dir) = create_test_harvester(ScriptedBrowser::new()).await;
    let app = create_router(harvester);

    let request = Request::builder()
        .uri("/events")
        .header("Accept", "text/event-stream")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    assert!(content_type.contains("text/event-stream"), "got {content_type}");
}
