//! End-to-end HTTP checks over in-memory collaborators.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use serde_json::{json, Value};
use tokio::sync::watch;
use tower::ServiceExt;

use vcomp_api::{create_router, ApiConfig, AppState};
use vcomp_media::{MediaResult, Prober, Thumbnailer};
use vcomp_models::{CompressionResultEvent, JobId, Metadata, PresignedRequest};
use vcomp_queue::{
    BrokerConfig, CleanupQueue, EventPublisher, MemoryCleanupQueue, MemoryEventLog,
};
use vcomp_storage::MemoryStore;

struct StaticProber;

#[async_trait]
impl Prober for StaticProber {
    async fn probe(&self, _path: &Path) -> MediaResult<Metadata> {
        Ok(Metadata {
            filename: "source".to_string(),
            nb_streams: 2,
            format_name: "mov,mp4,m4a,3gp,3g2,mj2".to_string(),
            duration: "218.15".to_string(),
            ..Default::default()
        })
    }
}

struct StaticThumbnailer;

#[async_trait]
impl Thumbnailer for StaticThumbnailer {
    async fn thumbnail(&self, _video: &Path, output: &Path) -> MediaResult<()> {
        tokio::fs::write(output, b"jpeg").await?;
        Ok(())
    }
}

struct TestApp {
    router: axum::Router,
    state: AppState,
    store: Arc<MemoryStore>,
    log: Arc<MemoryEventLog>,
    cleanup: Arc<MemoryCleanupQueue>,
    broker: BrokerConfig,
    _scratch: tempfile::TempDir,
    _stop: watch::Sender<bool>,
}

fn test_app() -> TestApp {
    let scratch = tempfile::tempdir().unwrap();
    let broker = BrokerConfig {
        read_block: Duration::from_millis(50),
        ..BrokerConfig::default()
    };
    let config = ApiConfig {
        scratch_dir: scratch.path().to_path_buf(),
        status_poll_timeout: Duration::from_secs(1),
        ..ApiConfig::default()
    };
    let store = Arc::new(MemoryStore::new());
    let log = Arc::new(MemoryEventLog::new());
    let cleanup = Arc::new(MemoryCleanupQueue::new());

    let state = AppState::new(
        config,
        &broker,
        store.clone(),
        log.clone(),
        cleanup.clone(),
        Arc::new(StaticProber),
        Arc::new(StaticThumbnailer),
    );

    let (stop, rx) = watch::channel(false);
    let status = state.status.clone();
    tokio::spawn(async move { status.run(rx).await });

    TestApp {
        router: create_router(state.clone()),
        state,
        store,
        log,
        cleanup,
        broker,
        _scratch: scratch,
        _stop: stop,
    }
}

async fn send(app: &TestApp, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn upload_then_start_publishes_job() {
    let app = test_app();

    let (status, ticket) = send(
        &app,
        Method::POST,
        "/api/upload",
        Some(json!({"filename": "holiday.mp4"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ticket["presigned_put_url"]["method"], "PUT");
    let object_key = ticket["object_key"].as_str().unwrap().to_string();
    let job_id = ticket["job_id"].as_i64().unwrap();

    app.store.insert(object_key.clone(), b"movie".to_vec()).await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/jobs",
        Some(json!({"job_id": job_id, "object_key": object_key})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"job_id": job_id, "status": "started"}));

    let records = app.log.records(&app.broker.job_topic);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key, job_id.to_string());
}

#[tokio::test]
async fn start_for_missing_object_is_not_found() {
    let app = test_app();

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/jobs",
        Some(json!({"job_id": 1, "object_key": "ghost.mp4_1"})),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["detail"].as_str().unwrap().contains("ghost.mp4_1"));
    assert!(app.log.records(&app.broker.job_topic).is_empty());
}

#[tokio::test]
async fn status_is_processing_until_result() {
    let app = test_app();

    let (status, body) = send(&app, Method::GET, "/api/jobs/status?job_id=77", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "processing", "job_id": 77}));
    assert_eq!(app.cleanup.len().await.unwrap(), 0);
}

#[tokio::test]
async fn status_returns_result_and_arms_one_cleanup() {
    let app = test_app();
    let result = CompressionResultEvent::success(
        JobId(42),
        "clip.mp4_1",
        "clip.mp4_1_compressed",
        PresignedRequest {
            url: "memory://bucket/clip.mp4_1_compressed".to_string(),
            method: "GET".to_string(),
            headers: Default::default(),
        },
        chrono::Utc::now() + chrono::Duration::minutes(2),
    );
    EventPublisher::new(app.log.clone(), &app.broker)
        .publish_result(result)
        .await
        .unwrap();

    for _ in 0..2 {
        let (status, body) = send(&app, Method::GET, "/api/jobs/status?job_id=42", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["event_type"], "success");
        assert_eq!(body["compressed_key"], "clip.mp4_1_compressed");
        assert!(body["presigned_download_url"]["url"].is_string());
    }

    assert_eq!(app.cleanup.len().await.unwrap(), 1);
}

#[tokio::test]
async fn status_rejects_non_numeric_id() {
    let app = test_app();

    let (status, _) = send(&app, Method::GET, "/api/jobs/status?job_id=abc", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn metadata_and_thumbnail() {
    let app = test_app();
    app.store.insert("clip.mp4_1", b"movie".to_vec()).await;

    let (status, metadata) =
        send(&app, Method::GET, "/api/metadata?object_key=clip.mp4_1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(metadata["duration"], "218.15");
    assert_eq!(metadata["nb_streams"], 2);

    let (status, thumb) = send(
        &app,
        Method::POST,
        "/api/thumbnail",
        Some(json!({"object_key": "clip.mp4_1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(thumb["presigned_url"]["method"], "GET");
    assert!(app.store.contains("clip.mp4_1_thumb.jpg").await);
}

#[tokio::test]
async fn upload_fails_when_store_rejects() {
    let app = test_app();
    app.store.set_available(false);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/upload",
        Some(json!({"filename": "a.mp4"})),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn readiness_reflects_dependencies() {
    let app = test_app();

    let (status, body) = send(&app, Method::GET, "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");

    app.store.set_available(false);
    let (status, body) = send(&app, Method::GET, "/ready", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["checks"]["storage"]["status"], "error");
    assert!(app.state.status.is_healthy());
}

#[tokio::test]
async fn request_id_is_echoed() {
    let app = test_app();
    let request = Request::builder()
        .uri("/health")
        .header("X-Request-ID", "req-123")
        .body(Body::empty())
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok()),
        Some("req-123")
    );
}

#[tokio::test]
async fn startup_check_reports_unreachable_dependencies() {
    let app = test_app();
    assert!(app.state.check_dependencies().await.is_ok());

    app.log.set_reads_failing(true);
    let err = app.state.check_dependencies().await.unwrap_err();
    assert_eq!(err.to_string(), "broker unreachable");

    app.log.set_reads_failing(false);
    app.store.set_available(false);
    let err = app.state.check_dependencies().await.unwrap_err();
    assert_eq!(err.to_string(), "storage unreachable");
}
