//! Router-level API tests against an in-memory store and a stub pipeline.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

use pwa_android_builder::app_state::AppState;
use pwa_android_builder::config::{HttpSettings, SchedulerSettings};
use pwa_android_builder::db::memory::MemoryStore;
use pwa_android_builder::models::job::BuildArtifacts;
use pwa_android_builder::routes;
use pwa_android_builder::services::artifacts::ArtifactStore;
use pwa_android_builder::services::pipeline::{BuildPipeline, PipelineError};
use pwa_android_builder::services::scheduler::{QueuedJob, Scheduler, GENERIC_FAILURE_MESSAGE};

/// Writes placeholder artifacts; URLs containing "broken" fail.
struct StubPipeline {
    artifacts: ArtifactStore,
}

#[async_trait]
impl BuildPipeline for StubPipeline {
    async fn run(&self, job: &QueuedJob) -> Result<BuildArtifacts, PipelineError> {
        if job.inputs.url.contains("broken") {
            return Err(PipelineError::Manifest(
                "manifest at internal-host:8080 is not an object".to_string(),
            ));
        }

        let names = ArtifactStore::output_names(&job.inputs.url, Utc::now());
        let root = self.artifacts.root();
        tokio::fs::create_dir_all(root).await.map_err(PipelineError::Io)?;
        tokio::fs::write(root.join(&names.apk), b"PK-apk")
            .await
            .map_err(PipelineError::Io)?;
        tokio::fs::write(root.join(&names.aab), b"PK-aab")
            .await
            .map_err(PipelineError::Io)?;
        Ok(names)
    }
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("api-test-{}-{}", name, Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn test_app(submit_rate_limit: u64) -> Router {
    let store = Arc::new(MemoryStore::new());
    let artifacts = ArtifactStore::new(scratch_dir("output"));
    let pipeline = Arc::new(StubPipeline {
        artifacts: artifacts.clone(),
    });
    let scheduler = Arc::new(Scheduler::start(
        store.clone(),
        pipeline,
        &SchedulerSettings {
            max_concurrent_builds: 2,
            build_timeout: Duration::from_secs(30),
        },
    ));

    let state = AppState::new(store, scheduler, artifacts, scratch_dir("workspaces"));
    routes::router(
        state,
        &HttpSettings {
            max_body_bytes: 64 * 1024,
            submit_rate_limit,
            submit_rate_window: Duration::from_secs(60),
        },
    )
}

fn submit_request(body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/builds")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, request).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn submit(app: &Router, url: &str) -> String {
    let body = json!({ "url": url, "manifestUrl": format!("{url}/manifest.json") });
    let (status, json) = send_json(app, submit_request(body.to_string())).await;
    assert_eq!(status, StatusCode::ACCEPTED, "unexpected body: {json}");
    assert_eq!(json["status"], "pending");
    json["jobId"].as_str().unwrap().to_string()
}

async fn wait_for_terminal(app: &Router, job_id: &str) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let (status, job) =
                send_json(app, get_request(&format!("/api/v1/builds/{job_id}"))).await;
            assert_eq!(status, StatusCode::OK);
            if job["status"] == "completed" || job["status"] == "failed" {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job did not finish in time")
}

fn field_names(body: &Value) -> Vec<String> {
    body["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["field"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_submit_build_and_download_artifacts() {
    let app = test_app(100);
    let job_id = submit(&app, "https://app.example").await;

    let job = wait_for_terminal(&app, &job_id).await;
    assert_eq!(job["jobId"], job_id.as_str());
    assert_eq!(job["status"], "completed");
    assert!(job.get("error").is_none());
    assert!(job["created"].is_string());
    assert!(job["updated"].is_string());

    let apk = job["result"]["apk"].as_str().unwrap();
    let aab = job["result"]["aab"].as_str().unwrap();
    assert!(apk.ends_with(".apk"));
    assert!(aab.ends_with(".aab"));

    let response = app
        .clone()
        .oneshot(get_request(&format!("/api/v1/artifacts/{apk}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/vnd.android.package-archive"
    );
    assert!(response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains(apk));
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"PK-apk");

    let (status, bytes) = send(&app, get_request(&format!("/api/v1/artifacts/{aab}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"PK-aab");
}

#[tokio::test]
async fn test_failed_build_reports_generic_error() {
    let app = test_app(100);
    let job_id = submit(&app, "https://broken.example").await;

    let job = wait_for_terminal(&app, &job_id).await;
    assert_eq!(job["status"], "failed");
    assert_eq!(job["error"], GENERIC_FAILURE_MESSAGE);
    assert!(job.get("result").is_none());
    assert!(!job.to_string().contains("internal-host"));
}

#[tokio::test]
async fn test_invalid_url_rejected_with_details() {
    let app = test_app(100);
    let body = json!({ "url": "not a url", "manifestUrl": "https://a.example/manifest.json" });

    let (status, json) = send_json(&app, submit_request(body.to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(field_names(&json), vec!["url"]);
}

#[tokio::test]
async fn test_missing_field_rejected() {
    let app = test_app(100);
    let body = json!({ "url": "https://a.example" });

    let (status, json) = send_json(&app, submit_request(body.to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(field_names(&json).contains(&"manifestUrl".to_string()));
}

#[tokio::test]
async fn test_malformed_body_rejected() {
    let app = test_app(100);
    let (status, json) = send_json(&app, submit_request("{not json".to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(field_names(&json), vec!["body"]);
}

#[tokio::test]
async fn test_workspace_escape_rejected() {
    let app = test_app(100);
    let body = json!({
        "url": "https://a.example",
        "manifestUrl": "https://a.example/manifest.json",
        "workspacePath": "../../etc",
    });

    let (status, json) = send_json(&app, submit_request(body.to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(field_names(&json), vec!["workspacePath"]);
}

#[tokio::test]
async fn test_unknown_job_not_found() {
    let app = test_app(100);

    let (status, _) = send(&app, get_request(&format!("/api/v1/builds/{}", Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, get_request("/api/v1/builds/not-a-job")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_artifact_not_found() {
    let app = test_app(100);

    let (status, _) = send(&app, get_request("/api/v1/artifacts/0000000000000000_1.apk")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, get_request("/api/v1/artifacts/..%2F..%2Fetc%2Fpasswd")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, get_request("/api/v1/artifacts/key.keystore")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_submissions_over_rate_are_rejected() {
    let app = test_app(2);
    submit(&app, "https://one.example").await;
    submit(&app, "https://two.example").await;

    let body = json!({
        "url": "https://three.example",
        "manifestUrl": "https://three.example/m.json",
    });
    let (status, json) = send_json(&app, submit_request(body.to_string())).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(json["error"].is_string());

    // Status queries are not rate limited.
    let (status, _) = send(&app, get_request(&format!("/api/v1/builds/{}", Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_reports_scheduler_capacity() {
    let app = test_app(100);
    let (status, json) = send_json(&app, get_request("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["checks"]["database"]["status"], "ok");
    assert_eq!(json["checks"]["scheduler"]["capacity"], 2);
}
