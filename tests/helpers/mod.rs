//! Test helper utilities for E2E testing against a running server

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

use crate::fixtures::TestSiteFixture;

/// Response from POST /api/v1/builds
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: String,
}

/// Artifact filenames of a completed build
#[derive(Debug, Serialize, Deserialize)]
pub struct BuildArtifacts {
    pub apk: String,
    pub aab: String,
}

/// Response from GET /api/v1/builds/{job_id}
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: String,
    pub result: Option<BuildArtifacts>,
    pub error: Option<String>,
}

/// Submit a site to the build endpoint
pub async fn submit_build(
    client: &reqwest::Client,
    base_url: &str,
    fixture: &TestSiteFixture,
) -> Result<SubmitResponse, Box<dyn std::error::Error>> {
    let response = client
        .post(format!("{}/api/v1/builds", base_url))
        .json(&serde_json::json!({
            "url": fixture.url,
            "manifestUrl": fixture.manifest_url,
        }))
        .send()
        .await?;

    let status = response.status();
    if status != reqwest::StatusCode::ACCEPTED {
        let error_text = response.text().await?;
        return Err(format!("Submit failed with status {}: {}", status, error_text).into());
    }

    Ok(response.json::<SubmitResponse>().await?)
}

/// Poll job status until completed or failed (with timeout)
pub async fn poll_job_status(
    client: &reqwest::Client,
    base_url: &str,
    job_id: Uuid,
    timeout_secs: u64,
) -> Result<JobStatusResponse, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs; // Poll every second

    for attempt in 0..max_attempts {
        let response = client
            .get(format!("{}/api/v1/builds/{}", base_url, job_id))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Status check failed: {}", error_text).into());
        }

        let status_response = response.json::<JobStatusResponse>().await?;

        match status_response.status.as_str() {
            "completed" | "failed" => return Ok(status_response),
            "pending" | "running" => {
                if attempt % 30 == 0 && attempt > 0 {
                    println!("  ... still waiting ({}s/{}s)", attempt, max_attempts);
                }
                sleep(Duration::from_secs(1)).await;
            }
            _ => {
                return Err(format!("Unknown job status: {}", status_response.status).into());
            }
        }
    }

    Err(format!("Job did not finish within {} seconds", timeout_secs).into())
}

/// Wait for a build to finish; real Android builds take minutes
pub async fn wait_for_build(
    client: &reqwest::Client,
    base_url: &str,
    job_id: Uuid,
) -> Result<JobStatusResponse, Box<dyn std::error::Error>> {
    poll_job_status(client, base_url, job_id, 1800).await
}

/// Download an artifact and return its bytes
pub async fn download_artifact(
    client: &reqwest::Client,
    base_url: &str,
    filename: &str,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let response = client
        .get(format!("{}/api/v1/artifacts/{}", base_url, filename))
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(format!("Download of {} failed: {}", filename, response.status()).into());
    }
    Ok(response.bytes().await?.to_vec())
}

/// Signed APKs and AABs are both zip archives
pub fn assert_zip_archive(bytes: &[u8], filename: &str) {
    assert!(
        bytes.starts_with(b"PK"),
        "{} is not a zip archive ({} bytes)",
        filename,
        bytes.len()
    );
}
