// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! REST implementation of [`ClusterClient`] against the cluster's admin API.
//!
//! Endpoints: `GET /config` (health), `GET /overview`, `GET /jobs/{id}`
//! (+ `/checkpoints` for the latest external savepoint),
//! `POST /jars/{jarId}/run`, `POST /jobs/{id}/stop`,
//! `POST /jobs/{id}/savepoints`, `GET /jobs/{id}/savepoints/{requestId}`,
//! `PATCH /jobs/{id}` (cancel).
//!
//! Auth header injection is a concern of whoever builds the underlying
//! `reqwest::Client`; the engine passes no auth material through here.

use crate::client::{
    ClusterClient, ClusterError, ClusterOverview, DeployConfig, SavepointStatus, StopOptions,
};
use async_trait::async_trait;
use flinkctl_core::{JobPhase, ObservedState};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// [`ClusterClient`] over the admin REST surface.
pub struct RestClusterClient {
    http: reqwest::Client,
    base_url: String,
}

impl RestClusterClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClusterError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ClusterError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClusterError::Protocol(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(http, base_url))
    }

    /// Use a pre-built client (e.g. with auth headers already installed).
    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { http, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
        job_hint: Option<&str>,
    ) -> Result<Value, ClusterError> {
        let resp = req.send().await.map_err(classify_transport)?;
        let status = resp.status().as_u16();
        let text = resp.text().await.map_err(classify_transport)?;
        if (200..300).contains(&status) {
            if text.is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(&text)
                .map_err(|e| ClusterError::Protocol(format!("malformed response body: {e}")))
        } else {
            Err(classify_status(status, &text, job_hint))
        }
    }

    async fn get_json(&self, path: &str, job_hint: Option<&str>) -> Result<Value, ClusterError> {
        self.send(self.http.get(self.url(path)), job_hint).await
    }

    /// Best-effort lookup of the most recent external savepoint for a job.
    async fn latest_savepoint(&self, job_id: &str) -> Option<String> {
        let value = self
            .get_json(&format!("/jobs/{job_id}/checkpoints"), Some(job_id))
            .await
            .ok()?;
        let checkpoints: CheckpointsDto = serde_json::from_value(value).ok()?;
        checkpoints.latest?.savepoint?.external_path
    }
}

#[async_trait]
impl ClusterClient for RestClusterClient {
    async fn health(&self) -> Result<bool, ClusterError> {
        // Mirrors the probe semantics of the admin UI: any answer from
        // /config means the JobManager is up.
        match self.get_json("/config", None).await {
            Ok(_) => Ok(true),
            Err(e) => {
                debug!(error = %e, "health probe failed");
                Ok(false)
            }
        }
    }

    async fn overview(&self) -> Result<ClusterOverview, ClusterError> {
        let value = self.get_json("/overview", None).await?;
        serde_json::from_value(value)
            .map_err(|e| ClusterError::Protocol(format!("malformed overview: {e}")))
    }

    async fn get_job(&self, job_id: &str) -> Result<ObservedState, ClusterError> {
        let value = self.get_json(&format!("/jobs/{job_id}"), Some(job_id)).await?;
        let details: JobDetailsDto = serde_json::from_value(value)
            .map_err(|e| ClusterError::Protocol(format!("malformed job details: {e}")))?;
        let phase = JobPhase::from_cluster_state(&details.state);

        let mut observed = ObservedState::new(phase);
        observed.last_savepoint = self.latest_savepoint(job_id).await;
        Ok(observed)
    }

    async fn deploy(&self, artifact: &str, config: &DeployConfig) -> Result<String, ClusterError> {
        let jar_id = artifact.rsplit('/').next().unwrap_or(artifact);
        let mut payload = json!({
            "parallelism": config.parallelism,
            "programArgs": config.program_args.join(" "),
            "allowNonRestoredState": config.allow_non_restored_state,
        });
        if let (Some(savepoint), Value::Object(map)) = (&config.savepoint_path, &mut payload) {
            map.insert("savepointPath".to_string(), Value::String(savepoint.clone()));
        }

        let value = self
            .send(
                self.http.post(self.url(&format!("/jars/{jar_id}/run"))).json(&payload),
                None,
            )
            .await?;
        let submitted: SubmittedDto = serde_json::from_value(value)
            .map_err(|e| ClusterError::Protocol(format!("malformed submit response: {e}")))?;
        debug!(jar_id, cluster_job_id = %submitted.jobid, "job submitted");
        Ok(submitted.jobid)
    }

    async fn stop(
        &self,
        job_id: &str,
        opts: &StopOptions,
    ) -> Result<Option<String>, ClusterError> {
        if opts.savepoint_dir.is_some() || opts.drain {
            let payload = json!({
                "targetDirectory": opts.savepoint_dir,
                "drain": opts.drain,
            });
            self.send(
                self.http.post(self.url(&format!("/jobs/{job_id}/stop"))).json(&payload),
                Some(job_id),
            )
            .await?;
            // The stop-point location is not reported synchronously; callers
            // that need it poll the savepoint endpoints.
            Ok(None)
        } else {
            self.send(
                self.http.patch(self.url(&format!("/jobs/{job_id}"))),
                Some(job_id),
            )
            .await?;
            Ok(None)
        }
    }

    async fn trigger_savepoint(&self, job_id: &str, dir: &str) -> Result<String, ClusterError> {
        let payload = json!({ "target-directory": dir });
        let value = self
            .send(
                self.http
                    .post(self.url(&format!("/jobs/{job_id}/savepoints")))
                    .json(&payload),
                Some(job_id),
            )
            .await?;
        let trigger: TriggerDto = serde_json::from_value(value)
            .map_err(|e| ClusterError::Protocol(format!("malformed trigger response: {e}")))?;
        Ok(trigger.request_id)
    }

    async fn savepoint_status(
        &self,
        job_id: &str,
        trigger: &str,
    ) -> Result<SavepointStatus, ClusterError> {
        let value = self
            .get_json(&format!("/jobs/{job_id}/savepoints/{trigger}"), Some(job_id))
            .await?;
        let dto: SavepointStatusDto = serde_json::from_value(value)
            .map_err(|e| ClusterError::Protocol(format!("malformed savepoint status: {e}")))?;

        match dto.status.id.as_str() {
            "IN_PROGRESS" | "PENDING" => Ok(SavepointStatus::InProgress),
            "COMPLETED" => {
                let operation = dto.operation.unwrap_or_default();
                if let Some(cause) = operation.failure_cause {
                    Ok(SavepointStatus::Failed(summarize_cause(&cause)))
                } else if let Some(location) = operation.location {
                    Ok(SavepointStatus::Completed(location))
                } else {
                    Err(ClusterError::Protocol(
                        "completed savepoint without a location".to_string(),
                    ))
                }
            }
            other => Err(ClusterError::Protocol(format!("unknown savepoint status {other:?}"))),
        }
    }

    async fn cancel(&self, job_id: &str) -> Result<bool, ClusterError> {
        self.send(
            self.http
                .patch(self.url(&format!("/jobs/{job_id}")))
                .query(&[("mode", "cancel")]),
            Some(job_id),
        )
        .await?;
        Ok(true)
    }
}

fn classify_transport(err: reqwest::Error) -> ClusterError {
    if err.is_timeout() || err.is_connect() {
        ClusterError::Unavailable(err.to_string())
    } else {
        ClusterError::Protocol(err.to_string())
    }
}

fn classify_status(status: u16, body: &str, job_hint: Option<&str>) -> ClusterError {
    let message = extract_error_message(body);
    match status {
        404 => ClusterError::NotFound(job_hint.map(str::to_string).unwrap_or(message)),
        401 | 403 => ClusterError::Auth(message),
        _ => ClusterError::Api { status, message },
    }
}

/// The admin API wraps errors as `{"errors": ["..."]}`.
fn extract_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorsDto {
        errors: Vec<String>,
    }
    if let Ok(parsed) = serde_json::from_str::<ErrorsDto>(body) {
        if let Some(first) = parsed.errors.into_iter().next() {
            return first;
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "no response body".to_string()
    } else {
        trimmed.chars().take(200).collect()
    }
}

fn summarize_cause(cause: &Value) -> String {
    cause
        .get("stack-trace")
        .and_then(Value::as_str)
        .and_then(|s| s.lines().next())
        .map(str::to_string)
        .unwrap_or_else(|| cause.to_string().chars().take(200).collect())
}

#[derive(Deserialize)]
struct JobDetailsDto {
    state: String,
}

#[derive(Deserialize)]
struct CheckpointsDto {
    latest: Option<LatestCheckpointsDto>,
}

#[derive(Deserialize)]
struct LatestCheckpointsDto {
    savepoint: Option<SavepointRefDto>,
}

#[derive(Deserialize)]
struct SavepointRefDto {
    external_path: Option<String>,
}

#[derive(Deserialize)]
struct SubmittedDto {
    jobid: String,
}

#[derive(Deserialize)]
struct TriggerDto {
    #[serde(rename = "request-id")]
    request_id: String,
}

#[derive(Deserialize)]
struct SavepointStatusDto {
    status: SavepointStatusIdDto,
    operation: Option<SavepointOperationDto>,
}

#[derive(Deserialize)]
struct SavepointStatusIdDto {
    id: String,
}

#[derive(Deserialize, Default)]
struct SavepointOperationDto {
    location: Option<String>,
    #[serde(rename = "failure-cause")]
    failure_cause: Option<Value>,
}

#[cfg(test)]
#[path = "rest_tests.rs"]
mod tests;
