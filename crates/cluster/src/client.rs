// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Capability trait for the cluster's administrative surface.
//!
//! The engine names its dependency by this contract; the REST client and the
//! scripted fake are interchangeable behind it.

use async_trait::async_trait;
use flinkctl_core::ObservedState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from cluster operations.
///
/// `is_transient` marks the subset the circuit breaker counts; everything
/// else propagates unchanged without touching the breaker.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    /// Connection-level failure or timeout; the cluster may be down.
    #[error("cluster unavailable: {0}")]
    Unavailable(String),
    /// The REST surface answered with an error status.
    #[error("cluster API error (status {status}): {message}")]
    Api { status: u16, message: String },
    /// Authentication or authorization rejected by the cluster.
    #[error("cluster authentication failed: {0}")]
    Auth(String),
    /// The job is not known to the cluster.
    #[error("job not found: {0}")]
    NotFound(String),
    /// The cluster answered with something this client cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ClusterError {
    /// Whether this fault should count toward tripping the circuit breaker.
    pub fn is_transient(&self) -> bool {
        match self {
            ClusterError::Unavailable(_) => true,
            ClusterError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Cluster-wide slot and job counts, for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterOverview {
    pub taskmanagers: u32,
    #[serde(rename = "slots-total")]
    pub slots_total: u32,
    #[serde(rename = "slots-available")]
    pub slots_available: u32,
    #[serde(rename = "jobs-running")]
    pub jobs_running: u32,
}

/// Configuration for one deploy call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeployConfig {
    pub parallelism: u32,
    pub program_args: Vec<String>,
    /// Starting state for the deployed job, when resuming.
    pub savepoint_path: Option<String>,
    pub allow_non_restored_state: bool,
}

impl DeployConfig {
    pub fn new(parallelism: u32) -> Self {
        Self { parallelism, ..Self::default() }
    }

    flinkctl_core::setters! {
        set {
            program_args: Vec<String>,
            allow_non_restored_state: bool,
        }
        option {
            savepoint_path: String,
        }
    }
}

/// Options for stopping a job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopOptions {
    /// Target directory for the stop-time savepoint, when one is wanted.
    pub savepoint_dir: Option<String>,
    /// Drain the pipeline (emit max watermark) before stopping.
    pub drain: bool,
}

/// Progress of an asynchronous savepoint operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SavepointStatus {
    InProgress,
    /// Externally addressable savepoint location.
    Completed(String),
    Failed(String),
}

/// The administrative operations the engine consumes.
///
/// Every method may suspend for up to the client's configured timeout.
/// Implementations inject their own auth material; none crosses this
/// boundary.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Cheap liveness probe of the admin surface.
    async fn health(&self) -> Result<bool, ClusterError>;

    /// Cluster-wide slot/job counts.
    async fn overview(&self) -> Result<ClusterOverview, ClusterError>;

    /// Observe one job. `NotFound` means the cluster has no such job.
    async fn get_job(&self, job_id: &str) -> Result<ObservedState, ClusterError>;

    /// Deploy an artifact; returns the cluster's id for the new job.
    async fn deploy(&self, artifact: &str, config: &DeployConfig) -> Result<String, ClusterError>;

    /// Stop a job, optionally taking a savepoint first. Returns the
    /// savepoint reference when the cluster reports one synchronously.
    async fn stop(&self, job_id: &str, opts: &StopOptions)
        -> Result<Option<String>, ClusterError>;

    /// Begin an asynchronous savepoint; returns the trigger request id.
    async fn trigger_savepoint(&self, job_id: &str, dir: &str) -> Result<String, ClusterError>;

    /// Poll the progress of a savepoint trigger.
    async fn savepoint_status(
        &self,
        job_id: &str,
        trigger: &str,
    ) -> Result<SavepointStatus, ClusterError>;

    /// Hard-cancel a job without a savepoint.
    async fn cancel(&self, job_id: &str) -> Result<bool, ClusterError>;
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
