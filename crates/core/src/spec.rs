// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Desired-state job specifications and validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest accepted job identifier.
pub const JOB_ID_MAX_LEN: usize = 255;

/// Kind of job the cluster runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    /// Long-running job with checkpoint/savepoint state.
    Streaming,
    /// Finite job; redeployed rather than updated in place.
    Batch,
}

crate::simple_display! {
    JobType {
        Streaming => "streaming",
        Batch => "batch",
    }
}

/// Restart strategy hint passed through to the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartStrategy {
    FixedDelay,
    ExponentialDelay,
    FailureRate,
}

impl Default for RestartStrategy {
    fn default() -> Self {
        RestartStrategy::FixedDelay
    }
}

crate::simple_display! {
    RestartStrategy {
        FixedDelay => "fixed-delay",
        ExponentialDelay => "exponential-delay",
        FailureRate => "failure-rate",
    }
}

/// Errors from job specification validation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("invalid job_id {0:?}: must match [A-Za-z0-9_-]{{1,255}}")]
    InvalidJobId(String),
    #[error("job {0}: parallelism must be at least 1")]
    InvalidParallelism(String),
    #[error("job {0}: artifact_path must not be empty")]
    EmptyArtifact(String),
    #[error("job {0}: invalid cron expression: {1}")]
    InvalidCron(String, String),
    #[error("job {0}: unknown timezone {1:?}")]
    UnknownTimezone(String, String),
    #[error("job {0}: end_date precedes start_date")]
    InvertedDates(String),
}

/// Immutable desired-state record for one job.
///
/// Unknown input fields are ignored at the deserialization boundary. The
/// `created_at`/`last_updated_at` metadata never participates in change
/// detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub job_id: String,
    pub job_type: JobType,
    /// Opaque artifact reference; compared only via the canonical hash.
    pub artifact_path: String,
    pub parallelism: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub savepoint_trigger_interval_ms: Option<u64>,
    #[serde(default)]
    pub restart_strategy: RestartStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<f64>,
    /// If set, used as the starting state on the next deploy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub savepoint_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_at: Option<DateTime<Utc>>,
}

impl JobSpec {
    /// Check the structural invariants the reconciler relies on.
    pub fn validate(&self) -> Result<(), SpecError> {
        if !valid_job_id(&self.job_id) {
            return Err(SpecError::InvalidJobId(self.job_id.clone()));
        }
        if self.parallelism < 1 {
            return Err(SpecError::InvalidParallelism(self.job_id.clone()));
        }
        if self.artifact_path.is_empty() {
            return Err(SpecError::EmptyArtifact(self.job_id.clone()));
        }
        Ok(())
    }
}

/// `[A-Za-z0-9_-]{1,255}`
pub fn valid_job_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= JOB_ID_MAX_LEN
        && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

crate::builder! {
    pub struct JobSpecBuilder => JobSpec {
        into {
            job_id: String = "job-1",
            artifact_path: String = "/artifacts/job.jar",
        }
        set {
            job_type: JobType = JobType::Streaming,
            parallelism: u32 = 1,
            restart_strategy: RestartStrategy = RestartStrategy::FixedDelay,
        }
        option {
            checkpoint_interval_ms: u64 = None,
            savepoint_trigger_interval_ms: u64 = None,
            memory: String = None,
            cpu_cores: f64 = None,
            savepoint_path: String = None,
            created_at: DateTime<Utc> = None,
            last_updated_at: DateTime<Utc> = None,
        }
    }
}

#[cfg(test)]
#[path = "spec_tests.rs"]
mod tests;
