// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coded, structured errors.
//!
//! Every fault crossing a crate boundary is mapped to a [`ControllerError`]
//! carrying one of the closed [`ErrorCode`] values. Raw causes stay available
//! through the `source` chain but never drive control flow.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of error codes driving retry/surface decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ReconciliationFailed,
    ConcurrentReconciliation,
    ReconciliationTimeout,
    JobDeploymentFailed,
    JobNotFound,
    JobStateInvalid,
    FlinkClusterUnavailable,
    FlinkApiError,
    SavepointCreationFailed,
    SavepointRestoreFailed,
    StateStoreError,
    SpecValidationFailed,
    ArtifactNotFound,
    CircuitBreakerOpen,
    ConfigurationError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ReconciliationFailed => "RECONCILIATION_FAILED",
            ErrorCode::ConcurrentReconciliation => "CONCURRENT_RECONCILIATION",
            ErrorCode::ReconciliationTimeout => "RECONCILIATION_TIMEOUT",
            ErrorCode::JobDeploymentFailed => "JOB_DEPLOYMENT_FAILED",
            ErrorCode::JobNotFound => "JOB_NOT_FOUND",
            ErrorCode::JobStateInvalid => "JOB_STATE_INVALID",
            ErrorCode::FlinkClusterUnavailable => "FLINK_CLUSTER_UNAVAILABLE",
            ErrorCode::FlinkApiError => "FLINK_API_ERROR",
            ErrorCode::SavepointCreationFailed => "SAVEPOINT_CREATION_FAILED",
            ErrorCode::SavepointRestoreFailed => "SAVEPOINT_RESTORE_FAILED",
            ErrorCode::StateStoreError => "STATE_STORE_ERROR",
            ErrorCode::SpecValidationFailed => "SPEC_VALIDATION_FAILED",
            ErrorCode::ArtifactNotFound => "ARTIFACT_NOT_FOUND",
            ErrorCode::CircuitBreakerOpen => "CIRCUIT_BREAKER_OPEN",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type BoxedCause = Box<dyn StdError + Send + Sync + 'static>;

/// Structured error carried across subsystem boundaries.
///
/// The context map holds typed ancillary data as strings only, never raw
/// error objects.
#[derive(Debug)]
pub struct ControllerError {
    code: ErrorCode,
    message: String,
    job_id: Option<String>,
    context: HashMap<String, String>,
    source: Option<BoxedCause>,
}

impl ControllerError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            job_id: None,
            context: HashMap::new(),
            source: None,
        }
    }

    /// Concurrent-reconciliation rejection, carrying the conflicting start
    /// time in context.
    pub fn concurrent(job_id: impl Into<String>, started_at: impl Into<String>) -> Self {
        let started_at = started_at.into();
        Self::new(
            ErrorCode::ConcurrentReconciliation,
            format!("job is already being reconciled since {started_at}"),
        )
        .with_job_id(job_id)
        .with_context("started_at", started_at)
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.code)?;
        if let Some(job_id) = &self.job_id {
            write!(f, " job {job_id}:")?;
        }
        write!(f, " {}", self.message)
    }
}

impl StdError for ControllerError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_deref().map(|s| s as &(dyn StdError + 'static))
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
