// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconciliation outcomes and engine statistics.

use crate::action::ReconcileAction;
use crate::error::{ControllerError, ErrorCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-job outcome of one reconciliation.
///
/// `reconcile_all` is total: every input spec produces exactly one of these,
/// in input order, whether the reconciliation succeeded or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub job_id: String,
    pub action_taken: ReconcileAction,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub duration_ms: u64,
    pub reconciled_at: DateTime<Utc>,
    /// Typed ancillary data as strings only, never raw error objects.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
}

impl ReconciliationResult {
    pub fn ok(
        job_id: impl Into<String>,
        action: ReconcileAction,
        duration_ms: u64,
        reconciled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            action_taken: action,
            success: true,
            error_code: None,
            error_message: None,
            duration_ms,
            reconciled_at,
            context: HashMap::new(),
        }
    }

    /// Failed result from a coded error. Failures report `no_action` as the
    /// taken action: whatever was attempted did not change the cluster in a
    /// way this result can vouch for.
    pub fn failed(
        job_id: impl Into<String>,
        err: &ControllerError,
        duration_ms: u64,
        reconciled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            action_taken: ReconcileAction::NoAction,
            success: false,
            error_code: Some(err.code()),
            error_message: Some(err.to_string()),
            duration_ms,
            reconciled_at,
            context: err.context().clone(),
        }
    }
}

/// Monotonically non-decreasing counters over all completed batches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationStatistics {
    pub total_jobs: u64,
    pub successful: u64,
    pub failed: u64,
    pub concurrent_attempts: u64,
    /// Running mean over all observed durations > 0.
    pub avg_duration_ms: f64,
    pub actions_taken: HashMap<String, u64>,
    pub error_codes: HashMap<String, u64>,
}
