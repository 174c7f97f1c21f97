// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconciliation actions and the decision table.

use crate::observed::JobPhase;
use crate::spec::JobType;
use serde::{Deserialize, Serialize};

/// The single action a reconciliation applies to close the gap between
/// desired spec and observed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileAction {
    Deploy,
    /// Savepoint-based in-place update (streaming only).
    Update,
    Stop,
    Restart,
    NoAction,
}

crate::simple_display! {
    ReconcileAction {
        Deploy => "deploy",
        Update => "update",
        Stop => "stop",
        Restart => "restart",
        NoAction => "no_action",
    }
}

impl ReconcileAction {
    /// Decide the action for one job from the observed phase, whether the
    /// spec changed since the last successful reconciliation, and the job
    /// type.
    ///
    /// `changed` is what the change tracker reported; callers without a
    /// tracker pass `false` so unchanged running jobs settle to no-op.
    pub fn decide(phase: JobPhase, changed: bool, job_type: JobType) -> ReconcileAction {
        match phase {
            JobPhase::Absent | JobPhase::Unknown | JobPhase::Stopped => ReconcileAction::Deploy,
            JobPhase::Failed => ReconcileAction::Restart,
            JobPhase::Restarting => ReconcileAction::NoAction,
            JobPhase::Running => match (changed, job_type) {
                (false, _) => ReconcileAction::NoAction,
                (true, JobType::Streaming) => ReconcileAction::Update,
                // Batch jobs cannot move state; stop now, redeploy next cycle.
                (true, JobType::Batch) => ReconcileAction::Stop,
            },
        }
    }
}

#[cfg(test)]
#[path = "action_tests.rs"]
mod tests;
