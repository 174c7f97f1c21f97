// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Observed cluster state for a job.

use serde::{Deserialize, Serialize};

/// Phase of a job as observed on the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    /// The cluster knows nothing about this job.
    Absent,
    Running,
    Stopped,
    Failed,
    /// The cluster is restarting the job itself; leave it alone.
    Restarting,
    Unknown,
}

crate::simple_display! {
    JobPhase {
        Absent => "absent",
        Running => "running",
        Stopped => "stopped",
        Failed => "failed",
        Restarting => "restarting",
        Unknown => "unknown",
    }
}

impl JobPhase {
    /// Map a cluster state string (Flink REST `state` field) to a phase.
    ///
    /// Not-found is handled by the caller (the REST surface signals it as an
    /// error, not a state string).
    pub fn from_cluster_state(state: &str) -> JobPhase {
        match state {
            "RUNNING" => JobPhase::Running,
            "FINISHED" | "CANCELED" | "CANCELLED" => JobPhase::Stopped,
            "FAILED" => JobPhase::Failed,
            "RESTARTING" => JobPhase::Restarting,
            _ => JobPhase::Unknown,
        }
    }
}

/// Snapshot pulled from the cluster for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedState {
    pub phase: JobPhase,
    /// Most recent externally addressable savepoint, when the cluster
    /// reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_savepoint: Option<String>,
}

impl ObservedState {
    pub fn new(phase: JobPhase) -> Self {
        Self { phase, last_savepoint: None }
    }

    pub fn absent() -> Self {
        Self::new(JobPhase::Absent)
    }

    pub fn with_savepoint(mut self, savepoint: impl Into<String>) -> Self {
        self.last_savepoint = Some(savepoint.into());
        self
    }
}

#[cfg(test)]
#[path = "observed_tests.rs"]
mod tests;
