// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted in-memory cluster for tests.
//!
//! Phases, savepoint progress, and failures are scripted up front; every
//! operation is recorded so tests can assert exact call sequences.

use crate::client::{
    ClusterClient, ClusterError, ClusterOverview, DeployConfig, SavepointStatus, StopOptions,
};
use async_trait::async_trait;
use flinkctl_core::{JobPhase, ObservedState};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// One recorded operation against the fake cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCall {
    Health,
    Overview,
    GetJob(String),
    Deploy {
        artifact: String,
        parallelism: u32,
        savepoint_path: Option<String>,
    },
    Stop {
        job_id: String,
        drain: bool,
    },
    TriggerSavepoint {
        job_id: String,
        dir: String,
    },
    SavepointStatus {
        job_id: String,
        trigger: String,
    },
    Cancel(String),
}

#[derive(Default)]
struct FakeState {
    jobs: HashMap<String, ObservedState>,
    /// Failures served (in order) before any scripted behavior runs.
    failures: VecDeque<ClusterError>,
    /// Failures scoped to one operation kind, served before the global queue.
    failures_by_op: HashMap<&'static str, VecDeque<ClusterError>>,
    /// Scripted savepoint progress per job; empty means immediate completion.
    savepoint_scripts: HashMap<String, VecDeque<SavepointStatus>>,
    calls: Vec<ClusterCall>,
    healthy: bool,
    deploy_count: u32,
    trigger_count: u32,
}

/// Scripted [`ClusterClient`] with a recorded call log.
pub struct FakeClusterClient {
    state: Mutex<FakeState>,
    /// When set, `get_job` consumes one permit before answering. Tests use
    /// a zero-permit gate to hold a reconciliation mid-observation.
    get_job_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl Default for FakeClusterClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeClusterClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState { healthy: true, ..FakeState::default() }),
            get_job_gate: Mutex::new(None),
        }
    }

    /// Script the observed phase for a job.
    pub fn set_phase(&self, job_id: impl Into<String>, phase: JobPhase) {
        self.state.lock().jobs.insert(job_id.into(), ObservedState::new(phase));
    }

    /// Script the full observed state for a job.
    pub fn set_observed(&self, job_id: impl Into<String>, observed: ObservedState) {
        self.state.lock().jobs.insert(job_id.into(), observed);
    }

    /// Remove a job, so `get_job` answers `NotFound`.
    pub fn remove_job(&self, job_id: &str) {
        self.state.lock().jobs.remove(job_id);
    }

    /// Queue a failure to be served by the next operation.
    pub fn push_failure(&self, err: ClusterError) {
        self.state.lock().failures.push_back(err);
    }

    /// Queue `n` copies of a failure.
    pub fn push_failures(&self, err: ClusterError, n: usize) {
        let mut state = self.state.lock();
        for _ in 0..n {
            state.failures.push_back(err.clone());
        }
    }

    /// Queue a failure served only by the named operation
    /// (`"get_job"`, `"deploy"`, `"stop"`, `"trigger_savepoint"`,
    /// `"savepoint_status"`, `"cancel"`, `"health"`, `"overview"`).
    pub fn push_failure_for(&self, op: &'static str, err: ClusterError) {
        self.state.lock().failures_by_op.entry(op).or_default().push_back(err);
    }

    /// Script savepoint progress for a job, served in order by
    /// `savepoint_status`. An exhausted (or absent) script completes
    /// immediately.
    pub fn set_savepoint_script(&self, job_id: impl Into<String>, script: Vec<SavepointStatus>) {
        self.state.lock().savepoint_scripts.insert(job_id.into(), script.into());
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.lock().healthy = healthy;
    }

    /// Install a zero-permit gate on `get_job`. Every subsequent call
    /// blocks until the test adds a permit, which lets a reconciliation be
    /// held mid-observation.
    pub fn gate_get_job(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.get_job_gate.lock() = Some(gate.clone());
        gate
    }

    /// Snapshot of all recorded calls.
    pub fn calls(&self) -> Vec<ClusterCall> {
        self.state.lock().calls.clone()
    }

    /// Recorded calls for one job id (deploys match on artifact).
    pub fn calls_for(&self, job_id: &str) -> Vec<ClusterCall> {
        self.calls()
            .into_iter()
            .filter(|c| match c {
                ClusterCall::GetJob(id)
                | ClusterCall::Cancel(id)
                | ClusterCall::Stop { job_id: id, .. }
                | ClusterCall::TriggerSavepoint { job_id: id, .. }
                | ClusterCall::SavepointStatus { job_id: id, .. } => id == job_id,
                _ => false,
            })
            .collect()
    }

    pub fn deploy_count(&self) -> u32 {
        self.state.lock().deploy_count
    }

    fn record(&self, call: ClusterCall) -> Result<(), ClusterError> {
        let op = op_name(&call);
        let mut state = self.state.lock();
        state.calls.push(call);
        if let Some(err) = state.failures_by_op.get_mut(op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        match state.failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn op_name(call: &ClusterCall) -> &'static str {
    match call {
        ClusterCall::Health => "health",
        ClusterCall::Overview => "overview",
        ClusterCall::GetJob(_) => "get_job",
        ClusterCall::Deploy { .. } => "deploy",
        ClusterCall::Stop { .. } => "stop",
        ClusterCall::TriggerSavepoint { .. } => "trigger_savepoint",
        ClusterCall::SavepointStatus { .. } => "savepoint_status",
        ClusterCall::Cancel(_) => "cancel",
    }
}

#[async_trait]
impl ClusterClient for FakeClusterClient {
    async fn health(&self) -> Result<bool, ClusterError> {
        self.record(ClusterCall::Health)?;
        Ok(self.state.lock().healthy)
    }

    async fn overview(&self) -> Result<ClusterOverview, ClusterError> {
        self.record(ClusterCall::Overview)?;
        let state = self.state.lock();
        let running = state
            .jobs
            .values()
            .filter(|o| o.phase == JobPhase::Running)
            .count() as u32;
        Ok(ClusterOverview {
            taskmanagers: 1,
            slots_total: 8,
            slots_available: 8 - running.min(8),
            jobs_running: running,
        })
    }

    async fn get_job(&self, job_id: &str) -> Result<ObservedState, ClusterError> {
        let gate = self.get_job_gate.lock().clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.record(ClusterCall::GetJob(job_id.to_string()))?;
        self.state
            .lock()
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(job_id.to_string()))
    }

    async fn deploy(&self, artifact: &str, config: &DeployConfig) -> Result<String, ClusterError> {
        self.record(ClusterCall::Deploy {
            artifact: artifact.to_string(),
            parallelism: config.parallelism,
            savepoint_path: config.savepoint_path.clone(),
        })?;
        let mut state = self.state.lock();
        state.deploy_count += 1;
        Ok(format!("cluster-job-{}", state.deploy_count))
    }

    async fn stop(
        &self,
        job_id: &str,
        opts: &StopOptions,
    ) -> Result<Option<String>, ClusterError> {
        self.record(ClusterCall::Stop { job_id: job_id.to_string(), drain: opts.drain })?;
        let mut state = self.state.lock();
        if let Some(observed) = state.jobs.get_mut(job_id) {
            observed.phase = JobPhase::Stopped;
        }
        Ok(None)
    }

    async fn trigger_savepoint(&self, job_id: &str, dir: &str) -> Result<String, ClusterError> {
        self.record(ClusterCall::TriggerSavepoint {
            job_id: job_id.to_string(),
            dir: dir.to_string(),
        })?;
        let mut state = self.state.lock();
        state.trigger_count += 1;
        Ok(format!("trigger-{}", state.trigger_count))
    }

    async fn savepoint_status(
        &self,
        job_id: &str,
        trigger: &str,
    ) -> Result<SavepointStatus, ClusterError> {
        self.record(ClusterCall::SavepointStatus {
            job_id: job_id.to_string(),
            trigger: trigger.to_string(),
        })?;
        let mut state = self.state.lock();
        if let Some(script) = state.savepoint_scripts.get_mut(job_id) {
            if let Some(next) = script.pop_front() {
                return Ok(next);
            }
        }
        Ok(SavepointStatus::Completed(format!("/savepoints/{job_id}/{trigger}")))
    }

    async fn cancel(&self, job_id: &str) -> Result<bool, ClusterError> {
        self.record(ClusterCall::Cancel(job_id.to_string()))?;
        let mut state = self.state.lock();
        if let Some(observed) = state.jobs.get_mut(job_id) {
            observed.phase = JobPhase::Stopped;
        }
        Ok(true)
    }
}
