// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The reconciliation engine.
//!
//! Per job: claim the exclusion, observe the cluster through the breaker,
//! decide an action from the observed×desired matrix, execute it, record the
//! outcome. `reconcile_all` fans out under a counting semaphore and is total:
//! one result per input spec, in input order, panics and timeouts included.
//!
//! The exclusion map is the one correctness-critical piece of shared state:
//! a drop-guard releases the claim on every exit path, so a crashed task can
//! never wedge future reconciliations of its job (a stale claim also expires
//! by age, as a second line of defense).

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use flinkctl_cluster::{
    CallError, CircuitBreaker, ClusterClient, ClusterError, DeployConfig, SavepointStatus,
    StopOptions,
};
use flinkctl_core::{
    Clock, ControllerError, ErrorCode, JobPhase, JobSpec, ObservedState, ReconcileAction,
    ReconciliationResult, ReconciliationStatistics, SystemClock,
};
use flinkctl_storage::{ChangeTracker, StateStore};
use futures_util::future::join_all;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::metrics::{LogMetrics, MetricsSink};
use crate::scheduler::JobRunner;

struct ActiveEntry {
    started: Instant,
    started_at: DateTime<Utc>,
}

#[derive(Default)]
struct StatsInner {
    stats: ReconciliationStatistics,
    duration_sum: u64,
    duration_count: u64,
}

/// Removes the job's exclusion claim when dropped, panic and cancellation
/// included.
struct ActiveGuard<'a> {
    active: &'a Mutex<HashMap<String, ActiveEntry>>,
    job_id: &'a str,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.lock().remove(self.job_id);
    }
}

/// Declarative job controller over one cluster client.
pub struct Reconciler<L: ClusterClient, C: Clock = SystemClock> {
    client: Arc<L>,
    breaker: CircuitBreaker<C>,
    tracker: Option<Arc<dyn ChangeTracker>>,
    state_store: Option<Arc<dyn StateStore>>,
    metrics: Arc<dyn MetricsSink>,
    config: ControllerConfig,
    clock: C,
    active: Mutex<HashMap<String, ActiveEntry>>,
    stats: Mutex<StatsInner>,
    semaphore: Arc<Semaphore>,
}

impl<L: ClusterClient> Reconciler<L, SystemClock> {
    pub fn new(client: L, config: ControllerConfig) -> Self {
        Self::with_clock(client, config, SystemClock)
    }
}

impl<L: ClusterClient, C: Clock> Reconciler<L, C> {
    pub fn with_clock(client: L, config: ControllerConfig, clock: C) -> Self {
        let breaker = CircuitBreaker::with_clock(
            config.breaker.failure_threshold,
            config.breaker.recovery_timeout,
            clock.clone(),
        );
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_reconciliations.max(1)));
        Self {
            client: Arc::new(client),
            breaker,
            tracker: None,
            state_store: None,
            metrics: Arc::new(LogMetrics),
            config,
            clock,
            active: Mutex::new(HashMap::new()),
            stats: Mutex::new(StatsInner::default()),
            semaphore,
        }
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn ChangeTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The breaker guarding this engine's cluster calls.
    pub fn breaker(&self) -> &CircuitBreaker<C> {
        &self.breaker
    }

    /// The underlying cluster client.
    pub fn client(&self) -> &L {
        &self.client
    }

    /// Reconcile a batch. Total and order-aligned: `results[i]` answers
    /// `specs[i]`, whatever happened to the task that produced it.
    pub async fn reconcile_all(&self, specs: &[JobSpec]) -> Vec<ReconciliationResult> {
        if specs.is_empty() {
            return Vec::new();
        }
        self.stats.lock().stats.total_jobs += specs.len() as u64;

        let tasks = specs.iter().map(|spec| {
            let semaphore = self.semaphore.clone();
            async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return self.internal_failure(spec, "concurrency gate closed"),
                };
                match AssertUnwindSafe(self.reconcile_job(spec)).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => self.internal_failure(spec, "reconciliation task panicked"),
                }
            }
        });
        let results = join_all(tasks).await;
        self.update_statistics(&results);
        results
    }

    /// Reconcile one job end to end. Never returns an error: every failure
    /// becomes a failed result with a code.
    pub async fn reconcile_job(&self, spec: &JobSpec) -> ReconciliationResult {
        let started = self.clock.now();
        let outcome = self.reconcile_guarded(spec).await;
        let duration_ms = self.clock.now().saturating_duration_since(started).as_millis() as u64;
        let reconciled_at = self.clock.utc_now();

        match outcome {
            Ok(action) => {
                self.metrics.record_reconciliation(&spec.job_id, action, true, duration_ms);
                info!(job_id = %spec.job_id, action = %action, duration_ms, "reconciled");
                ReconciliationResult::ok(&spec.job_id, action, duration_ms, reconciled_at)
            }
            Err(err) => {
                if err.code() == ErrorCode::ConcurrentReconciliation {
                    self.stats.lock().stats.concurrent_attempts += 1;
                }
                self.metrics.record_reconciliation(
                    &spec.job_id,
                    ReconcileAction::NoAction,
                    false,
                    duration_ms,
                );
                self.metrics.record_error(&spec.job_id, err.code().as_str(), err.message());
                warn!(job_id = %spec.job_id, code = %err.code(), error = %err, "reconciliation failed");
                ReconciliationResult::failed(&spec.job_id, &err, duration_ms, reconciled_at)
            }
        }
    }

    /// Counters snapshot.
    pub fn statistics(&self) -> ReconciliationStatistics {
        self.stats.lock().stats.clone()
    }

    /// Jobs currently holding the exclusion, with their claim times.
    pub fn active_reconciliations(&self) -> HashMap<String, DateTime<Utc>> {
        self.active
            .lock()
            .iter()
            .map(|(job_id, entry)| (job_id.clone(), entry.started_at))
            .collect()
    }

    /// Engine health: breaker not open and the cluster answering.
    pub async fn health(&self) -> bool {
        if self.breaker.is_open() {
            return false;
        }
        self.client.health().await.unwrap_or(false)
    }

    async fn reconcile_guarded(&self, spec: &JobSpec) -> Result<ReconcileAction, ControllerError> {
        spec.validate().map_err(|e| {
            ControllerError::new(ErrorCode::SpecValidationFailed, e.to_string())
                .with_job_id(&spec.job_id)
        })?;

        let _guard = self.try_claim(&spec.job_id)?;
        match tokio::time::timeout(self.config.reconciliation_timeout, self.reconcile_inner(spec))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ControllerError::new(
                ErrorCode::ReconciliationTimeout,
                format!(
                    "reconciliation exceeded {}s",
                    self.config.reconciliation_timeout.as_secs()
                ),
            )
            .with_job_id(&spec.job_id)),
        }
        // _guard drops here on every path, releasing the exclusion.
    }

    /// Claim the per-job exclusion or fail with `CONCURRENT_RECONCILIATION`.
    ///
    /// A claim older than the reconciliation timeout belongs to a task that
    /// died without cleanup; it is cleared and re-claimed.
    fn try_claim<'a>(&'a self, job_id: &'a str) -> Result<ActiveGuard<'a>, ControllerError> {
        let mut active = self.active.lock();
        if let Some(entry) = active.get(job_id) {
            let age = self.clock.now().saturating_duration_since(entry.started);
            if age <= self.config.reconciliation_timeout {
                return Err(ControllerError::concurrent(job_id, entry.started_at.to_rfc3339()));
            }
            warn!(job_id, age_secs = age.as_secs(), "clearing stale reconciliation claim");
            active.remove(job_id);
        }
        active.insert(
            job_id.to_string(),
            ActiveEntry { started: self.clock.now(), started_at: self.clock.utc_now() },
        );
        Ok(ActiveGuard { active: &self.active, job_id })
    }

    async fn reconcile_inner(&self, spec: &JobSpec) -> Result<ReconcileAction, ControllerError> {
        let observed = self.observe(&spec.job_id).await?;
        let changed = if observed.phase == JobPhase::Running {
            self.spec_changed(spec).await
        } else {
            false
        };
        let action = ReconcileAction::decide(observed.phase, changed, spec.job_type);
        debug!(
            job_id = %spec.job_id,
            phase = %observed.phase,
            changed,
            action = %action,
            "reconciliation decided"
        );
        self.execute(spec, &observed, action).await?;
        Ok(action)
    }

    /// Observe the job through the breaker; not-found is a phase, not a
    /// failure.
    async fn observe(&self, job_id: &str) -> Result<ObservedState, ControllerError> {
        match self.breaker.call(self.client.get_job(job_id)).await {
            Ok(observed) => Ok(observed),
            Err(CallError::Cluster(ClusterError::NotFound(_))) => Ok(ObservedState::absent()),
            Err(err) => Err(self.map_call_error(err, job_id)),
        }
    }

    async fn spec_changed(&self, spec: &JobSpec) -> bool {
        let Some(tracker) = &self.tracker else {
            // No tracker wired: treat running jobs as unchanged rather than
            // forcing spurious updates.
            return false;
        };
        match tracker.has_changed(&spec.job_id, spec).await {
            Ok(changed) => changed,
            Err(e) => {
                warn!(
                    job_id = %spec.job_id,
                    error = %e,
                    "change tracker read failed, assuming unchanged"
                );
                false
            }
        }
    }

    async fn execute(
        &self,
        spec: &JobSpec,
        observed: &ObservedState,
        action: ReconcileAction,
    ) -> Result<(), ControllerError> {
        match action {
            ReconcileAction::NoAction => Ok(()),
            ReconcileAction::Deploy => {
                self.deploy_job(spec, spec.savepoint_path.clone(), ErrorCode::JobDeploymentFailed)
                    .await?;
                self.commit_success(spec).await;
                Ok(())
            }
            ReconcileAction::Update => {
                self.update_streaming(spec).await?;
                self.commit_success(spec).await;
                Ok(())
            }
            ReconcileAction::Stop => {
                // The changed batch spec redeploys on the next cycle, once
                // the cluster observes the job as stopped.
                self.breaker
                    .call(self.client.stop(&spec.job_id, &StopOptions::default()))
                    .await
                    .map_err(|e| self.map_call_error(e, &spec.job_id))?;
                info!(job_id = %spec.job_id, "batch job stopped for redeploy");
                Ok(())
            }
            ReconcileAction::Restart => {
                match observed.last_savepoint.clone() {
                    Some(savepoint) => {
                        self.deploy_job(spec, Some(savepoint), ErrorCode::SavepointRestoreFailed)
                            .await?
                    }
                    None => {
                        self.deploy_job(
                            spec,
                            spec.savepoint_path.clone(),
                            ErrorCode::JobDeploymentFailed,
                        )
                        .await?
                    }
                }
                self.commit_success(spec).await;
                Ok(())
            }
        }
    }

    /// Savepoint-based in-place update: trigger, poll to completion, stop,
    /// redeploy from the fresh savepoint. Once the job is stopped the
    /// redeploy attempt always happens within this same reconciliation.
    async fn update_streaming(&self, spec: &JobSpec) -> Result<(), ControllerError> {
        let dir = format!(
            "{}/{}",
            self.config.savepoint_dir.trim_end_matches('/'),
            spec.job_id
        );
        let trigger = self
            .breaker
            .call(self.client.trigger_savepoint(&spec.job_id, &dir))
            .await
            .map_err(|e| self.savepoint_error(e, &spec.job_id, "failed to trigger savepoint"))?;

        let savepoint = self.await_savepoint(&spec.job_id, &trigger).await?;
        info!(job_id = %spec.job_id, savepoint, "savepoint completed, stopping for redeploy");

        self.breaker
            .call(self.client.stop(&spec.job_id, &StopOptions::default()))
            .await
            .map_err(|e| match e {
                CallError::Open { .. } => self.map_call_error(e, &spec.job_id),
                CallError::Cluster(cluster) => ControllerError::new(
                    ErrorCode::JobDeploymentFailed,
                    format!("failed to stop before redeploy: {cluster}"),
                )
                .with_job_id(&spec.job_id)
                .with_source(cluster),
            })?;

        self.deploy_job(spec, Some(savepoint), ErrorCode::JobDeploymentFailed).await
    }

    /// Poll the savepoint trigger until it completes, fails, or the poll
    /// budget runs out.
    async fn await_savepoint(&self, job_id: &str, trigger: &str) -> Result<String, ControllerError> {
        let deadline = self.clock.now() + self.config.savepoint_poll_timeout;
        loop {
            match self.breaker.call(self.client.savepoint_status(job_id, trigger)).await {
                Ok(SavepointStatus::Completed(location)) => return Ok(location),
                Ok(SavepointStatus::Failed(reason)) => {
                    return Err(ControllerError::new(
                        ErrorCode::SavepointCreationFailed,
                        format!("savepoint failed: {reason}"),
                    )
                    .with_job_id(job_id)
                    .with_context("trigger", trigger))
                }
                Ok(SavepointStatus::InProgress) => {
                    if self.clock.now() >= deadline {
                        return Err(ControllerError::new(
                            ErrorCode::SavepointCreationFailed,
                            format!(
                                "savepoint did not complete within {}s",
                                self.config.savepoint_poll_timeout.as_secs()
                            ),
                        )
                        .with_job_id(job_id)
                        .with_context("trigger", trigger));
                    }
                    tokio::time::sleep(self.config.savepoint_poll_interval).await;
                }
                Err(err) => {
                    return Err(self.savepoint_error(err, job_id, "failed to poll savepoint status"))
                }
            }
        }
    }

    async fn deploy_job(
        &self,
        spec: &JobSpec,
        savepoint_path: Option<String>,
        failure_code: ErrorCode,
    ) -> Result<(), ControllerError> {
        let started = self.clock.now();
        let mut deploy = DeployConfig::new(spec.parallelism);
        deploy.savepoint_path = savepoint_path;

        let result = self.breaker.call(self.client.deploy(&spec.artifact_path, &deploy)).await;
        let duration_ms = self.clock.now().saturating_duration_since(started).as_millis() as u64;
        match result {
            Ok(cluster_job_id) => {
                self.metrics.record_deployment(&spec.job_id, true, duration_ms);
                debug!(
                    job_id = %spec.job_id,
                    cluster_job_id,
                    savepoint = deploy.savepoint_path.as_deref().unwrap_or(""),
                    "deployed"
                );
                Ok(())
            }
            Err(err) => {
                self.metrics.record_deployment(&spec.job_id, false, duration_ms);
                Err(match err {
                    CallError::Open { .. } => self.map_call_error(err, &spec.job_id),
                    CallError::Cluster(cluster) => ControllerError::new(
                        failure_code,
                        format!("failed to deploy {}: {cluster}", spec.job_id),
                    )
                    .with_job_id(&spec.job_id)
                    .with_source(cluster),
                })
            }
        }
    }

    /// Post-mutation bookkeeping. Store and tracker failures are logged and
    /// retried on a later reconciliation; the cluster change is never rolled
    /// back to match them.
    async fn commit_success(&self, spec: &JobSpec) {
        if let Some(store) = &self.state_store {
            if let Err(e) = store.save_state(&spec.job_id, JobPhase::Running).await {
                warn!(
                    job_id = %spec.job_id,
                    error = %e,
                    "state store write failed after cluster mutation"
                );
            }
        }
        if let Some(tracker) = &self.tracker {
            if let Err(e) = tracker.update_tracker(&spec.job_id, spec).await {
                warn!(
                    job_id = %spec.job_id,
                    error = %e,
                    "tracker write failed after cluster mutation"
                );
            }
        }
    }

    fn savepoint_error(&self, err: CallError, job_id: &str, message: &str) -> ControllerError {
        match err {
            CallError::Open { .. } => self.map_call_error(err, job_id),
            CallError::Cluster(cluster) => {
                ControllerError::new(ErrorCode::SavepointCreationFailed, format!("{message}: {cluster}"))
                    .with_job_id(job_id)
                    .with_source(cluster)
            }
        }
    }

    fn map_call_error(&self, err: CallError, job_id: &str) -> ControllerError {
        match err {
            CallError::Open { failures } => ControllerError::new(
                ErrorCode::CircuitBreakerOpen,
                format!("circuit breaker is open after {failures} consecutive failures"),
            )
            .with_job_id(job_id)
            .with_context("failures", failures.to_string()),
            CallError::Cluster(cluster) => {
                let code = match &cluster {
                    ClusterError::NotFound(_) => ErrorCode::JobNotFound,
                    ClusterError::Unavailable(_) => ErrorCode::FlinkClusterUnavailable,
                    ClusterError::Api { .. }
                    | ClusterError::Auth(_)
                    | ClusterError::Protocol(_) => ErrorCode::FlinkApiError,
                };
                let mut mapped = ControllerError::new(code, cluster.to_string())
                    .with_job_id(job_id)
                    .with_source(cluster.clone());
                if matches!(cluster, ClusterError::Auth(_)) {
                    mapped = mapped.with_context("auth", "rejected");
                }
                mapped
            }
        }
    }

    fn internal_failure(&self, spec: &JobSpec, message: &str) -> ReconciliationResult {
        let err = ControllerError::new(ErrorCode::ReconciliationFailed, message)
            .with_job_id(&spec.job_id);
        ReconciliationResult::failed(&spec.job_id, &err, 0, self.clock.utc_now())
    }

    fn update_statistics(&self, results: &[ReconciliationResult]) {
        let mut inner = self.stats.lock();
        for result in results {
            if result.success {
                inner.stats.successful += 1;
            } else {
                inner.stats.failed += 1;
            }
            *inner
                .stats
                .actions_taken
                .entry(result.action_taken.to_string())
                .or_insert(0) += 1;
            if let Some(code) = result.error_code {
                *inner.stats.error_codes.entry(code.as_str().to_string()).or_insert(0) += 1;
            }
            if result.duration_ms > 0 {
                inner.duration_sum += result.duration_ms;
                inner.duration_count += 1;
            }
        }
        if inner.duration_count > 0 {
            inner.stats.avg_duration_ms = inner.duration_sum as f64 / inner.duration_count as f64;
        }
    }
}

#[async_trait::async_trait]
impl<L: ClusterClient, C: Clock> JobRunner for Reconciler<L, C> {
    async fn run_job(&self, spec: &JobSpec) -> Result<(), ControllerError> {
        let result = self.reconcile_job(spec).await;
        if result.success {
            Ok(())
        } else {
            let code = result.error_code.unwrap_or(ErrorCode::ReconciliationFailed);
            let message = result
                .error_message
                .unwrap_or_else(|| "reconciliation failed".to_string());
            Err(ControllerError::new(code, message).with_job_id(&spec.job_id))
        }
    }
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod tests;
