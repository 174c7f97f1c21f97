// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::metrics::{MetricsEvent, RecordingMetrics};
use flinkctl_cluster::{ClusterCall, FakeClusterClient};
use flinkctl_core::{FakeClock, JobType};
use flinkctl_storage::{MemoryStateStore, SpecTracker};
use std::time::Duration;

struct Harness {
    reconciler: Arc<Reconciler<FakeClusterClient, FakeClock>>,
    clock: FakeClock,
    tracker: Arc<SpecTracker>,
    store: Arc<MemoryStateStore>,
    metrics: Arc<RecordingMetrics>,
    _dir: tempfile::TempDir,
}

fn fast_config() -> ControllerConfig {
    ControllerConfig::default().savepoint_poll_interval(Duration::from_millis(1))
}

fn harness() -> Harness {
    harness_with(fast_config())
}

fn harness_with(config: ControllerConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::new();
    let tracker = Arc::new(SpecTracker::open(dir.path().join("tracker.journal")).unwrap());
    let store = Arc::new(MemoryStateStore::new());
    let metrics = Arc::new(RecordingMetrics::new());
    let reconciler = Arc::new(
        Reconciler::with_clock(FakeClusterClient::new(), config, clock.clone())
            .with_tracker(tracker.clone())
            .with_state_store(store.clone())
            .with_metrics(metrics.clone()),
    );
    Harness { reconciler, clock, tracker, store, metrics, _dir: dir }
}

fn streaming(job_id: &str) -> JobSpec {
    JobSpec::builder().job_id(job_id).job_type(JobType::Streaming).build()
}

fn batch(job_id: &str) -> JobSpec {
    JobSpec::builder().job_id(job_id).job_type(JobType::Batch).build()
}

fn unavailable() -> flinkctl_cluster::ClusterError {
    flinkctl_cluster::ClusterError::Unavailable("connect refused".to_string())
}

#[tokio::test]
async fn deploys_a_job_the_cluster_does_not_know() {
    let h = harness();
    let spec = streaming("j1");

    let result = h.reconciler.reconcile_job(&spec).await;

    assert!(result.success, "{:?}", result);
    assert_eq!(result.action_taken, ReconcileAction::Deploy);
    let deploys: Vec<_> = h
        .reconciler
        .client()
        .calls()
        .into_iter()
        .filter(|c| matches!(c, ClusterCall::Deploy { .. }))
        .collect();
    assert_eq!(deploys.len(), 1);
    assert!(!h.tracker.has_changed("j1", &spec).await.unwrap());
    assert_eq!(h.store.get_state("j1").await.unwrap(), Some(JobPhase::Running));
    assert!(h
        .metrics
        .events()
        .contains(&MetricsEvent::Deployment { job_id: "j1".to_string(), success: true }));
}

#[tokio::test]
async fn unchanged_running_job_is_a_noop() {
    let h = harness();
    let spec = streaming("j1");
    h.tracker.update_tracker("j1", &spec).await.unwrap();
    h.reconciler.client().set_phase("j1", JobPhase::Running);

    let result = h.reconciler.reconcile_job(&spec).await;

    assert!(result.success);
    assert_eq!(result.action_taken, ReconcileAction::NoAction);
    for call in h.reconciler.client().calls() {
        assert!(
            matches!(call, ClusterCall::GetJob(_)),
            "unexpected cluster call: {call:?}"
        );
    }
}

#[tokio::test]
async fn changed_streaming_job_updates_via_savepoint() {
    let h = harness();
    let old = streaming("j1");
    h.tracker.update_tracker("j1", &old).await.unwrap();
    h.reconciler.client().set_phase("j1", JobPhase::Running);

    let new = JobSpec::builder().job_id("j1").parallelism(4).build();
    let result = h.reconciler.reconcile_job(&new).await;

    assert!(result.success, "{:?}", result);
    assert_eq!(result.action_taken, ReconcileAction::Update);

    // trigger → poll → stop → deploy-from-savepoint, in that order.
    let calls = h.reconciler.client().calls();
    let relevant: Vec<&ClusterCall> = calls
        .iter()
        .filter(|c| !matches!(c, ClusterCall::GetJob(_)))
        .collect();
    assert!(matches!(relevant[0], ClusterCall::TriggerSavepoint { dir, .. } if dir == "/savepoints/j1"));
    assert!(matches!(relevant[1], ClusterCall::SavepointStatus { .. }));
    assert!(matches!(relevant[2], ClusterCall::Stop { .. }));
    match relevant[3] {
        ClusterCall::Deploy { savepoint_path, .. } => {
            assert_eq!(savepoint_path.as_deref(), Some("/savepoints/j1/trigger-1"));
        }
        other => panic!("expected deploy, got {other:?}"),
    }

    assert!(!h.tracker.has_changed("j1", &new).await.unwrap());
}

#[tokio::test]
async fn changed_batch_job_is_stopped_not_updated() {
    let h = harness();
    let old = batch("b1");
    h.tracker.update_tracker("b1", &old).await.unwrap();
    h.reconciler.client().set_phase("b1", JobPhase::Running);

    let new = JobSpec::builder().job_id("b1").job_type(JobType::Batch).parallelism(8).build();
    let result = h.reconciler.reconcile_job(&new).await;

    assert!(result.success);
    assert_eq!(result.action_taken, ReconcileAction::Stop);
    let calls = h.reconciler.client().calls();
    assert!(calls.iter().any(|c| matches!(c, ClusterCall::Stop { .. })));
    assert!(!calls.iter().any(|c| matches!(c, ClusterCall::Deploy { .. })));
    // The stop is not a completed rollout; the tracker still sees a change.
    assert!(h.tracker.has_changed("b1", &new).await.unwrap());
}

#[tokio::test]
async fn failed_job_restarts_from_its_last_savepoint() {
    let h = harness();
    h.reconciler.client().set_observed(
        "j1",
        ObservedState::new(JobPhase::Failed).with_savepoint("/savepoints/j1/sp-42"),
    );

    let result = h.reconciler.reconcile_job(&streaming("j1")).await;

    assert!(result.success);
    assert_eq!(result.action_taken, ReconcileAction::Restart);
    let calls = h.reconciler.client().calls();
    match calls.iter().find(|c| matches!(c, ClusterCall::Deploy { .. })) {
        Some(ClusterCall::Deploy { savepoint_path, .. }) => {
            assert_eq!(savepoint_path.as_deref(), Some("/savepoints/j1/sp-42"));
        }
        other => panic!("expected deploy, got {other:?}"),
    }
}

#[tokio::test]
async fn failed_job_without_savepoint_restarts_fresh() {
    let h = harness();
    h.reconciler.client().set_phase("j1", JobPhase::Failed);

    let result = h.reconciler.reconcile_job(&streaming("j1")).await;

    assert!(result.success);
    assert_eq!(result.action_taken, ReconcileAction::Restart);
    match h
        .reconciler
        .client()
        .calls()
        .iter()
        .find(|c| matches!(c, ClusterCall::Deploy { .. }))
    {
        Some(ClusterCall::Deploy { savepoint_path, .. }) => assert!(savepoint_path.is_none()),
        other => panic!("expected deploy, got {other:?}"),
    }
}

#[tokio::test]
async fn restarting_job_is_left_to_settle() {
    let h = harness();
    h.reconciler.client().set_phase("j1", JobPhase::Restarting);

    let result = h.reconciler.reconcile_job(&streaming("j1")).await;

    assert!(result.success);
    assert_eq!(result.action_taken, ReconcileAction::NoAction);
}

#[tokio::test]
async fn stopped_job_is_redeployed() {
    let h = harness();
    h.reconciler.client().set_phase("j1", JobPhase::Stopped);

    let result = h.reconciler.reconcile_job(&streaming("j1")).await;

    assert!(result.success);
    assert_eq!(result.action_taken, ReconcileAction::Deploy);
}

#[tokio::test]
async fn without_a_tracker_running_jobs_are_unchanged() {
    let reconciler =
        Reconciler::with_clock(FakeClusterClient::new(), fast_config(), FakeClock::new());
    reconciler.client().set_phase("j1", JobPhase::Running);

    let result = reconciler.reconcile_job(&streaming("j1")).await;

    assert!(result.success);
    assert_eq!(result.action_taken, ReconcileAction::NoAction);
}

#[tokio::test]
async fn invalid_spec_fails_before_touching_the_cluster() {
    let h = harness();
    let spec = JobSpec::builder().job_id("j1").parallelism(0).build();

    let result = h.reconciler.reconcile_job(&spec).await;

    assert!(!result.success);
    assert_eq!(result.error_code, Some(ErrorCode::SpecValidationFailed));
    assert!(h.reconciler.client().calls().is_empty());
}

#[tokio::test]
async fn deploy_failure_carries_the_deployment_code() {
    let h = harness();
    h.reconciler.client().push_failure_for(
        "deploy",
        flinkctl_cluster::ClusterError::Api { status: 400, message: "bad jar".to_string() },
    );

    let spec = streaming("j1");
    let result = h.reconciler.reconcile_job(&spec).await;

    assert!(!result.success);
    assert_eq!(result.error_code, Some(ErrorCode::JobDeploymentFailed));
    // Failed rollouts must not advance the tracker.
    assert!(h.tracker.has_changed("j1", &spec).await.unwrap());
    assert!(h
        .metrics
        .events()
        .contains(&MetricsEvent::Deployment { job_id: "j1".to_string(), success: false }));
}

#[tokio::test]
async fn savepoint_failure_aborts_the_update() {
    let h = harness();
    let old = streaming("j1");
    h.tracker.update_tracker("j1", &old).await.unwrap();
    h.reconciler.client().set_phase("j1", JobPhase::Running);
    h.reconciler.client().set_savepoint_script(
        "j1",
        vec![
            flinkctl_cluster::SavepointStatus::InProgress,
            flinkctl_cluster::SavepointStatus::Failed("disk full".to_string()),
        ],
    );

    let new = JobSpec::builder().job_id("j1").parallelism(4).build();
    let result = h.reconciler.reconcile_job(&new).await;

    assert!(!result.success);
    assert_eq!(result.error_code, Some(ErrorCode::SavepointCreationFailed));
    let calls = h.reconciler.client().calls();
    assert!(!calls.iter().any(|c| matches!(c, ClusterCall::Stop { .. })));
    assert!(!calls.iter().any(|c| matches!(c, ClusterCall::Deploy { .. })));
    // The update never completed, so the change is still pending.
    assert!(h.tracker.has_changed("j1", &new).await.unwrap());
}

#[tokio::test]
async fn savepoint_poll_budget_is_bounded() {
    let h = harness_with(
        fast_config().savepoint_poll_timeout(Duration::ZERO),
    );
    let old = streaming("j1");
    h.tracker.update_tracker("j1", &old).await.unwrap();
    h.reconciler.client().set_phase("j1", JobPhase::Running);
    h.reconciler
        .client()
        .set_savepoint_script("j1", vec![flinkctl_cluster::SavepointStatus::InProgress]);

    let new = JobSpec::builder().job_id("j1").parallelism(4).build();
    let result = h.reconciler.reconcile_job(&new).await;

    assert!(!result.success);
    assert_eq!(result.error_code, Some(ErrorCode::SavepointCreationFailed));
}

#[tokio::test]
async fn concurrent_reconciliation_is_rejected() {
    let h = harness();
    let gate = h.reconciler.client().gate_get_job();
    let spec = streaming("j1");

    let first = {
        let reconciler = h.reconciler.clone();
        let spec = spec.clone();
        tokio::spawn(async move { reconciler.reconcile_job(&spec).await })
    };

    // Wait for the first task to claim the exclusion.
    for _ in 0..200 {
        if h.reconciler.active_reconciliations().contains_key("j1") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(h.reconciler.active_reconciliations().contains_key("j1"));

    let second = h.reconciler.reconcile_job(&spec).await;
    assert!(!second.success);
    assert_eq!(second.error_code, Some(ErrorCode::ConcurrentReconciliation));
    assert!(!second.context.get("started_at").map_or(true, String::is_empty));

    gate.add_permits(1);
    let first = first.await.unwrap();
    assert!(first.success, "{first:?}");

    // Invariant: the exclusion is released on every path.
    assert!(h.reconciler.active_reconciliations().is_empty());
    assert_eq!(h.reconciler.statistics().concurrent_attempts, 1);
}

#[tokio::test]
async fn stale_claims_are_cleared_after_the_timeout() {
    let h = harness();
    let gate = h.reconciler.client().gate_get_job();
    let spec = streaming("j1");

    let first = {
        let reconciler = h.reconciler.clone();
        let spec = spec.clone();
        tokio::spawn(async move { reconciler.reconcile_job(&spec).await })
    };
    for _ in 0..200 {
        if h.reconciler.active_reconciliations().contains_key("j1") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    // The claim is now older than the reconciliation timeout: a new
    // reconciliation treats it as a crashed task and proceeds.
    h.clock.advance(Duration::from_secs(301));
    gate.add_permits(1);
    let second = h.reconciler.reconcile_job(&spec).await;
    assert!(second.success, "{second:?}");

    gate.add_permits(1);
    let _ = first.await.unwrap();
}

#[tokio::test]
async fn slow_reconciliation_times_out_and_cleans_up() {
    let h = harness_with(
        fast_config().reconciliation_timeout(Duration::from_millis(50)),
    );
    let _gate = h.reconciler.client().gate_get_job();

    let result = h.reconciler.reconcile_job(&streaming("j1")).await;

    assert!(!result.success);
    assert_eq!(result.error_code, Some(ErrorCode::ReconciliationTimeout));
    assert!(h.reconciler.active_reconciliations().is_empty());
}

#[tokio::test]
async fn batch_results_are_total_and_order_aligned() {
    let h = harness_with(fast_config().max_concurrent_reconciliations(1));
    h.reconciler.client().push_failure_for("get_job", unavailable());

    let specs = vec![
        streaming("fails"),
        JobSpec::builder().job_id("bad id!").build(),
        streaming("deploys"),
    ];
    let results = h.reconciler.reconcile_all(&specs).await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].job_id, "fails");
    assert_eq!(results[0].error_code, Some(ErrorCode::FlinkClusterUnavailable));
    assert_eq!(results[1].job_id, "bad id!");
    assert_eq!(results[1].error_code, Some(ErrorCode::SpecValidationFailed));
    assert_eq!(results[2].job_id, "deploys");
    assert!(results[2].success);
    assert_eq!(results[2].action_taken, ReconcileAction::Deploy);
}

#[tokio::test]
async fn empty_batch_is_an_empty_result() {
    let h = harness();
    assert!(h.reconciler.reconcile_all(&[]).await.is_empty());
    assert_eq!(h.reconciler.statistics().total_jobs, 0);
}

#[tokio::test]
async fn statistics_accumulate_across_batches() {
    let h = harness();
    h.reconciler.client().set_phase("running", JobPhase::Running);
    let running = streaming("running");
    h.tracker.update_tracker("running", &running).await.unwrap();

    let first = h.reconciler.reconcile_all(&[streaming("new-1"), running.clone()]).await;
    let second = h
        .reconciler
        .reconcile_all(&[JobSpec::builder().job_id("bad").parallelism(0).build()])
        .await;
    assert_eq!(first.len() + second.len(), 3);

    let stats = h.reconciler.statistics();
    assert_eq!(stats.total_jobs, 3);
    assert_eq!(stats.successful + stats.failed, 3);
    assert_eq!(stats.successful, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.actions_taken.get("deploy"), Some(&1));
    assert_eq!(stats.actions_taken.get("no_action"), Some(&2));
    assert_eq!(stats.error_codes.get("SPEC_VALIDATION_FAILED"), Some(&1));
}

#[tokio::test]
async fn breaker_opens_after_consecutive_transient_failures() {
    let h = harness();
    h.reconciler.client().push_failures(unavailable(), 3);
    let spec = streaming("j1");

    for _ in 0..3 {
        let result = h.reconciler.reconcile_job(&spec).await;
        assert_eq!(result.error_code, Some(ErrorCode::FlinkClusterUnavailable));
    }

    let calls_before = h.reconciler.client().calls().len();
    let result = h.reconciler.reconcile_job(&spec).await;
    assert_eq!(result.error_code, Some(ErrorCode::CircuitBreakerOpen));
    // Fast-fail: no cluster call was made.
    assert_eq!(h.reconciler.client().calls().len(), calls_before);

    // After the recovery window a successful probe closes the breaker and
    // reconciliation proceeds normally.
    h.clock.advance(Duration::from_secs(30));
    h.reconciler.client().set_phase("j1", JobPhase::Running);
    h.tracker.update_tracker("j1", &spec).await.unwrap();
    let result = h.reconciler.reconcile_job(&spec).await;
    assert!(result.success, "{result:?}");
    assert_eq!(result.action_taken, ReconcileAction::NoAction);
}

#[tokio::test]
async fn health_reflects_breaker_and_cluster() {
    let h = harness();
    assert!(h.reconciler.health().await);

    h.reconciler.client().push_failures(unavailable(), 3);
    for _ in 0..3 {
        let _ = h.reconciler.reconcile_job(&streaming("j1")).await;
    }
    assert!(!h.reconciler.health().await);

    h.reconciler.breaker().reset();
    assert!(h.reconciler.health().await);

    h.reconciler.client().set_healthy(false);
    assert!(!h.reconciler.health().await);
}

struct PanickingClient;

#[async_trait::async_trait]
impl flinkctl_cluster::ClusterClient for PanickingClient {
    async fn health(&self) -> Result<bool, flinkctl_cluster::ClusterError> {
        Ok(true)
    }
    async fn overview(
        &self,
    ) -> Result<flinkctl_cluster::ClusterOverview, flinkctl_cluster::ClusterError> {
        Ok(flinkctl_cluster::ClusterOverview::default())
    }
    async fn get_job(
        &self,
        _job_id: &str,
    ) -> Result<ObservedState, flinkctl_cluster::ClusterError> {
        panic!("boom");
    }
    async fn deploy(
        &self,
        _artifact: &str,
        _config: &flinkctl_cluster::DeployConfig,
    ) -> Result<String, flinkctl_cluster::ClusterError> {
        Ok("cluster-job-1".to_string())
    }
    async fn stop(
        &self,
        _job_id: &str,
        _opts: &flinkctl_cluster::StopOptions,
    ) -> Result<Option<String>, flinkctl_cluster::ClusterError> {
        Ok(None)
    }
    async fn trigger_savepoint(
        &self,
        _job_id: &str,
        _dir: &str,
    ) -> Result<String, flinkctl_cluster::ClusterError> {
        Ok("trigger-1".to_string())
    }
    async fn savepoint_status(
        &self,
        _job_id: &str,
        _trigger: &str,
    ) -> Result<flinkctl_cluster::SavepointStatus, flinkctl_cluster::ClusterError> {
        Ok(flinkctl_cluster::SavepointStatus::InProgress)
    }
    async fn cancel(&self, _job_id: &str) -> Result<bool, flinkctl_cluster::ClusterError> {
        Ok(true)
    }
}

#[tokio::test]
async fn a_panicking_task_becomes_a_failed_result() {
    let reconciler = Reconciler::new(PanickingClient, ControllerConfig::default());

    let results = reconciler.reconcile_all(&[streaming("j1")]).await;

    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert_eq!(results[0].error_code, Some(ErrorCode::ReconciliationFailed));
    // The exclusion was released during unwinding.
    assert!(reconciler.active_reconciliations().is_empty());
}
