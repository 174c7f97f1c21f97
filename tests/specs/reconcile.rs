//! Reconciliation scenario specs: deploy, no-op, savepoint update, batch
//! stop, and concurrent rejection.

use crate::prelude::*;

// S1 — a job the cluster does not know gets deployed exactly once, and the
// tracker learns its hash.
#[tokio::test]
async fn deploy_a_new_streaming_job() {
    let w = world();
    let spec = streaming_spec("j1");

    let results = w.reconciler.reconcile_all(std::slice::from_ref(&spec)).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].job_id, "j1");
    assert_eq!(results[0].action_taken, ReconcileAction::Deploy);
    assert!(results[0].success, "{:?}", results[0]);

    let deploys = w
        .client()
        .calls()
        .into_iter()
        .filter(|c| matches!(c, ClusterCall::Deploy { .. }))
        .count();
    assert_eq!(deploys, 1);
    assert!(!w.tracker.has_changed("j1", &spec).await.unwrap());
    assert_eq!(
        w.tracker.cached_hash("j1"),
        Some(SpecTracker::hash(&spec).unwrap())
    );
}

// S2 — an unchanged running job is a no-op: no mutation-side calls at all.
#[tokio::test]
async fn no_op_on_unchanged_running_job() {
    let w = world();
    let spec = streaming_spec("j1");
    w.tracker.update_tracker("j1", &spec).await.unwrap();
    w.client().set_phase("j1", JobPhase::Running);

    let results = w.reconciler.reconcile_all(std::slice::from_ref(&spec)).await;

    assert!(results[0].success);
    assert_eq!(results[0].action_taken, ReconcileAction::NoAction);
    for call in w.client().calls() {
        assert!(matches!(call, ClusterCall::GetJob(_)), "unexpected call {call:?}");
    }
}

// S3 — a changed running streaming job updates through a savepoint:
// trigger, poll until completed, stop, deploy from the savepoint.
#[tokio::test]
async fn streaming_update_with_savepoint() {
    let w = world();
    let old = streaming_spec("j1");
    w.tracker.update_tracker("j1", &old).await.unwrap();
    w.client().set_phase("j1", JobPhase::Running);

    let mut new = streaming_spec("j1");
    new.parallelism = 4;
    let result = w.reconciler.reconcile_job(&new).await;

    assert!(result.success, "{result:?}");
    assert_eq!(result.action_taken, ReconcileAction::Update);

    let calls = w.client().calls();
    assert!(matches!(calls[0], ClusterCall::GetJob(_)));
    assert!(
        matches!(&calls[1], ClusterCall::TriggerSavepoint { job_id, dir }
            if job_id == "j1" && dir == "/savepoints/j1")
    );
    assert!(matches!(&calls[2], ClusterCall::SavepointStatus { .. }));
    assert!(matches!(&calls[3], ClusterCall::Stop { job_id, .. } if job_id == "j1"));
    match &calls[4] {
        ClusterCall::Deploy { artifact, savepoint_path, parallelism } => {
            assert_eq!(artifact, "/a.jar");
            assert_eq!(*parallelism, 4);
            assert_eq!(savepoint_path.as_deref(), Some("/savepoints/j1/trigger-1"));
        }
        other => panic!("expected a deploy, got {other:?}"),
    }
    assert_eq!(calls.len(), 5);
}

// S4 — a changed running batch job is stopped; the redeploy belongs to the
// next cycle.
#[tokio::test]
async fn batch_change_stops_for_redeploy() {
    let w = world();
    let old = batch_spec("j2");
    w.tracker.update_tracker("j2", &old).await.unwrap();
    w.client().set_phase("j2", JobPhase::Running);

    let mut new = batch_spec("j2");
    new.parallelism = 8;
    let result = w.reconciler.reconcile_job(&new).await;

    assert!(result.success);
    assert_eq!(result.action_taken, ReconcileAction::Stop);
    let calls = w.client().calls();
    assert_eq!(
        calls.iter().filter(|c| matches!(c, ClusterCall::Stop { .. })).count(),
        1
    );
    assert!(!calls.iter().any(|c| matches!(c, ClusterCall::Deploy { .. })));

    // Next cycle: the cluster now reports the job stopped, so it redeploys.
    let result = w.reconciler.reconcile_job(&new).await;
    assert!(result.success);
    assert_eq!(result.action_taken, ReconcileAction::Deploy);
}

// S5 — two concurrent reconciliations of the same job: one wins, the other
// is rejected with the conflicting claim time, and the winner is unharmed.
#[tokio::test]
async fn concurrent_reconciliation_rejection() {
    let w = world();
    let gate = w.client().gate_get_job();
    let spec = streaming_spec("j1");

    let first = {
        let reconciler = w.reconciler.clone();
        let spec = spec.clone();
        tokio::spawn(async move { reconciler.reconcile_job(&spec).await })
    };
    for _ in 0..200 {
        if w.reconciler.active_reconciliations().contains_key("j1") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let second = w.reconciler.reconcile_job(&spec).await;
    assert!(!second.success);
    assert_eq!(second.error_code, Some(ErrorCode::ConcurrentReconciliation));
    let started_at = second.context.get("started_at").cloned().unwrap_or_default();
    assert!(!started_at.is_empty(), "context must carry the conflicting start time");

    gate.add_permits(1);
    let first = first.await.unwrap();
    assert!(first.success, "{first:?}");
    assert!(w.reconciler.active_reconciliations().is_empty());
}
