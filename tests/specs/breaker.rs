//! Circuit-breaker scenario specs.

use crate::prelude::*;

// S6 — after three consecutive transient failures the breaker fast-fails
// without touching the cluster; after the recovery window one successful
// probe restores normal reconciliation.
#[tokio::test]
async fn breaker_opens_fast_fails_then_recovers() {
    let w = world();
    let spec = streaming_spec("j1");
    w.client()
        .push_failures(ClusterError::Unavailable("connect refused".to_string()), 3);

    for _ in 0..3 {
        let result = w.reconciler.reconcile_job(&spec).await;
        assert!(!result.success);
        assert_eq!(result.error_code, Some(ErrorCode::FlinkClusterUnavailable));
    }

    // Open: the next reconciliation fails without a cluster call.
    let calls_before = w.client().calls().len();
    let result = w.reconciler.reconcile_job(&spec).await;
    assert!(!result.success);
    assert_eq!(result.error_code, Some(ErrorCode::CircuitBreakerOpen));
    assert_eq!(w.client().calls().len(), calls_before);
    assert!(!w.reconciler.health().await);

    // Recovery window elapses; the probe observes a healthy cluster.
    w.clock.advance(Duration::from_secs(30));
    w.client().set_phase("j1", JobPhase::Running);
    w.tracker.update_tracker("j1", &spec).await.unwrap();

    let result = w.reconciler.reconcile_job(&spec).await;
    assert!(result.success, "{result:?}");
    assert_eq!(result.action_taken, ReconcileAction::NoAction);
    assert!(w.reconciler.health().await);

    // Subsequent reconciliations proceed normally.
    let result = w.reconciler.reconcile_job(&spec).await;
    assert!(result.success);
}
