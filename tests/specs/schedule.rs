//! Cron scheduling scenario specs.

use crate::prelude::*;
use chrono::TimeZone;

fn scheduled_batch(job_id: &str) -> ScheduledJobSpec {
    ScheduledJobSpec::new(batch_spec(job_id), "* * * * *")
}

// S7 — a due cron produces exactly one execution that runs a real
// reconciliation (pending → running → success), and a second fire arriving
// while the first is still running is skipped, not overlapped.
#[tokio::test]
async fn cron_fires_one_reconciliation_and_skips_overlap() {
    let w = world();
    w.clock
        .set_utc(chrono::Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 30).unwrap());
    let manager = ScheduledJobManager::with_clock(
        w.reconciler.clone(),
        SchedulerConfig::default(),
        w.clock.clone(),
    );
    manager.add(scheduled_batch("nightly")).unwrap();

    // Hold the reconciliation mid-observation so the execution stays
    // running across the next fire time.
    let gate = w.client().gate_get_job();
    let handles = manager.tick();
    assert_eq!(handles.len(), 1);
    for _ in 0..200 {
        if manager.schedule_status("nightly") == Some(ScheduleStatus::Running) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(manager.schedule_status("nightly"), Some(ScheduleStatus::Running));

    // A new fire time arrives while the first execution is in flight.
    w.clock.advance(Duration::from_secs(61));
    assert!(manager.tick().is_empty(), "overlapping fire must be skipped");

    gate.add_permits(1);
    for handle in handles {
        handle.await.unwrap();
    }

    // Exactly one execution, completed successfully through the engine.
    let history = manager.history("nightly", 10);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ScheduleStatus::Success);
    assert_eq!(history[0].job_id, "nightly");
    assert_eq!(
        history[0].scheduled_time,
        chrono::Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    );
    assert!(history[0].actual_start_time.is_some());
    assert!(history[0].end_time.is_some());
    assert_eq!(manager.schedule_status("nightly"), Some(ScheduleStatus::Success));

    // The reconciliation really happened: the absent job was deployed.
    assert_eq!(w.client().deploy_count(), 1);
    assert!(!w.tracker.has_changed("nightly", &batch_spec("nightly")).await.unwrap());

    // Once idle, the next due fire goes through.
    let handles = manager.tick();
    assert_eq!(handles.len(), 1);
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(manager.history("nightly", 10).len(), 2);
}

// A failing reconciliation marks the execution failed and queues a retry.
#[tokio::test]
async fn failed_reconciliation_marks_the_execution_and_retries() {
    let w = world();
    w.clock
        .set_utc(chrono::Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 30).unwrap());
    let manager = ScheduledJobManager::with_clock(
        w.reconciler.clone(),
        SchedulerConfig::default(),
        w.clock.clone(),
    );
    let mut spec = scheduled_batch("flaky");
    spec.max_retries = 1;
    spec.retry_delay_s = 60;
    manager.add(spec).unwrap();

    // First attempt: the cluster is down (deploy path never reached).
    w.client()
        .push_failure_for("get_job", ClusterError::Unavailable("down".to_string()));
    for handle in manager.tick() {
        handle.await.unwrap();
    }
    let history = manager.history("flaky", 10);
    assert_eq!(history[0].status, ScheduleStatus::Failed);
    assert!(history[0]
        .error_message
        .as_deref()
        .unwrap_or("")
        .contains("FLINK_CLUSTER_UNAVAILABLE"));
    assert_eq!(manager.schedule_status("flaky"), Some(ScheduleStatus::Pending));

    // The retry succeeds once the cluster answers again.
    w.clock.advance(Duration::from_secs(61));
    for handle in manager.tick() {
        handle.await.unwrap();
    }
    let history = manager.history("flaky", 10);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, ScheduleStatus::Success);
    assert_eq!(history[0].attempt_number, 2);
}
