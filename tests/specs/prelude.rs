//! Shared fixtures for the scenario specs.

pub use std::sync::Arc;
pub use std::time::Duration;

pub use flinkctl_cluster::{ClusterCall, ClusterError, FakeClusterClient};
pub use flinkctl_core::{
    ErrorCode, FakeClock, JobPhase, JobSpec, JobType, ReconcileAction, ScheduleStatus,
    ScheduledJobSpec,
};
pub use flinkctl_engine::{ControllerConfig, Reconciler, SchedulerConfig, ScheduledJobManager};
pub use flinkctl_storage::{ChangeTracker, SpecTracker};

/// A fully wired engine over the fake cluster.
pub struct World {
    pub reconciler: Arc<Reconciler<FakeClusterClient, FakeClock>>,
    pub clock: FakeClock,
    pub tracker: Arc<SpecTracker>,
    _dir: tempfile::TempDir,
}

pub fn world() -> World {
    let config = ControllerConfig::default().savepoint_poll_interval(Duration::from_millis(1));
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::new();
    let tracker = Arc::new(SpecTracker::open(dir.path().join("tracker.journal")).unwrap());
    let reconciler = Arc::new(
        Reconciler::with_clock(FakeClusterClient::new(), config, clock.clone())
            .with_tracker(tracker.clone()),
    );
    World { reconciler, clock, tracker, _dir: dir }
}

impl World {
    pub fn client(&self) -> &FakeClusterClient {
        self.reconciler.client()
    }
}

pub fn streaming_spec(job_id: &str) -> JobSpec {
    JobSpec::builder()
        .job_id(job_id)
        .job_type(JobType::Streaming)
        .parallelism(2)
        .checkpoint_interval_ms(60_000u64)
        .artifact_path("/a.jar")
        .build()
}

pub fn batch_spec(job_id: &str) -> JobSpec {
    JobSpec::builder()
        .job_id(job_id)
        .job_type(JobType::Batch)
        .parallelism(2)
        .artifact_path("/a.jar")
        .build()
}
