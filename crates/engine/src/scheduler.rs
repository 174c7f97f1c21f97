// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cron-driven reconciliation demand.
//!
//! The manager owns a set of scheduled specs and a periodic tick. A due spec
//! spawns one execution handed to the engine through the [`JobRunner`]
//! capability; while it runs, further fires for the same spec are skipped.
//! Failures retry after a delay up to the spec's budget. Fire computation is
//! clamped to one minute in the past, so a controller that was down for a
//! day wakes up to a single fresh fire, not a catch-up storm.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use flinkctl_core::schedule::EXECUTION_HISTORY_LIMIT;
use flinkctl_core::{
    Clock, ControllerError, CronSchedule, ExecutionRecord, JobSpec, ScheduleStatus,
    ScheduledJobSpec, SpecError, SystemClock,
};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;

/// Capability the manager hands due specs to — in practice, the reconciler.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_job(&self, spec: &JobSpec) -> Result<(), ControllerError>;
}

/// Errors from schedule management.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error(transparent)]
    Invalid(#[from] SpecError),
    #[error("scheduled job already exists: {0}")]
    Duplicate(String),
}

/// Scheduler-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStatistics {
    pub total_scheduled: usize,
    pub active_executions: usize,
    pub by_status: HashMap<String, usize>,
}

struct RetryState {
    at: DateTime<Utc>,
    attempt: u32,
}

struct ScheduleEntry {
    spec: ScheduledJobSpec,
    schedule: CronSchedule,
    tz: Tz,
    status: ScheduleStatus,
    history: VecDeque<ExecutionRecord>,
    completed_executions: u32,
    retry: Option<RetryState>,
    last_scheduled: Option<DateTime<Utc>>,
}

struct SchedulerInner<R, C> {
    runner: Arc<R>,
    clock: C,
    jobs: Mutex<HashMap<String, ScheduleEntry>>,
}

/// Time-driven producer of reconciliation demand.
pub struct ScheduledJobManager<R: JobRunner + 'static, C: Clock + 'static = SystemClock> {
    inner: Arc<SchedulerInner<R, C>>,
    check_interval: Duration,
    cancel: Mutex<Option<CancellationToken>>,
}

impl<R: JobRunner> ScheduledJobManager<R, SystemClock> {
    pub fn new(runner: Arc<R>, config: SchedulerConfig) -> Self {
        Self::with_clock(runner, config, SystemClock)
    }
}

impl<R: JobRunner, C: Clock + 'static> ScheduledJobManager<R, C> {
    pub fn with_clock(runner: Arc<R>, config: SchedulerConfig, clock: C) -> Self {
        Self {
            inner: Arc::new(SchedulerInner { runner, clock, jobs: Mutex::new(HashMap::new()) }),
            check_interval: config.check_interval,
            cancel: Mutex::new(None),
        }
    }

    /// Register a scheduled spec. Rejects invalid specs and duplicates.
    pub fn add(&self, spec: ScheduledJobSpec) -> Result<(), ScheduleError> {
        spec.validate()?;
        let schedule = CronSchedule::parse(&spec.cron_expression)
            .map_err(|e| SpecError::InvalidCron(spec.job.job_id.clone(), e.to_string()))?;
        let tz = spec.tz()?;
        let job_id = spec.job.job_id.clone();

        let mut jobs = self.inner.jobs.lock();
        if jobs.contains_key(&job_id) {
            return Err(ScheduleError::Duplicate(job_id));
        }
        info!(job_id, cron = %spec.cron_expression, tz = %spec.timezone, "scheduled job added");
        jobs.insert(
            job_id,
            ScheduleEntry {
                spec,
                schedule,
                tz,
                status: ScheduleStatus::Pending,
                history: VecDeque::new(),
                completed_executions: 0,
                retry: None,
                last_scheduled: None,
            },
        );
        Ok(())
    }

    /// Drop a schedule. A running execution finishes but its outcome is
    /// discarded. Returns false when the job was not scheduled.
    pub fn remove(&self, job_id: &str) -> bool {
        let removed = self.inner.jobs.lock().remove(job_id).is_some();
        if removed {
            info!(job_id, "scheduled job removed");
        }
        removed
    }

    /// Start the background tick loop. Idempotent.
    pub fn start(&self) {
        let mut cancel = self.cancel.lock();
        if cancel.is_some() {
            return;
        }
        let token = CancellationToken::new();
        let loop_token = token.clone();
        let inner = self.inner.clone();
        let interval = self.check_interval;
        tokio::spawn(async move {
            info!(check_interval_s = interval.as_secs(), "scheduler started");
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let _ = inner.tick();
                    }
                }
            }
            info!("scheduler stopped");
        });
        *cancel = Some(token);
    }

    /// Stop the tick loop; in-flight executions run to completion.
    pub fn stop(&self) {
        if let Some(token) = self.cancel.lock().take() {
            token.cancel();
        }
    }

    /// Run one due-job scan now. Returns the spawned execution handles,
    /// which tests await and the background loop drops.
    pub fn tick(&self) -> Vec<JoinHandle<()>> {
        self.inner.tick()
    }

    /// Execution history for a job, newest first.
    pub fn history(&self, job_id: &str, limit: usize) -> Vec<ExecutionRecord> {
        let jobs = self.inner.jobs.lock();
        jobs.get(job_id)
            .map(|entry| entry.history.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn schedule_status(&self, job_id: &str) -> Option<ScheduleStatus> {
        self.inner.jobs.lock().get(job_id).map(|entry| entry.status)
    }

    pub fn scheduled_jobs(&self) -> Vec<ScheduledJobSpec> {
        self.inner.jobs.lock().values().map(|entry| entry.spec.clone()).collect()
    }

    pub fn statistics(&self) -> SchedulerStatistics {
        let jobs = self.inner.jobs.lock();
        let mut by_status: HashMap<String, usize> = HashMap::new();
        for entry in jobs.values() {
            *by_status.entry(entry.status.to_string()).or_insert(0) += 1;
        }
        SchedulerStatistics {
            total_scheduled: jobs.len(),
            active_executions: jobs
                .values()
                .filter(|e| e.status == ScheduleStatus::Running)
                .count(),
            by_status,
        }
    }
}

impl<R: JobRunner + 'static, C: Clock + 'static> SchedulerInner<R, C> {
    fn tick(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let now = self.clock.utc_now();
        let mut due: Vec<(ScheduledJobSpec, DateTime<Utc>, u32)> = Vec::new();

        {
            let mut jobs = self.jobs.lock();
            for (job_id, entry) in jobs.iter_mut() {
                if entry.status == ScheduleStatus::Running || entry.status.is_retired() {
                    continue;
                }
                if let Some(end) = entry.spec.end_date {
                    if now > end {
                        info!(job_id, "schedule past its end date");
                        entry.status = ScheduleStatus::Expired;
                        continue;
                    }
                }
                if let Some(start) = entry.spec.start_date {
                    if now < start {
                        continue;
                    }
                }
                if let Some(max) = entry.spec.max_executions {
                    if entry.completed_executions >= max {
                        info!(job_id, executions = entry.completed_executions, "execution budget exhausted");
                        entry.status = ScheduleStatus::Disabled;
                        continue;
                    }
                }

                if let Some(retry) = &entry.retry {
                    if now >= retry.at {
                        let attempt = retry.attempt;
                        entry.retry = None;
                        entry.status = ScheduleStatus::Running;
                        due.push((entry.spec.clone(), now, attempt));
                    }
                    continue;
                }

                // Clamp the base so a long outage yields one fresh fire
                // instead of a backlog replay.
                let floor = now - chrono::Duration::minutes(1);
                let base = entry.last_scheduled.map_or(floor, |last| last.max(floor));
                let next = match entry.schedule.next_fire(base, &entry.tz) {
                    Ok(next) => next,
                    Err(e) => {
                        warn!(job_id, error = %e, "no upcoming fire time");
                        continue;
                    }
                };
                if now >= next {
                    entry.last_scheduled = Some(next);
                    entry.status = ScheduleStatus::Running;
                    due.push((entry.spec.clone(), next, 1));
                }
            }
        }

        due.into_iter()
            .map(|(spec, scheduled_time, attempt)| {
                let inner = self.clone();
                tokio::spawn(async move {
                    inner.execute(spec, scheduled_time, attempt).await;
                })
            })
            .collect()
    }

    async fn execute(
        self: Arc<Self>,
        spec: ScheduledJobSpec,
        scheduled_time: DateTime<Utc>,
        attempt: u32,
    ) {
        let job_id = spec.job.job_id.clone();
        let execution_id = format!("{}-{}", job_id, nanoid::nanoid!(8));

        let mut record = ExecutionRecord::pending(&execution_id, &job_id, scheduled_time, attempt);
        record.actual_start_time = Some(self.clock.utc_now());
        record.status = ScheduleStatus::Running;
        {
            let mut jobs = self.jobs.lock();
            let Some(entry) = jobs.get_mut(&job_id) else {
                return;
            };
            entry.history.push_back(record);
            while entry.history.len() > EXECUTION_HISTORY_LIMIT {
                entry.history.pop_front();
            }
        }
        info!(job_id, execution_id, attempt, scheduled = %scheduled_time, "scheduled execution started");

        let started = self.clock.now();
        let budget = Duration::from_secs(spec.execution_timeout_s);
        let outcome = match tokio::time::timeout(budget, self.runner.run_job(&spec.job)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("execution exceeded {}s", spec.execution_timeout_s)),
        };
        let duration_ms = self.clock.now().saturating_duration_since(started).as_millis() as u64;
        let now = self.clock.utc_now();

        let mut jobs = self.jobs.lock();
        let Some(entry) = jobs.get_mut(&job_id) else {
            debug!(job_id, execution_id, "schedule removed mid-execution, outcome discarded");
            return;
        };
        entry.completed_executions += 1;

        let (status, error_message) = match outcome {
            Ok(()) => (ScheduleStatus::Success, None),
            Err(message) => (ScheduleStatus::Failed, Some(message)),
        };
        if let Some(rec) = entry.history.iter_mut().rev().find(|r| r.execution_id == execution_id)
        {
            rec.status = status;
            rec.end_time = Some(now);
            rec.duration_ms = duration_ms;
            rec.error_message = error_message.clone();
        }

        match status {
            ScheduleStatus::Success => {
                info!(job_id, execution_id, duration_ms, "scheduled execution succeeded");
                entry.status = ScheduleStatus::Success;
            }
            _ => {
                if attempt <= spec.max_retries {
                    let at = now + chrono::Duration::seconds(spec.retry_delay_s as i64);
                    warn!(
                        job_id,
                        execution_id,
                        attempt,
                        retry_at = %at,
                        error = error_message.as_deref().unwrap_or(""),
                        "scheduled execution failed, retry queued"
                    );
                    entry.retry = Some(RetryState { at, attempt: attempt + 1 });
                    entry.status = ScheduleStatus::Pending;
                } else {
                    warn!(
                        job_id,
                        execution_id,
                        attempt,
                        error = error_message.as_deref().unwrap_or(""),
                        "scheduled execution failed, retries exhausted"
                    );
                    entry.status = ScheduleStatus::Failed;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
