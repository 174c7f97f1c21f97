// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine configuration.

use std::time::Duration;

/// Circuit breaker tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive transient failures before the breaker opens.
    pub failure_threshold: u32,
    /// How long an open breaker waits before admitting a probe.
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 3, recovery_timeout: Duration::from_secs(30) }
    }
}

/// Scheduled-job manager tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Period of the due-job scan.
    pub check_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { check_interval: Duration::from_secs(60) }
    }
}

/// Reconciler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Width of the reconciliation semaphore.
    pub max_concurrent_reconciliations: usize,
    /// Upper bound on one reconciliation, exclusion hold included.
    pub reconciliation_timeout: Duration,
    /// Root under which per-job savepoint target directories are generated.
    pub savepoint_dir: String,
    /// Bound on waiting for an in-flight savepoint to complete.
    pub savepoint_poll_timeout: Duration,
    /// Pause between savepoint status polls.
    pub savepoint_poll_interval: Duration,
    pub breaker: BreakerConfig,
    pub scheduler: SchedulerConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reconciliations: 10,
            reconciliation_timeout: Duration::from_secs(300),
            savepoint_dir: "/savepoints".to_string(),
            savepoint_poll_timeout: Duration::from_secs(60),
            savepoint_poll_interval: Duration::from_secs(2),
            breaker: BreakerConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl ControllerConfig {
    flinkctl_core::setters! {
        into {
            savepoint_dir: String,
        }
        set {
            max_concurrent_reconciliations: usize,
            reconciliation_timeout: Duration,
            savepoint_poll_timeout: Duration,
            savepoint_poll_interval: Duration,
            breaker: BreakerConfig,
            scheduler: SchedulerConfig,
        }
    }
}
