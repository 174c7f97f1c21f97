// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Circuit breaker gating calls to the cluster.
//!
//! Closed passes calls through and counts consecutive transient failures;
//! at the threshold the breaker opens and fast-fails everything. After the
//! recovery timeout a single probe call is admitted; its outcome decides
//! between closing again and re-opening. Only faults where
//! [`ClusterError::is_transient`] holds count — logical errors pass through
//! without moving the state machine.
//!
//! The state lock is taken only to admit a call and to record its outcome,
//! never across the awaited call itself.

use crate::client::ClusterError;
use flinkctl_core::{Clock, SystemClock};
use parking_lot::Mutex;
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

flinkctl_core::simple_display! {
    BreakerState {
        Closed => "closed",
        Open => "open",
        HalfOpen => "half_open",
    }
}

/// Outcome of a gated call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    /// Fast-fail: no cluster call was made.
    #[error("circuit breaker is open after {failures} consecutive failures")]
    Open { failures: u32 },
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

struct Inner {
    state: BreakerState,
    failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Failure-isolating call gate around the cluster client.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    failure_threshold: u32,
    recovery_timeout: Duration,
    clock: C,
    inner: Mutex<Inner>,
}

enum Admit {
    Normal,
    Probe,
}

impl CircuitBreaker<SystemClock> {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self::with_clock(failure_threshold, recovery_timeout, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    pub fn with_clock(failure_threshold: u32, recovery_timeout: Duration, clock: C) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            clock,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Execute `fut` under breaker protection.
    ///
    /// When the breaker is open (or a probe is already in flight), the call
    /// fails fast with [`CallError::Open`] without touching the cluster.
    pub async fn call<T, F>(&self, fut: F) -> Result<T, CallError>
    where
        F: Future<Output = Result<T, ClusterError>>,
    {
        let admit = self.admit()?;
        let result = fut.await;
        self.record(&admit, result.as_ref().err());
        result.map_err(CallError::Cluster)
    }

    /// Current state. The open→half-open transition happens lazily inside
    /// [`call`](Self::call), so a freshly recovered breaker still reads
    /// `open` here until something probes it.
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Consecutive classified failures seen so far.
    pub fn failures(&self) -> u32 {
        self.inner.lock().failures
    }

    pub fn is_open(&self) -> bool {
        self.state() == BreakerState::Open
    }

    /// Force the breaker back to closed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    fn admit(&self) -> Result<Admit, CallError> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Ok(Admit::Normal),
            BreakerState::Open => {
                let recovered = inner.opened_at.is_some_and(|t| {
                    self.clock.now().saturating_duration_since(t) >= self.recovery_timeout
                });
                if recovered {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    Ok(Admit::Probe)
                } else {
                    Err(CallError::Open { failures: inner.failures })
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(CallError::Open { failures: inner.failures })
                } else {
                    inner.probe_in_flight = true;
                    Ok(Admit::Probe)
                }
            }
        }
    }

    fn record(&self, admit: &Admit, error: Option<&ClusterError>) {
        let mut inner = self.inner.lock();
        if matches!(admit, Admit::Probe) {
            inner.probe_in_flight = false;
        }
        match error {
            None => {
                if inner.state != BreakerState::Closed {
                    tracing::info!(failures = inner.failures, "circuit breaker closed");
                }
                inner.state = BreakerState::Closed;
                inner.failures = 0;
                inner.opened_at = None;
            }
            Some(e) if e.is_transient() => {
                inner.failures += 1;
                let trip = matches!(admit, Admit::Probe)
                    || inner.failures >= self.failure_threshold;
                if trip {
                    if inner.state != BreakerState::Open {
                        tracing::warn!(
                            failures = inner.failures,
                            error = %e,
                            "circuit breaker opened"
                        );
                    }
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(self.clock.now());
                }
            }
            // Not in the configured fault set: the state machine does not
            // move. A half-open probe slot was already released above, so
            // the next call probes again.
            Some(_) => {}
        }
    }
}

#[cfg(test)]
#[path = "breaker_tests.rs"]
mod tests;
