// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Metrics event sink.
//!
//! The engine emits events; shipping them to a real metrics backend is an
//! outer concern. The default sink renders them as structured tracing
//! events.

use flinkctl_core::ReconcileAction;

/// Sink for the events the engine emits.
pub trait MetricsSink: Send + Sync {
    fn record_reconciliation(
        &self,
        job_id: &str,
        action: ReconcileAction,
        success: bool,
        duration_ms: u64,
    );
    fn record_deployment(&self, job_id: &str, success: bool, duration_ms: u64);
    fn record_error(&self, job_id: &str, error_type: &str, message: &str);
}

/// Default sink: structured tracing events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMetrics;

impl MetricsSink for LogMetrics {
    fn record_reconciliation(
        &self,
        job_id: &str,
        action: ReconcileAction,
        success: bool,
        duration_ms: u64,
    ) {
        tracing::info!(
            target: "flinkctl::metrics",
            job_id,
            action = %action,
            success,
            duration_ms,
            "reconciliation"
        );
    }

    fn record_deployment(&self, job_id: &str, success: bool, duration_ms: u64) {
        tracing::info!(
            target: "flinkctl::metrics",
            job_id,
            success,
            duration_ms,
            "deployment"
        );
    }

    fn record_error(&self, job_id: &str, error_type: &str, message: &str) {
        tracing::warn!(
            target: "flinkctl::metrics",
            job_id,
            error_type,
            message,
            "error"
        );
    }
}

/// One recorded metrics event.
#[cfg(any(test, feature = "test-support"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricsEvent {
    Reconciliation {
        job_id: String,
        action: ReconcileAction,
        success: bool,
    },
    Deployment {
        job_id: String,
        success: bool,
    },
    Error {
        job_id: String,
        error_type: String,
    },
}

/// Recording sink for assertions in tests.
#[cfg(any(test, feature = "test-support"))]
#[derive(Default)]
pub struct RecordingMetrics {
    events: parking_lot::Mutex<Vec<MetricsEvent>>,
}

#[cfg(any(test, feature = "test-support"))]
impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MetricsEvent> {
        self.events.lock().clone()
    }
}

#[cfg(any(test, feature = "test-support"))]
impl MetricsSink for RecordingMetrics {
    fn record_reconciliation(
        &self,
        job_id: &str,
        action: ReconcileAction,
        success: bool,
        _duration_ms: u64,
    ) {
        self.events.lock().push(MetricsEvent::Reconciliation {
            job_id: job_id.to_string(),
            action,
            success,
        });
    }

    fn record_deployment(&self, job_id: &str, success: bool, _duration_ms: u64) {
        self.events.lock().push(MetricsEvent::Deployment { job_id: job_id.to_string(), success });
    }

    fn record_error(&self, job_id: &str, error_type: &str, _message: &str) {
        self.events.lock().push(MetricsEvent::Error {
            job_id: job_id.to_string(),
            error_type: error_type.to_string(),
        });
    }
}
