// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! flinkctl-cluster: the cluster's administrative surface.
//!
//! The [`ClusterClient`] capability trait is the only thing the engine
//! consumes; [`RestClusterClient`] implements it over the admin REST API and
//! [`CircuitBreaker`] gates calls to keep a failing cluster from being
//! hammered.

pub mod breaker;
pub mod client;
pub mod rest;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use breaker::{BreakerState, CallError, CircuitBreaker};
pub use client::{
    ClusterClient, ClusterError, ClusterOverview, DeployConfig, SavepointStatus, StopOptions,
};
#[cfg(any(test, feature = "test-support"))]
pub use fake::{ClusterCall, FakeClusterClient};
pub use rest::RestClusterClient;
