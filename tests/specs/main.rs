//! Workspace-level end-to-end scenario specs.
//!
//! Each module drives the full engine (reconciler + tracker + breaker +
//! scheduler) against the scripted fake cluster, asserting observable
//! behavior only: results, recorded cluster calls, and durable state.

mod prelude;

mod breaker;
mod reconcile;
mod schedule;
