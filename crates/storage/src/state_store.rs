// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Optional persistent `job_id → last known phase` store.
//!
//! Diagnostic only: the cluster remains authoritative, and store failures
//! never roll back a cluster mutation.

use crate::error::StoreError;
use async_trait::async_trait;
use flinkctl_core::JobPhase;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Persistence capability for last-known job phases.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_state(&self, job_id: &str) -> Result<Option<JobPhase>, StoreError>;
    async fn save_state(&self, job_id: &str, phase: JobPhase) -> Result<(), StoreError>;
    /// Returns false when the job had no recorded state.
    async fn remove(&self, job_id: &str) -> Result<bool, StoreError>;
}

/// In-memory store, for tests and single-shot runs.
#[derive(Default)]
pub struct MemoryStateStore {
    states: Mutex<HashMap<String, JobPhase>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get_state(&self, job_id: &str) -> Result<Option<JobPhase>, StoreError> {
        Ok(self.states.lock().get(job_id).copied())
    }

    async fn save_state(&self, job_id: &str, phase: JobPhase) -> Result<(), StoreError> {
        self.states.lock().insert(job_id.to_string(), phase);
        Ok(())
    }

    async fn remove(&self, job_id: &str) -> Result<bool, StoreError> {
        Ok(self.states.lock().remove(job_id).is_some())
    }
}

/// JSON-snapshot store; every mutation rewrites the file via temp + rename.
pub struct FileStateStore {
    path: PathBuf,
    states: Mutex<HashMap<String, JobPhase>>,
}

impl FileStateStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let states = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            HashMap::new()
        };
        Ok(Self { path, states: Mutex::new(states) })
    }

    fn persist(&self, states: &HashMap<String, JobPhase>) -> Result<(), StoreError> {
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(serde_json::to_string_pretty(states)?.as_bytes())?;
            file.sync_data()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get_state(&self, job_id: &str) -> Result<Option<JobPhase>, StoreError> {
        Ok(self.states.lock().get(job_id).copied())
    }

    async fn save_state(&self, job_id: &str, phase: JobPhase) -> Result<(), StoreError> {
        let mut states = self.states.lock();
        states.insert(job_id.to_string(), phase);
        self.persist(&states)
    }

    async fn remove(&self, job_id: &str) -> Result<bool, StoreError> {
        let mut states = self.states.lock();
        let removed = states.remove(job_id).is_some();
        if removed {
            self.persist(&states)?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
#[path = "state_store_tests.rs"]
mod tests;
