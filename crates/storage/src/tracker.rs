// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job specification change tracking.
//!
//! [`SpecTracker`] pairs the canonical hash with a durable journal and an
//! in-memory cache rebuilt on startup. The engine consumes it through the
//! [`ChangeTracker`] capability trait; the rest of the surface is the query
//! side (history, diffing, statistics).

use crate::error::StoreError;
use crate::hash;
use crate::journal::{Journal, JournalEntry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flinkctl_core::JobSpec;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Change records surviving a journal compaction.
pub const HISTORY_RETAIN: usize = 1000;

/// Durable `(job_id → hash)` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedHash {
    pub job_id: String,
    pub spec_hash: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

/// What kind of change a [`ChangeRecord`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

flinkctl_core::simple_display! {
    ChangeKind {
        Created => "created",
        Updated => "updated",
        Deleted => "deleted",
    }
}

/// Append-only record of one detected spec change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub job_id: String,
    /// Hash after the change; empty for deletions.
    pub spec_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_hash: Option<String>,
    pub changed_at: DateTime<Utc>,
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed_fields: Vec<String>,
}

/// Tracking statistics for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerStatistics {
    pub total_tracked: usize,
    pub total_changes: usize,
    pub changes_by_kind: HashMap<String, usize>,
}

/// The change-detection capability the reconciliation engine consumes.
#[async_trait]
pub trait ChangeTracker: Send + Sync {
    /// True when no hash is recorded for `job_id` or the recorded hash
    /// differs from `spec`'s.
    async fn has_changed(&self, job_id: &str, spec: &JobSpec) -> Result<bool, StoreError>;

    /// Upsert the tracked hash, preserving `first_seen_at`.
    async fn update_tracker(&self, job_id: &str, spec: &JobSpec) -> Result<(), StoreError>;

    /// Upsert a whole batch as a single transaction. Returns the batch size.
    async fn batch_update_tracker(&self, specs: &[JobSpec]) -> Result<usize, StoreError>;
}

struct TrackerInner {
    cache: HashMap<String, TrackedHash>,
    /// Canonical forms seen in this process, for field-level diffing.
    /// Not persisted; after a restart only hashes survive.
    last_specs: HashMap<String, Value>,
    history: Vec<ChangeRecord>,
    journal: Journal,
}

/// Durable spec tracker over an append-only journal.
pub struct SpecTracker {
    inner: Mutex<TrackerInner>,
}

impl SpecTracker {
    /// Open the tracker, replaying the journal at `path` into the cache.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let (journal, entries) = Journal::open(path.as_ref().to_path_buf())?;
        let mut cache = HashMap::new();
        let mut history = Vec::new();
        for entry in entries {
            match entry {
                JournalEntry::Upsert { job_id, spec_hash, first_seen_at, last_updated_at } => {
                    cache.insert(
                        job_id.clone(),
                        TrackedHash { job_id, spec_hash, first_seen_at, last_updated_at },
                    );
                }
                JournalEntry::Remove { job_id } => {
                    cache.remove(&job_id);
                }
                JournalEntry::Change { record } => history.push(record),
                JournalEntry::Clear => {
                    cache.clear();
                    history.clear();
                }
            }
        }
        debug!(
            tracked = cache.len(),
            changes = history.len(),
            path = %path.as_ref().display(),
            "tracker loaded"
        );
        Ok(Self {
            inner: Mutex::new(TrackerInner {
                cache,
                last_specs: HashMap::new(),
                history,
                journal,
            }),
        })
    }

    /// Canonical hash of a spec.
    pub fn hash(spec: &JobSpec) -> Result<String, StoreError> {
        hash::spec_hash(spec)
    }

    /// All tracked jobs and their current hashes.
    pub fn tracked_jobs(&self) -> HashMap<String, String> {
        self.inner
            .lock()
            .cache
            .iter()
            .map(|(id, t)| (id.clone(), t.spec_hash.clone()))
            .collect()
    }

    /// Cached hash for one job, without recomputing anything.
    pub fn cached_hash(&self, job_id: &str) -> Option<String> {
        self.inner.lock().cache.get(job_id).map(|t| t.spec_hash.clone())
    }

    /// Full tracked record for one job.
    pub fn tracked(&self, job_id: &str) -> Option<TrackedHash> {
        self.inner.lock().cache.get(job_id).cloned()
    }

    /// Diff the presented specs against the cache.
    ///
    /// Yields `created` for unknown ids, `updated` for hash mismatches, and
    /// `deleted` for tracked ids absent from the input. Read-only: recording
    /// and cache updates are separate, explicit steps.
    pub fn detect_changes(&self, current: &[JobSpec]) -> Result<Vec<ChangeRecord>, StoreError> {
        let now = Utc::now();
        let mut changes = Vec::new();
        let mut seen: std::collections::HashSet<&str> = std::collections::HashSet::new();

        let inner = self.inner.lock();
        for spec in current {
            seen.insert(&spec.job_id);
            let new_hash = hash::spec_hash(spec)?;
            match inner.cache.get(&spec.job_id) {
                None => changes.push(ChangeRecord {
                    job_id: spec.job_id.clone(),
                    spec_hash: new_hash,
                    previous_hash: None,
                    changed_at: now,
                    kind: ChangeKind::Created,
                    changed_fields: Vec::new(),
                }),
                Some(tracked) if tracked.spec_hash != new_hash => {
                    let changed_fields = match inner.last_specs.get(&spec.job_id) {
                        Some(prev) => hash::changed_fields(prev, &hash::canonical_value(spec)?),
                        None => Vec::new(),
                    };
                    changes.push(ChangeRecord {
                        job_id: spec.job_id.clone(),
                        spec_hash: new_hash,
                        previous_hash: Some(tracked.spec_hash.clone()),
                        changed_at: now,
                        kind: ChangeKind::Updated,
                        changed_fields,
                    });
                }
                Some(_) => {}
            }
        }

        for (job_id, tracked) in &inner.cache {
            if !seen.contains(job_id.as_str()) {
                changes.push(ChangeRecord {
                    job_id: job_id.clone(),
                    spec_hash: String::new(),
                    previous_hash: Some(tracked.spec_hash.clone()),
                    changed_at: now,
                    kind: ChangeKind::Deleted,
                    changed_fields: Vec::new(),
                });
            }
        }
        Ok(changes)
    }

    /// Append a change record to the durable history.
    pub fn record_change(&self, change: ChangeRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.journal.append(&[JournalEntry::Change { record: change.clone() }])?;
        inner.history.push(change);
        Ok(())
    }

    /// Change history, newest first, optionally filtered by job.
    pub fn change_history(&self, job_id: Option<&str>, limit: usize) -> Vec<ChangeRecord> {
        let inner = self.inner.lock();
        inner
            .history
            .iter()
            .rev()
            .filter(|r| job_id.map_or(true, |id| r.job_id == id))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Stop tracking a job. Returns false when it was not tracked.
    pub fn remove_tracked_job(&self, job_id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        if !inner.cache.contains_key(job_id) {
            return Ok(false);
        }
        inner.journal.append(&[JournalEntry::Remove { job_id: job_id.to_string() }])?;
        inner.cache.remove(job_id);
        inner.last_specs.remove(job_id);
        Ok(true)
    }

    /// Drop all tracking data.
    pub fn clear(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.journal.append(&[JournalEntry::Clear])?;
        inner.cache.clear();
        inner.last_specs.clear();
        inner.history.clear();
        Ok(())
    }

    pub fn statistics(&self) -> TrackerStatistics {
        let inner = self.inner.lock();
        let mut changes_by_kind: HashMap<String, usize> = HashMap::new();
        for record in &inner.history {
            *changes_by_kind.entry(record.kind.to_string()).or_insert(0) += 1;
        }
        TrackerStatistics {
            total_tracked: inner.cache.len(),
            total_changes: inner.history.len(),
            changes_by_kind,
        }
    }

    /// Rewrite the journal to its minimal form: one upsert per tracked job
    /// plus the most recent [`HISTORY_RETAIN`] change records.
    pub fn compact(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.history.len() > HISTORY_RETAIN {
            let drop = inner.history.len() - HISTORY_RETAIN;
            inner.history.drain(..drop);
        }
        let mut tracked: Vec<&TrackedHash> = inner.cache.values().collect();
        tracked.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        let mut entries: Vec<JournalEntry> = tracked
            .into_iter()
            .map(|t| JournalEntry::Upsert {
                job_id: t.job_id.clone(),
                spec_hash: t.spec_hash.clone(),
                first_seen_at: t.first_seen_at,
                last_updated_at: t.last_updated_at,
            })
            .collect();
        entries.extend(
            inner.history.iter().map(|r| JournalEntry::Change { record: r.clone() }),
        );
        inner.journal.rewrite(&entries)
    }

    fn upsert_entries(
        inner: &TrackerInner,
        specs: &[(&JobSpec, String)],
        now: DateTime<Utc>,
    ) -> Vec<JournalEntry> {
        specs
            .iter()
            .map(|(spec, spec_hash)| {
                let first_seen_at = inner
                    .cache
                    .get(&spec.job_id)
                    .map(|t| t.first_seen_at)
                    .unwrap_or(now);
                JournalEntry::Upsert {
                    job_id: spec.job_id.clone(),
                    spec_hash: spec_hash.clone(),
                    first_seen_at,
                    last_updated_at: now,
                }
            })
            .collect()
    }

    fn apply_upserts(&self, specs: &[(&JobSpec, String)]) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let entries = Self::upsert_entries(&inner, specs, now);
        // Journal first: a failed write leaves the cache untouched, so no
        // partial commit is ever observable.
        inner.journal.append(&entries)?;
        for ((spec, spec_hash), entry) in specs.iter().zip(entries) {
            if let JournalEntry::Upsert { first_seen_at, .. } = entry {
                inner.cache.insert(
                    spec.job_id.clone(),
                    TrackedHash {
                        job_id: spec.job_id.clone(),
                        spec_hash: spec_hash.clone(),
                        first_seen_at,
                        last_updated_at: now,
                    },
                );
            }
            inner
                .last_specs
                .insert(spec.job_id.clone(), hash::canonical_value(spec)?);
        }
        Ok(())
    }
}

#[async_trait]
impl ChangeTracker for SpecTracker {
    async fn has_changed(&self, job_id: &str, spec: &JobSpec) -> Result<bool, StoreError> {
        let current = hash::spec_hash(spec)?;
        let inner = self.inner.lock();
        Ok(inner.cache.get(job_id).map(|t| t.spec_hash.as_str()) != Some(current.as_str()))
    }

    async fn update_tracker(&self, job_id: &str, spec: &JobSpec) -> Result<(), StoreError> {
        debug_assert_eq!(job_id, spec.job_id);
        let spec_hash = hash::spec_hash(spec)?;
        self.apply_upserts(&[(spec, spec_hash)])
    }

    async fn batch_update_tracker(&self, specs: &[JobSpec]) -> Result<usize, StoreError> {
        let mut pairs = Vec::with_capacity(specs.len());
        for spec in specs {
            pairs.push((spec, hash::spec_hash(spec)?));
        }
        self.apply_upserts(&pairs)?;
        Ok(pairs.len())
    }
}

#[cfg(test)]
#[path = "tracker_tests.rs"]
mod tests;
