// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only JSON-lines journal backing the change tracker.
//!
//! One serde_json record per line. A batch of entries is written as one
//! multi-line append followed by a single `sync_data`, which is the
//! transaction boundary: a crash mid-append leaves at most one truncated
//! trailing line, which replay tolerates and the next rewrite discards.

use crate::error::StoreError;
use crate::tracker::ChangeRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// One durable tracker mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalEntry {
    /// Insert or replace a tracked hash.
    Upsert {
        job_id: String,
        spec_hash: String,
        first_seen_at: DateTime<Utc>,
        last_updated_at: DateTime<Utc>,
    },
    /// Remove a job from tracking.
    Remove { job_id: String },
    /// Append a change-history record.
    Change { record: ChangeRecord },
    /// Drop all tracking data.
    Clear,
}

/// Append-only journal file.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    file: File,
}

impl Journal {
    /// Open (creating if needed) and replay the journal at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<(Journal, Vec<JournalEntry>), StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let entries = replay(&path)?;
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok((Journal { path, file }, entries))
    }

    /// Append a batch of entries as one transaction.
    pub fn append(&mut self, entries: &[JournalEntry]) -> Result<(), StoreError> {
        let mut buf = String::new();
        for entry in entries {
            buf.push_str(&serde_json::to_string(entry)?);
            buf.push('\n');
        }
        self.file.write_all(buf.as_bytes())?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Replace the journal contents with `entries` (compaction).
    ///
    /// Writes to a temp file, syncs, then renames over the journal so a
    /// crash never loses the previous generation.
    pub fn rewrite(&mut self, entries: &[JournalEntry]) -> Result<(), StoreError> {
        let tmp = self.path.with_extension("journal.tmp");
        {
            let mut file = File::create(&tmp)?;
            let mut buf = String::new();
            for entry in entries {
                buf.push_str(&serde_json::to_string(entry)?);
                buf.push('\n');
            }
            file.write_all(buf.as_bytes())?;
            file.sync_data()?;
        }
        fs::rename(&tmp, &self.path)?;
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn replay(path: &Path) -> Result<Vec<JournalEntry>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path)?;
    let lines: Vec<&str> = contents.lines().collect();
    let mut entries = Vec::with_capacity(lines.len());
    for (idx, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(entry) => entries.push(entry),
            Err(e) if idx == lines.len() - 1 => {
                // Truncated trailing write from a crash mid-append.
                warn!(
                    path = %path.display(),
                    line = idx + 1,
                    error = %e,
                    "dropping truncated trailing journal line"
                );
                break;
            }
            Err(e) => {
                return Err(StoreError::Corrupt {
                    path: path.display().to_string(),
                    line: idx + 1,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(entries)
}

#[cfg(test)]
#[path = "journal_tests.rs"]
mod tests;
