// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Canonical spec hashing.
//!
//! The canonical form is the spec's JSON value with the metadata timestamps
//! and all null fields removed, re-serialized compactly. serde_json's object
//! map is ordered, so two specs that differ only in input key order or in
//! excluded fields produce identical bytes, and therefore identical hashes.

use crate::error::StoreError;
use flinkctl_core::JobSpec;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Fields that never participate in change detection.
const EXCLUDED_FIELDS: [&str; 2] = ["created_at", "last_updated_at"];

/// The normalized JSON value the hash is computed over.
pub fn canonical_value(spec: &JobSpec) -> Result<Value, StoreError> {
    let mut value = serde_json::to_value(spec)?;
    if let Value::Object(map) = &mut value {
        for field in EXCLUDED_FIELDS {
            map.remove(field);
        }
        map.retain(|_, v| !v.is_null());
    }
    Ok(value)
}

/// SHA-256 over the canonical form, lowercase hex.
pub fn spec_hash(spec: &JobSpec) -> Result<String, StoreError> {
    let canonical = serde_json::to_string(&canonical_value(spec)?)?;
    Ok(format!("{:x}", Sha256::digest(canonical.as_bytes())))
}

/// Top-level fields whose values differ between two canonical forms,
/// sorted by name.
pub fn changed_fields(prev: &Value, next: &Value) -> Vec<String> {
    let (Value::Object(prev), Value::Object(next)) = (prev, next) else {
        return Vec::new();
    };
    let mut fields: Vec<String> = prev
        .iter()
        .filter(|(key, value)| next.get(*key) != Some(value))
        .map(|(key, _)| key.clone())
        .collect();
    for key in next.keys() {
        if !prev.contains_key(key) {
            fields.push(key.clone());
        }
    }
    fields.sort();
    fields.dedup();
    fields
}

#[cfg(test)]
#[path = "hash_tests.rs"]
mod tests;
