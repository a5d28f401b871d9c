// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Data model shared by the facade, backends and connectors.
//!
//! - [`KeyEntry`]: one write event flowing through the replication pipeline
//! - [`CasLog`]: the JSON body of a compare-and-put request
//! - [`Value`]: a read result
//! - [`ReadOption`]: read hints passed through to the backend
//! - [`KeyValue`]: one row of a range listing

use serde::{Deserialize, Deserializer, Serialize};

/// One write event to replicate.
///
/// `entry` is the caller's raw request body, forwarded byte-for-byte.
/// Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    key: Vec<u8>,
    entry: Vec<u8>,
}

impl KeyEntry {
    pub fn new(key: impl Into<Vec<u8>>, entry: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            entry: entry.into(),
        }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn entry(&self) -> &[u8] {
        &self.entry
    }

    /// Split into owned key and entry bytes.
    pub fn into_parts(self) -> (Vec<u8>, Vec<u8>) {
        (self.key, self.entry)
    }
}

/// Payload of a compare-and-put request: `{"old": "...", "new": "..."}`.
///
/// A missing or `null` field decodes as the empty string, so `{"new":"a"}`
/// is a create-if-absent request. Capitalised keys (`Old`, `New`) are
/// accepted. Non-string values and malformed JSON are decode errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasLog {
    #[serde(default, alias = "Old", alias = "OLD", deserialize_with = "null_as_empty")]
    pub old: String,
    #[serde(default, alias = "New", alias = "NEW", deserialize_with = "null_as_empty")]
    pub new: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl CasLog {
    /// Decode a caller-supplied entry.
    pub fn decode(entry: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(entry)
    }
}

/// A read result.
///
/// [`Value::default()`] is the "no value" result. A missing key and a key
/// holding an empty payload look the same to callers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Value {
    /// Whether the value was served from a secondary region.
    pub secondary: bool,
    pub value: Vec<u8>,
}

impl Value {
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Self {
            secondary: false,
            value: value.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// Read configuration. Purely hints, interpreted by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOption {
    /// Allow the backend to serve from a follower replica.
    pub replica_read: bool,
    /// Return keys without values.
    pub key_only: bool,
    /// Iterate in descending key order (listings only).
    pub reverse: bool,
    /// Secondary-region selector; empty means primary.
    pub secondary: Vec<u8>,
}

impl ReadOption {
    pub fn replica_read() -> Self {
        Self {
            replica_read: true,
            ..Default::default()
        }
    }

    pub fn key_only() -> Self {
        Self {
            key_only: true,
            ..Default::default()
        }
    }
}

/// One listing row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}
