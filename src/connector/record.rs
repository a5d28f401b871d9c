// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable queue record format.
//!
//! ```text
//! ┌────────────────────┬───────────┬─────────────┐
//! │ key_len: u32 (BE)  │ key bytes │ value bytes │
//! └────────────────────┴───────────┴─────────────┘
//! ```
//!
//! The value length is implicit: `record.len() - 4 - key_len`.
//! A record shorter than the header or whose key overruns it fails to
//! decode; it never panics.

use crate::error::ProxyError;
use crate::model::KeyEntry;
use thiserror::Error;

/// Size of the key length header.
pub const HEADER_LEN: usize = 4;

/// Record codec failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("record of {0} bytes is shorter than the {HEADER_LEN}-byte header")]
    Truncated(usize),

    #[error("key length {key_len} exceeds the {available} bytes after the header")]
    KeyOverrun { key_len: usize, available: usize },

    #[error("key of {0} bytes does not fit a u32 length")]
    KeyTooLarge(usize),
}

impl From<RecordError> for ProxyError {
    fn from(e: RecordError) -> Self {
        ProxyError::Queue(e.to_string())
    }
}

/// Encode an entry as one queue record.
pub fn encode(entry: &KeyEntry) -> Result<Vec<u8>, RecordError> {
    let key = entry.key();
    let value = entry.entry();
    let key_len = u32::try_from(key.len()).map_err(|_| RecordError::KeyTooLarge(key.len()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + key.len() + value.len());
    out.extend_from_slice(&key_len.to_be_bytes());
    out.extend_from_slice(key);
    out.extend_from_slice(value);
    Ok(out)
}

/// Decode one queue record back into an entry.
pub fn decode(record: &[u8]) -> Result<KeyEntry, RecordError> {
    let (header, rest) = record
        .split_first_chunk::<HEADER_LEN>()
        .ok_or(RecordError::Truncated(record.len()))?;
    let key_len = u32::from_be_bytes(*header) as usize;
    if key_len > rest.len() {
        return Err(RecordError::KeyOverrun {
            key_len,
            available: rest.len(),
        });
    }
    let (key, value) = rest.split_at(key_len);
    Ok(KeyEntry::new(key, value))
}
