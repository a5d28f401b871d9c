// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage backend integration traits.
//!
//! Defines what the proxy needs from a key-value engine. Real engines
//! (a distributed transactional store, for example) live outside this crate
//! and plug in through a [`BackendDriver`](crate::registry::BackendDriver).
//! [`memory::MemoryBackend`] is the in-process reference implementation.
//!
//! # Example
//!
//! ```rust,no_run
//! use kv_proxy::backend::{BoxFuture, BackendError, CheckFunc, StorageBackend};
//! use kv_proxy::model::{KeyValue, ReadOption, Value};
//!
//! struct ReadOnly;
//!
//! impl StorageBackend for ReadOnly {
//!     fn close(&self) -> BoxFuture<'_, ()> {
//!         Box::pin(async { Ok(()) })
//!     }
//!     fn put(&self, _key: &[u8], _value: &[u8]) -> BoxFuture<'_, ()> {
//!         Box::pin(async { Err(BackendError::Storage("read only".into())) })
//!     }
//!     fn unsafe_delete_range(&self, _start: &[u8], _end: &[u8]) -> BoxFuture<'_, ()> {
//!         Box::pin(async { Err(BackendError::Storage("read only".into())) })
//!     }
//!     fn check_and_put(&self, _key: &[u8], _old: &[u8], _new: &[u8], _check: CheckFunc) -> BoxFuture<'_, ()> {
//!         Box::pin(async { Err(BackendError::Storage("read only".into())) })
//!     }
//!     fn get(&self, _key: &[u8], _option: ReadOption) -> BoxFuture<'_, Value> {
//!         Box::pin(async { Err(BackendError::NotFound) })
//!     }
//!     fn batch_delete(&self, _start: &[u8], _end: &[u8], _limit: usize) -> BoxFuture<'_, (Vec<u8>, usize)> {
//!         Box::pin(async { Ok((Vec::new(), 0)) })
//!     }
//!     fn list(&self, _start: &[u8], _end: &[u8], _limit: usize, _option: ReadOption) -> BoxFuture<'_, Vec<KeyValue>> {
//!         Box::pin(async { Ok(Vec::new()) })
//!     }
//! }
//! ```

pub mod memory;

use crate::model::{KeyValue, ReadOption, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Result type for backend operations.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = BackendResult<T>> + Send + 'a>>;

/// Errors a backend may report.
///
/// `NotFound` is special-cased by the facade's `get`; everything else is
/// propagated unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Key does not exist.
    #[error("key not found")]
    NotFound,

    /// The conflict policy rejected the write.
    #[error("check failed: {0}")]
    CheckFailed(String),

    /// The backend has been closed.
    #[error("backend closed")]
    Closed,

    /// Engine-specific failure.
    #[error("{0}")]
    Storage(String),
}

impl BackendError {
    /// Only engine failures are worth retrying; a rejected check will be
    /// rejected again until the caller changes its expectation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Storage(_))
    }
}

/// Caller-supplied conflict policy for compare-and-put.
///
/// Invoked as `check(old, new, current)` while the backend holds whatever
/// concurrency control it uses; `current` is `None` when the key is absent.
/// The returned bytes are persisted only if the call returns `Ok`.
pub trait ConflictCheck: Send + Sync {
    fn check(&self, old: &[u8], new: &[u8], current: Option<&[u8]>) -> BackendResult<Vec<u8>>;
}

impl<F> ConflictCheck for F
where
    F: Fn(&[u8], &[u8], Option<&[u8]>) -> BackendResult<Vec<u8>> + Send + Sync,
{
    fn check(&self, old: &[u8], new: &[u8], current: Option<&[u8]>) -> BackendResult<Vec<u8>> {
        self(old, new, current)
    }
}

/// Shared handle to a conflict policy.
pub type CheckFunc = Arc<dyn ConflictCheck>;

/// Accept iff the stored value equals `old`, then write `new`.
///
/// An absent key matches an empty `old`.
pub fn compare_exact() -> CheckFunc {
    Arc::new(|old: &[u8], new: &[u8], current: Option<&[u8]>| {
        let current = current.unwrap_or_default();
        if current == old {
            Ok(new.to_vec())
        } else {
            Err(BackendError::CheckFailed(format!(
                "expected {:?}, found {:?}",
                String::from_utf8_lossy(old),
                String::from_utf8_lossy(current)
            )))
        }
    })
}

/// Trait defining what the proxy needs from a storage engine.
///
/// All key ranges are half-open `[start, end)`; an empty `end` means
/// "to the end of the keyspace".
pub trait StorageBackend: Send + Sync + 'static {
    /// Release the engine. Later calls may fail with [`BackendError::Closed`].
    fn close(&self) -> BoxFuture<'_, ()>;

    /// Unconditional write.
    fn put(&self, key: &[u8], value: &[u8]) -> BoxFuture<'_, ()>;

    /// Delete every key in the range without any precondition.
    fn unsafe_delete_range(&self, start: &[u8], end: &[u8]) -> BoxFuture<'_, ()>;

    /// Conditional write. `check` decides the final value atomically with
    /// respect to other writers of `key`.
    fn check_and_put(
        &self,
        key: &[u8],
        old: &[u8],
        new: &[u8],
        check: CheckFunc,
    ) -> BoxFuture<'_, ()>;

    /// Point read. Missing keys fail with [`BackendError::NotFound`].
    fn get(&self, key: &[u8], option: ReadOption) -> BoxFuture<'_, Value>;

    /// Delete up to `limit` keys in the range.
    ///
    /// Returns the key to resume from (empty once the range is exhausted)
    /// and the number of keys deleted.
    fn batch_delete(&self, start: &[u8], end: &[u8], limit: usize) -> BoxFuture<'_, (Vec<u8>, usize)>;

    /// Range listing of at most `limit` rows.
    fn list(
        &self,
        start: &[u8],
        end: &[u8],
        limit: usize,
        option: ReadOption,
    ) -> BoxFuture<'_, Vec<KeyValue>>;
}
