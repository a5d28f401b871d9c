// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process ordered key-value backend.
//!
//! Registered as `memkv`. Useful for standalone mode, local development and
//! tests; nothing is persisted.

use super::{BackendError, BackendResult, BoxFuture, CheckFunc, StorageBackend};
use crate::config::ProxyConfig;
use crate::model::{KeyValue, ReadOption, Value};
use crate::registry::{BackendDriver, OpenFuture};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Driver name for [`MemoryBackend`].
pub const MEMKV: &str = "memkv";

/// Ordered in-memory map implementing [`StorageBackend`].
#[derive(Default)]
pub struct MemoryBackend {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    closed: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    fn ensure_open(&self) -> BackendResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed);
        }
        Ok(())
    }
}

/// Bounds for the half-open range `[start, end)`; `None` when empty.
fn range_bounds(start: &[u8], end: &[u8]) -> Option<(Bound<Vec<u8>>, Bound<Vec<u8>>)> {
    if end.is_empty() {
        return Some((Bound::Included(start.to_vec()), Bound::Unbounded));
    }
    // BTreeMap::range panics on inverted bounds.
    if start >= end {
        return None;
    }
    Some((Bound::Included(start.to_vec()), Bound::Excluded(end.to_vec())))
}

impl StorageBackend for MemoryBackend {
    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.closed.store(true, Ordering::Release);
            let keys = self.data.read().await.len();
            info!(keys, "Memory backend closed");
            Ok(())
        })
    }

    fn put(&self, key: &[u8], value: &[u8]) -> BoxFuture<'_, ()> {
        let key = key.to_vec();
        let value = value.to_vec();
        Box::pin(async move {
            self.ensure_open()?;
            self.data.write().await.insert(key, value);
            Ok(())
        })
    }

    fn unsafe_delete_range(&self, start: &[u8], end: &[u8]) -> BoxFuture<'_, ()> {
        let bounds = range_bounds(start, end);
        Box::pin(async move {
            self.ensure_open()?;
            let Some(bounds) = bounds else {
                return Ok(());
            };
            let mut data = self.data.write().await;
            let doomed: Vec<Vec<u8>> = data.range(bounds).map(|(k, _)| k.clone()).collect();
            for key in &doomed {
                data.remove(key);
            }
            debug!(deleted = doomed.len(), "Unsafe range delete");
            Ok(())
        })
    }

    fn check_and_put(
        &self,
        key: &[u8],
        old: &[u8],
        new: &[u8],
        check: CheckFunc,
    ) -> BoxFuture<'_, ()> {
        let key = key.to_vec();
        let old = old.to_vec();
        let new = new.to_vec();
        Box::pin(async move {
            self.ensure_open()?;
            // The write lock is held across the check so no other writer
            // can slip in between reading `current` and storing the result.
            let mut data = self.data.write().await;
            let current = data.get(&key).map(Vec::as_slice);
            let value = check.check(&old, &new, current)?;
            data.insert(key, value);
            Ok(())
        })
    }

    fn get(&self, key: &[u8], option: ReadOption) -> BoxFuture<'_, Value> {
        let key = key.to_vec();
        Box::pin(async move {
            self.ensure_open()?;
            let data = self.data.read().await;
            let stored = data.get(&key).ok_or(BackendError::NotFound)?;
            Ok(Value {
                secondary: !option.secondary.is_empty(),
                value: if option.key_only {
                    Vec::new()
                } else {
                    stored.clone()
                },
            })
        })
    }

    fn batch_delete(&self, start: &[u8], end: &[u8], limit: usize) -> BoxFuture<'_, (Vec<u8>, usize)> {
        let bounds = range_bounds(start, end);
        Box::pin(async move {
            self.ensure_open()?;
            let Some(bounds) = bounds else {
                return Ok((Vec::new(), 0));
            };
            let mut data = self.data.write().await;
            // One extra key tells us where the next batch resumes.
            let mut keys: Vec<Vec<u8>> = data
                .range(bounds)
                .take(limit.saturating_add(1))
                .map(|(k, _)| k.clone())
                .collect();
            let resume = if keys.len() > limit {
                keys.pop().unwrap_or_default()
            } else {
                Vec::new()
            };
            for key in &keys {
                data.remove(key);
            }
            Ok((resume, keys.len()))
        })
    }

    fn list(
        &self,
        start: &[u8],
        end: &[u8],
        limit: usize,
        option: ReadOption,
    ) -> BoxFuture<'_, Vec<KeyValue>> {
        let bounds = range_bounds(start, end);
        Box::pin(async move {
            self.ensure_open()?;
            let Some(bounds) = bounds else {
                return Ok(Vec::new());
            };
            let data = self.data.read().await;
            let row = |(k, v): (&Vec<u8>, &Vec<u8>)| KeyValue {
                key: String::from_utf8_lossy(k).into_owned(),
                value: if option.key_only {
                    String::new()
                } else {
                    String::from_utf8_lossy(v).into_owned()
                },
            };
            let rows = if option.reverse {
                data.range(bounds).rev().take(limit).map(row).collect()
            } else {
                data.range(bounds).take(limit).map(row).collect()
            };
            Ok(rows)
        })
    }
}

/// Driver that opens a fresh [`MemoryBackend`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryDriver;

impl BackendDriver for MemoryDriver {
    fn name(&self) -> &str {
        MEMKV
    }

    fn open<'a>(&'a self, _config: &'a ProxyConfig) -> OpenFuture<'a, Arc<dyn StorageBackend>> {
        Box::pin(async move {
            let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
            Ok(backend)
        })
    }
}
