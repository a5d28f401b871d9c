// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage facade.
//!
//! A [`Store`] composes one storage backend with one replication connector,
//! both chosen by name from a [`DriverRegistry`].
//!
//! # Architecture
//!
//! ```text
//!                        ┌──────────────────────────────────────────┐
//!                        │                  Store                   │
//!   get / list /         │  ┌─────────────────┐  ┌───────────────┐  │
//!   batch_delete ───────►│  │ Slot<backend>   │  │ Slot<conn.>   │  │
//!   check_and_put        │  │ (watch channel) │  │ (watch chan.) │  │
//!                        │  └────────┬────────┘  └───────▲───────┘  │
//!                        └───────────┼───────────────────┼──────────┘
//!                                    ▼                   │ spawned send
//!                              StorageBackend      KeyEntry{key, entry}
//! ```
//!
//! # Degraded operation
//!
//! `open()` returns at once; both dependencies open in the background.
//! Until the backend is ready every data call fails with
//! [`ProxyError::NotAvailable`]. A connector that is not ready only means
//! writes are not replicated.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> kv_proxy::error::Result<()> {
//! use kv_proxy::backend::compare_exact;
//! use kv_proxy::config::ProxyConfig;
//! use kv_proxy::facade::Store;
//! use kv_proxy::registry::DriverRegistry;
//! use std::time::Duration;
//!
//! let registry = DriverRegistry::builtin()?;
//! let store = Store::new(ProxyConfig::for_testing("/tmp/kv-proxy-queue"), &registry)?;
//! store.open()?;
//! store.wait_ready(Duration::from_secs(5)).await?;
//!
//! store.check_and_put(b"u1", br#"{"old":"","new":"a"}"#, compare_exact()).await?;
//! store.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod types;

pub use types::{DependencyState, Slot};

use crate::backend::{BackendError, CheckFunc, StorageBackend};
use crate::config::ProxyConfig;
use crate::connector::Connector;
use crate::error::{ProxyError, Result};
use crate::metrics;
use crate::model::{CasLog, KeyEntry, KeyValue, ReadOption, Value};
use crate::registry::{BackendDriver, ConnectorDriver, DriverRegistry};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Something the store opens in the background and closes on shutdown.
trait Dependency: Send + Sync + 'static {
    const NAME: &'static str;

    fn shutdown(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

impl Dependency for dyn StorageBackend {
    const NAME: &'static str = "backend";

    fn shutdown(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move { self.close().await.map_err(ProxyError::from) })
    }
}

impl Dependency for dyn Connector {
    const NAME: &'static str = "connector";

    fn shutdown(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.close()
    }
}

/// The proxy's public storage API.
pub struct Store {
    config: Arc<ProxyConfig>,
    backend_driver: Arc<dyn BackendDriver>,
    connector_driver: Arc<dyn ConnectorDriver>,
    backend: Arc<watch::Sender<Slot<dyn StorageBackend>>>,
    connector: Arc<watch::Sender<Slot<dyn Connector>>>,
}

impl Store {
    /// Resolve both drivers named in `config`.
    ///
    /// Fails with [`ProxyError::NotRegistered`] if either is missing.
    /// Nothing is opened yet.
    pub fn new(config: ProxyConfig, registry: &DriverRegistry) -> Result<Self> {
        let backend_driver = registry.backend(&config.store.name)?;
        let connector_driver = registry.connector(&config.connector.name)?;

        let (backend, _) = watch::channel(Slot::Unopened);
        let (connector, _) = watch::channel(Slot::Unopened);

        debug!(
            backend = %config.store.name,
            connector = %config.connector.name,
            "Store created"
        );

        Ok(Self {
            config: Arc::new(config),
            backend_driver,
            connector_driver,
            backend: Arc::new(backend),
            connector: Arc::new(connector),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════════

    /// Start opening the backend and connector in the background.
    ///
    /// Returns immediately. Open failures are logged and leave the
    /// dependency in [`DependencyState::Failed`]; they are not returned here.
    /// Must be called from within a Tokio runtime, and only once.
    pub fn open(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| ProxyError::Internal("Store::open requires a Tokio runtime".into()))?;

        let mut started = false;
        self.backend.send_if_modified(|slot| {
            if matches!(slot, Slot::Unopened) {
                *slot = Slot::Opening;
                started = true;
            }
            started
        });
        if !started {
            return Err(ProxyError::InvalidState {
                expected: DependencyState::Unopened.to_string(),
                actual: self.backend_state().to_string(),
            });
        }
        self.connector.send_replace(Slot::Opening);

        info!(
            backend = %self.config.store.name,
            connector = %self.config.connector.name,
            "Opening store"
        );

        let config = Arc::clone(&self.config);
        let driver = Arc::clone(&self.backend_driver);
        runtime.spawn(
            open_into(Arc::clone(&self.backend), async move { driver.open(&config).await })
                .instrument(info_span!("open", worker = "store", dependency = "backend")),
        );

        let config = Arc::clone(&self.config);
        let driver = Arc::clone(&self.connector_driver);
        runtime.spawn(
            open_into(Arc::clone(&self.connector), async move { driver.open(&config).await })
                .instrument(info_span!("open", worker = "store", dependency = "connector")),
        );

        Ok(())
    }

    /// Close the connector, then the backend.
    ///
    /// A connector close error is logged and swallowed; a backend close
    /// error is returned. Either step is skipped if that dependency never
    /// became ready. Safe to call more than once.
    pub async fn close(&self) -> Result<()> {
        if let Slot::Ready(connector) = self.connector.send_replace(Slot::Closed) {
            match connector.close().await {
                Ok(()) => info!("Connector closed"),
                Err(e) => error!(error = %e, "Failed to close connector"),
            }
            metrics::record_dependency_state("connector", "closed");
        }

        if let Slot::Ready(backend) = self.backend.send_replace(Slot::Closed) {
            metrics::record_dependency_state("backend", "closed");
            if let Err(e) = backend.close().await {
                error!(error = %e, "Failed to close backend");
                return Err(e.into());
            }
            info!("Backend closed");
        }
        Ok(())
    }

    /// Wait until both dependencies are ready.
    ///
    /// Fails with [`ProxyError::NotAvailable`] if either fails, is closed, or
    /// `within` elapses first.
    pub async fn wait_ready(&self, within: Duration) -> Result<()> {
        let mut backend = self.backend.subscribe();
        let mut connector = self.connector.subscribe();
        let settled = async {
            wait_settled(&mut backend, "backend").await?;
            wait_settled(&mut connector, "connector").await
        };
        tokio::time::timeout(within, settled)
            .await
            .map_err(|_| ProxyError::NotAvailable(format!("store (not ready after {:?})", within)))?
    }

    /// Current backend state.
    pub fn backend_state(&self) -> DependencyState {
        self.backend.borrow().state()
    }

    /// Current connector state.
    pub fn connector_state(&self) -> DependencyState {
        self.connector.borrow().state()
    }

    /// Receiver for backend state changes.
    pub fn watch_backend(&self) -> watch::Receiver<Slot<dyn StorageBackend>> {
        self.backend.subscribe()
    }

    /// Receiver for connector state changes.
    pub fn watch_connector(&self) -> watch::Receiver<Slot<dyn Connector>> {
        self.connector.subscribe()
    }

    fn ready_backend(&self) -> Result<Arc<dyn StorageBackend>> {
        self.backend.borrow().ready().ok_or_else(|| {
            metrics::record_not_available("backend");
            ProxyError::NotAvailable("backend".to_string())
        })
    }

    fn ready_connector(&self) -> Option<Arc<dyn Connector>> {
        self.connector.borrow().ready()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Data operations
    // ═══════════════════════════════════════════════════════════════════════════

    /// Liveness probe. Only the backend matters.
    pub fn health(&self) -> Result<()> {
        match self.backend_state() {
            DependencyState::Ready => Ok(()),
            _ => Err(ProxyError::BackendNotOpen),
        }
    }

    /// Point read.
    ///
    /// A missing key yields `Value::default()` with no error, so "absent" and
    /// "present but empty" look the same.
    pub async fn get(&self, key: &[u8], option: ReadOption) -> Result<Value> {
        let backend = self.ready_backend()?;
        let start = Instant::now();
        let result = match backend.get(key, option).await {
            Ok(value) => Ok(value),
            Err(BackendError::NotFound) => Ok(Value::default()),
            Err(e) => {
                warn!(key = %String::from_utf8_lossy(key), error = %e, "Get failed");
                Err(e.into())
            }
        };
        metrics::record_store_operation("get", result.is_ok(), start.elapsed());
        result
    }

    /// Conditional write, then replication of the raw `entry`.
    ///
    /// `entry` is a JSON [`CasLog`]. On success the unmodified `entry` bytes are
    /// handed to the connector on a spawned task; replication problems are
    /// logged and never reach the caller.
    pub async fn check_and_put(&self, key: &[u8], entry: &[u8], check: CheckFunc) -> Result<()> {
        let backend = self.ready_backend()?;
        if entry.is_empty() {
            return Err(ProxyError::NotAvailable("entry".to_string()));
        }
        let log = CasLog::decode(entry).map_err(|e| ProxyError::InvalidPayload(e.to_string()))?;

        let start = Instant::now();
        let applied = backend
            .check_and_put(key, log.old.as_bytes(), log.new.as_bytes(), check)
            .await;
        metrics::record_store_operation("check_and_put", applied.is_ok(), start.elapsed());
        if let Err(e) = applied {
            warn!(key = %String::from_utf8_lossy(key), error = %e, "Check-and-put failed");
            return Err(e.into());
        }

        if let Some(connector) = self.ready_connector() {
            let event = KeyEntry::new(key, entry);
            tokio::spawn(
                async move {
                    if let Err(e) = connector.send(event).await {
                        warn!(error = %e, "Replication send failed");
                    }
                }
                .instrument(info_span!("replicate", worker = "store")),
            );
        }
        Ok(())
    }

    /// Range listing, forwarded to the backend.
    pub async fn list(
        &self,
        start: &[u8],
        end: &[u8],
        limit: usize,
        option: ReadOption,
    ) -> Result<Vec<KeyValue>> {
        let backend = self.ready_backend()?;
        let began = Instant::now();
        let result = backend.list(start, end, limit, option).await;
        metrics::record_store_operation("list", result.is_ok(), began.elapsed());
        result.map_err(|e| {
            warn!(
                start = %String::from_utf8_lossy(start),
                end = %String::from_utf8_lossy(end),
                limit,
                error = %e,
                "List failed"
            );
            e.into()
        })
    }

    /// Delete up to `limit` keys; returns the resume key and the count.
    pub async fn batch_delete(&self, start: &[u8], end: &[u8], limit: usize) -> Result<(Vec<u8>, usize)> {
        let backend = self.ready_backend()?;
        let began = Instant::now();
        let result = backend.batch_delete(start, end, limit).await;
        metrics::record_store_operation("batch_delete", result.is_ok(), began.elapsed());
        match result {
            Ok(done) => Ok(done),
            Err(e) => {
                warn!(error = %e, "Batch delete failed");
                Err(e.into())
            }
        }
    }

    /// Unconditional range delete. Failures are logged only.
    pub async fn unsafe_delete(&self, start: &[u8], end: &[u8]) {
        let Ok(backend) = self.ready_backend() else {
            warn!("Unsafe delete skipped, backend is not available");
            return;
        };
        let began = Instant::now();
        let result = backend.unsafe_delete_range(start, end).await;
        metrics::record_store_operation("unsafe_delete", result.is_ok(), began.elapsed());
        if let Err(e) = result {
            error!(
                start = %String::from_utf8_lossy(start),
                end = %String::from_utf8_lossy(end),
                error = %e,
                "Unsafe delete failed"
            );
        }
    }
}

/// Run a driver open and publish the outcome into `slot`.
async fn open_into<T>(
    slot: Arc<watch::Sender<Slot<T>>>,
    opening: impl Future<Output = Result<Arc<T>>> + Send,
) where
    T: Dependency + ?Sized,
{
    match opening.await {
        Ok(handle) => {
            let mut published = false;
            slot.send_if_modified(|s| {
                if matches!(s, Slot::Opening) {
                    *s = Slot::Ready(Arc::clone(&handle));
                    published = true;
                }
                published
            });
            if published {
                info!(dependency = T::NAME, "Dependency ready");
                metrics::record_dependency_state(T::NAME, "ready");
                return;
            }
            warn!(dependency = T::NAME, "Opened after close, closing again");
            if let Err(e) = handle.shutdown().await {
                warn!(dependency = T::NAME, error = %e, "Failed to close late dependency");
            }
        }
        Err(e) => {
            error!(dependency = T::NAME, error = %e, "Failed to open dependency");
            metrics::record_dependency_state(T::NAME, "failed");
            let message = e.to_string();
            slot.send_if_modified(|s| {
                if matches!(s, Slot::Opening) {
                    *s = Slot::Failed(message);
                    true
                } else {
                    false
                }
            });
        }
    }
}

async fn wait_settled<T: ?Sized>(rx: &mut watch::Receiver<Slot<T>>, name: &str) -> Result<()> {
    let state = {
        let slot = rx
            .wait_for(|s| s.is_settled())
            .await
            .map_err(|_| ProxyError::Shutdown)?;
        match &*slot {
            Slot::Ready(_) => None,
            Slot::Failed(msg) => Some(format!("{} ({})", name, msg)),
            other => Some(format!("{} ({})", name, other.state())),
        }
    };
    match state {
        None => Ok(()),
        Some(reason) => Err(ProxyError::NotAvailable(reason)),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
