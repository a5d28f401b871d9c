// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Driver registry.
//!
//! Maps a backend name to a factory for opening a [`StorageBackend`] and a
//! connector name to a factory for opening a [`Connector`]. The registry is
//! an ordinary value: build it once at startup, then hand it by reference to
//! whatever constructs [`Store`](crate::facade::Store)s.
//!
//! Registering a name twice returns [`ProxyError::AlreadyRegistered`]. That
//! is a wiring defect; callers are expected to abort startup on it.
//!
//! # Example
//!
//! ```rust
//! use kv_proxy::registry::DriverRegistry;
//! use kv_proxy::backend::memory::MemoryDriver;
//!
//! let mut registry = DriverRegistry::new();
//! registry.register_backend(MemoryDriver).unwrap();
//! assert!(registry.register_backend(MemoryDriver).is_err());
//! ```

use crate::backend::memory::MemoryDriver;
use crate::backend::StorageBackend;
use crate::config::ProxyConfig;
use crate::connector::durable::DurableQueueDriver;
use crate::connector::redis_stream::RedisStreamConnect;
use crate::connector::{Connector, NoOpConnectorDriver};
use crate::error::{DriverKind, ProxyError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

/// Boxed future returned by driver `open` calls.
pub type OpenFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Factory for a storage backend.
pub trait BackendDriver: Send + Sync + 'static {
    /// Name the driver is registered under.
    fn name(&self) -> &str;

    /// Open a backend using the given configuration.
    fn open<'a>(&'a self, config: &'a ProxyConfig) -> OpenFuture<'a, Arc<dyn StorageBackend>>;
}

/// Factory for a replication connector.
pub trait ConnectorDriver: Send + Sync + 'static {
    /// Name the driver is registered under.
    fn name(&self) -> &str;

    /// Open a connector using the given configuration.
    fn open<'a>(&'a self, config: &'a ProxyConfig) -> OpenFuture<'a, Arc<dyn Connector>>;
}

/// Name-keyed driver tables. Immutable once startup wiring is done.
#[derive(Default, Clone)]
pub struct DriverRegistry {
    backends: HashMap<String, Arc<dyn BackendDriver>>,
    connectors: HashMap<String, Arc<dyn ConnectorDriver>>,
}

impl DriverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the drivers shipped in this crate:
    /// `memkv`, `noop` and the durable-queue connector publishing to Redis.
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::new();
        registry.register_backend(MemoryDriver)?;
        registry.register_connector(NoOpConnectorDriver)?;
        registry.register_connector(DurableQueueDriver::new(Arc::new(RedisStreamConnect)))?;
        Ok(registry)
    }

    /// Add a backend driver under its declared name.
    pub fn register_backend(&mut self, driver: impl BackendDriver) -> Result<()> {
        let name = driver.name().to_string();
        if self.backends.contains_key(&name) {
            return Err(ProxyError::AlreadyRegistered {
                kind: DriverKind::Backend,
                name,
            });
        }
        debug!(driver = %name, "Registered backend driver");
        self.backends.insert(name, Arc::new(driver));
        Ok(())
    }

    /// Add a connector driver under its declared name.
    pub fn register_connector(&mut self, driver: impl ConnectorDriver) -> Result<()> {
        let name = driver.name().to_string();
        if self.connectors.contains_key(&name) {
            return Err(ProxyError::AlreadyRegistered {
                kind: DriverKind::Connector,
                name,
            });
        }
        debug!(driver = %name, "Registered connector driver");
        self.connectors.insert(name, Arc::new(driver));
        Ok(())
    }

    /// Look up a backend driver by name.
    pub fn backend(&self, name: &str) -> Result<Arc<dyn BackendDriver>> {
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| ProxyError::NotRegistered {
                kind: DriverKind::Backend,
                name: name.to_string(),
            })
    }

    /// Look up a connector driver by name.
    pub fn connector(&self, name: &str) -> Result<Arc<dyn ConnectorDriver>> {
        self.connectors
            .get(name)
            .cloned()
            .ok_or_else(|| ProxyError::NotRegistered {
                kind: DriverKind::Connector,
                name: name.to_string(),
            })
    }

    /// Registered backend names, sorted.
    pub fn backend_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Registered connector names, sorted.
    pub fn connector_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connectors.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MEMKV;
    use crate::connector::durable::DURABLE_QUEUE;
    use crate::connector::NOOP;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = DriverRegistry::new();
        registry.register_backend(MemoryDriver).unwrap();

        assert!(registry.backend(MEMKV).is_ok());
        assert!(registry.connector(MEMKV).is_err());
    }

    #[test]
    fn test_duplicate_backend_fails_fast() {
        let mut registry = DriverRegistry::new();
        registry.register_backend(MemoryDriver).unwrap();

        let err = registry.register_backend(MemoryDriver).unwrap_err();
        match err {
            ProxyError::AlreadyRegistered { kind, name } => {
                assert_eq!(kind, DriverKind::Backend);
                assert_eq!(name, MEMKV);
            }
            other => panic!("Expected AlreadyRegistered, got {:?}", other),
        }
        assert_eq!(registry.backend_names(), vec![MEMKV.to_string()]);
    }

    #[test]
    fn test_duplicate_connector_fails_fast() {
        let mut registry = DriverRegistry::new();
        registry.register_connector(NoOpConnectorDriver).unwrap();
        assert!(matches!(
            registry.register_connector(NoOpConnectorDriver),
            Err(ProxyError::AlreadyRegistered {
                kind: DriverKind::Connector,
                ..
            })
        ));
    }

    #[test]
    fn test_lookup_unknown_is_not_registered() {
        let registry = DriverRegistry::new();
        let err = registry.connector("rabbit").err().unwrap();
        assert!(matches!(
            err,
            ProxyError::NotRegistered {
                kind: DriverKind::Connector,
                ..
            }
        ));
    }

    #[test]
    fn test_builtin_registry() {
        let registry = DriverRegistry::builtin().unwrap();
        assert_eq!(registry.backend_names(), vec![MEMKV.to_string()]);
        assert_eq!(
            registry.connector_names(),
            vec![DURABLE_QUEUE.to_string(), NOOP.to_string()]
        );
    }
}
