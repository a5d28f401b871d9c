// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication connectors.
//!
//! A connector publishes accepted writes somewhere else. The facade hands it
//! every successful compare-and-put as a [`KeyEntry`] on a spawned task, so a
//! slow connector never delays a storage call.
//!
//! # Drivers
//!
//! | Name | Type | Behaviour |
//! |------|------|-----------|
//! | `noop` | [`NoOpConnector`] | Accepts and discards |
//! | `durable-queue` | [`durable::DurableQueueConnector`] | Intake → disk queue → remote producer |
//!
//! # Pipeline
//!
//! ```text
//!  send() ──► intake (bounded mpsc) ──► intake task ──► DiskQueue ──► forwarder task ──► AsyncProducer
//!                                          │                                                 ▲
//!                                          └──── append failed: direct send, write_timeout ──┘
//! ```

pub mod disk_queue;
pub mod durable;
pub mod pipeline;
pub mod producer;
pub mod record;
pub mod redis_stream;

use crate::config::ProxyConfig;
use crate::error::Result;
use crate::model::KeyEntry;
use crate::registry::{ConnectorDriver, OpenFuture};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by connector calls.
pub type ConnectorFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Driver name for [`NoOpConnector`].
pub const NOOP: &str = "noop";

/// A replication sink.
pub trait Connector: Send + Sync + 'static {
    /// Accept one event. May wait for capacity; never drops silently.
    fn send(&self, entry: KeyEntry) -> ConnectorFuture<'_, ()>;

    /// Stop accepting events and release resources.
    fn close(&self) -> ConnectorFuture<'_, ()>;
}

/// Connector that discards every event.
///
/// Used when replication is switched off.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpConnector;

impl Connector for NoOpConnector {
    fn send(&self, _entry: KeyEntry) -> ConnectorFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn close(&self) -> ConnectorFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// Driver for [`NoOpConnector`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpConnectorDriver;

impl ConnectorDriver for NoOpConnectorDriver {
    fn name(&self) -> &str {
        NOOP
    }

    fn open<'a>(&'a self, _config: &'a ProxyConfig) -> OpenFuture<'a, Arc<dyn Connector>> {
        Box::pin(async {
            let connector: Arc<dyn Connector> = Arc::new(NoOpConnector);
            Ok(connector)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_connector_accepts_everything() {
        let connector = NoOpConnector;
        connector.send(KeyEntry::new("k", "v")).await.unwrap();
        connector.close().await.unwrap();
        // Still fine after close.
        connector.send(KeyEntry::new("k", "v")).await.unwrap();
    }

    #[tokio::test]
    async fn test_noop_driver_opens() {
        let driver = NoOpConnectorDriver;
        assert_eq!(driver.name(), NOOP);
        let connector = driver.open(&ProxyConfig::default()).await.unwrap();
        connector.send(KeyEntry::new("a", "b")).await.unwrap();
    }
}
