// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # KV Proxy
//!
//! A key-value storage proxy that fronts a pluggable storage backend and
//! replicates every successful compare-and-put to a remote broker through a
//! crash-tolerant, disk-backed queue.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                                 kv-proxy                                  │
//! │                                                                           │
//! │  ┌──────────────┐   names   ┌──────────────────────────────────────────┐  │
//! │  │DriverRegistry│──────────►│ Store (facade)                           │  │
//! │  │ memkv, noop, │           │  get / list / batch_delete / CAS         │  │
//! │  │ durable-queue│           └──────┬──────────────────────┬────────────┘  │
//! │  └──────────────┘                  ▼                      ▼ KeyEntry      │
//! │                             StorageBackend     ┌──────────────────────┐   │
//! │                                                │ DurableQueueConnector│   │
//! │                                                │ intake ► DiskQueue ► │   │
//! │                                                │ forwarder ► producer │   │
//! │                                                └──────────┬───────────┘   │
//! └───────────────────────────────────────────────────────────┼───────────────┘
//!                                                             ▼
//!                                                    Redis Streams broker
//! ```
//!
//! ## Delivery
//!
//! Writes are acknowledged once the backend accepts them. Replication is
//! at-least-once per forwarded record; anything appended to the disk queue
//! survives a restart and is forwarded in order.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kv_proxy::{compare_exact, DriverRegistry, ProxyConfig, Store};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> kv_proxy::Result<()> {
//!     let config = ProxyConfig::load("kv-proxy.json")?;
//!     let registry = DriverRegistry::builtin()?;
//!
//!     let store = Store::new(config, &registry)?;
//!     store.open()?;
//!     store.wait_ready(Duration::from_secs(10)).await?;
//!
//!     store.check_and_put(b"u1", br#"{"old":"","new":"a"}"#, compare_exact()).await?;
//!     store.close().await
//! }
//! ```

pub mod backend;
pub mod config;
pub mod connector;
pub mod error;
pub mod facade;
pub mod metrics;
pub mod model;
pub mod registry;
pub mod resilience;

// Re-exports for convenience
pub use backend::{compare_exact, BackendError, CheckFunc, StorageBackend};
pub use config::{ConnectorConfig, ProxyConfig, RequiredAcks, StoreConfig};
pub use connector::durable::{DurableQueueConnector, DurableQueueDriver};
pub use connector::Connector;
pub use error::{ProxyError, Result};
pub use facade::{DependencyState, Store};
pub use model::{CasLog, KeyEntry, KeyValue, ReadOption, Value};
pub use registry::{BackendDriver, ConnectorDriver, DriverRegistry};
pub use resilience::{BackoffMode, BackoffPolicy};
