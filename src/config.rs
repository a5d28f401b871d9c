// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the proxy.
//!
//! Configuration is passed to [`Store::new()`](crate::facade::Store::new) and
//! to every driver's `open`. It can be constructed programmatically or
//! deserialized from JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use kv_proxy::config::ProxyConfig;
//!
//! let mut config = ProxyConfig::default();
//! config.connector.enable_producer = true;
//! config.connector.broker_list = vec!["redis://127.0.0.1:6379".into()];
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ProxyConfig
//! ├── store: StoreConfig            # Which backend driver to open
//! └── connector: ConnectorConfig    # Which connector + durable queue + producer
//! ```
//!
//! # JSON Example
//!
//! ```json
//! {
//!   "store": { "name": "memkv" },
//!   "connector": {
//!     "name": "durable-queue",
//!     "queue_data_path": "/var/lib/kv-proxy/queue",
//!     "enable_producer": true,
//!     "broker_list": ["redis://broker-1:6379"],
//!     "topic": "kv-writes",
//!     "write_timeout": "1s"
//!   }
//! }
//! ```

use crate::error::{ProxyError, Result};
use crate::resilience::{BackoffMode, BackoffPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Storage backend selection.
    #[serde(default)]
    pub store: StoreConfig,

    /// Replication connector settings.
    #[serde(default)]
    pub connector: ConnectorConfig,
}

impl ProxyConfig {
    /// Minimal config for tests: `memkv` backend, durable-queue connector
    /// writing under `queue_data_path`, remote publishing off.
    pub fn for_testing(queue_data_path: &str) -> Self {
        Self {
            store: StoreConfig::default(),
            connector: ConnectorConfig {
                queue_data_path: queue_data_path.to_string(),
                sync_every: 1,
                sync_timeout: "50ms".to_string(),
                write_timeout: "100ms".to_string(),
                ..Default::default()
            },
        }
    }

    /// Read a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path)?;
        serde_json::from_slice(&raw).map_err(|e| {
            ProxyError::Config(format!("Invalid config file {}: {}", path.display(), e))
        })
    }

    /// Write the default config to `path`, refusing to overwrite.
    pub fn write_default(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        match std::fs::metadata(path) {
            Ok(_) => return Err(ProxyError::AlreadyExists(path.display().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let json = serde_json::to_string_pretty(&Self::default())
            .map_err(|e| ProxyError::Internal(format!("Serialize default config: {}", e)))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.store.name.is_empty() {
            return Err(ProxyError::Config("store.name must not be empty".into()));
        }
        self.connector.validate()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// StoreConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Storage backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Registered backend driver name.
    #[serde(default = "default_store_name")]
    pub name: String,
}

fn default_store_name() -> String {
    "memkv".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: default_store_name(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ConnectorConfig: durable queue + remote producer
// ═══════════════════════════════════════════════════════════════════════════════

/// Acknowledgement level the remote producer waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequiredAcks {
    /// Fire and forget; delivery failures are not reported.
    NoResponse,
    /// Wait for the broker that accepted the write.
    #[default]
    WaitForLocal,
    /// Also wait for at least one replica.
    WaitForAll,
}

/// Replication connector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Registered connector driver name.
    #[serde(default = "default_connector_name")]
    pub name: String,

    // ─────────────────────────────────────────────────────────────────────────
    // Durable queue
    // ─────────────────────────────────────────────────────────────────────────

    /// Directory holding queue segments and metadata.
    #[serde(default = "default_queue_data_path")]
    pub queue_data_path: String,

    /// Prefix for queue file names.
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Roll to a new segment once the current one reaches this size.
    #[serde(default = "default_max_bytes_per_file")]
    pub max_bytes_per_file: u64,

    /// Smallest accepted record (the 4-byte key length header).
    #[serde(default = "default_min_msg_size")]
    pub min_msg_size: u32,

    /// Largest accepted record.
    #[serde(default = "default_max_msg_size")]
    pub max_msg_size: u32,

    /// Fsync after this many writes.
    #[serde(default = "default_sync_every")]
    pub sync_every: u64,

    /// Fsync at least this often while there are unsynced writes (e.g. "2s").
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout: String,

    // ─────────────────────────────────────────────────────────────────────────
    // Remote producer
    // ─────────────────────────────────────────────────────────────────────────

    /// Forward queued events to the remote broker.
    #[serde(default)]
    pub enable_producer: bool,

    /// Broker URLs, tried in order (e.g. `"redis://broker-1:6379"`).
    #[serde(default)]
    pub broker_list: Vec<String>,

    /// Destination topic (Redis stream key).
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Publish attempts after the first failure.
    #[serde(default = "default_retry")]
    pub retry: u32,

    /// Backoff step between retries (e.g. "100ms").
    #[serde(default = "default_backoff")]
    pub backoff: String,

    /// Backoff ceiling (e.g. "1s").
    #[serde(default = "default_max_backoff")]
    pub max_backoff: String,

    /// How the backoff grows with attempts.
    #[serde(default)]
    pub backoff_mode: BackoffMode,

    /// Inspect the topic on connect and refuse a non-stream key.
    #[serde(default)]
    pub fetch_metadata: bool,

    /// Acknowledgement level.
    #[serde(default)]
    pub required_acks: RequiredAcks,

    /// Bounded wait for a direct producer send when the queue append fails.
    #[serde(default = "default_write_timeout")]
    pub write_timeout: String,

    /// Capacity of the in-memory intake (backpressure threshold).
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,

    /// Capacity of the producer's input channel.
    #[serde(default = "default_producer_buffer")]
    pub producer_buffer: usize,
}

fn default_connector_name() -> String {
    "durable-queue".to_string()
}

fn default_queue_data_path() -> String {
    "data/queue".to_string()
}

fn default_queue_name() -> String {
    "kv-proxy".to_string()
}

fn default_max_bytes_per_file() -> u64 {
    100 * 1024 * 1024 // 100 MiB
}

fn default_min_msg_size() -> u32 {
    4
}

fn default_max_msg_size() -> u32 {
    4 * 1024 * 1024 // 4 MiB
}

fn default_sync_every() -> u64 {
    2500
}

fn default_sync_timeout() -> String {
    "2s".to_string()
}

fn default_topic() -> String {
    "kv-proxy".to_string()
}

fn default_retry() -> u32 {
    3
}

fn default_backoff() -> String {
    "100ms".to_string()
}

fn default_max_backoff() -> String {
    "1s".to_string()
}

fn default_write_timeout() -> String {
    "1s".to_string()
}

fn default_high_water_mark() -> usize {
    1024
}

fn default_producer_buffer() -> usize {
    256
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            name: default_connector_name(),
            queue_data_path: default_queue_data_path(),
            queue_name: default_queue_name(),
            max_bytes_per_file: default_max_bytes_per_file(),
            min_msg_size: default_min_msg_size(),
            max_msg_size: default_max_msg_size(),
            sync_every: default_sync_every(),
            sync_timeout: default_sync_timeout(),
            enable_producer: false,
            broker_list: Vec::new(),
            topic: default_topic(),
            retry: default_retry(),
            backoff: default_backoff(),
            max_backoff: default_max_backoff(),
            backoff_mode: BackoffMode::default(),
            fetch_metadata: false,
            required_acks: RequiredAcks::default(),
            write_timeout: default_write_timeout(),
            high_water_mark: default_high_water_mark(),
            producer_buffer: default_producer_buffer(),
        }
    }
}

impl ConnectorConfig {
    /// Parse `sync_timeout`, falling back to 2 seconds.
    pub fn sync_timeout_duration(&self) -> Duration {
        parse_duration_or(&self.sync_timeout, Duration::from_secs(2))
    }

    /// Parse `write_timeout`, falling back to 1 second.
    pub fn write_timeout_duration(&self) -> Duration {
        parse_duration_or(&self.write_timeout, Duration::from_secs(1))
    }

    /// Backoff policy for producer retries.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: parse_duration_or(&self.backoff, Duration::from_millis(100)),
            max: parse_duration_or(&self.max_backoff, Duration::from_secs(1)),
            mode: self.backoff_mode,
        }
    }

    /// Check connector constraints.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ProxyError::Config("connector.name must not be empty".into()));
        }
        if self.high_water_mark == 0 {
            return Err(ProxyError::Config("connector.high_water_mark must be at least 1".into()));
        }
        if self.producer_buffer == 0 {
            return Err(ProxyError::Config("connector.producer_buffer must be at least 1".into()));
        }
        if self.min_msg_size > self.max_msg_size {
            return Err(ProxyError::Config(format!(
                "connector.min_msg_size ({}) exceeds max_msg_size ({})",
                self.min_msg_size, self.max_msg_size
            )));
        }
        if self.max_bytes_per_file == 0 {
            return Err(ProxyError::Config("connector.max_bytes_per_file must be positive".into()));
        }
        if self.enable_producer {
            if self.broker_list.is_empty() {
                return Err(ProxyError::Config(
                    "connector.broker_list is required when enable_producer is set".into(),
                ));
            }
            if self.topic.is_empty() {
                return Err(ProxyError::Config("connector.topic must not be empty".into()));
            }
        }
        Ok(())
    }
}

fn parse_duration_or(raw: &str, fallback: Duration) -> Duration {
    humantime::parse_duration(raw).unwrap_or(fallback)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
