// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Mock drivers, producers and queues.
//!
//! Everything here records what happened into shared state so tests can
//! assert on ordering and delivery without a real broker.

use kv_proxy::backend::memory::MemoryBackend;
use kv_proxy::backend::{BackendError, BoxFuture, CheckFunc, StorageBackend};
use kv_proxy::config::{ConnectorConfig, ProxyConfig};
use kv_proxy::connector::disk_queue::{DurableQueue, RecordStream};
use kv_proxy::connector::producer::{AsyncProducer, ProducerConnect, ProducerMessage};
use kv_proxy::connector::{Connector, ConnectorFuture};
use kv_proxy::error::ProxyError;
use kv_proxy::model::{KeyEntry, KeyValue, ReadOption, Value};
use kv_proxy::registry::{BackendDriver, ConnectorDriver, OpenFuture};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Shared, ordered log of lifecycle events ("backend.close", ...).
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// A switch tests flip to let blocked mocks proceed.
#[derive(Clone)]
pub struct Gate(Arc<watch::Sender<bool>>);

impl Gate {
    pub fn closed() -> Self {
        Self(Arc::new(watch::channel(false).0))
    }

    pub fn opened() -> Self {
        Self(Arc::new(watch::channel(true).0))
    }

    pub fn open(&self) {
        self.0.send_replace(true);
    }

    pub fn close(&self) {
        self.0.send_replace(false);
    }

    pub async fn wait(&self) {
        let mut rx = self.0.subscribe();
        let _ = rx.wait_for(|up| *up).await;
    }
}

/// Config in a fresh temp dir, with the given drivers.
pub fn temp_config(dir: &tempfile::TempDir, backend: &str, connector: &str) -> ProxyConfig {
    let mut config = ProxyConfig::for_testing(dir.path().to_str().unwrap());
    config.store.name = backend.to_string();
    config.connector.name = connector.to_string();
    config
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

// =============================================================================
// Backend
// =============================================================================

/// Memory backend that logs its close.
pub struct RecordingBackend {
    inner: MemoryBackend,
    log: EventLog,
    fail_close: bool,
}

impl StorageBackend for RecordingBackend {
    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.log.push("backend.close");
            self.inner.close().await?;
            if self.fail_close {
                return Err(BackendError::Storage("region flush failed".into()));
            }
            Ok(())
        })
    }

    fn put(&self, key: &[u8], value: &[u8]) -> BoxFuture<'_, ()> {
        self.inner.put(key, value)
    }

    fn unsafe_delete_range(&self, start: &[u8], end: &[u8]) -> BoxFuture<'_, ()> {
        self.inner.unsafe_delete_range(start, end)
    }

    fn check_and_put(&self, key: &[u8], old: &[u8], new: &[u8], check: CheckFunc) -> BoxFuture<'_, ()> {
        self.inner.check_and_put(key, old, new, check)
    }

    fn get(&self, key: &[u8], option: ReadOption) -> BoxFuture<'_, Value> {
        self.inner.get(key, option)
    }

    fn batch_delete(&self, start: &[u8], end: &[u8], limit: usize) -> BoxFuture<'_, (Vec<u8>, usize)> {
        self.inner.batch_delete(start, end, limit)
    }

    fn list(&self, start: &[u8], end: &[u8], limit: usize, option: ReadOption) -> BoxFuture<'_, Vec<KeyValue>> {
        self.inner.list(start, end, limit, option)
    }
}

/// Driver for [`RecordingBackend`]; `open` waits for `gate`.
pub struct RecordingBackendDriver {
    pub name: String,
    pub log: EventLog,
    pub gate: Gate,
    /// Make the opened backend's close fail.
    pub fail_close: bool,
}

impl BackendDriver for RecordingBackendDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn open<'a>(&'a self, _config: &'a ProxyConfig) -> OpenFuture<'a, Arc<dyn StorageBackend>> {
        Box::pin(async move {
            self.gate.wait().await;
            self.log.push("backend.open");
            let backend: Arc<dyn StorageBackend> = Arc::new(RecordingBackend {
                inner: MemoryBackend::new(),
                log: self.log.clone(),
                fail_close: self.fail_close,
            });
            Ok(backend)
        })
    }
}

/// Backend driver whose open always fails.
pub struct FailingBackendDriver;

impl BackendDriver for FailingBackendDriver {
    fn name(&self) -> &str {
        "broken"
    }

    fn open<'a>(&'a self, _config: &'a ProxyConfig) -> OpenFuture<'a, Arc<dyn StorageBackend>> {
        Box::pin(async { Err(ProxyError::Config("pd endpoints unreachable".into())) })
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Connector that forwards every event to a test channel.
pub struct RecordingConnector {
    events: mpsc::UnboundedSender<KeyEntry>,
    log: EventLog,
    fail_close: bool,
}

impl Connector for RecordingConnector {
    fn send(&self, entry: KeyEntry) -> ConnectorFuture<'_, ()> {
        Box::pin(async move {
            self.events.send(entry).map_err(|_| ProxyError::Shutdown)
        })
    }

    fn close(&self) -> ConnectorFuture<'_, ()> {
        Box::pin(async move {
            self.log.push("connector.close");
            if self.fail_close {
                return Err(ProxyError::Producer("broker unreachable on flush".into()));
            }
            Ok(())
        })
    }
}

/// Driver for [`RecordingConnector`].
pub struct RecordingConnectorDriver {
    pub name: String,
    pub events: mpsc::UnboundedSender<KeyEntry>,
    pub log: EventLog,
    pub fail_close: bool,
}

impl RecordingConnectorDriver {
    pub fn new(name: &str, log: EventLog) -> (Self, mpsc::UnboundedReceiver<KeyEntry>) {
        let (events, rx) = mpsc::unbounded_channel();
        let driver = Self {
            name: name.to_string(),
            events,
            log,
            fail_close: false,
        };
        (driver, rx)
    }

    /// Make the opened connector's close fail.
    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }
}

impl ConnectorDriver for RecordingConnectorDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn open<'a>(&'a self, _config: &'a ProxyConfig) -> OpenFuture<'a, Arc<dyn Connector>> {
        Box::pin(async move {
            self.log.push("connector.open");
            let connector: Arc<dyn Connector> = Arc::new(RecordingConnector {
                events: self.events.clone(),
                log: self.log.clone(),
                fail_close: self.fail_close,
            });
            Ok(connector)
        })
    }
}

// =============================================================================
// Producer
// =============================================================================

/// Producer whose worker holds each message until `gate` is open.
///
/// Models a broker that is down: the input channel fills up and senders
/// wait, exactly as they would against a real client's buffer.
pub struct GatedProducerConnect {
    pub gate: Gate,
    pub capacity: usize,
    pub delivered: mpsc::UnboundedSender<ProducerMessage>,
}

impl GatedProducerConnect {
    pub fn new(gate: Gate, capacity: usize) -> (Self, mpsc::UnboundedReceiver<ProducerMessage>) {
        let (delivered, rx) = mpsc::unbounded_channel();
        let connect = Self {
            gate,
            capacity,
            delivered,
        };
        (connect, rx)
    }

    pub fn producer(&self) -> AsyncProducer {
        let (input_tx, mut input_rx) = mpsc::channel::<ProducerMessage>(self.capacity);
        let (_err_tx, err_rx) = mpsc::channel(self.capacity);
        let gate = self.gate.clone();
        let delivered = self.delivered.clone();
        let worker = tokio::spawn(async move {
            while let Some(msg) = input_rx.recv().await {
                gate.wait().await;
                let _ = delivered.send(msg);
            }
        });
        AsyncProducer::from_parts(input_tx, err_rx, worker)
    }
}

impl ProducerConnect for GatedProducerConnect {
    fn connect<'a>(&'a self, _config: &'a ConnectorConfig) -> OpenFuture<'a, AsyncProducer> {
        Box::pin(async move { Ok(self.producer()) })
    }
}

/// Collect `n` delivered messages, failing after two seconds.
pub async fn recv_n(rx: &mut mpsc::UnboundedReceiver<ProducerMessage>, n: usize) -> Vec<ProducerMessage> {
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for producer delivery")
            .expect("producer channel closed");
        out.push(msg);
    }
    out
}

// =============================================================================
// Queue
// =============================================================================

/// Durable queue whose appends always fail.
pub struct BrokenQueue;

impl DurableQueue for BrokenQueue {
    fn put(&self, _record: Vec<u8>) -> ConnectorFuture<'_, ()> {
        Box::pin(async { Err(ProxyError::Queue("no space left on device".into())) })
    }

    fn reader(&self) -> Option<Box<dyn RecordStream>> {
        None
    }

    fn depth(&self) -> u64 {
        0
    }

    fn close(&self) -> ConnectorFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}
