// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable-queue connector.
//!
//! Owns the bounded intake, a [`DurableQueue`] and, when publishing is
//! enabled, an [`AsyncProducer`]. See [`pipeline`](super::pipeline) for the
//! tasks that move events between them.
//!
//! # Lifecycle
//!
//! ```text
//! start() ─► running ─► close():
//!                         1. drop intake sender, wait for the intake task to drain
//!                         2. close the durable queue (read stream ends)
//!                         3. stop the forwarder
//!                         4. close the producer
//! ```
//!
//! `send` after `close` fails with [`ProxyError::Shutdown`].

use super::disk_queue::{DiskQueue, DurableQueue};
use super::pipeline::{run_intake, ConnectorStats, Fallback, Forwarder, PipelineStats};
use super::producer::{AsyncProducer, ProducerConnect};
use super::{Connector, ConnectorFuture};
use crate::config::{ConnectorConfig, ProxyConfig};
use crate::error::{ProxyError, Result};
use crate::model::KeyEntry;
use crate::registry::{ConnectorDriver, OpenFuture};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

/// Driver name for [`DurableQueueConnector`].
pub const DURABLE_QUEUE: &str = "durable-queue";

fn take<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    slot.lock().ok().and_then(|mut guard| guard.take())
}

/// Connector that buffers events on disk before publishing them.
pub struct DurableQueueConnector {
    intake: Mutex<Option<mpsc::Sender<KeyEntry>>>,
    queue: Arc<dyn DurableQueue>,
    producer: Mutex<Option<AsyncProducer>>,
    intake_task: Mutex<Option<JoinHandle<()>>>,
    forward_task: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    stats: Arc<PipelineStats>,
}

impl DurableQueueConnector {
    /// Spawn the pipeline over an already-open queue and optional producer.
    ///
    /// With no producer, events are only appended to the queue.
    pub fn start(
        config: &ConnectorConfig,
        queue: Arc<dyn DurableQueue>,
        producer: Option<AsyncProducer>,
    ) -> Self {
        let (intake_tx, intake_rx) = mpsc::channel(config.high_water_mark.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(PipelineStats::default());
        let write_timeout = config.write_timeout_duration();

        let fallback = producer.as_ref().map(|p| Fallback {
            input: p.input(),
            topic: config.topic.clone(),
            write_timeout,
        });
        let intake_task = tokio::spawn(
            run_intake(intake_rx, Arc::clone(&queue), fallback, Arc::clone(&stats))
                .instrument(info_span!("intake", worker = "durable-connector")),
        );

        let forward_task = match producer.as_ref() {
            Some(p) => match queue.reader() {
                Some(records) => {
                    let forwarder = Forwarder {
                        records,
                        errors: p.take_errors(),
                        input: p.input(),
                        topic: config.topic.clone(),
                        write_timeout,
                        shutdown: shutdown_rx,
                        stats: Arc::clone(&stats),
                    };
                    Some(tokio::spawn(
                        forwarder
                            .run()
                            .instrument(info_span!("forwarder", worker = "durable-connector", topic = %config.topic)),
                    ))
                }
                None => {
                    warn!("Durable queue read stream already taken, queued events will not be forwarded");
                    None
                }
            },
            None => None,
        };

        info!(
            high_water_mark = config.high_water_mark,
            publishing = producer.is_some(),
            topic = %config.topic,
            "Durable queue connector started"
        );

        Self {
            intake: Mutex::new(Some(intake_tx)),
            queue,
            producer: Mutex::new(producer),
            intake_task: Mutex::new(Some(intake_task)),
            forward_task: Mutex::new(forward_task),
            shutdown_tx,
            stats,
        }
    }

    /// Pipeline counters.
    pub fn stats(&self) -> ConnectorStats {
        self.stats.snapshot()
    }

    /// Records waiting in the durable queue.
    pub fn queue_depth(&self) -> u64 {
        self.queue.depth()
    }
}

impl Connector for DurableQueueConnector {
    fn send(&self, entry: KeyEntry) -> ConnectorFuture<'_, ()> {
        Box::pin(async move {
            let intake = self
                .intake
                .lock()
                .ok()
                .and_then(|guard| guard.as_ref().cloned())
                .ok_or(ProxyError::Shutdown)?;
            // Waits while the intake is full.
            intake.send(entry).await.map_err(|_| ProxyError::Shutdown)?;
            self.stats.record_accepted();
            Ok(())
        })
    }

    fn close(&self) -> ConnectorFuture<'_, ()> {
        Box::pin(async move {
            let Some(intake) = take(&self.intake) else {
                return Ok(()); // already closed
            };
            drop(intake);

            if let Some(task) = take(&self.intake_task) {
                if let Err(e) = task.await {
                    error!(error = %e, "Intake task ended abnormally");
                }
            }

            let mut first_error = None;
            if let Err(e) = self.queue.close().await {
                error!(error = %e, "Failed to close durable queue");
                first_error = Some(e);
            }

            let _ = self.shutdown_tx.send(true);
            if let Some(task) = take(&self.forward_task) {
                if let Err(e) = task.await {
                    error!(error = %e, "Forwarder task ended abnormally");
                }
            }

            if let Some(producer) = take(&self.producer) {
                if let Err(e) = producer.close().await {
                    error!(error = %e, "Failed to close producer");
                    first_error.get_or_insert(e);
                }
            }

            let stats = self.stats.snapshot();
            info!(
                accepted = stats.accepted,
                queued = stats.queued,
                forwarded = stats.forwarded,
                fallback = stats.fallback_delivered,
                dropped = stats.dropped,
                "Durable queue connector closed"
            );
            first_error.map_or(Ok(()), Err)
        })
    }
}

/// Opens a [`DiskQueue`] and, if publishing is enabled, a producer.
pub struct DurableQueueDriver {
    producers: Arc<dyn ProducerConnect>,
}

impl DurableQueueDriver {
    pub fn new(producers: Arc<dyn ProducerConnect>) -> Self {
        Self { producers }
    }

    async fn open_connector(&self, config: &ConnectorConfig) -> Result<DurableQueueConnector> {
        config.validate()?;
        let queue: Arc<dyn DurableQueue> = Arc::new(DiskQueue::from_config(config).await?);

        let producer = if config.enable_producer {
            match self.producers.connect(config).await {
                Ok(p) => Some(p),
                Err(e) => {
                    if let Err(close_err) = queue.close().await {
                        warn!(error = %close_err, "Failed to close durable queue after producer error");
                    }
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(DurableQueueConnector::start(config, queue, producer))
    }
}

impl ConnectorDriver for DurableQueueDriver {
    fn name(&self) -> &str {
        DURABLE_QUEUE
    }

    fn open<'a>(&'a self, config: &'a ProxyConfig) -> OpenFuture<'a, Arc<dyn Connector>> {
        Box::pin(async move {
            let connector: Arc<dyn Connector> =
                Arc::new(self.open_connector(&config.connector).await?);
            Ok(connector)
        })
    }
}
