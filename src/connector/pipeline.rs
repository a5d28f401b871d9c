// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The two background tasks behind the durable-queue connector.
//!
//! ```text
//!            ┌──────────────┐   put    ┌───────────┐  next   ┌─────────────┐
//! intake ───►│ intake task  │─────────►│ DiskQueue │────────►│  forwarder  │───► producer input
//!            └──────┬───────┘          └───────────┘         └──────▲──────┘
//!                   │ append failed                                 │ errors (logged)
//!                   └──── direct send, bounded by write_timeout ────┘
//! ```
//!
//! The intake task never blocks longer than `write_timeout` on a single event.
//! The forwarder delivers queue records in queue order; events taken by the
//! direct-send path may overtake records still queued.

use super::disk_queue::{DurableQueue, RecordStream};
use super::producer::{ProducerError, ProducerMessage};
use super::record;
use crate::metrics;
use crate::model::KeyEntry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// Counters for one connector instance.
#[derive(Debug, Default)]
pub struct PipelineStats {
    accepted: AtomicU64,
    queued: AtomicU64,
    fallback_delivered: AtomicU64,
    dropped: AtomicU64,
    forwarded: AtomicU64,
    producer_errors: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectorStats {
    /// Entries accepted into the intake.
    pub accepted: u64,
    /// Entries appended to the durable queue.
    pub queued: u64,
    /// Entries sent straight to the producer after an append failure.
    pub fallback_delivered: u64,
    /// Entries given up on.
    pub dropped: u64,
    /// Queue records handed to the producer.
    pub forwarded: u64,
    /// Delivery failures reported by the producer.
    pub producer_errors: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> ConnectorStats {
        ConnectorStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            fallback_delivered: self.fallback_delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            producer_errors: self.producer_errors.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        metrics::record_intake_accepted();
    }

    fn record_dropped(&self, reason: &'static str) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::record_dropped(reason);
    }
}

/// Direct route to the producer, used when a queue append fails.
pub struct Fallback {
    pub input: mpsc::Sender<ProducerMessage>,
    pub topic: String,
    pub write_timeout: Duration,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Intake → durable queue
// ═══════════════════════════════════════════════════════════════════════════════

/// Move entries from the intake into the queue until the intake closes.
pub async fn run_intake(
    mut intake: mpsc::Receiver<KeyEntry>,
    queue: Arc<dyn DurableQueue>,
    fallback: Option<Fallback>,
    stats: Arc<PipelineStats>,
) {
    while let Some(entry) = intake.recv().await {
        let encoded = match record::encode(&entry) {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "Cannot encode entry, dropping");
                stats.record_dropped("encode");
                continue;
            }
        };

        let append_error = match queue.put(encoded).await {
            Ok(()) => {
                stats.queued.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            Err(e) => e,
        };

        let Some(fallback) = fallback.as_ref() else {
            warn!(
                key = %String::from_utf8_lossy(entry.key()),
                error = %append_error,
                "Durable queue append failed and publishing is disabled, dropping event"
            );
            stats.record_dropped("append");
            continue;
        };

        let (key, value) = entry.into_parts();
        let key_text = String::from_utf8_lossy(&key).into_owned();
        let msg = ProducerMessage {
            topic: fallback.topic.clone(),
            key,
            value,
        };

        // One attempt with a fresh deadline per event.
        match timeout(fallback.write_timeout, fallback.input.send(msg)).await {
            Ok(Ok(())) => {
                debug!(key = %key_text, error = %append_error, "Durable queue append failed, sent directly");
                stats.fallback_delivered.fetch_add(1, Ordering::Relaxed);
                metrics::record_fallback(true);
            }
            Ok(Err(_)) => {
                error!(key = %key_text, error = %append_error, "Producer input closed, dropping event");
                stats.record_dropped("producer_closed");
                metrics::record_fallback(false);
            }
            Err(_) => {
                error!(
                    key = %key_text,
                    error = %append_error,
                    timeout_ms = fallback.write_timeout.as_millis(),
                    "Producer did not accept event within write timeout, dropping"
                );
                stats.record_dropped("timeout");
                metrics::record_fallback(false);
            }
        }
    }
    debug!("Intake closed, intake task stopping");
}

// ═══════════════════════════════════════════════════════════════════════════════
// Durable queue → producer
// ═══════════════════════════════════════════════════════════════════════════════

/// Reads queue records and feeds the producer, logging producer errors.
pub struct Forwarder {
    pub records: Box<dyn RecordStream>,
    pub errors: Option<mpsc::Receiver<ProducerError>>,
    pub input: mpsc::Sender<ProducerMessage>,
    pub topic: String,
    /// Bound on delivering the record in hand once shutdown starts.
    pub write_timeout: Duration,
    pub shutdown: watch::Receiver<bool>,
    pub stats: Arc<PipelineStats>,
}

async fn next_error(errors: &mut Option<mpsc::Receiver<ProducerError>>) -> Option<ProducerError> {
    match errors {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl Forwarder {
    /// Run until the queue's read stream ends or the producer input closes.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                err = next_error(&mut self.errors), if self.errors.is_some() => match err {
                    Some(err) => self.log_producer_error(err),
                    None => self.errors = None,
                },
                raw = self.records.next() => {
                    let Some(raw) = raw else {
                        debug!("Durable queue read stream ended");
                        break;
                    };
                    let entry = match record::decode(&raw) {
                        Ok(entry) => entry,
                        Err(e) => {
                            error!(error = %e, len = raw.len(), "Undecodable queue record, skipping");
                            metrics::record_record_decode_error();
                            continue;
                        }
                    };
                    let (key, value) = entry.into_parts();
                    let msg = ProducerMessage {
                        topic: self.topic.clone(),
                        key,
                        value,
                    };
                    if !self.deliver(msg).await {
                        break;
                    }
                }
            }
        }
        debug!("Forwarder stopping");
    }

    /// Hand one message to the producer, draining errors while waiting.
    async fn deliver(&mut self, msg: ProducerMessage) -> bool {
        loop {
            if *self.shutdown.borrow() {
                return self.deliver_at_shutdown(msg).await;
            }
            let owner_gone = tokio::select! {
                permit = self.input.reserve() => {
                    return match permit {
                        Ok(permit) => {
                            permit.send(msg);
                            self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
                            metrics::record_forwarded();
                            true
                        }
                        Err(_) => {
                            warn!(key = %String::from_utf8_lossy(&msg.key), "Producer input closed");
                            false
                        }
                    };
                }
                err = next_error(&mut self.errors), if self.errors.is_some() => {
                    match err {
                        Some(err) => self.log_producer_error(err),
                        None => self.errors = None,
                    }
                    false
                }
                changed = self.shutdown.changed() => changed.is_err(),
            };
            // Owner dropped; treat as shutdown.
            if owner_gone {
                return self.deliver_at_shutdown(msg).await;
            }
        }
    }

    async fn deliver_at_shutdown(&mut self, msg: ProducerMessage) -> bool {
        let key = String::from_utf8_lossy(&msg.key).into_owned();
        match timeout(self.write_timeout, self.input.send(msg)).await {
            Ok(Ok(())) => {
                self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
                metrics::record_forwarded();
            }
            _ => {
                warn!(key = %key, "Producer unavailable at shutdown, dropping in-flight record");
                self.stats.record_dropped("shutdown");
            }
        }
        false
    }

    fn log_producer_error(&self, err: ProducerError) {
        error!(
            topic = %err.message.topic,
            key = %String::from_utf8_lossy(&err.message.key),
            error = %err.error,
            "Producer failed to deliver message"
        );
        self.stats.producer_errors.fetch_add(1, Ordering::Relaxed);
        metrics::record_producer_error();
    }
}
