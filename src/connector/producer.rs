// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Asynchronous producer handle.
//!
//! An [`AsyncProducer`] is a bounded input channel feeding a worker task that
//! talks to the broker, plus an error channel on which the worker reports
//! messages it gave up on. The connector only sees these channels, so any
//! broker client can sit behind them. [`ProducerConnect`] builds one from
//! configuration; [`RedisStreamConnect`](super::redis_stream::RedisStreamConnect)
//! is the shipped implementation.

use crate::config::ConnectorConfig;
use crate::error::{ProxyError, Result};
use crate::registry::OpenFuture;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerMessage {
    pub topic: String,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// A message the producer could not deliver.
#[derive(Debug)]
pub struct ProducerError {
    pub message: ProducerMessage,
    pub error: ProxyError,
}

/// Channel-based producer handle.
pub struct AsyncProducer {
    input: mpsc::Sender<ProducerMessage>,
    errors: Mutex<Option<mpsc::Receiver<ProducerError>>>,
    worker: JoinHandle<()>,
}

impl AsyncProducer {
    /// Assemble a producer from its channels and the task that serves them.
    ///
    /// The worker must exit once `input` is closed and drained.
    pub fn from_parts(
        input: mpsc::Sender<ProducerMessage>,
        errors: mpsc::Receiver<ProducerError>,
        worker: JoinHandle<()>,
    ) -> Self {
        Self {
            input,
            errors: Mutex::new(Some(errors)),
            worker,
        }
    }

    /// A sender for the input channel.
    pub fn input(&self) -> mpsc::Sender<ProducerMessage> {
        self.input.clone()
    }

    /// Take the error stream. Only the first call gets it.
    pub fn take_errors(&self) -> Option<mpsc::Receiver<ProducerError>> {
        self.errors.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Close the input and wait for the worker to flush.
    ///
    /// Other clones of the input sender must already be dropped, otherwise
    /// this waits for them.
    pub async fn close(self) -> Result<()> {
        drop(self.input);
        match self.worker.await {
            Ok(()) => {
                debug!("Producer worker stopped");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Producer worker ended abnormally");
                Err(ProxyError::Producer(format!("worker task failed: {}", e)))
            }
        }
    }
}

/// Builds an [`AsyncProducer`] for the configured brokers.
pub trait ProducerConnect: Send + Sync + 'static {
    fn connect<'a>(&'a self, config: &'a ConnectorConfig) -> OpenFuture<'a, AsyncProducer>;
}
