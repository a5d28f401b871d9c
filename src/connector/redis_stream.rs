// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote producer publishing to a Redis stream.
//!
//! Each [`ProducerMessage`] becomes one entry on the stream named by its
//! topic:
//!
//! ```text
//! XADD <topic> * key <key bytes> value <value bytes>
//! ```
//!
//! # Acknowledgements
//!
//! | `required_acks` | Behaviour |
//! |-----------------|-----------|
//! | `no_response` | One attempt, failures only logged at debug |
//! | `wait_for_local` | XADD reply required; retried with backoff |
//! | `wait_for_all` | Also `WAIT 1 <write_timeout>` for a replica |
//!
//! A message that still fails after `retry` retries is reported on the
//! producer's error stream.

use super::producer::{AsyncProducer, ProducerConnect, ProducerError, ProducerMessage};
use crate::config::{ConnectorConfig, RequiredAcks};
use crate::error::{ProxyError, Result};
use crate::metrics;
use crate::registry::OpenFuture;
use crate::resilience::BackoffPolicy;
use redis::aio::ConnectionManager;
use redis::Client;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Per-broker connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connects to the first reachable broker in `broker_list`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisStreamConnect;

impl ProducerConnect for RedisStreamConnect {
    fn connect<'a>(&'a self, config: &'a ConnectorConfig) -> OpenFuture<'a, AsyncProducer> {
        Box::pin(async move {
            let mut conn = connect_first(&config.broker_list).await?;
            if config.fetch_metadata {
                check_topic(&mut conn, &config.topic).await?;
            }

            let publisher = StreamPublisher {
                conn,
                acks: config.required_acks,
                retry: config.retry,
                backoff: config.backoff_policy(),
                replica_timeout: config.write_timeout_duration(),
            };

            let (input_tx, input_rx) = mpsc::channel(config.producer_buffer);
            let (err_tx, err_rx) = mpsc::channel(config.producer_buffer);
            let worker = tokio::spawn(publisher.run(input_rx, err_tx));

            info!(topic = %config.topic, acks = ?config.required_acks, "Redis stream producer started");
            Ok(AsyncProducer::from_parts(input_tx, err_rx, worker))
        })
    }
}

async fn connect_first(brokers: &[String]) -> Result<ConnectionManager> {
    if brokers.is_empty() {
        return Err(ProxyError::Config("broker_list is empty".into()));
    }

    let mut last_error = String::new();
    for url in brokers {
        let client = match Client::open(url.as_str()) {
            Ok(c) => c,
            Err(e) => {
                warn!(broker = %url, error = %e, "Invalid broker URL");
                last_error = format!("{}: {}", url, e);
                continue;
            }
        };

        match timeout(CONNECT_TIMEOUT, client.get_connection_manager()).await {
            Ok(Ok(conn)) => {
                info!(broker = %url, "Connected to broker");
                return Ok(conn);
            }
            Ok(Err(e)) => {
                warn!(broker = %url, error = %e, "Broker connection failed");
                last_error = format!("{}: {}", url, e);
            }
            Err(_) => {
                warn!(broker = %url, timeout_ms = CONNECT_TIMEOUT.as_millis(), "Broker connection timed out");
                last_error = format!("{}: timed out", url);
            }
        }
    }

    Err(ProxyError::redis_msg(
        "connect",
        format!("no reachable broker (last: {})", last_error),
    ))
}

/// Refuse a topic key that exists but is not a stream.
async fn check_topic(conn: &mut ConnectionManager, topic: &str) -> Result<()> {
    let kind: String = redis::cmd("TYPE")
        .arg(topic)
        .query_async(conn)
        .await
        .map_err(|e| ProxyError::redis("TYPE", e))?;

    match kind.as_str() {
        "none" | "stream" => {
            debug!(topic, kind = %kind, "Topic metadata ok");
            Ok(())
        }
        other => Err(ProxyError::Config(format!(
            "topic '{}' exists with type '{}', expected a stream",
            topic, other
        ))),
    }
}

fn xadd_cmd(msg: &ProducerMessage) -> redis::Cmd {
    let mut cmd = redis::cmd("XADD");
    cmd.arg(&msg.topic)
        .arg("*")
        .arg("key")
        .arg(&msg.key)
        .arg("value")
        .arg(&msg.value);
    cmd
}

struct StreamPublisher {
    conn: ConnectionManager,
    acks: RequiredAcks,
    retry: u32,
    backoff: BackoffPolicy,
    replica_timeout: Duration,
}

impl StreamPublisher {
    async fn run(
        mut self,
        mut input: mpsc::Receiver<ProducerMessage>,
        errors: mpsc::Sender<ProducerError>,
    ) {
        while let Some(msg) = input.recv().await {
            if self.acks == RequiredAcks::NoResponse {
                if let Err(e) = self.publish_once(&msg).await {
                    debug!(topic = %msg.topic, error = %e, "Unacknowledged publish failed");
                }
                continue;
            }

            if let Err(error) = self.publish_with_retry(&msg).await {
                // Receiver gone means the connector is shutting down.
                if errors.send(ProducerError { message: msg, error }).await.is_err() {
                    debug!("Producer error stream closed");
                }
            }
        }
        debug!("Producer input closed");
    }

    async fn publish_with_retry(&mut self, msg: &ProducerMessage) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.publish_once(msg).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= self.retry => return Err(e),
                Err(e) => {
                    let delay = self.backoff.delay(attempt, self.retry);
                    warn!(
                        topic = %msg.topic,
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Publish failed, retrying"
                    );
                    metrics::record_publish_retry();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn publish_once(&mut self, msg: &ProducerMessage) -> Result<()> {
        let start = Instant::now();
        let result = self.xadd(msg).await;
        metrics::record_publish(result.is_ok(), start.elapsed());
        result
    }

    async fn xadd(&mut self, msg: &ProducerMessage) -> Result<()> {
        let _id: String = xadd_cmd(msg)
            .query_async(&mut self.conn)
            .await
            .map_err(|e| ProxyError::redis("XADD", e))?;

        if self.acks == RequiredAcks::WaitForAll {
            let replicas: i64 = redis::cmd("WAIT")
                .arg(1)
                .arg(self.replica_timeout.as_millis() as u64)
                .query_async(&mut self.conn)
                .await
                .map_err(|e| ProxyError::redis("WAIT", e))?;
            if replicas < 1 {
                return Err(ProxyError::redis_msg("WAIT", "no replica acknowledged the write"));
            }
        }
        Ok(())
    }
}
