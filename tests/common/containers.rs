// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Testcontainers setup for Redis.
//!
//! Provides a throwaway Redis broker for the stream producer tests.

use redis::streams::StreamRangeReply;
use redis::AsyncCommands;
use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

/// Create a vanilla Redis container (streams-compatible).
///
/// Uses official redis:7 image. Waits for "Ready to accept connections".
pub fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

/// Get the Redis URL for a container.
pub fn redis_url(container: &Container<'_, GenericImage>) -> String {
    let port = container.get_host_port_ipv4(6379);
    format!("redis://127.0.0.1:{}", port)
}

/// A Redis broker with helpers for inspecting published topics.
pub struct TestBroker<'a> {
    #[allow(dead_code)] // Kept alive for container lifetime
    container: Container<'a, GenericImage>,
    pub url: String,
}

impl<'a> TestBroker<'a> {
    pub fn new(docker: &'a Cli) -> Self {
        let container = redis_container(docker);
        let url = redis_url(&container);
        Self { container, url }
    }

    async fn conn(&self) -> redis::RedisResult<redis::aio::MultiplexedConnection> {
        let client = redis::Client::open(self.url.as_str())?;
        client.get_multiplexed_async_connection().await
    }

    /// All `(key, value)` pairs published to `topic`, oldest first.
    pub async fn read_topic(&self, topic: &str) -> redis::RedisResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut conn = self.conn().await?;
        let reply: StreamRangeReply = conn.xrange_all(topic).await?;
        Ok(reply
            .ids
            .iter()
            .map(|entry| {
                let key: Vec<u8> = entry.get("key").unwrap_or_default();
                let value: Vec<u8> = entry.get("value").unwrap_or_default();
                (key, value)
            })
            .collect())
    }

    /// Occupy `topic` with a plain string so it is not a valid stream.
    pub async fn poison_topic(&self, topic: &str) -> redis::RedisResult<()> {
        let mut conn = self.conn().await?;
        conn.set(topic, "not-a-stream").await
    }
}
