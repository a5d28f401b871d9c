// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the proxy.
//!
//! Errors are grouped by the layer that raised them (registry, facade,
//! backend, durable queue, remote producer) and carry enough context to be
//! logged once and understood without the surrounding call stack.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `NotRegistered` | No | Driver name unknown when building a `Store` |
//! | `AlreadyRegistered` | No | Same driver name registered twice |
//! | `NotAvailable` | Yes | Backend or connector not (yet) open |
//! | `BackendNotOpen` | Yes | Health probe before the backend opened |
//! | `InvalidPayload` | No | Malformed compare-and-put entry |
//! | `Backend` | Depends | Error reported by the storage backend |
//! | `Queue` | Yes | Local durable queue I/O failure |
//! | `Producer` | Yes | Remote producer rejected or dropped a message |
//! | `Redis` | Yes | Broker connection or command error |
//! | `Config` | No | Configuration invalid |
//! | `InvalidState` | No | Lifecycle violation (e.g. opening twice) |
//! | `AlreadyExists` | No | Refusing to overwrite an existing file |
//! | `Io` | No | Local filesystem error outside the queue |
//! | `Shutdown` | No | Component is closing |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Propagation
//!
//! Backend errors on write paths are logged and returned. Connector errors
//! are only ever logged: replication failure never fails a storage call.

use crate::backend::BackendError;
use thiserror::Error;

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Errors that can occur in the proxy.
///
/// Use [`is_retryable()`](Self::is_retryable) to decide whether a caller
/// should try again after a delay.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// A configured driver name has no registered factory.
    ///
    /// Raised while constructing a [`Store`](crate::facade::Store).
    /// Not retryable: fix the configuration or the registry.
    #[error("{kind} driver '{name}' is not registered")]
    NotRegistered { kind: DriverKind, name: String },

    /// A driver name was registered twice.
    ///
    /// Indicates a build or wiring defect. The process should not continue.
    #[error("{kind} driver '{name}' is already registered")]
    AlreadyRegistered { kind: DriverKind, name: String },

    /// The named dependency is not open (still opening, failed, or closed).
    ///
    /// Retryable after a delay.
    #[error("{0} is not available")]
    NotAvailable(String),

    /// Health probe found no open backend.
    #[error("backend is not open")]
    BackendNotOpen,

    /// Compare-and-put entry could not be decoded.
    ///
    /// Caller error, never retried.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Error reported by the storage backend, propagated unchanged.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Local durable queue failure (I/O, size limits, corruption).
    #[error("durable queue error: {0}")]
    Queue(String),

    /// Remote producer failure.
    #[error("producer error: {0}")]
    Producer(String),

    /// Redis connection or command error.
    #[error("Redis error ({operation}): {message}")]
    Redis {
        operation: String,
        message: String,
        #[source]
        source: Option<redis::RedisError>,
    },

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Lifecycle violation.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Refusing to overwrite an existing path.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Local filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Component is shutting down.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Which driver table an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Backend,
    Connector,
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverKind::Backend => write!(f, "backend"),
            DriverKind::Connector => write!(f, "connector"),
        }
    }
}

impl ProxyError {
    /// Create a Redis error from a redis::RedisError
    pub fn redis(operation: impl Into<String>, source: redis::RedisError) -> Self {
        Self::Redis {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a Redis error without source
    pub fn redis_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Redis {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotAvailable(_) => true, // Dependency may still be opening
            Self::BackendNotOpen => true,
            Self::Backend(e) => e.is_retryable(),
            Self::Queue(_) => true,
            Self::Producer(_) => true,
            Self::Redis { .. } => true,
            Self::NotRegistered { .. } => false,
            Self::AlreadyRegistered { .. } => false,
            Self::InvalidPayload(_) => false,
            Self::Config(_) => false,
            Self::InvalidState { .. } => false,
            Self::AlreadyExists(_) => false,
            Self::Io(_) => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }
}

impl From<redis::RedisError> for ProxyError {
    fn from(e: redis::RedisError) -> Self {
        Self::redis("unknown", e)
    }
}
