// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry backoff for the remote producer.
//!
//! The producer asks [`BackoffPolicy::delay`] how long to wait before retry
//! `attempt` (0-indexed) out of `max_attempts`.
//!
//! # Modes
//!
//! | Mode | Delay |
//! |------|-------|
//! | [`BackoffMode::Linear`] | `min(base * (attempt + 1), max)` |
//! | [`BackoffMode::AlwaysMax`] | `max`, whatever the attempt |
//!
//! `AlwaysMax` reproduces the schedule of the producer this proxy replaced:
//! it computed a linear step and then returned the ceiling anyway. `Linear`
//! is the default.
//!
//! # Example
//!
//! ```rust
//! use kv_proxy::resilience::{BackoffMode, BackoffPolicy};
//! use std::time::Duration;
//!
//! let policy = BackoffPolicy {
//!     base: Duration::from_millis(100),
//!     max: Duration::from_millis(250),
//!     mode: BackoffMode::Linear,
//! };
//! assert_eq!(policy.delay(0, 3), Duration::from_millis(100));
//! assert_eq!(policy.delay(1, 3), Duration::from_millis(200));
//! assert_eq!(policy.delay(2, 3), Duration::from_millis(250));
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the retry delay grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffMode {
    /// Grow by `base` per attempt, capped at `max`.
    #[default]
    Linear,
    /// Always wait `max`.
    AlwaysMax,
}

/// Retry backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Step added per attempt.
    pub base: Duration,
    /// Ceiling.
    pub max: Duration,
    pub mode: BackoffMode,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            max: Duration::from_secs(1),
            mode: BackoffMode::Linear,
        }
    }
}

impl BackoffPolicy {
    /// Fast policy for tests.
    pub fn testing() -> Self {
        Self {
            base: Duration::from_millis(5),
            max: Duration::from_millis(20),
            mode: BackoffMode::Linear,
        }
    }

    /// Delay before retry `attempt` (0-indexed).
    ///
    /// The attempt ceiling is passed through by broker clients; neither
    /// mode depends on it.
    pub fn delay(&self, attempt: u32, _max_attempts: u32) -> Duration {
        match self.mode {
            BackoffMode::AlwaysMax => self.max,
            BackoffMode::Linear => {
                let step = self.base.saturating_mul(attempt.saturating_add(1));
                step.min(self.max)
            }
        }
    }
}
