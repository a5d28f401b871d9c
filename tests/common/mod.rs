//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - Redis testcontainer setup
//! - Recording backend and connector drivers
//! - Gated producers and failing queues for fault injection

#![allow(dead_code)]

pub mod containers;
pub mod mocks;

#[allow(unused_imports)]
pub use containers::*;
pub use mocks::*;
