//! Connection pooling module
//!
//! This module provides:
//! - A fixed-size, round-robin channel pool per endpoint
//! - A lightweight lazily-populated single-channel pool
//! - Shared handle lifecycle tracking (state machine + access metrics)

pub mod fixed;
pub mod handle;
pub mod lazy;

pub use fixed::FixedChannelPool;
pub use handle::{ChannelState, ConnectionHandle, ConnectionMetrics};
pub use lazy::LazyChannelPool;
