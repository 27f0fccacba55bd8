//! Core types for channel switch coordination
//!
//! This module contains the error type, configuration and the per-node
//! channel state shared by the rest of the library.

pub mod error;
pub mod serde;
pub mod types;

pub use self::error::{Error, Result};
pub use self::types::{Channel, Config, NodeChannelState, QuorumRule, Timing};

/// Default UDP port for coordination traffic
pub const DEFAULT_PORT: u16 = 1234;

/// Channel a node starts on when nothing else is configured
pub const DEFAULT_CHANNEL: u8 = 26;

/// Number of neighbors the probe table can track at once
pub const PROBE_TABLE_CAPACITY: usize = 5;

/// Probes sent in one burst
pub const PROBE_BURST_LEN: u8 = 8;

/// Largest probe table a node accepts
pub const MAX_PROBE_CAPACITY: usize = 255;

/// Largest coordinator event queue a node accepts
pub const MAX_EVENT_QUEUE: usize = 4096;
