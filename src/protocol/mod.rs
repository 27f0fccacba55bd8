//! Protocol implementation module
//!
//! This module defines the coordination control message and its
//! datagram framing.

pub mod codec;
pub mod message;

pub use self::codec::ControlCodec;
pub use self::message::{ControlMessage, MessageKind};

/// Shortest frame the radio MAC sends efficiently; shorter frames are padded
pub const MIN_FRAME_LEN: usize = 43;

/// Largest body accepted by the decoder
pub const MAX_FRAME_LEN: usize = 1024;

/// Size of the body length prefix
pub const LENGTH_PREFIX_LEN: usize = 4;
