//! Network collaborators
//!
//! The coordinator talks to the outside world through two traits: a
//! best-effort datagram [`Transport`] and a [`Topology`] view of the routing
//! tree. This module also ships a UDP transport, a static routing table and
//! an in-memory network for simulations.

pub mod memory;
pub mod topology;
pub mod udp;

pub use self::memory::{Frame, MemoryNetwork, MemoryTransport};
pub use self::topology::StaticTopology;
pub use self::udp::UdpTransport;

use std::net::SocketAddr;

use crate::core::{Channel, Result};
use crate::protocol::ControlMessage;

/// Inbound frame handed to the dispatcher
pub type Inbound = (ControlMessage, SocketAddr);

/// Best-effort unicast datagram transport
pub trait Transport: Send + Sync + 'static {
    /// Queues `message` for `dest`. Never blocks and gives no delivery
    /// guarantee; an `Err` only means the frame could not even be queued.
    fn send(&self, message: &ControlMessage, dest: SocketAddr) -> Result<()>;
}

/// A tree neighbor as seen through the routing table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbor {
    /// Next-hop address
    pub address: SocketAddr,
    /// Last known channel of the neighbor
    pub channel: Option<Channel>,
}

/// Read and annotate access to the routing tree
pub trait Topology: Send + Sync + 'static {
    /// Next hops of every route, in routing-table order. A next hop shows up
    /// once per route through it.
    fn neighbors(&self) -> Vec<Neighbor>;

    /// Current default-route neighbor
    fn parent(&self) -> Option<Neighbor>;

    /// Records `channel` as the last known channel of `neighbor`
    fn update_annotation(&self, neighbor: SocketAddr, channel: Channel);
}
