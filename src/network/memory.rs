use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::BytesMut;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

use super::{Inbound, Transport};
use crate::core::{Error, Result};
use crate::protocol::{ControlCodec, ControlMessage, MessageKind};

/// One frame offered to the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Sending node
    pub from: SocketAddr,
    /// Destination node
    pub to: SocketAddr,
    /// Kind of the message carried
    pub kind: MessageKind,
    /// Whether it reached the destination queue
    pub delivered: bool,
}

struct Shared {
    nodes: HashMap<SocketAddr, mpsc::Sender<Inbound>>,
    blocked: HashSet<(SocketAddr, SocketAddr, Option<MessageKind>)>,
    loss: f64,
    rng: StdRng,
    frames: Vec<Frame>,
}

impl Shared {
    fn dropped(&mut self, from: SocketAddr, to: SocketAddr, kind: MessageKind) -> bool {
        if self.blocked.contains(&(from, to, None))
            || self.blocked.contains(&(from, to, Some(kind)))
        {
            return true;
        }
        self.loss > 0.0 && self.rng.gen_bool(self.loss)
    }
}

/// In-process datagram network for simulating several nodes.
///
/// Frames go through [`ControlCodec`] on the way, so only what survives the
/// wire format arrives. Delivery is best-effort: blocked links, random loss
/// and full receive queues all drop frames silently.
#[derive(Clone)]
pub struct MemoryNetwork {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryNetwork {
    /// Creates a lossless network
    pub fn new() -> Self {
        Self::with_loss(0.0, 0)
    }

    /// Creates a network dropping each frame with `probability`, using a
    /// seeded generator so runs are repeatable
    pub fn with_loss(probability: f64, seed: u64) -> Self {
        MemoryNetwork {
            shared: Arc::new(Mutex::new(Shared {
                nodes: HashMap::new(),
                blocked: HashSet::new(),
                loss: probability.clamp(0.0, 1.0),
                rng: StdRng::seed_from_u64(seed),
                frames: Vec::new(),
            })),
        }
    }

    /// Attaches a node at `addr`, returning its transport and inbound queue
    pub fn attach(
        &self,
        addr: SocketAddr,
        capacity: usize,
    ) -> (MemoryTransport, mpsc::Receiver<Inbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        self.lock().nodes.insert(addr, tx);
        let transport = MemoryTransport {
            addr,
            network: self.clone(),
        };
        (transport, rx)
    }

    /// Drops every frame from `from` to `to`
    pub fn block(&self, from: SocketAddr, to: SocketAddr) {
        self.lock().blocked.insert((from, to, None));
    }

    /// Drops frames of `kind` from `from` to `to`
    pub fn block_kind(&self, from: SocketAddr, to: SocketAddr, kind: MessageKind) {
        self.lock().blocked.insert((from, to, Some(kind)));
    }

    /// Every frame offered so far
    pub fn frames(&self) -> Vec<Frame> {
        self.lock().frames.clone()
    }

    /// Delivered frames of `kind` between two nodes
    pub fn delivered(&self, from: SocketAddr, to: SocketAddr, kind: MessageKind) -> usize {
        self.lock()
            .frames
            .iter()
            .filter(|f| f.delivered && f.from == from && f.to == to && f.kind == kind)
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn carry(&self, from: SocketAddr, to: SocketAddr, message: &ControlMessage) -> Result<()> {
        let mut codec = ControlCodec::new();
        let mut wire = BytesMut::new();
        codec.encode(message.clone(), &mut wire)?;
        let received = codec
            .decode(&mut wire)?
            .ok_or_else(|| Error::protocol("frame did not survive encoding"))?;

        let mut shared = self.lock();
        let delivered = if shared.dropped(from, to, message.kind) {
            trace!(%from, %to, kind = %message.kind, "frame lost");
            false
        } else {
            match shared.nodes.get(&to) {
                Some(tx) => tx.try_send((received, from)).is_ok(),
                None => {
                    debug!(%to, "no node at destination");
                    false
                }
            }
        };
        shared.frames.push(Frame {
            from,
            to,
            kind: message.kind,
            delivered,
        });
        Ok(())
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// A node's attachment to a [`MemoryNetwork`]
#[derive(Clone)]
pub struct MemoryTransport {
    addr: SocketAddr,
    network: MemoryNetwork,
}

impl MemoryTransport {
    /// Address of the attached node
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Transport for MemoryTransport {
    fn send(&self, message: &ControlMessage, dest: SocketAddr) -> Result<()> {
        self.network.carry(self.addr, dest, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Channel;
    use crate::testing::node;

    #[tokio::test]
    async fn test_frames_delivered_through_codec() {
        let net = MemoryNetwork::new();
        let (a, _) = net.attach(node(1), 8);
        let (_, mut inbox) = net.attach(node(2), 8);

        let msg = ControlMessage::new(MessageKind::StartProbe, Channel(15)).with_target(node(2));
        a.send(&msg, node(2)).unwrap();

        let (received, from) = inbox.recv().await.unwrap();
        assert_eq!(from, node(1));
        assert_eq!(received.kind, MessageKind::StartProbe);
        assert_eq!(received.target, None);
        assert_eq!(net.delivered(node(1), node(2), MessageKind::StartProbe), 1);
    }

    #[tokio::test]
    async fn test_blocked_links() {
        let net = MemoryNetwork::new();
        let (a, _) = net.attach(node(1), 8);
        let (_, mut inbox) = net.attach(node(2), 8);
        net.block_kind(node(1), node(2), MessageKind::GetAck);

        a.send(&ControlMessage::new(MessageKind::GetAck, Channel(15)), node(2)).unwrap();
        a.send(&ControlMessage::neighbor_probe(Channel(15), 1), node(2)).unwrap();

        let (received, _) = inbox.recv().await.unwrap();
        assert_eq!(received.kind, MessageKind::NeighborProbe);
        assert!(inbox.try_recv().is_err());

        net.block(node(1), node(2));
        a.send(&ControlMessage::neighbor_probe(Channel(15), 2), node(2)).unwrap();
        assert!(inbox.try_recv().is_err());

        let frames = net.frames();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames.iter().filter(|f| f.delivered).count(), 1);
    }

    #[tokio::test]
    async fn test_total_loss_and_unknown_destination() {
        let net = MemoryNetwork::with_loss(1.0, 7);
        let (a, _) = net.attach(node(1), 8);
        let (_, mut inbox) = net.attach(node(2), 8);

        for seq in 1..=8 {
            a.send(&ControlMessage::neighbor_probe(Channel(15), seq), node(2)).unwrap();
        }
        a.send(&ControlMessage::neighbor_probe(Channel(15), 9), node(9)).unwrap();

        assert!(inbox.try_recv().is_err());
        assert!(net.frames().iter().all(|f| !f.delivered));
    }

    #[tokio::test]
    async fn test_partial_loss_is_repeatable() {
        let run = |seed| {
            let net = MemoryNetwork::with_loss(0.5, seed);
            let (a, _) = net.attach(node(1), 64);
            let (_, _inbox) = net.attach(node(2), 64);
            for seq in 1..=32 {
                a.send(&ControlMessage::neighbor_probe(Channel(15), seq), node(2)).unwrap();
            }
            net.frames().iter().map(|f| f.delivered).collect::<Vec<_>>()
        };

        assert_eq!(run(42), run(42));
    }
}
