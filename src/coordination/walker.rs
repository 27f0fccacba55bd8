use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use super::aggregator::SharedProbes;
use crate::core::{Channel, NodeChannelState, Timing};
use crate::network::{Neighbor, Topology, Transport};
use crate::protocol::{ControlMessage, MessageKind};

/// One sweep of a propagation walk.
///
/// A walk with repetition bound `y` runs the sweeps for `x` in `0..=y`;
/// each `(y, x)` pair maps to exactly one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// `(1, 0)`: announce the new channel
    Announce,
    /// `(1, 1)`: ask each neighbor for a probe burst
    StartProbe,
    /// `(0, 0)`: confirm the channel to neighbors that have not acknowledged
    Confirm,
}

impl Pass {
    /// Pass for repetition bound `y` and index `x`
    pub fn derive(y: u8, x: u8) -> Option<Pass> {
        match (y, x) {
            (1, 0) => Some(Pass::Announce),
            (1, 1) => Some(Pass::StartProbe),
            (0, 0) => Some(Pass::Confirm),
            _ => None,
        }
    }

    /// Passes run by a walk with repetition bound `y`
    pub fn sequence(y: u8) -> impl Iterator<Item = Pass> {
        (0..=y).filter_map(move |x| Pass::derive(y, x))
    }

    /// Kind of message sent during this pass
    pub fn kind(&self) -> MessageKind {
        match self {
            Pass::Announce => MessageKind::NeighborChannelChange,
            Pass::StartProbe => MessageKind::StartProbe,
            Pass::Confirm => MessageKind::ConfirmChannel,
        }
    }

    /// Wait after each send of this pass
    pub fn settle(&self, timing: &Timing) -> Duration {
        match self {
            Pass::Announce => timing.announce,
            Pass::StartProbe => timing.start_probe,
            Pass::Confirm => timing.confirm,
        }
    }
}

/// Counters from one walk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkReport {
    /// Frames handed to the transport
    pub sent: usize,
    /// Confirmations skipped because the neighbor already acknowledged
    pub suppressed: usize,
    /// Sends the transport refused
    pub failed: usize,
}

/// Fans a channel out to every tree neighbor and then to the parent
pub struct PropagationWalker<T, R> {
    transport: Arc<T>,
    topology: Arc<R>,
    probes: SharedProbes,
    timing: Timing,
    root: Option<SocketAddr>,
}

impl<T: Transport, R: Topology> PropagationWalker<T, R> {
    /// Creates a walker; `root` is the default-route value meaning the node
    /// has no parent to notify
    pub fn new(
        transport: Arc<T>,
        topology: Arc<R>,
        probes: SharedProbes,
        timing: Timing,
        root: Option<SocketAddr>,
    ) -> Self {
        PropagationWalker {
            transport,
            topology,
            probes,
            timing,
            root,
        }
    }

    /// Walks `channel` out with repetition bound `y`.
    ///
    /// Every distinct next hop gets one send per pass, each followed by the
    /// pass's wait; the channel is committed to `state` after each wait.
    /// The parent is walked afterwards with the same passes unless it is the
    /// root address.
    pub async fn walk(&self, channel: Channel, y: u8, state: &mut NodeChannelState) -> WalkReport {
        let mut report = WalkReport::default();

        for pass in Pass::sequence(y) {
            let mut visited: Vec<SocketAddr> = Vec::new();
            for neighbor in self.topology.neighbors() {
                // Several routes can share a next hop
                if visited.contains(&neighbor.address) {
                    continue;
                }
                visited.push(neighbor.address);
                self.step(pass, y, channel, neighbor, state, &mut report).await;
            }
        }

        match self.topology.parent() {
            Some(parent) if Some(parent.address) != self.root => {
                for pass in Pass::sequence(y) {
                    self.step(pass, y, channel, parent, state, &mut report).await;
                }
            }
            _ => debug!("no parent to notify"),
        }

        report
    }

    async fn step(
        &self,
        pass: Pass,
        y: u8,
        channel: Channel,
        neighbor: Neighbor,
        state: &mut NodeChannelState,
        report: &mut WalkReport,
    ) {
        if pass == Pass::Confirm && !self.awaits_confirmation(neighbor.address) {
            debug!(neighbor = %neighbor.address, "confirmation suppressed");
            report.suppressed += 1;
            return;
        }

        let message = ControlMessage::new(pass.kind(), channel)
            .with_aux(y)
            .with_target(neighbor.address);
        debug!(
            kind = %message.kind,
            %channel,
            neighbor = %neighbor.address,
            neighbor_channel = ?neighbor.channel,
            "propagating"
        );

        match self.transport.send(&message, neighbor.address) {
            Ok(()) => report.sent += 1,
            Err(e) => {
                warn!(neighbor = %neighbor.address, error = %e, "propagation send failed");
                report.failed += 1;
            }
        }

        sleep(pass.settle(&self.timing)).await;
        state.commit(channel);
    }

    fn awaits_confirmation(&self, neighbor: SocketAddr) -> bool {
        self.probes
            .with(|t| t.record(neighbor).map_or(false, |r| !r.acknowledged))
    }
}
