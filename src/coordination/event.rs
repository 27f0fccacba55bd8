use std::fmt;
use std::net::SocketAddr;

use crate::core::Channel;
use crate::protocol::MessageKind;

/// Internal events consumed by the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinationEvent {
    /// Walk `channel` out to the tree.
    ///
    /// `trigger` is the kind that started the walk and picks the follow-up:
    /// `NeighborChannelChange` or `StartProbe` lead to a probe report,
    /// `ConfirmChannel` leads to an acknowledgment check. `repeat` is the
    /// repetition bound of the walk.
    Propagate {
        /// Kind that started the walk
        trigger: MessageKind,
        /// Channel being propagated
        channel: Channel,
        /// Repetition bound, 0 or 1
        repeat: u8,
    },
    /// Answer a start-probe request from `address` with a probe burst
    NeighborProbe {
        /// Neighbor that asked for the burst
        address: SocketAddr,
    },
    /// Acknowledge a confirmation of `channel` from `address`
    GetAck {
        /// Neighbor that sent the confirmation
        address: SocketAddr,
        /// Confirmed channel
        channel: Channel,
    },
}

impl CoordinationEvent {
    /// Walk started by a channel change: announce, then probe
    pub fn channel_change(channel: Channel) -> Self {
        CoordinationEvent::Propagate {
            trigger: MessageKind::NeighborChannelChange,
            channel,
            repeat: 1,
        }
    }

    /// Walk confirming a decided channel
    pub fn confirm(channel: Channel) -> Self {
        CoordinationEvent::Propagate {
            trigger: MessageKind::ConfirmChannel,
            channel,
            repeat: 0,
        }
    }

    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            CoordinationEvent::Propagate { trigger, .. } => match trigger {
                MessageKind::NeighborChannelChange => "NeighborChannelChange",
                MessageKind::StartProbe => "StartProbe",
                MessageKind::ConfirmChannel => "ConfirmChannel",
                _ => "Propagate",
            },
            CoordinationEvent::NeighborProbe { .. } => "NeighborProbe",
            CoordinationEvent::GetAck { .. } => "GetAck",
        }
    }
}

impl fmt::Display for CoordinationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinationEvent::Propagate { channel, repeat, .. } => {
                write!(f, "{}(channel={}, repeat={})", self.name(), channel, repeat)
            }
            CoordinationEvent::NeighborProbe { address } => {
                write!(f, "NeighborProbe({})", address)
            }
            CoordinationEvent::GetAck { address, channel } => {
                write!(f, "GetAck({}, channel={})", address, channel)
            }
        }
    }
}

/// Coordinator phase, published for observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the next event
    Idle,
    /// Running a propagation walk
    Propagating,
    /// Reporting probe results and deciding the channel
    AwaitingProbeReport,
    /// Checking and retrying unacknowledged confirmations
    AwaitingConfirmAck,
    /// Sending a probe burst
    Probing,
    /// Echoing an acknowledgment
    Acknowledging,
}
