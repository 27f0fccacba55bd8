use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

use crate::core::Channel;

/// Control message kinds exchanged during a channel switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum MessageKind {
    /// A node asks its neighbor to move the subtree to a new channel
    ChannelChange,
    /// Announcement of the sender's new channel
    NeighborChannelChange,
    /// Request for a probe burst back to the sender
    StartProbe,
    /// One probe of a burst
    NeighborProbe,
    /// Per-neighbor reception tally sent to the report sink
    ProbeResult,
    /// Commit request for the decided channel
    ConfirmChannel,
    /// Acknowledgment of a confirmation, echoed back once
    GetAck,
    /// Any kind code this node does not understand
    Unknown(u8),
}

impl MessageKind {
    /// Wire code of this kind
    pub fn code(&self) -> u8 {
        match self {
            MessageKind::ChannelChange => 0,
            MessageKind::NeighborChannelChange => 1,
            MessageKind::StartProbe => 2,
            MessageKind::NeighborProbe => 3,
            MessageKind::ProbeResult => 4,
            MessageKind::ConfirmChannel => 5,
            MessageKind::GetAck => 6,
            MessageKind::Unknown(code) => *code,
        }
    }
}

impl From<u8> for MessageKind {
    fn from(code: u8) -> Self {
        match code {
            0 => MessageKind::ChannelChange,
            1 => MessageKind::NeighborChannelChange,
            2 => MessageKind::StartProbe,
            3 => MessageKind::NeighborProbe,
            4 => MessageKind::ProbeResult,
            5 => MessageKind::ConfirmChannel,
            6 => MessageKind::GetAck,
            other => MessageKind::Unknown(other),
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        kind.code()
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Unknown(code) => write!(f, "Unknown({})", code),
            other => write!(f, "{:?}", other),
        }
    }
}

/// The single message shape used for every coordination exchange.
///
/// `kind` decides which of the other fields mean anything; receivers ignore
/// the rest. `aux` is the probe sequence number for `NeighborProbe`, the
/// reception count for `ProbeResult` and the repetition selector otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    /// Message kind
    pub kind: MessageKind,
    /// Candidate or confirmed channel
    pub channel: Channel,
    /// Kind-dependent secondary value
    pub aux: u8,
    /// Next hop currently addressed by a propagation walk. Local only.
    #[serde(skip)]
    pub target: Option<SocketAddr>,
    /// Neighbor a `ProbeResult` is about
    pub address: Option<SocketAddr>,
}

impl ControlMessage {
    /// Creates a message of `kind` carrying `channel`
    pub fn new(kind: MessageKind, channel: Channel) -> Self {
        ControlMessage {
            kind,
            channel,
            aux: 0,
            target: None,
            address: None,
        }
    }

    /// Sets the secondary value
    pub fn with_aux(mut self, aux: u8) -> Self {
        self.aux = aux;
        self
    }

    /// Sets the next hop being addressed
    pub fn with_target(mut self, target: SocketAddr) -> Self {
        self.target = Some(target);
        self
    }

    /// A channel change request asking the receiver to announce and probe
    pub fn channel_change(channel: Channel) -> Self {
        ControlMessage::new(MessageKind::ChannelChange, channel).with_aux(1)
    }

    /// Probe number `seq` of a burst on `channel`
    pub fn neighbor_probe(channel: Channel, seq: u8) -> Self {
        ControlMessage::new(MessageKind::NeighborProbe, channel).with_aux(seq)
    }

    /// Reception tally for `neighbor` on `channel`
    pub fn probe_result(neighbor: SocketAddr, channel: Channel, receptions: u8) -> Self {
        ControlMessage {
            kind: MessageKind::ProbeResult,
            channel,
            aux: receptions,
            target: None,
            address: Some(neighbor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes() {
        for code in 0..=6u8 {
            let kind = MessageKind::from(code);
            assert!(!matches!(kind, MessageKind::Unknown(_)));
            assert_eq!(kind.code(), code);
        }
        assert_eq!(MessageKind::from(42), MessageKind::Unknown(42));
        assert_eq!(u8::from(MessageKind::GetAck), 6);
    }

    #[test]
    fn test_message_creation() {
        let neighbor: SocketAddr = "[fe80::212:7402:2:202]:1234".parse().unwrap();

        let probe = ControlMessage::neighbor_probe(Channel(15), 3);
        assert_eq!(probe.kind, MessageKind::NeighborProbe);
        assert_eq!(probe.aux, 3);
        assert!(probe.address.is_none());

        let result = ControlMessage::probe_result(neighbor, Channel(15), 7);
        assert_eq!(result.kind, MessageKind::ProbeResult);
        assert_eq!(result.address, Some(neighbor));
        assert_eq!(result.aux, 7);

        let change = ControlMessage::channel_change(Channel(20));
        assert_eq!(change.aux, 1);
    }

    #[test]
    fn test_target_stays_local() {
        let next_hop: SocketAddr = "[fe80::1]:1234".parse().unwrap();
        let msg = ControlMessage::new(MessageKind::StartProbe, Channel(11)).with_target(next_hop);

        let encoded = bincode::serialize(&msg).unwrap();
        let decoded: ControlMessage = bincode::deserialize(&encoded).unwrap();

        assert_eq!(decoded.kind, MessageKind::StartProbe);
        assert_eq!(decoded.channel, Channel(11));
        assert_eq!(decoded.target, None);
    }

    #[test]
    fn test_unknown_kind_survives_decoding() {
        let mut msg = ControlMessage::new(MessageKind::Unknown(9), Channel(11));
        msg.aux = 2;

        let encoded = bincode::serialize(&msg).unwrap();
        assert_eq!(encoded[0], 9);

        let decoded: ControlMessage = bincode::deserialize(&encoded).unwrap();
        assert_eq!(decoded.kind, MessageKind::Unknown(9));
    }
}
