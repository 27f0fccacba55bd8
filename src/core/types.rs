use std::fmt;
use std::net::{Ipv6Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Error, Result, MAX_EVENT_QUEUE, MAX_PROBE_CAPACITY};

/// A radio channel number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Channel(pub u8);

impl Channel {
    /// Returns the raw channel number
    pub fn number(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for Channel {
    fn from(n: u8) -> Self {
        Channel(n)
    }
}

/// The channel a node is on, and the one it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeChannelState {
    /// Channel most recently committed
    pub current: Channel,
    /// Channel committed before `current`
    pub previous: Channel,
}

impl NodeChannelState {
    /// Creates a state sitting on a single channel
    pub fn new(initial: Channel) -> Self {
        NodeChannelState {
            current: initial,
            previous: initial,
        }
    }

    /// Records `channel` as current.
    ///
    /// The prior current channel becomes `previous` only when the channel
    /// actually changes, so repeated commits of the same value keep the
    /// fallback intact.
    pub fn commit(&mut self, channel: Channel) {
        if channel != self.current {
            self.previous = self.current;
            self.current = channel;
        }
    }
}

/// Rule used to choose between the current and previous channel from a
/// probe tally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum QuorumRule {
    /// `average >= average / 2`, kept for compatibility with deployed nodes.
    /// Holds for every non-empty tally.
    Literal,
    /// Keep the current channel when the average reception count per
    /// neighbor reaches `min_average`
    Threshold {
        /// Minimum average receptions per probed neighbor
        min_average: u32,
    },
}

impl QuorumRule {
    /// Returns `Some(true)` to keep the current channel, `Some(false)` to fall
    /// back, or `None` when there is nothing to decide on.
    pub fn prefers_current(&self, total: u32, count: u32) -> Option<bool> {
        if count == 0 {
            return None;
        }
        let average = total / count;
        Some(match self {
            QuorumRule::Literal => average >= average / 2,
            QuorumRule::Threshold { min_average } => average >= *min_average,
        })
    }

    /// Picks a channel from `state` for the given tally
    pub fn decide(&self, total: u32, count: u32, state: &NodeChannelState) -> Option<Channel> {
        self.prefers_current(total, count).map(|keep| {
            if keep {
                state.current
            } else {
                state.previous
            }
        })
    }
}

impl Default for QuorumRule {
    fn default() -> Self {
        QuorumRule::Literal
    }
}

/// Fixed waits used by the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timing {
    /// Wait after each channel announcement
    #[serde(serialize_with = "super::serde::serialize_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_millis")]
    pub announce: Duration,
    /// Wait after each start-probe request, long enough for the full burst
    #[serde(serialize_with = "super::serde::serialize_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_millis")]
    pub start_probe: Duration,
    /// Wait after each channel confirmation
    #[serde(serialize_with = "super::serde::serialize_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_millis")]
    pub confirm: Duration,
    /// Wait before answering a start-probe request with a burst
    #[serde(serialize_with = "super::serde::serialize_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_millis")]
    pub probe_settle: Duration,
    /// Wait after a probe burst so the last frames leave the radio
    #[serde(serialize_with = "super::serde::serialize_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_millis")]
    pub probe_drain: Duration,
    /// Wait before echoing an acknowledgment
    #[serde(serialize_with = "super::serde::serialize_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_millis")]
    pub ack_echo: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            announce: Duration::from_millis(150),
            start_probe: Duration::from_millis(1000),
            confirm: Duration::from_millis(500),
            probe_settle: Duration::from_millis(125),
            probe_drain: Duration::from_millis(150),
            ack_echo: Duration::from_millis(150),
        }
    }
}

/// Configuration for a channel switch node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Local address to bind to
    pub bind_addr: SocketAddr,
    /// Where probe results are reported
    pub report_addr: Option<SocketAddr>,
    /// Default route value meaning "this node is the root"
    pub root_addr: Option<SocketAddr>,
    /// Channel the node starts on
    pub initial_channel: Channel,
    /// Maximum number of neighbors tracked by the probe table
    pub probe_capacity: usize,
    /// Number of probes sent per burst
    pub probe_burst: u8,
    /// Confirmation resends per round
    pub max_confirm_retries: u32,
    /// Channel decision rule
    #[serde(default)]
    pub quorum: QuorumRule,
    /// Depth of the coordinator event queue
    pub event_queue: usize,
    /// Coordinator waits
    #[serde(default)]
    pub timing: Timing,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: SocketAddr::from((Ipv6Addr::UNSPECIFIED, super::DEFAULT_PORT)),
            report_addr: None,
            root_addr: None,
            initial_channel: Channel(super::DEFAULT_CHANNEL),
            probe_capacity: super::PROBE_TABLE_CAPACITY,
            probe_burst: super::PROBE_BURST_LEN,
            max_confirm_retries: 1,
            quorum: QuorumRule::Literal,
            event_queue: 32,
            timing: Timing::default(),
        }
    }
}

impl Config {
    /// Checks the configuration for values the coordinator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.probe_capacity == 0 || self.probe_capacity > MAX_PROBE_CAPACITY {
            return Err(Error::config(format!(
                "probe_capacity must be between 1 and {}",
                MAX_PROBE_CAPACITY
            )));
        }
        if self.probe_burst == 0 {
            return Err(Error::config("probe_burst must be at least 1"));
        }
        if self.event_queue == 0 || self.event_queue > MAX_EVENT_QUEUE {
            return Err(Error::config(format!(
                "event_queue must be between 1 and {}",
                MAX_EVENT_QUEUE
            )));
        }
        if self.report_addr == Some(self.bind_addr) {
            return Err(Error::config("report_addr must not be the node's own address"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_shifts_previous() {
        let mut state = NodeChannelState::new(Channel(26));
        state.commit(Channel(15));
        assert_eq!(state.current, Channel(15));
        assert_eq!(state.previous, Channel(26));

        // Same channel again keeps the fallback
        state.commit(Channel(15));
        assert_eq!(state.previous, Channel(26));

        state.commit(Channel(20));
        assert_eq!(state.current, Channel(20));
        assert_eq!(state.previous, Channel(15));
    }

    #[test]
    fn test_literal_rule_always_keeps_current() {
        let state = NodeChannelState {
            current: Channel(11),
            previous: Channel(26),
        };
        let rule = QuorumRule::Literal;
        assert_eq!(rule.decide(0, 3, &state), Some(Channel(11)));
        assert_eq!(rule.decide(1, 5, &state), Some(Channel(11)));
        assert_eq!(rule.decide(24, 3, &state), Some(Channel(11)));
        assert_eq!(rule.decide(24, 0, &state), None);
    }

    #[test]
    fn test_threshold_rule() {
        let state = NodeChannelState {
            current: Channel(11),
            previous: Channel(26),
        };
        let rule = QuorumRule::Threshold { min_average: 4 };
        assert_eq!(rule.decide(12, 3, &state), Some(Channel(11)));
        assert_eq!(rule.decide(9, 3, &state), Some(Channel(26)));
        assert_eq!(rule.prefers_current(0, 0), None);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_addr.port(), super::super::DEFAULT_PORT);
        assert_eq!(config.probe_capacity, 5);
        assert_eq!(config.probe_burst, 8);
        assert_eq!(config.timing.start_probe, Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_config() {
        let mut config = Config::default();
        config.probe_capacity = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.report_addr = Some(config.bind_addr);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_config_rejected() {
        let mut config = Config::default();
        config.probe_capacity = usize::MAX;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.event_queue = usize::MAX;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.probe_capacity = MAX_PROBE_CAPACITY;
        config.event_queue = MAX_EVENT_QUEUE;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_json_round_trip() {
        let mut config = Config::default();
        config.quorum = QuorumRule::Threshold { min_average: 4 };
        config.report_addr = Some("[aaaa::212:7401:1:101]:1234".parse().unwrap());

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(r#""rule":"threshold""#));
        assert!(json.contains(r#""announce":150"#));

        let decoded: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.quorum, config.quorum);
        assert_eq!(decoded.report_addr, config.report_addr);
        assert_eq!(decoded.timing.confirm, Duration::from_millis(500));
    }
}
