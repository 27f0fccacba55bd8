use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::core::{Channel, NodeChannelState, QuorumRule};

/// Probe reception state for one neighbor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRecord {
    /// Neighbor being probed
    pub neighbor: SocketAddr,
    /// Channel the neighbor is probed on
    pub channel: Channel,
    /// Probes received on `channel`
    pub receptions: u32,
    /// Whether the neighbor acknowledged the channel confirmation
    pub acknowledged: bool,
}

impl ProbeRecord {
    fn new(neighbor: SocketAddr, channel: Channel) -> Self {
        ProbeRecord {
            neighbor,
            channel,
            receptions: 1,
            acknowledged: false,
        }
    }

    /// Reception count as carried in a `ProbeResult`
    pub fn receptions_u8(&self) -> u8 {
        u8::try_from(self.receptions).unwrap_or(u8::MAX)
    }
}

/// What `record_probe` did with a reception
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// First probe from a neighbor
    Created,
    /// Another probe on the same channel
    Incremented,
    /// Probe on a different channel restarted the count
    Reset,
    /// Table full; the reception was not recorded
    Dropped,
}

/// Reception totals and the resulting channel decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSummary {
    /// Sum of reception counts
    pub total: u32,
    /// Number of records summed
    pub count: u32,
    /// Channel to confirm, `None` when there were no records
    pub decision: Option<Channel>,
}

impl ProbeSummary {
    /// Tallies `records` and applies `rule` against `state`
    pub fn from_records<'a>(
        records: impl IntoIterator<Item = &'a ProbeRecord>,
        state: &NodeChannelState,
        rule: QuorumRule,
    ) -> Self {
        let (total, count) = records.into_iter().fold((0u32, 0u32), |(total, count), r| {
            (total.saturating_add(r.receptions), count + 1)
        });
        ProbeSummary {
            total,
            count,
            decision: rule.decide(total, count, state),
        }
    }
}

/// Bounded table of probe records keyed by neighbor.
///
/// Records live in the tally until [`drain`](Self::drain) hands them to the
/// report; drained records stay in the confirmation ledger so the following
/// confirmation pass can still see and acknowledge them. The next drain
/// replaces the ledger.
#[derive(Debug)]
pub struct ProbeAggregator {
    capacity: usize,
    tally: Vec<ProbeRecord>,
    ledger: Vec<ProbeRecord>,
}

impl ProbeAggregator {
    /// Creates an empty table holding at most `capacity` neighbors
    pub fn new(capacity: usize) -> Self {
        ProbeAggregator {
            capacity,
            tally: Vec::with_capacity(capacity),
            ledger: Vec::new(),
        }
    }

    /// Records one probe reception from `neighbor` on `channel`
    pub fn record_probe(&mut self, neighbor: SocketAddr, channel: Channel) -> RecordOutcome {
        if let Some(record) = self.tally.iter_mut().find(|r| r.neighbor == neighbor) {
            if record.channel == channel {
                record.receptions = record.receptions.saturating_add(1);
                return RecordOutcome::Incremented;
            }
            debug!(
                %neighbor,
                from = %record.channel,
                to = %channel,
                "probe channel changed, count reset"
            );
            *record = ProbeRecord::new(neighbor, channel);
            return RecordOutcome::Reset;
        }

        if self.tally.len() >= self.capacity {
            warn!(%neighbor, capacity = self.capacity, "probe table full, reception dropped");
            return RecordOutcome::Dropped;
        }
        self.tally.push(ProbeRecord::new(neighbor, channel));
        RecordOutcome::Created
    }

    /// Marks `neighbor` as having acknowledged the confirmation.
    ///
    /// Returns false when no record exists for it.
    pub fn record_ack(&mut self, neighbor: SocketAddr) -> bool {
        let mut found = false;
        for record in self
            .ledger
            .iter_mut()
            .chain(self.tally.iter_mut())
            .filter(|r| r.neighbor == neighbor)
        {
            record.acknowledged = true;
            found = true;
        }
        found
    }

    /// Totals the live tally and picks a channel
    pub fn summarize(&self, state: &NodeChannelState, rule: QuorumRule) -> ProbeSummary {
        ProbeSummary::from_records(&self.tally, state, rule)
    }

    /// First record, in insertion order, still waiting for an acknowledgment
    pub fn find_unacknowledged(&self) -> Option<&ProbeRecord> {
        self.ledger
            .iter()
            .chain(self.tally.iter())
            .find(|r| !r.acknowledged)
    }

    /// The record for `neighbor`, if any
    pub fn record(&self, neighbor: SocketAddr) -> Option<&ProbeRecord> {
        self.ledger
            .iter()
            .chain(self.tally.iter())
            .find(|r| r.neighbor == neighbor)
    }

    /// Returns every tallied record and empties the tally
    pub fn drain(&mut self) -> Vec<ProbeRecord> {
        let drained = std::mem::take(&mut self.tally);
        self.ledger = drained.clone();
        drained
    }

    /// Number of records in the live tally
    pub fn len(&self) -> usize {
        self.tally.len()
    }

    /// Whether the live tally is empty
    pub fn is_empty(&self) -> bool {
        self.tally.is_empty()
    }

    /// Maximum number of neighbors tracked
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Probe table shared between the dispatcher and the coordinator.
///
/// The lock is only taken for the duration of a table operation and is
/// never held across a wait.
#[derive(Debug, Clone)]
pub struct SharedProbes(Arc<Mutex<ProbeAggregator>>);

impl SharedProbes {
    /// Creates an empty shared table
    pub fn new(capacity: usize) -> Self {
        SharedProbes(Arc::new(Mutex::new(ProbeAggregator::new(capacity))))
    }

    /// Runs `f` with exclusive access to the table
    pub fn with<R>(&self, f: impl FnOnce(&mut ProbeAggregator) -> R) -> R {
        let mut table = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut table)
    }
}
