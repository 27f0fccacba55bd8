//! Channel switch coordination
//!
//! Inbound control messages go through the [`Dispatcher`], which updates
//! the [`ProbeAggregator`] and routing annotations directly and hands
//! everything else to the [`Coordinator`]. The coordinator drives the
//! [`PropagationWalker`] to fan messages out to the tree.

pub mod aggregator;
pub mod coordinator;
pub mod dispatcher;
pub mod event;
pub mod walker;

pub use self::aggregator::{
    ProbeAggregator, ProbeRecord, ProbeSummary, RecordOutcome, SharedProbes,
};
pub use self::coordinator::{Coordinator, EventSender};
pub use self::dispatcher::{Dispatch, Dispatcher};
pub use self::event::{CoordinationEvent, Phase};
pub use self::walker::{Pass, PropagationWalker, WalkReport};
