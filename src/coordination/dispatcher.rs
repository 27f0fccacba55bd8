use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::aggregator::{RecordOutcome, SharedProbes};
use super::coordinator::EventSender;
use super::event::CoordinationEvent;
use crate::core::Result;
use crate::network::{Inbound, Topology};
use crate::protocol::{ControlMessage, MessageKind};

/// What the dispatcher did with one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Handed an event to the coordinator
    Forwarded(CoordinationEvent),
    /// Updated the routing annotation of the sender
    Annotated,
    /// Counted a probe reception
    Probe(RecordOutcome),
    /// Marked the sender as acknowledged
    Acknowledged(bool),
    /// Nothing to do
    Ignored,
}

/// Demultiplexes inbound control messages.
///
/// Table and routing updates happen inline; everything that needs timing
/// or sends goes to the coordinator.
pub struct Dispatcher<R> {
    topology: Arc<R>,
    probes: SharedProbes,
    events: EventSender,
}

impl<R: Topology> Dispatcher<R> {
    /// Creates a dispatcher feeding `events`
    pub fn new(topology: Arc<R>, probes: SharedProbes, events: EventSender) -> Self {
        Dispatcher {
            topology,
            probes,
            events,
        }
    }

    /// Handles one message from `sender`.
    ///
    /// Forwarded events are handed over synchronously: this returns once the
    /// coordinator queue has accepted them, not once they are processed.
    pub async fn dispatch(&self, message: ControlMessage, sender: SocketAddr) -> Result<Dispatch> {
        let dispatch = match message.kind {
            MessageKind::ChannelChange => {
                info!(channel = %message.channel, %sender, "channel change requested");
                self.forward(CoordinationEvent::channel_change(message.channel)).await?
            }
            MessageKind::NeighborChannelChange => {
                debug!(channel = %message.channel, %sender, "neighbor changed channel");
                self.topology.update_annotation(sender, message.channel);
                Dispatch::Annotated
            }
            MessageKind::StartProbe => {
                debug!(channel = %message.channel, %sender, "probe burst requested");
                self.forward(CoordinationEvent::NeighborProbe { address: sender }).await?
            }
            MessageKind::NeighborProbe => {
                debug!(channel = %message.channel, seq = message.aux, %sender, "probe received");
                let outcome = self.probes.with(|t| t.record_probe(sender, message.channel));
                Dispatch::Probe(outcome)
            }
            MessageKind::ConfirmChannel => {
                info!(channel = %message.channel, %sender, "channel confirmation received");
                self.forward(CoordinationEvent::GetAck {
                    address: sender,
                    channel: message.channel,
                })
                .await?
            }
            MessageKind::GetAck => {
                let found = self.probes.with(|t| t.record_ack(sender));
                if found {
                    info!(channel = %message.channel, %sender, "confirmation acknowledged");
                } else {
                    debug!(%sender, "acknowledgment from neighbor without probe record");
                }
                Dispatch::Acknowledged(found)
            }
            MessageKind::ProbeResult | MessageKind::Unknown(_) => {
                debug!(kind = %message.kind, %sender, "message ignored");
                Dispatch::Ignored
            }
        };
        Ok(dispatch)
    }

    /// Dispatches inbound frames until the source closes or the coordinator
    /// stops
    pub async fn run(self, mut inbound: mpsc::Receiver<Inbound>) {
        while let Some((message, sender)) = inbound.recv().await {
            if let Err(e) = self.dispatch(message, sender).await {
                warn!(error = %e, "dispatcher stopping");
                break;
            }
        }
        debug!("dispatcher finished");
    }

    async fn forward(&self, event: CoordinationEvent) -> Result<Dispatch> {
        self.events.post_sync(event.clone()).await?;
        Ok(Dispatch::Forwarded(event))
    }
}
