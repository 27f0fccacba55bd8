use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::aggregator::{ProbeSummary, SharedProbes};
use super::event::{CoordinationEvent, Phase};
use super::walker::PropagationWalker;
use crate::core::{Channel, Config, Error, NodeChannelState, Result};
use crate::network::{Topology, Transport};
use crate::protocol::{ControlMessage, MessageKind};

/// What happens after a propagation walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FollowUp {
    ReportProbes,
    CheckAcks,
}

/// Per-node channel switch state machine.
///
/// Handles one [`CoordinationEvent`] at a time, to completion. The waits
/// inside a walk or a burst suspend the task but never let another event in.
pub struct Coordinator<T, R> {
    config: Config,
    transport: Arc<T>,
    topology: Arc<R>,
    probes: SharedProbes,
    walker: PropagationWalker<T, R>,
    state: NodeChannelState,
    last_summary: Option<ProbeSummary>,
    phase_tx: watch::Sender<Phase>,
    channels_tx: watch::Sender<NodeChannelState>,
}

impl<T: Transport, R: Topology> Coordinator<T, R> {
    /// Creates a coordinator sitting idle on `config.initial_channel`
    pub fn new(config: Config, transport: Arc<T>, topology: Arc<R>, probes: SharedProbes) -> Self {
        let state = NodeChannelState::new(config.initial_channel);
        let walker = PropagationWalker::new(
            Arc::clone(&transport),
            Arc::clone(&topology),
            probes.clone(),
            config.timing.clone(),
            config.root_addr,
        );
        let (phase_tx, _) = watch::channel(Phase::Idle);
        let (channels_tx, _) = watch::channel(state);

        Coordinator {
            config,
            transport,
            topology,
            probes,
            walker,
            state,
            last_summary: None,
            phase_tx,
            channels_tx,
        }
    }

    /// Current channel state
    pub fn state(&self) -> NodeChannelState {
        self.state
    }

    /// Watches the coordinator phase
    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.phase_tx.subscribe()
    }

    /// Watches committed channels
    pub fn subscribe_channels(&self) -> watch::Receiver<NodeChannelState> {
        self.channels_tx.subscribe()
    }

    /// Consumes events until every sender is gone.
    ///
    /// Follow-up events produced by a handler go to the back of the queue
    /// through `requeue`, behind anything already waiting.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<CoordinationEvent>,
        requeue: mpsc::WeakSender<CoordinationEvent>,
    ) {
        info!(channel = %self.state.current, "coordinator started");
        let mut backlog = VecDeque::new();

        loop {
            let event = match backlog.pop_front() {
                Some(event) => event,
                None => match events.recv().await {
                    Some(event) => event,
                    None => break,
                },
            };

            if let Some(next) = self.handle(event).await {
                match requeue.upgrade() {
                    Some(tx) => {
                        if let Err(e) = tx.try_send(next) {
                            backlog.push_back(e.into_inner());
                        }
                    }
                    None => backlog.push_back(next),
                }
            }
        }

        info!("coordinator stopped");
    }

    /// Processes one event to completion and returns the follow-up event,
    /// if any
    pub async fn handle(&mut self, event: CoordinationEvent) -> Option<CoordinationEvent> {
        info!(event = %event, "coordination event");

        let next = match event {
            CoordinationEvent::Propagate {
                trigger,
                channel,
                repeat,
            } => self.propagate(trigger, channel, repeat).await,
            CoordinationEvent::NeighborProbe { address } => {
                self.probe_burst(address).await;
                None
            }
            CoordinationEvent::GetAck { address, channel } => {
                self.acknowledge(address, channel).await;
                None
            }
        };

        self.set_phase(Phase::Idle);
        next
    }

    async fn propagate(
        &mut self,
        trigger: MessageKind,
        channel: Channel,
        repeat: u8,
    ) -> Option<CoordinationEvent> {
        let follow_up = match trigger {
            MessageKind::NeighborChannelChange | MessageKind::StartProbe => FollowUp::ReportProbes,
            MessageKind::ConfirmChannel => FollowUp::CheckAcks,
            other => {
                warn!(kind = %other, "ignoring propagation of unexpected kind");
                return None;
            }
        };

        self.set_phase(Phase::Propagating);
        let report = self.walker.walk(channel, repeat.min(1), &mut self.state).await;
        self.channels_tx.send_replace(self.state);
        info!(
            %channel,
            sent = report.sent,
            suppressed = report.suppressed,
            failed = report.failed,
            "propagation finished"
        );

        match follow_up {
            FollowUp::ReportProbes => {
                self.set_phase(Phase::AwaitingProbeReport);
                self.report_probes()
            }
            FollowUp::CheckAcks => {
                self.set_phase(Phase::AwaitingConfirmAck);
                self.retry_unacknowledged().await;
                None
            }
        }
    }

    /// Reports every probe record to the sink and returns the confirmation
    /// to walk next
    fn report_probes(&mut self) -> Option<CoordinationEvent> {
        let records = self.probes.with(|t| t.drain());

        match self.config.report_addr {
            Some(sink) => {
                for record in &records {
                    let message = ControlMessage::probe_result(
                        record.neighbor,
                        record.channel,
                        record.receptions_u8(),
                    );
                    debug!(
                        neighbor = %record.neighbor,
                        receptions = record.receptions,
                        %sink,
                        "sending probe result"
                    );
                    if let Err(e) = self.transport.send(&message, sink) {
                        warn!(%sink, error = %e, "probe result send failed");
                    }
                }
            }
            None if !records.is_empty() => {
                warn!("no report address configured, probe results not sent")
            }
            None => {}
        }

        let summary = ProbeSummary::from_records(&records, &self.state, self.config.quorum);
        match summary.decision {
            Some(channel) => {
                info!(total = summary.total, count = summary.count, %channel, "channel decided");
                self.last_summary = Some(summary);
                Some(CoordinationEvent::confirm(channel))
            }
            None => {
                info!("no probe records, skipping decision");
                None
            }
        }
    }

    /// Resends the confirmation to the first unacknowledged neighbor, up to
    /// `max_confirm_retries` times
    async fn retry_unacknowledged(&mut self) {
        for attempt in 1..=self.config.max_confirm_retries {
            let Some(record) = self.probes.with(|t| t.find_unacknowledged().cloned()) else {
                debug!("every confirmation acknowledged");
                return;
            };

            let channel = self
                .last_summary
                .and_then(|s| self.config.quorum.decide(s.total, s.count, &self.state))
                .unwrap_or(self.state.current);
            info!(neighbor = %record.neighbor, %channel, attempt, "resending confirmation");

            let message = ControlMessage::new(MessageKind::ConfirmChannel, channel)
                .with_target(record.neighbor);
            if let Err(e) = self.transport.send(&message, record.neighbor) {
                warn!(neighbor = %record.neighbor, error = %e, "confirmation resend failed");
            }
            sleep(self.config.timing.confirm).await;
            self.commit(channel);
        }

        if let Some(record) = self.probes.with(|t| t.find_unacknowledged().cloned()) {
            warn!(neighbor = %record.neighbor, "confirmation still unacknowledged");
        }
    }

    /// Answers a start-probe request with a burst on the committed channel
    async fn probe_burst(&mut self, address: SocketAddr) {
        self.set_phase(Phase::Probing);
        sleep(self.config.timing.probe_settle).await;

        let channel = self.state.current;
        for seq in 1..=self.config.probe_burst {
            let message = ControlMessage::neighbor_probe(channel, seq).with_target(address);
            debug!(neighbor = %address, %channel, seq, "sending probe");
            if let Err(e) = self.transport.send(&message, address) {
                warn!(neighbor = %address, seq, error = %e, "probe send failed");
            }
        }

        // The last frames may still be on air
        sleep(self.config.timing.probe_drain).await;
    }

    /// Notes the neighbor's channel and echoes the acknowledgment back
    async fn acknowledge(&mut self, address: SocketAddr, channel: Channel) {
        self.set_phase(Phase::Acknowledging);
        self.topology.update_annotation(address, channel);
        sleep(self.config.timing.ack_echo).await;

        let message = ControlMessage::new(MessageKind::GetAck, channel).with_target(address);
        debug!(neighbor = %address, %channel, "echoing acknowledgment");
        if let Err(e) = self.transport.send(&message, address) {
            warn!(neighbor = %address, error = %e, "acknowledgment send failed");
        }
    }

    fn commit(&mut self, channel: Channel) {
        self.state.commit(channel);
        self.channels_tx.send_replace(self.state);
    }

    fn set_phase(&self, phase: Phase) {
        self.phase_tx.send_replace(phase);
    }
}

/// Sending side of the coordinator event queue
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<CoordinationEvent>,
}

impl EventSender {
    /// Wraps the queue sender
    pub fn new(tx: mpsc::Sender<CoordinationEvent>) -> Self {
        EventSender { tx }
    }

    /// Hands `event` over and waits until the queue has accepted it
    pub async fn post_sync(&self, event: CoordinationEvent) -> Result<()> {
        debug!(event = %event, "handing event to coordinator");
        self.tx
            .send(event)
            .await
            .map_err(|_| Error::coordination("coordinator stopped"))
    }

    /// Queues `event` without waiting; a full queue drops it
    pub fn post(&self, event: CoordinationEvent) -> Result<()> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(event = %event, "coordinator queue full, event dropped");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(Error::coordination("coordinator stopped"))
            }
        }
    }

    /// Weak handle for requeueing follow-up events
    pub fn downgrade(&self) -> mpsc::WeakSender<CoordinationEvent> {
        self.tx.downgrade()
    }
}
