//! Node runtime
//!
//! Wires a dispatcher task and a coordinator task around one transport and
//! one routing view.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::coordination::{
    CoordinationEvent, Coordinator, Dispatcher, EventSender, Phase, SharedProbes,
};
use crate::core::{Channel, Config, NodeChannelState, Result};
use crate::network::{Inbound, Topology, Transport};

/// A configured node, ready to start
pub struct Node<T, R> {
    config: Config,
    transport: Arc<T>,
    topology: Arc<R>,
}

impl<T: Transport, R: Topology> Node<T, R> {
    /// Validates `config` and prepares a node
    pub fn new(config: Config, transport: Arc<T>, topology: Arc<R>) -> Result<Self> {
        config.validate()?;
        Ok(Node {
            config,
            transport,
            topology,
        })
    }

    /// Starts the coordinator and the dispatcher over `inbound`
    pub fn spawn(self, inbound: mpsc::Receiver<Inbound>) -> NodeHandle {
        let probes = SharedProbes::new(self.config.probe_capacity);
        let (tx, rx) = mpsc::channel(self.config.event_queue);
        let events = EventSender::new(tx);
        let initial = self.config.initial_channel;

        let coordinator = Coordinator::new(
            self.config,
            self.transport,
            Arc::clone(&self.topology),
            probes.clone(),
        );
        let phase = coordinator.subscribe_phase();
        let channels = coordinator.subscribe_channels();
        let dispatcher = Dispatcher::new(self.topology, probes.clone(), events.clone());

        let coordinator_task = tokio::spawn(coordinator.run(rx, events.downgrade()));
        let dispatcher_task = tokio::spawn(dispatcher.run(inbound));
        info!(channel = %initial, "node started");

        NodeHandle {
            events,
            phase,
            channels,
            probes,
            coordinator_task,
            dispatcher_task,
        }
    }
}

/// Control handle for a running node
pub struct NodeHandle {
    events: EventSender,
    phase: watch::Receiver<Phase>,
    channels: watch::Receiver<NodeChannelState>,
    probes: SharedProbes,
    coordinator_task: JoinHandle<()>,
    dispatcher_task: JoinHandle<()>,
}

impl NodeHandle {
    /// Starts a channel switch from this node: announce `channel`, probe,
    /// then confirm
    pub async fn initiate(&self, channel: Channel) -> Result<()> {
        info!(%channel, "initiating channel switch");
        self.events
            .post_sync(CoordinationEvent::channel_change(channel))
            .await
    }

    /// Current coordinator phase
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Committed channels
    pub fn channels(&self) -> NodeChannelState {
        *self.channels.borrow()
    }

    /// The node's probe table
    pub fn probes(&self) -> &SharedProbes {
        &self.probes
    }

    /// Stops taking inbound frames, lets the coordinator finish what is
    /// queued, and waits for both tasks
    pub async fn shutdown(self) {
        self.dispatcher_task.abort();
        drop(self.events);
        // Aborted dispatcher reports a cancellation; nothing to do with it
        let _ = join_all([self.dispatcher_task, self.coordinator_task]).await;
        info!("node stopped");
    }
}
