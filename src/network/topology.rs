use std::net::SocketAddr;
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use super::{Neighbor, Topology};
use crate::core::Channel;

/// A downward route learned from the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Final destination
    pub destination: SocketAddr,
    /// Neighbor the route goes through
    pub next_hop: SocketAddr,
    /// Last known channel of `next_hop`
    pub channel: Option<Channel>,
}

#[derive(Debug, Default)]
struct Inner {
    routes: Vec<Route>,
    parent: Option<Neighbor>,
}

/// Routing table held in memory
#[derive(Debug, Default)]
pub struct StaticTopology {
    inner: RwLock<Inner>,
}

impl StaticTopology {
    /// Creates an empty table with no default route
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a route to `destination` via `next_hop`
    pub fn with_route(self, destination: SocketAddr, next_hop: SocketAddr) -> Self {
        self.add_route(destination, next_hop);
        self
    }

    /// Sets the default route
    pub fn with_parent(self, parent: SocketAddr) -> Self {
        self.set_parent(Some(parent));
        self
    }

    /// Adds a route, replacing any existing route to the same destination
    pub fn add_route(&self, destination: SocketAddr, next_hop: SocketAddr) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.routes.retain(|r| r.destination != destination);
        inner.routes.push(Route {
            destination,
            next_hop,
            channel: None,
        });
    }

    /// Removes the route to `destination`
    pub fn remove_route(&self, destination: SocketAddr) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let before = inner.routes.len();
        inner.routes.retain(|r| r.destination != destination);
        inner.routes.len() != before
    }

    /// Replaces the default route
    pub fn set_parent(&self, parent: Option<SocketAddr>) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.parent = parent.map(|address| Neighbor {
            address,
            channel: None,
        });
    }

    /// Snapshot of every route
    pub fn routes(&self) -> Vec<Route> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .routes
            .clone()
    }
}

impl Topology for StaticTopology {
    fn neighbors(&self) -> Vec<Neighbor> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .routes
            .iter()
            .map(|r| Neighbor {
                address: r.next_hop,
                channel: r.channel,
            })
            .collect()
    }

    fn parent(&self) -> Option<Neighbor> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).parent
    }

    fn update_annotation(&self, neighbor: SocketAddr, channel: Channel) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut touched = 0;
        for route in inner.routes.iter_mut().filter(|r| r.next_hop == neighbor) {
            route.channel = Some(channel);
            touched += 1;
        }
        if let Some(parent) = inner.parent.as_mut().filter(|p| p.address == neighbor) {
            parent.channel = Some(channel);
            touched += 1;
        }
        debug!(%neighbor, %channel, routes = touched, "routing annotation updated");
    }
}
