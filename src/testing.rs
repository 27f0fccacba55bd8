//! Test utilities module

#![cfg(test)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::time::Instant;

use crate::core::{Error, Result};
use crate::network::Transport;
use crate::protocol::{ControlMessage, MessageKind};

/// Root of the test tree
pub const ROOT: &str = "[fe80::212:7401:1:101]:1234";
/// Probe report sink
pub const SINK: &str = "[aaaa::212:7401:1:101]:1234";

/// Address of test node `n`
pub fn node(n: u16) -> SocketAddr {
    format!("[fe80::212:7400:{:x}:{:x}]:1234", n, n).parse().unwrap()
}

pub fn root() -> SocketAddr {
    ROOT.parse().unwrap()
}

pub fn sink() -> SocketAddr {
    SINK.parse().unwrap()
}

/// A frame captured by [`RecordingTransport`]
#[derive(Debug, Clone)]
pub struct Sent {
    pub at: Instant,
    pub dest: SocketAddr,
    pub message: ControlMessage,
}

/// Transport that remembers everything it was asked to send.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<Sent>>>,
    fail: Arc<Mutex<bool>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following send fail
    pub fn fail_sends(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    /// `(destination, kind)` pairs in send order
    pub fn trace(&self) -> Vec<(SocketAddr, MessageKind)> {
        self.sent()
            .into_iter()
            .map(|s| (s.dest, s.message.kind))
            .collect()
    }

    pub fn sent_of(&self, kind: MessageKind) -> Vec<Sent> {
        self.sent()
            .into_iter()
            .filter(|s| s.message.kind == kind)
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, message: &ControlMessage, dest: SocketAddr) -> Result<()> {
        self.sent.lock().unwrap().push(Sent {
            at: Instant::now(),
            dest,
            message: message.clone(),
        });
        if *self.fail.lock().unwrap() {
            return Err(Error::network("send refused"));
        }
        Ok(())
    }
}
