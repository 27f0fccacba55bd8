use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace, warn};

use super::{Inbound, Transport};
use crate::core::{Error, Result};
use crate::protocol::{ControlCodec, ControlMessage, MAX_FRAME_LEN};

/// Frames waiting for the sender task
const SEND_QUEUE_LEN: usize = 64;

/// Coordination transport over a UDP socket.
///
/// Sends are queued to a task that owns the writes, so `send` never blocks
/// and works right after `bind`.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    send_tx: mpsc::Sender<(Bytes, SocketAddr)>,
}

impl UdpTransport {
    /// Binds a socket on `addr` and starts its sender task. Must be called
    /// from within a tokio runtime.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket
            .bind(&addr.into())
            .map_err(|e| Error::network(format!("Failed to bind {}: {}", addr, e)))?;

        let socket = Arc::new(UdpSocket::from_std(socket.into())?);
        let local_addr = socket.local_addr()?;
        debug!(%local_addr, "udp transport bound");

        let (send_tx, send_rx) = mpsc::channel(SEND_QUEUE_LEN);
        tokio::spawn(send_loop(Arc::clone(&socket), send_rx));

        Ok(UdpTransport {
            socket,
            local_addr,
            send_tx,
        })
    }

    /// Address the socket is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts a task decoding every received datagram into the returned
    /// channel. Undecodable datagrams are logged and skipped.
    pub fn spawn_receiver(&self, capacity: usize) -> (mpsc::Receiver<Inbound>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        let socket = Arc::clone(&self.socket);
        let handle = tokio::spawn(receive_loop(socket, tx));
        (rx, handle)
    }
}

impl Transport for UdpTransport {
    fn send(&self, message: &ControlMessage, dest: SocketAddr) -> Result<()> {
        let mut buf = BytesMut::new();
        ControlCodec::new().encode(message.clone(), &mut buf)?;

        self.send_tx.try_send((buf.freeze(), dest)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                Error::network(format!("Send queue full, frame to {} dropped", dest))
            }
            mpsc::error::TrySendError::Closed(_) => Error::network("UDP sender task stopped"),
        })
    }
}

/// Writes queued frames until every transport handle is gone
async fn send_loop(socket: Arc<UdpSocket>, mut rx: mpsc::Receiver<(Bytes, SocketAddr)>) {
    while let Some((frame, dest)) = rx.recv().await {
        match socket.send_to(&frame, dest).await {
            Ok(written) => trace!(%dest, bytes = written, "datagram sent"),
            Err(e) => warn!(%dest, error = %e, "udp send failed"),
        }
    }
    debug!("udp sender stopped");
}

/// Errors a UDP socket reports for one datagram without being broken,
/// such as ICMP port unreachable surfacing on the next receive
fn is_transient(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

async fn receive_loop(socket: Arc<UdpSocket>, tx: mpsc::Sender<Inbound>) {
    let mut codec = ControlCodec::new();
    let mut buf = vec![0u8; MAX_FRAME_LEN + 64];

    loop {
        let (len, sender) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) if is_transient(e.kind()) => {
                debug!(error = %e, "transient udp receive error");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "udp receive failed, receiver stopping");
                break;
            }
        };

        let mut frame = BytesMut::from(&buf[..len]);
        let message = match codec.decode(&mut frame) {
            Ok(Some(message)) => message,
            Ok(None) => {
                warn!(%sender, len, "truncated datagram dropped");
                continue;
            }
            Err(e) => {
                warn!(%sender, error = %e, "undecodable datagram dropped");
                continue;
            }
        };

        if tx.send((message, sender)).await.is_err() {
            debug!("inbound channel closed, receiver stopping");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Channel;
    use crate::protocol::MessageKind;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_datagram_exchange() {
        let a = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let b = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let (mut inbound, receiver) = b.spawn_receiver(8);

        let msg = ControlMessage::new(MessageKind::ConfirmChannel, Channel(20))
            .with_target(b.local_addr());
        a.send(&msg, b.local_addr()).unwrap();

        let (received, sender) = timeout(Duration::from_secs(2), inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.kind, MessageKind::ConfirmChannel);
        assert_eq!(received.channel, Channel(20));
        assert_eq!(received.target, None);
        assert_eq!(sender, a.local_addr());

        receiver.abort();
    }

    #[tokio::test]
    async fn test_garbage_datagram_skipped() {
        let b = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let (mut inbound, receiver) = b.spawn_receiver(8);

        let raw = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        raw.send_to(&[0xff; 8], b.local_addr()).await.unwrap();

        let a = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        a.send(&ControlMessage::new(MessageKind::GetAck, Channel(11)), b.local_addr())
            .unwrap();

        let (received, _) = timeout(Duration::from_secs(2), inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.kind, MessageKind::GetAck);

        receiver.abort();
    }

    #[tokio::test]
    async fn test_burst_right_after_bind() {
        let a = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let b = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let (mut inbound, receiver) = b.spawn_receiver(16);

        // No yield between bind and the sends
        for seq in 1..=8 {
            a.send(&ControlMessage::neighbor_probe(Channel(15), seq), b.local_addr())
                .unwrap();
        }

        for seq in 1..=8 {
            let (received, _) = timeout(Duration::from_secs(2), inbound.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(received.kind, MessageKind::NeighborProbe);
            assert_eq!(received.aux, seq);
        }

        receiver.abort();
    }

    #[test]
    fn test_receive_error_classification() {
        assert!(is_transient(io::ErrorKind::ConnectionRefused));
        assert!(is_transient(io::ErrorKind::Interrupted));
        assert!(!is_transient(io::ErrorKind::InvalidInput));
        assert!(!is_transient(io::ErrorKind::PermissionDenied));
    }
}
