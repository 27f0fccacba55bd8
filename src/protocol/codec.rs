use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use super::message::ControlMessage;
use super::{LENGTH_PREFIX_LEN, MAX_FRAME_LEN, MIN_FRAME_LEN};
use crate::core::Error;

/// Datagram codec for control messages.
///
/// A frame is a big-endian `u32` body length, the bincode body, then zero
/// padding up to [`MIN_FRAME_LEN`] bytes. Padding is applied here so the
/// transport never has to know about the radio's minimum frame size.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlCodec;

impl ControlCodec {
    /// Creates a new control codec
    pub fn new() -> Self {
        ControlCodec
    }

    /// Total size on the wire of a frame carrying `body_len` bytes
    pub fn frame_len(body_len: usize) -> usize {
        (LENGTH_PREFIX_LEN + body_len).max(MIN_FRAME_LEN)
    }
}

impl Decoder for ControlCodec {
    type Item = ControlMessage;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX_LEN {
            // Need more data to read body length
            return Ok(None);
        }

        let mut length_bytes = [0u8; LENGTH_PREFIX_LEN];
        length_bytes.copy_from_slice(&src[..LENGTH_PREFIX_LEN]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length > MAX_FRAME_LEN {
            return Err(Error::protocol(format!(
                "frame body of {} bytes exceeds limit of {}",
                length, MAX_FRAME_LEN
            )));
        }

        let frame_len = Self::frame_len(length);
        if src.len() < frame_len {
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_LEN);
        let body = src.split_to(length);
        // Drop the padding so the next frame starts at the front
        src.advance(frame_len - LENGTH_PREFIX_LEN - length);

        let message = bincode::deserialize(&body)
            .map_err(|e| Error::protocol(format!("Failed to deserialize message: {}", e)))?;
        trace!(body_len = length, frame_len, "decoded control frame");
        Ok(Some(message))
    }
}

impl Encoder<ControlMessage> for ControlCodec {
    type Error = Error;

    fn encode(&mut self, item: ControlMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = bincode::serialize(&item)
            .map_err(|e| Error::protocol(format!("Failed to serialize message: {}", e)))?;

        if bytes.len() > MAX_FRAME_LEN {
            return Err(Error::protocol("control message body too large"));
        }

        let frame_len = Self::frame_len(bytes.len());
        dst.reserve(frame_len);
        dst.put_u32(bytes.len() as u32);
        dst.extend_from_slice(&bytes);
        dst.put_bytes(0, frame_len - LENGTH_PREFIX_LEN - bytes.len());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Channel;
    use crate::protocol::MessageKind;
    use std::net::SocketAddr;

    #[test]
    fn test_short_frames_are_padded() {
        let mut codec = ControlCodec::new();
        let mut bytes = BytesMut::new();

        codec
            .encode(ControlMessage::new(MessageKind::GetAck, Channel(11)), &mut bytes)
            .unwrap();
        assert_eq!(bytes.len(), MIN_FRAME_LEN);
        assert!(bytes[MIN_FRAME_LEN - 1] == 0);

        let decoded = codec.decode(&mut bytes).unwrap().unwrap();
        assert_eq!(decoded.kind, MessageKind::GetAck);
        assert_eq!(decoded.channel, Channel(11));
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut codec = ControlCodec::new();
        let mut bytes = BytesMut::new();
        let neighbor: SocketAddr = "[fe80::212:7403:3:303]:1234".parse().unwrap();

        codec
            .encode(ControlMessage::probe_result(neighbor, Channel(15), 6), &mut bytes)
            .unwrap();
        codec
            .encode(ControlMessage::neighbor_probe(Channel(15), 2), &mut bytes)
            .unwrap();

        let first = codec.decode(&mut bytes).unwrap().unwrap();
        assert_eq!(first.address, Some(neighbor));
        assert_eq!(first.aux, 6);

        let second = codec.decode(&mut bytes).unwrap().unwrap();
        assert_eq!(second.kind, MessageKind::NeighborProbe);
        assert_eq!(second.aux, 2);

        assert!(codec.decode(&mut bytes).unwrap().is_none());
    }

    #[test]
    fn test_partial_frame_waits() {
        let mut codec = ControlCodec::new();
        let mut bytes = BytesMut::new();
        codec
            .encode(ControlMessage::new(MessageKind::StartProbe, Channel(20)), &mut bytes)
            .unwrap();

        let mut partial = bytes.split_to(MIN_FRAME_LEN - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), MIN_FRAME_LEN - 1);
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut codec = ControlCodec::new();
        let mut bytes = BytesMut::new();
        bytes.put_u32((MAX_FRAME_LEN + 1) as u32);
        bytes.put_bytes(0, 64);

        assert!(matches!(codec.decode(&mut bytes), Err(Error::Protocol(_))));
    }
}
