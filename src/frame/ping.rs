use bytes::BufMut;

use super::{Flags, Head, Kind, StreamId};
use crate::error::FrameError;

pub type Payload = [u8; 8];

/// PING (RFC 7540 §6.7). Non-ACK frames carry either an RTT probe (a
/// negative payload, interpreted as a signed 64-bit tag) or a keep-alive
/// tag (a non-negative, monotonically increasing payload).
#[derive(Debug, Eq, PartialEq)]
pub struct Ping {
    ack: bool,
    payload: Payload,
}

impl Ping {
    pub fn new(payload: Payload) -> Ping {
        Ping {
            ack: false,
            payload,
        }
    }

    pub fn pong(payload: Payload) -> Ping {
        Ping { ack: true, payload }
    }

    pub fn is_ack(&self) -> bool {
        self.ack
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// Interprets `payload` as a big-endian i64 tag; negative means an RTT
    /// probe, non-negative means a keep-alive tag.
    pub fn tag(&self) -> i64 {
        i64::from_be_bytes(self.payload)
    }

    /// Builds a `Ping` frame from a raw frame.
    pub fn load(head: Head, bytes: &[u8]) -> Result<Ping, FrameError> {
        debug_assert_eq!(head.kind(), Kind::Ping);

        // PING frames are not associated with any individual stream. If a PING
        // frame is received with a stream identifier field value other than
        // 0x0, the recipient MUST respond with a connection error
        // (Section 5.4.1) of type PROTOCOL_ERROR.
        if !head.stream_id().is_zero() {
            return Err(FrameError::InvalidStreamId);
        }

        // In addition to the frame header, PING frames MUST contain 8 octets of
        // opaque data in the payload.
        if bytes.len() != 8 {
            return Err(FrameError::BadPingLength);
        }

        let mut payload = [0; 8];
        payload.copy_from_slice(bytes);
        let ack = head.flags().contains(Flags::ACK);

        Ok(Ping { ack, payload })
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        let sz = self.payload.len();
        log::trace!("encoding PING; ack={} len={}", self.ack, sz);

        let flags = if self.ack { Flags::ACK } else { Flags::empty() };
        let head = Head::new(Kind::Ping, flags, StreamId::ZERO);

        head.encode(sz, dst);
        dst.put_slice(&self.payload);
    }
}

impl From<Ping> for super::Frame {
    fn from(src: Ping) -> super::Frame {
        super::Frame::Ping(src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn round_trips_through_encode_and_load() {
        let ping = Ping::new([1, 2, 3, 4, 5, 6, 7, 8]);
        let mut buf = BytesMut::new();
        ping.encode(&mut buf);

        let (head, len) = Head::parse(&buf).unwrap();
        assert_eq!(len, 8);
        let loaded = Ping::load(head, &buf[9..]).unwrap();
        assert_eq!(loaded, ping);
        assert!(!loaded.is_ack());
    }

    #[test]
    fn rejects_non_zero_stream_id() {
        let head = Head::new(Kind::Ping, Flags::empty(), StreamId::new(1));
        assert_eq!(Ping::load(head, &[0; 8]), Err(FrameError::InvalidStreamId));
    }

    #[test]
    fn rejects_wrong_length() {
        let head = Head::new(Kind::Ping, Flags::empty(), StreamId::ZERO);
        assert_eq!(Ping::load(head, &[0; 4]), Err(FrameError::BadPingLength));
    }
}
