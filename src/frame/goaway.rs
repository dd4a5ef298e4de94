use bytes::{BufMut, Bytes};

use super::{Flags, Head, Kind, Reason, StreamId};
use crate::error::FrameError;

/// GOAWAY (RFC 7540 §6.8). `set_data` attaches a short human-readable
/// debug string.
#[derive(Debug, Clone)]
pub struct GoAway {
    last_stream_id: StreamId,
    reason: Reason,
    debug_data: Bytes,
}

impl GoAway {
    pub fn new(reason: Reason) -> GoAway {
        GoAway {
            last_stream_id: StreamId::ZERO,
            reason,
            debug_data: Bytes::new(),
        }
    }

    pub fn set_last_stream_id(mut self, id: StreamId) -> Self {
        self.last_stream_id = id;
        self
    }

    pub fn set_data(mut self, data: impl Into<String>) -> Self {
        self.debug_data = Bytes::from(data.into().into_bytes());
        self
    }

    pub fn last_stream_id(&self) -> StreamId {
        self.last_stream_id
    }

    pub fn reason(&self) -> Reason {
        self.reason
    }

    pub fn load(head: Head, payload: &[u8]) -> Result<GoAway, FrameError> {
        if !head.stream_id().is_zero() {
            return Err(FrameError::InvalidStreamId);
        }
        if payload.len() < 8 {
            return Err(FrameError::BadGoAwayLength);
        }
        let last_stream_id = u32::from_be_bytes(payload[0..4].try_into().unwrap()) & 0x7FFF_FFFF;
        let code = u32::from_be_bytes(payload[4..8].try_into().unwrap());
        Ok(GoAway {
            last_stream_id: StreamId::new(last_stream_id),
            reason: Reason::new(code),
            debug_data: Bytes::copy_from_slice(&payload[8..]),
        })
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        let head = Head::new(Kind::GoAway, Flags::empty(), StreamId::ZERO);
        head.encode(8 + self.debug_data.len(), dst);
        dst.put_u32(self.last_stream_id.as_u32());
        dst.put_u32(self.reason.as_u32());
        dst.put_slice(&self.debug_data);
    }
}
