use bytes::BufMut;

use super::{Flags, Head, Kind, Reason, StreamId};
use crate::error::FrameError;

/// RST_STREAM (RFC 7540 §6.4). Stream-scoped; never carried on stream 0.
#[derive(Debug)]
pub struct RstStream {
    stream_id: StreamId,
    reason: Reason,
}

impl RstStream {
    pub fn new(stream_id: StreamId, reason: Reason) -> RstStream {
        RstStream { stream_id, reason }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn reason(&self) -> Reason {
        self.reason
    }

    pub fn load(head: Head, payload: &[u8]) -> Result<RstStream, FrameError> {
        if head.stream_id().is_zero() {
            return Err(FrameError::InvalidStreamId);
        }
        if payload.len() != 4 {
            return Err(FrameError::BadRstStreamLength);
        }
        let code = u32::from_be_bytes(payload.try_into().unwrap());
        Ok(RstStream {
            stream_id: head.stream_id(),
            reason: Reason::new(code),
        })
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        let head = Head::new(Kind::RstStream, Flags::empty(), self.stream_id);
        head.encode(4, dst);
        dst.put_u32(self.reason.as_u32());
    }
}
