use bytes::Bytes;

use super::{Head, StreamId};
use crate::error::FrameError;

/// ALTSVC (RFC 7838 §4). This crate only parses it far enough to satisfy
/// the reader loop's dispatch switch; alternative-service selection is an
/// outer-pool policy concern and out of scope here.
#[derive(Debug)]
pub struct AltSvc {
    stream_id: StreamId,
    origin: Bytes,
    value: Bytes,
}

impl AltSvc {
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn origin(&self) -> &Bytes {
        &self.origin
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn load(head: Head, mut payload: Bytes) -> Result<AltSvc, FrameError> {
        if payload.len() < 2 {
            return Err(FrameError::Short);
        }
        let origin_len = u16::from_be_bytes([payload[0], payload[1]]) as usize;
        payload = payload.slice(2..);
        if payload.len() < origin_len {
            return Err(FrameError::Short);
        }
        let origin = payload.slice(0..origin_len);
        let value = payload.slice(origin_len..);
        Ok(AltSvc {
            stream_id: head.stream_id(),
            origin,
            value,
        })
    }
}
