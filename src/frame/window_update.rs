use bytes::BufMut;

use super::{Flags, Head, Kind, StreamId};
use crate::error::FrameError;

/// WINDOW_UPDATE (RFC 7540 §6.9). A zero increment is rejected per the
/// RFC. The increment field is a 31-bit unsigned quantity on the wire, so
/// it can never be negative — the only invalid case to guard against is
/// exactly zero.
#[derive(Debug)]
pub struct WindowUpdate {
    stream_id: StreamId,
    increment: u32,
}

impl WindowUpdate {
    pub fn new(stream_id: StreamId, increment: u32) -> WindowUpdate {
        WindowUpdate {
            stream_id,
            increment,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn size_increment(&self) -> u32 {
        self.increment
    }

    pub fn load(head: Head, payload: &[u8]) -> Result<WindowUpdate, FrameError> {
        if payload.len() != 4 {
            return Err(FrameError::BadWindowUpdateLength);
        }
        let increment = u32::from_be_bytes(payload.try_into().unwrap()) & 0x7FFF_FFFF;
        if increment == 0 {
            return Err(FrameError::ZeroWindowUpdate);
        }
        Ok(WindowUpdate {
            stream_id: head.stream_id(),
            increment,
        })
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        let head = Head::new(Kind::WindowUpdate, Flags::empty(), self.stream_id);
        head.encode(4, dst);
        dst.put_u32(self.increment & 0x7FFF_FFFF);
    }
}
