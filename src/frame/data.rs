use bytes::{BufMut, Bytes};

use super::{strip_padding, Flags, Head, Kind, StreamId};
use crate::error::FrameError;

/// A DATA frame (RFC 7540 §6.1). Padding has already been stripped by the
/// time a caller sees this; `payload` is exactly the application bytes.
#[derive(Debug)]
pub struct Data {
    stream_id: StreamId,
    payload: Bytes,
    end_stream: bool,
}

impl Data {
    pub fn new(stream_id: StreamId, payload: Bytes, end_stream: bool) -> Data {
        Data {
            stream_id,
            payload,
            end_stream,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn is_end_stream(&self) -> bool {
        self.end_stream
    }

    pub fn load(head: Head, mut payload: Bytes) -> Result<Data, FrameError> {
        if head.stream_id().is_zero() {
            return Err(FrameError::InvalidStreamId);
        }
        let padded = head.flags().contains(Flags::PADDED);
        strip_padding(padded, &mut payload)?;
        Ok(Data {
            stream_id: head.stream_id(),
            payload,
            end_stream: head.flags().contains(Flags::END_STREAM),
        })
    }

    /// Encodes at most `max_frame_size` bytes starting at the front of
    /// `payload` — a writer splits a larger body into as many
    /// max-frame-size frames as its granted credit permits. Returns the
    /// number of bytes consumed.
    pub fn encode<B: BufMut>(stream_id: StreamId, payload: &[u8], end_stream: bool, dst: &mut B) {
        let flags = if end_stream {
            Flags::END_STREAM
        } else {
            Flags::empty()
        };
        let head = Head::new(Kind::Data, flags, stream_id);
        head.encode(payload.len(), dst);
        dst.put_slice(payload);
    }
}
