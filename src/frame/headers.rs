use bytes::{BufMut, Bytes};

use super::{strip_padding, strip_priority, Flags, Head, Kind, StreamId};
use crate::error::FrameError;

/// A HEADERS frame carrying a (possibly partial) HPACK header block
/// fragment. The reader loop is responsible for reassembling fragments
/// split across trailing CONTINUATION frames before handing the complete
/// block to the HPACK decoder.
#[derive(Debug)]
pub struct Headers {
    stream_id: StreamId,
    header_block_fragment: Bytes,
    end_headers: bool,
    end_stream: bool,
}

impl Headers {
    pub fn new(stream_id: StreamId, header_block_fragment: Bytes, end_stream: bool) -> Headers {
        Headers {
            stream_id,
            header_block_fragment,
            end_headers: true,
            end_stream,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn is_end_headers(&self) -> bool {
        self.end_headers
    }

    pub fn is_end_stream(&self) -> bool {
        self.end_stream
    }

    pub fn header_block_fragment(&self) -> &Bytes {
        &self.header_block_fragment
    }

    pub fn into_header_block_fragment(self) -> Bytes {
        self.header_block_fragment
    }

    pub fn load(head: Head, mut payload: Bytes) -> Result<Headers, FrameError> {
        if head.stream_id().is_zero() {
            return Err(FrameError::InvalidStreamId);
        }
        let flags = head.flags();
        strip_padding(flags.contains(Flags::PADDED), &mut payload)?;
        strip_priority(flags.contains(Flags::PRIORITY), &mut payload)?;

        Ok(Headers {
            stream_id: head.stream_id(),
            header_block_fragment: payload,
            end_headers: flags.contains(Flags::END_HEADERS),
            end_stream: flags.contains(Flags::END_STREAM),
        })
    }

    /// Encodes this fragment as a single HEADERS frame with END_HEADERS
    /// set. Splitting a larger block into HEADERS + CONTINUATION frames at
    /// `max_frame_size` boundaries is the writer loop's job, not this
    /// frame type's.
    pub fn encode<B: BufMut>(
        stream_id: StreamId,
        fragment: &[u8],
        end_headers: bool,
        end_stream: bool,
        dst: &mut B,
    ) {
        let mut flags = Flags::empty();
        if end_headers {
            flags.insert(Flags::END_HEADERS);
        }
        if end_stream {
            flags.insert(Flags::END_STREAM);
        }
        let head = Head::new(Kind::Headers, flags, stream_id);
        head.encode(fragment.len(), dst);
        dst.put_slice(fragment);
    }
}

/// A CONTINUATION frame: the tail of a header block too large for one
/// HEADERS frame (RFC 7540 §6.10).
#[derive(Debug)]
pub struct Continuation {
    stream_id: StreamId,
    header_block_fragment: Bytes,
    end_headers: bool,
}

impl Continuation {
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn is_end_headers(&self) -> bool {
        self.end_headers
    }

    pub fn into_header_block_fragment(self) -> Bytes {
        self.header_block_fragment
    }

    pub fn load(head: Head, payload: Bytes) -> Result<Continuation, FrameError> {
        if head.stream_id().is_zero() {
            return Err(FrameError::InvalidStreamId);
        }
        Ok(Continuation {
            stream_id: head.stream_id(),
            header_block_fragment: payload,
            end_headers: head.flags().contains(Flags::END_HEADERS),
        })
    }

    pub fn encode<B: BufMut>(stream_id: StreamId, fragment: &[u8], end_headers: bool, dst: &mut B) {
        let flags = if end_headers {
            Flags::END_HEADERS
        } else {
            Flags::empty()
        };
        let head = Head::new(Kind::Continuation, flags, stream_id);
        head.encode(fragment.len(), dst);
        dst.put_slice(fragment);
    }
}

/// The decoded `:method`/`:scheme`/`:authority`/`:path` (request side) or
/// `:status` (response side) pseudo-headers (RFC 7540 §8.1.2.3), assembled
/// by the HPACK glue as it walks the decoded header list.
#[derive(Debug, Clone, Default)]
pub struct PseudoHeaders {
    pub method: Option<String>,
    pub scheme: Option<String>,
    pub authority: Option<String>,
    pub path: Option<String>,
    pub protocol: Option<String>,
    pub status: Option<u16>,
}

impl PseudoHeaders {
    pub fn request(method: &str, scheme: &str, authority: &str, path: &str) -> PseudoHeaders {
        PseudoHeaders {
            method: Some(method.to_string()),
            scheme: Some(scheme.to_string()),
            authority: Some(authority.to_string()),
            path: Some(path.to_string()),
            protocol: None,
            status: None,
        }
    }

    pub fn is_extended_connect(&self) -> bool {
        self.method.as_deref() == Some("CONNECT") && self.protocol.is_some()
    }
}
