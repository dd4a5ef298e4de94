//! Frame types and the fixed 9-byte frame header (RFC 7540 §4.1).
//!
//! This module owns component A from the design: header encode/decode and
//! the shared vocabulary (`StreamId`, `Reason`, `Kind`) every other module
//! builds on. No allocation happens here beyond what the caller's buffer
//! already owns.

pub mod altsvc;
pub mod data;
pub mod goaway;
pub mod headers;
pub mod ping;
pub mod priority;
pub mod rst_stream;
pub mod settings;
pub mod window_update;

pub use altsvc::AltSvc;
pub use data::Data;
pub use goaway::GoAway;
pub use headers::{Continuation, Headers, PseudoHeaders};
pub use ping::Ping;
pub use priority::Priority;
pub use rst_stream::RstStream;
pub use settings::Settings;
pub use window_update::WindowUpdate;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameError;

/// Largest payload this crate will ever send or accept without the peer
/// having raised `SETTINGS_MAX_FRAME_SIZE`.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 1 << 14;
pub const MAX_ALLOWED_FRAME_SIZE: u32 = (1 << 24) - 1;

/// The 24-byte connection preface the client sends before anything else.
pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;

/// Per-frame flag bits. Meaning is overloaded by frame type:
/// `ACK` on SETTINGS/PING shares bit 0x01 with `END_STREAM` on DATA/HEADERS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u8);

impl Flags {
    pub const END_STREAM: Flags = Flags(0x01);
    pub const ACK: Flags = Flags(0x01);
    pub const END_HEADERS: Flags = Flags(0x04);
    pub const PADDED: Flags = Flags(0x08);
    pub const PRIORITY: Flags = Flags(0x20);

    /// Bits not assigned a meaning by any frame type in this crate.
    const VALID: u8 = 0b0010_1101;

    pub const fn empty() -> Self {
        Flags(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits_truncate(bits: u8) -> Self {
        Flags(bits & Self::VALID)
    }

    pub const fn from_raw(bits: u8) -> Self {
        Flags(bits)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for Flags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Flags(self.0 | rhs.0)
    }
}

/// Client-relevant frame kinds (RFC 7540 §6). Anything with a numeric value
/// above `ALTSVC` is an unknown extension frame and is dropped after being
/// logged, per RFC 7540 §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    AltSvc,
    Unknown(u8),
}

impl Kind {
    pub fn from_u8(b: u8) -> Kind {
        match b {
            0 => Kind::Data,
            1 => Kind::Headers,
            2 => Kind::Priority,
            3 => Kind::RstStream,
            4 => Kind::Settings,
            5 => Kind::PushPromise,
            6 => Kind::Ping,
            7 => Kind::GoAway,
            8 => Kind::WindowUpdate,
            9 => Kind::Continuation,
            10 => Kind::AltSvc,
            other => Kind::Unknown(other),
        }
    }

    pub fn encode(self) -> u8 {
        match self {
            Kind::Data => 0,
            Kind::Headers => 1,
            Kind::Priority => 2,
            Kind::RstStream => 3,
            Kind::Settings => 4,
            Kind::PushPromise => 5,
            Kind::Ping => 6,
            Kind::GoAway => 7,
            Kind::WindowUpdate => 8,
            Kind::Continuation => 9,
            Kind::AltSvc => 10,
            Kind::Unknown(b) => b,
        }
    }
}

/// A client-initiated, odd, 31-bit stream identifier. `ZERO` denotes the
/// connection itself (used by SETTINGS, PING, GOAWAY, and connection-level
/// WINDOW_UPDATE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(u32);

impl StreamId {
    pub const ZERO: StreamId = StreamId(0);
    /// `2^31 - 1`, the largest value a stream id may take.
    pub const MAX: StreamId = StreamId(0x7FFF_FFFF);

    pub const fn new(id: u32) -> StreamId {
        StreamId(id & 0x7FFF_FFFF)
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub fn is_client_initiated(self) -> bool {
        self.0 % 2 == 1
    }

    /// The next client stream id, two higher than this one.
    pub fn next_client(self) -> StreamId {
        StreamId(self.0 + 2)
    }
}

impl From<u32> for StreamId {
    fn from(v: u32) -> Self {
        StreamId::new(v)
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// HTTP/2 error code (RFC 7540 §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reason(u32);

impl Reason {
    pub const NO_ERROR: Reason = Reason(0x0);
    pub const PROTOCOL_ERROR: Reason = Reason(0x1);
    pub const INTERNAL_ERROR: Reason = Reason(0x2);
    pub const FLOW_CONTROL_ERROR: Reason = Reason(0x3);
    pub const SETTINGS_TIMEOUT: Reason = Reason(0x4);
    pub const STREAM_CLOSED: Reason = Reason(0x5);
    pub const FRAME_SIZE_ERROR: Reason = Reason(0x6);
    pub const REFUSED_STREAM: Reason = Reason(0x7);
    pub const CANCEL: Reason = Reason(0x8);
    pub const COMPRESSION_ERROR: Reason = Reason(0x9);
    pub const CONNECT_ERROR: Reason = Reason(0xa);
    pub const ENHANCE_YOUR_CALM: Reason = Reason(0xb);
    pub const INADEQUATE_SECURITY: Reason = Reason(0xc);
    pub const HTTP_1_1_REQUIRED: Reason = Reason(0xd);

    pub const fn new(code: u32) -> Reason {
        Reason(code)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// `RST_STREAM` with this reason means the stream was never actually
    /// processed and the request can be retried elsewhere.
    pub fn is_refused_stream(self) -> bool {
        self == Reason::REFUSED_STREAM
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match *self {
            Reason::NO_ERROR => "NO_ERROR",
            Reason::PROTOCOL_ERROR => "PROTOCOL_ERROR",
            Reason::INTERNAL_ERROR => "INTERNAL_ERROR",
            Reason::FLOW_CONTROL_ERROR => "FLOW_CONTROL_ERROR",
            Reason::SETTINGS_TIMEOUT => "SETTINGS_TIMEOUT",
            Reason::STREAM_CLOSED => "STREAM_CLOSED",
            Reason::FRAME_SIZE_ERROR => "FRAME_SIZE_ERROR",
            Reason::REFUSED_STREAM => "REFUSED_STREAM",
            Reason::CANCEL => "CANCEL",
            Reason::COMPRESSION_ERROR => "COMPRESSION_ERROR",
            Reason::CONNECT_ERROR => "CONNECT_ERROR",
            Reason::ENHANCE_YOUR_CALM => "ENHANCE_YOUR_CALM",
            Reason::INADEQUATE_SECURITY => "INADEQUATE_SECURITY",
            Reason::HTTP_1_1_REQUIRED => "HTTP_1_1_REQUIRED",
            _ => return write!(f, "UNKNOWN({:#x})", self.0),
        };
        write!(f, "{}", name)
    }
}

/// The fixed 9-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Head {
    kind_byte: u8,
    flags: u8,
    stream_id: StreamId,
}

impl Head {
    pub fn new(kind: Kind, flags: Flags, stream_id: StreamId) -> Head {
        Head {
            kind_byte: kind.encode(),
            flags: flags.bits(),
            stream_id,
        }
    }

    pub fn kind(&self) -> Kind {
        Kind::from_u8(self.kind_byte)
    }

    pub fn flag(&self) -> u8 {
        self.flags
    }

    pub fn flags(&self) -> Flags {
        Flags::from_bits_truncate(self.flags)
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Write the 9-byte header for a payload of `payload_len` bytes.
    pub fn encode<B: BufMut>(&self, payload_len: usize, dst: &mut B) {
        debug_assert!(payload_len as u32 <= MAX_ALLOWED_FRAME_SIZE);
        dst.put_uint(payload_len as u64, 3);
        dst.put_u8(self.kind_byte);
        dst.put_u8(self.flags);
        dst.put_u32(self.stream_id.as_u32() & 0x7FFF_FFFF);
    }

    /// Parse a 9-byte header. Returns the header plus the declared payload
    /// length; the caller is responsible for ensuring `src` holds at least
    /// nine bytes before calling.
    pub fn parse(src: &[u8]) -> Result<(Head, u32), FrameError> {
        if src.len() < 9 {
            return Err(FrameError::Short);
        }
        let length = ((src[0] as u32) << 16) | ((src[1] as u32) << 8) | (src[2] as u32);
        let kind_byte = src[3];
        let flags = src[4];
        let stream_id = u32::from_be_bytes([src[5], src[6], src[7], src[8]]) & 0x7FFF_FFFF;
        Ok((
            Head {
                kind_byte,
                flags,
                stream_id: StreamId::new(stream_id),
            },
            length,
        ))
    }
}

pub const HEADER_LEN: usize = 9;

/// A decoded frame, dispatched on by the reader loop.
#[derive(Debug)]
pub enum Frame {
    Data(Data),
    Headers(Headers),
    Priority(Priority),
    RstStream(RstStream),
    Settings(Settings),
    Ping(Ping),
    GoAway(GoAway),
    WindowUpdate(WindowUpdate),
    Continuation(Continuation),
    AltSvc(AltSvc),
}

impl Frame {
    pub fn stream_id(&self) -> StreamId {
        match self {
            Frame::Data(f) => f.stream_id(),
            Frame::Headers(f) => f.stream_id(),
            Frame::Priority(f) => f.stream_id(),
            Frame::RstStream(f) => f.stream_id(),
            Frame::Settings(_) => StreamId::ZERO,
            Frame::Ping(_) => StreamId::ZERO,
            Frame::GoAway(_) => StreamId::ZERO,
            Frame::WindowUpdate(f) => f.stream_id(),
            Frame::Continuation(f) => f.stream_id(),
            Frame::AltSvc(f) => f.stream_id(),
        }
    }
}

/// Strips an optional pad-length prefix byte and trailing padding from a
/// PADDED frame's payload. Returns the unpadded slice.
pub(crate) fn strip_padding(padded: bool, payload: &mut Bytes) -> Result<(), FrameError> {
    if !padded {
        return Ok(());
    }
    if payload.is_empty() {
        return Err(FrameError::Short);
    }
    let pad_len = payload[0] as usize;
    payload.advance(1);
    if pad_len > payload.len() {
        return Err(FrameError::TooMuchPadding);
    }
    payload.truncate(payload.len() - pad_len);
    Ok(())
}

/// Reads (and discards — this client ignores PRIORITY content) the 5-byte
/// PRIORITY prefix some HEADERS frames carry.
pub(crate) fn strip_priority(has_priority: bool, payload: &mut Bytes) -> Result<(), FrameError> {
    if !has_priority {
        return Ok(());
    }
    if payload.len() < 5 {
        return Err(FrameError::Short);
    }
    payload.advance(5);
    Ok(())
}

pub(crate) fn split_payload(buf: &mut BytesMut, len: usize) -> Result<Bytes, FrameError> {
    if buf.len() < len {
        return Err(FrameError::Short);
    }
    Ok(buf.split_to(len).freeze())
}
