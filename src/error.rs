//! Error taxonomy for the connection engine.
//!
//! A connection-fatal `ProtocolError` that knows how to turn itself into a
//! GOAWAY, a copyable `StreamError` that only ever kills one stream, and
//! `OperationError`, the union a caller awaiting a write or a response
//! actually observes.

use crate::frame::{Reason, StreamId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame too short")]
    Short,
    #[error("frame payload exceeds the negotiated max frame size")]
    TooLarge,
    #[error("padding length exceeds payload length")]
    TooMuchPadding,
    #[error("invalid stream identifier")]
    InvalidStreamId,
    #[error("SETTINGS payload length is not a multiple of 6")]
    BadSettingsLength,
    #[error("PING payload must be exactly 8 bytes")]
    BadPingLength,
    #[error("GOAWAY payload too short")]
    BadGoAwayLength,
    #[error("RST_STREAM payload must be exactly 4 bytes")]
    BadRstStreamLength,
    #[error("WINDOW_UPDATE payload must be exactly 4 bytes")]
    BadWindowUpdateLength,
    #[error("window update increment of zero is not allowed")]
    ZeroWindowUpdate,
}

/// Connection-fatal protocol errors. Every variant maps to a GOAWAY error
/// code via [`ProtocolError::reason`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    #[error("peer violated the wire protocol: {0}")]
    Reason(Reason),
    #[error("{0}")]
    Frame(#[from] FrameError),
    #[error("received a frame on stream {0} at or beyond next_stream_id")]
    StreamIdNotYetIssued(StreamId),
    #[error("CONTINUATION received without a preceding HEADERS")]
    UnexpectedContinuation,
    #[error("HEADERS without END_HEADERS was followed by a frame other than CONTINUATION")]
    InterleavedHeaderBlock,
    #[error("PUSH_PROMISE is not supported by this client (push is disabled)")]
    UnsupportedPushPromise,
    #[error("first frame from the peer was not an unacknowledged SETTINGS frame")]
    MissingInitialSettings,
    #[error("unexpected SETTINGS ACK")]
    UnexpectedSettingsAck,
    #[error("extended CONNECT was disabled after being enabled")]
    ExtendedConnectDisabledAfterEnable,
    #[error("keep-alive ping timed out")]
    KeepaliveTimeout,
    #[error("peer sent GOAWAY: {0}")]
    PeerGoAway(Reason),
}

impl From<Reason> for ProtocolError {
    fn from(r: Reason) -> Self {
        ProtocolError::Reason(r)
    }
}

impl ProtocolError {
    /// The GOAWAY error code this connection-fatal error should be
    /// reported to the peer as.
    pub fn reason(&self) -> Reason {
        match self {
            ProtocolError::Reason(r) => *r,
            ProtocolError::Frame(FrameError::ZeroWindowUpdate) => Reason::PROTOCOL_ERROR,
            ProtocolError::Frame(FrameError::TooLarge) => Reason::FRAME_SIZE_ERROR,
            ProtocolError::Frame(_) => Reason::PROTOCOL_ERROR,
            ProtocolError::StreamIdNotYetIssued(_) => Reason::PROTOCOL_ERROR,
            ProtocolError::UnexpectedContinuation => Reason::PROTOCOL_ERROR,
            ProtocolError::InterleavedHeaderBlock => Reason::PROTOCOL_ERROR,
            ProtocolError::UnsupportedPushPromise => Reason::PROTOCOL_ERROR,
            ProtocolError::MissingInitialSettings => Reason::PROTOCOL_ERROR,
            ProtocolError::UnexpectedSettingsAck => Reason::PROTOCOL_ERROR,
            ProtocolError::ExtendedConnectDisabledAfterEnable => Reason::PROTOCOL_ERROR,
            ProtocolError::KeepaliveTimeout => Reason::NO_ERROR,
            ProtocolError::PeerGoAway(r) => *r,
        }
    }
}

/// Stream-scoped errors. Never escalate to `abort`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("stream reset by peer: {0}")]
    Reset(Reason),
    #[error("stream reset locally: {0}")]
    LocalReset(Reason),
    #[error("stream window would go negative by more than the peer allows")]
    WindowOverflowed,
    /// The whole connection went down (keep-alive timeout, transport I/O
    /// error, ...); every open stream fails with this, never mind its own
    /// state. Always safe to retry on a fresh connection.
    #[error("the connection was aborted")]
    ConnectionAborted,
}

impl StreamError {
    pub fn reason(&self) -> Reason {
        match self {
            StreamError::Reset(r) | StreamError::LocalReset(r) => *r,
            StreamError::WindowOverflowed => Reason::FLOW_CONTROL_ERROR,
            StreamError::ConnectionAborted => Reason::INTERNAL_ERROR,
        }
    }

    /// `RST_STREAM(REFUSED_STREAM)` means the peer never processed the
    /// request; it is safe to retry on a fresh connection. A
    /// connection-wide abort is retryable for the same reason regardless
    /// of which error code caused it.
    pub fn can_retry(&self) -> bool {
        self.reason().is_refused_stream() || matches!(self, StreamError::ConnectionAborted)
    }
}

/// The error surfaced to a caller awaiting a stream write or response.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OperationError {
    #[error("{0}")]
    Stream(#[from] StreamError),
    #[error("{0}")]
    Protocol(#[from] ProtocolError),
    #[error("the caller's cancellation token fired")]
    Cancelled,
    #[error("the connection's stream id space is exhausted; retry on a new connection")]
    StreamIdSpaceExhausted,
    #[error("no stream slot became available before the connection started shutting down")]
    Unavailable,
    #[error("transport I/O error: {0}")]
    Io(#[from] std::sync::Arc<std::io::Error>),
}

impl OperationError {
    pub fn can_retry(&self) -> bool {
        match self {
            OperationError::Stream(e) => e.can_retry(),
            OperationError::StreamIdSpaceExhausted | OperationError::Unavailable => true,
            OperationError::Protocol(ProtocolError::PeerGoAway(_)) => true,
            _ => false,
        }
    }
}

/// Failures from the handshake/connect path, outside the connection engine
/// proper but part of the client-facing surface.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport connect failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("handshake timed out")]
    HandshakeTimeout,
    #[error("{0}")]
    Protocol(#[from] ProtocolError),
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the reader/writer loops return: the union of everything that can
/// make `Registry::abort` fire.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    #[error("{0}")]
    Protocol(#[from] ProtocolError),
    #[error("transport I/O error: {0}")]
    Io(#[from] std::sync::Arc<std::io::Error>),
    #[error("connection shut down gracefully")]
    GracefulShutdown,
}

impl ConnectionError {
    pub fn into_operation_error(self) -> OperationError {
        match self {
            ConnectionError::Protocol(p) => OperationError::Protocol(p),
            ConnectionError::Io(e) => OperationError::Io(e),
            ConnectionError::GracefulShutdown => OperationError::Unavailable,
        }
    }
}
