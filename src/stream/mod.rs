//! Stream state and the handle a caller holds while a request/response
//! is in flight.
//!
//! Lifecycle: `Reserved` (local attributes decided, no wire id yet) →
//! `Open` (id assigned, headers sent) → `HalfClosedLocal` (request body
//! finished) → `Closed`. A stream can be driven to `Closed` from any state
//! by a reset, local or remote.

pub mod coordinator;

use std::sync::atomic::{AtomicU8, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::StreamError;
use crate::frame::StreamId;
use crate::hpack::DecodedHeaders;

/// What the reader loop hands a stream's consumer as frames arrive.
/// Delivered in wire order on an unbounded channel so the reader never
/// blocks waiting for a slow consumer to keep up.
#[derive(Debug)]
pub enum StreamEvent {
    Headers(DecodedHeaders),
    Data(Bytes),
    Trailers(DecodedHeaders),
    Reset(StreamError),
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Reserved,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    fn as_u8(self) -> u8 {
        match self {
            StreamState::Reserved => 0,
            StreamState::Open => 1,
            StreamState::HalfClosedLocal => 2,
            StreamState::HalfClosedRemote => 3,
            StreamState::Closed => 4,
        }
    }

    fn from_u8(b: u8) -> StreamState {
        match b {
            0 => StreamState::Reserved,
            1 => StreamState::Open,
            2 => StreamState::HalfClosedLocal,
            3 => StreamState::HalfClosedRemote,
            _ => StreamState::Closed,
        }
    }
}

/// Per-request attributes fixed when the stream is reserved, read by the
/// reader/writer loops without taking any lock.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamAttributes {
    pub expect_continue: bool,
    pub extended_connect: bool,
    pub duplex: bool,
}

/// An atomically-readable state cell shared between the caller's handle,
/// the reader loop (which advances it on END_STREAM/RST_STREAM) and the
/// writer loop (which advances it on a locally-finished request body).
pub struct StreamSlot {
    id: std::sync::OnceLock<StreamId>,
    state: AtomicU8,
    attributes: StreamAttributes,
    inbound: mpsc::UnboundedSender<StreamEvent>,
}

impl StreamSlot {
    pub fn reserved(
        attributes: StreamAttributes,
        inbound: mpsc::UnboundedSender<StreamEvent>,
    ) -> StreamSlot {
        StreamSlot {
            id: std::sync::OnceLock::new(),
            state: AtomicU8::new(StreamState::Reserved.as_u8()),
            attributes,
            inbound,
        }
    }

    /// Delivers an event to whoever is reading this stream's response.
    /// A closed receiver (the caller dropped their response handle) is
    /// not an error here — the reader loop still needs to run the frame
    /// through flow-control/HPACK-state bookkeeping regardless.
    pub fn deliver(&self, event: StreamEvent) {
        let _ = self.inbound.send(event);
    }

    pub fn attributes(&self) -> StreamAttributes {
        self.attributes
    }

    pub fn id(&self) -> Option<StreamId> {
        self.id.get().copied()
    }

    /// Assigns the wire id once the writer loop actually sends HEADERS.
    /// Idempotent only for the same id — assigning twice with a different
    /// id is a bug in the caller.
    pub fn assign_id(&self, id: StreamId) {
        let _ = self.id.set(id);
        self.transition(StreamState::Open);
    }

    pub fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn transition(&self, to: StreamState) {
        self.state.store(to.as_u8(), Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.state() == StreamState::Closed
    }

    /// Moves half-closed(local) + half-closed(remote) to fully closed, and
    /// an open stream that both sides just finished straight to closed.
    /// Mirrors RFC 7540 §5.1's state diagram for the subset of transitions
    /// this client drives.
    pub fn on_local_end_stream(&self) {
        match self.state() {
            StreamState::Open => self.transition(StreamState::HalfClosedLocal),
            StreamState::HalfClosedRemote => self.transition(StreamState::Closed),
            _ => {}
        }
    }

    pub fn on_remote_end_stream(&self) {
        match self.state() {
            StreamState::Open => self.transition(StreamState::HalfClosedRemote),
            StreamState::HalfClosedLocal => self.transition(StreamState::Closed),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_then_remote_end_stream_closes() {
        let slot = StreamSlot::reserved(StreamAttributes::default(), mpsc::unbounded_channel().0);
        slot.assign_id(StreamId::new(1));
        assert_eq!(slot.state(), StreamState::Open);

        slot.on_local_end_stream();
        assert_eq!(slot.state(), StreamState::HalfClosedLocal);

        slot.on_remote_end_stream();
        assert_eq!(slot.state(), StreamState::Closed);
    }

    #[test]
    fn remote_then_local_end_stream_closes() {
        let slot = StreamSlot::reserved(StreamAttributes::default(), mpsc::unbounded_channel().0);
        slot.assign_id(StreamId::new(3));

        slot.on_remote_end_stream();
        assert_eq!(slot.state(), StreamState::HalfClosedRemote);

        slot.on_local_end_stream();
        assert_eq!(slot.state(), StreamState::Closed);
    }
}
