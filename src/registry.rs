//! The stream registry.
//!
//! A single mutex guards the open-stream map and the next-stream-id
//! counter. The one rule every method here respects: a stream's
//! `on_reset` callback never runs while the lock is held, so a callback
//! that turns around and calls back into the registry (e.g. to release
//! its own slot) can't deadlock.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Notify;

use crate::error::{OperationError, StreamError};
use crate::frame::StreamId;
use crate::stream::StreamSlot;

/// `slot`/`on_reset` start `None` the instant `try_reserve_stream` reserves
/// an id — the reservation itself inserts a placeholder entry under the
/// same lock that checked `max_concurrent`, so the count two concurrent
/// reservations race against is always up to date. `add_stream` fills the
/// placeholder in once the caller has built the real slot and callback.
struct Entry {
    slot: Option<Arc<StreamSlot>>,
    on_reset: Option<Box<dyn FnOnce(StreamError) + Send>>,
}

struct Inner {
    streams: HashMap<StreamId, Entry>,
    next_stream_id: StreamId,
    max_concurrent: usize,
    shutting_down: bool,
    shutdown_reason: Option<crate::frame::Reason>,
}

/// Tracks every stream this connection currently knows about and enforces
/// `SETTINGS_MAX_CONCURRENT_STREAMS`.
pub struct Registry {
    inner: parking_lot::Mutex<Inner>,
    availability: Notify,
}

impl Registry {
    pub fn new(max_concurrent: usize) -> Registry {
        Registry {
            inner: parking_lot::Mutex::new(Inner {
                streams: HashMap::new(),
                next_stream_id: StreamId::new(1),
                max_concurrent,
                shutting_down: false,
                shutdown_reason: None,
            }),
            availability: Notify::new(),
        }
    }

    pub fn set_max_concurrent(&self, n: usize) {
        let mut inner = self.inner.lock();
        let had_room = inner.streams.len() < inner.max_concurrent;
        inner.max_concurrent = n;
        if !had_room && inner.streams.len() < inner.max_concurrent {
            drop(inner);
            self.availability.notify_waiters();
        }
    }

    /// Reserves a slot and hands back the next stream id, or `None` if
    /// the connection is at `MaxConcurrentStreams` or shutting down.
    ///
    /// The reservation inserts a placeholder `Entry` into `streams` under
    /// the same lock that checks `max_concurrent`, so two callers racing
    /// to reserve never both pass the capacity check before either's
    /// insertion is visible — `streams.len()` reflects a reservation the
    /// instant it succeeds, not just once `add_stream` later fills it in.
    pub fn try_reserve_stream(&self) -> Option<StreamId> {
        let mut inner = self.inner.lock();
        if inner.shutting_down || inner.streams.len() >= inner.max_concurrent {
            return None;
        }
        let id = inner.next_stream_id;
        inner.next_stream_id = id.next_client();
        inner.streams.insert(
            id,
            Entry {
                slot: None,
                on_reset: None,
            },
        );
        Some(id)
    }

    /// Fills in the placeholder `try_reserve_stream` left behind for `id`.
    pub fn add_stream(
        &self,
        id: StreamId,
        slot: Arc<StreamSlot>,
        on_reset: impl FnOnce(StreamError) + Send + 'static,
    ) {
        let mut inner = self.inner.lock();
        inner.streams.insert(
            id,
            Entry {
                slot: Some(slot),
                on_reset: Some(Box::new(on_reset)),
            },
        );
    }

    pub fn get(&self, id: StreamId) -> Option<Arc<StreamSlot>> {
        self.inner.lock().streams.get(&id).and_then(|e| e.slot.clone())
    }

    /// The stream id that will be handed out by the next successful
    /// `try_reserve_stream` call. Any id at or beyond this one has never
    /// been issued; the reader loop uses this to tell "never issued" (a
    /// protocol error) apart from "issued, now closed and released" (a
    /// harmless late frame to decode and drop).
    pub fn next_stream_id(&self) -> StreamId {
        self.inner.lock().next_stream_id
    }

    /// Removes a stream, e.g. once it reaches `Closed` and both sides have
    /// observed it. Wakes any caller parked in `wait_for_available_streams`.
    pub fn release_stream(&self, id: StreamId) {
        let freed = {
            let mut inner = self.inner.lock();
            let was_full = inner.streams.len() >= inner.max_concurrent;
            inner.streams.remove(&id);
            was_full && inner.streams.len() < inner.max_concurrent
        };
        if freed {
            self.availability.notify_waiters();
        }
    }

    /// Resets a single stream, firing its `on_reset` callback with the
    /// lock released first.
    pub fn reset_stream(&self, id: StreamId, reason: StreamError) {
        let callback = {
            let mut inner = self.inner.lock();
            inner.streams.get_mut(&id).and_then(|e| e.on_reset.take())
        };
        if let Some(cb) = callback {
            cb(reason);
        }
        self.release_stream(id);
    }

    pub async fn wait_for_available_streams(&self) -> Result<(), OperationError> {
        loop {
            {
                let inner = self.inner.lock();
                if inner.shutting_down {
                    return Err(OperationError::Unavailable);
                }
                if inner.streams.len() < inner.max_concurrent {
                    return Ok(());
                }
            }
            self.availability.notified().await;
        }
    }

    /// Marks the registry as draining: no new reservations succeed, but
    /// existing streams run to completion.
    pub fn shutdown(&self, reason: crate::frame::Reason) {
        let mut inner = self.inner.lock();
        inner.shutting_down = true;
        inner.shutdown_reason = Some(reason);
        drop(inner);
        self.availability.notify_waiters();
    }

    /// GOAWAY drain: marks the registry as draining and hands back every stream the peer's
    /// `last_stream_id` says it never processed. The caller is expected to
    /// reset each of those with `REFUSED_STREAM`; streams at or below
    /// `last_stream_id` are left untouched to run to completion.
    pub fn shutdown_and_drain(&self, reason: crate::frame::Reason, last_stream_id: StreamId) -> Vec<StreamId> {
        let mut inner = self.inner.lock();
        inner.shutting_down = true;
        inner.shutdown_reason = Some(reason);
        let refused: Vec<StreamId> = inner
            .streams
            .keys()
            .filter(|id| **id > last_stream_id)
            .copied()
            .collect();
        drop(inner);
        self.availability.notify_waiters();
        refused
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.lock().shutting_down
    }

    /// Tears every open stream down immediately, firing each `on_reset`
    /// outside the lock, then clears the map. Used by `Connection::abort`
    /// when the reader or writer loop dies.
    pub fn abort(&self, reason: StreamError) {
        let callbacks: Vec<_> = {
            let mut inner = self.inner.lock();
            inner.shutting_down = true;
            inner
                .streams
                .values_mut()
                .filter_map(|e| e.on_reset.take())
                .collect()
        };
        for cb in callbacks {
            cb(reason);
        }
        self.final_teardown();
    }

    pub fn final_teardown(&self) {
        let mut inner = self.inner.lock();
        inner.streams.clear();
        drop(inner);
        self.availability.notify_waiters();
    }

    pub fn open_count(&self) -> usize {
        self.inner.lock().streams.len()
    }

    /// A point-in-time snapshot of open stream ids, used to fan a
    /// SETTINGS-driven `InitialWindowSize` delta out to every stream's
    /// window. Streams that close mid-fan-out simply miss the adjustment,
    /// which is harmless — a closed stream's window is never read again.
    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.inner.lock().streams.keys().copied().collect()
    }
}
