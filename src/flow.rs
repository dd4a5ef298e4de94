//! Per-stream flow-control credit.
//!
//! `CreditManager` holds a stream's (or the connection's) signed
//! flow-control window and a FIFO of waiters. Waking is always FIFO and
//! always grants `min(requested, window, max_frame_size)` per waiter,
//! matching the wire-level DATA frame size limit so a granted waiter never
//! needs a second round trip to learn it must split its write.

use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::error::StreamError;

const MAX_GRANT: u32 = 1 << 14;

struct Waiter {
    requested: u32,
    result: oneshot::Sender<Result<u32, StreamError>>,
    cancelled: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

/// A single flow-control window shared by one stream (or, for the
/// connection window, the whole connection).
pub struct CreditManager {
    inner: parking_lot::Mutex<Inner>,
}

struct Inner {
    window: i64,
    waiters: VecDeque<Waiter>,
}

pub struct CreditRequest {
    rx: oneshot::Receiver<Result<u32, StreamError>>,
    cancelled: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl CreditRequest {
    pub async fn wait(self) -> Result<u32, StreamError> {
        match self.rx.await {
            Ok(r) => r,
            Err(_) => Err(StreamError::WindowOverflowed),
        }
    }

    /// Cancels the reservation. If credit had already been granted before
    /// cancellation raced in, the caller is responsible for not spending
    /// it — a cancelled coordinator must not re-credit the window.
    pub fn cancel(&self) {
        self.cancelled.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

impl CreditManager {
    pub fn new(initial_window: i32) -> CreditManager {
        CreditManager {
            inner: parking_lot::Mutex::new(Inner {
                window: initial_window as i64,
                waiters: VecDeque::new(),
            }),
        }
    }

    pub fn window(&self) -> i64 {
        self.inner.lock().window
    }

    /// Requests up to `n` bytes of credit. Resolves immediately if the
    /// window is already positive; otherwise parks a FIFO waiter.
    pub fn request_credit(&self, n: u32) -> CreditRequestOutcome {
        let mut inner = self.inner.lock();
        if inner.window > 0 {
            let granted = (n as i64).min(inner.window).min(MAX_GRANT as i64) as u32;
            inner.window -= granted as i64;
            return CreditRequestOutcome::Granted(granted);
        }

        let (tx, rx) = oneshot::channel();
        let cancelled = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        inner.waiters.push_back(Waiter {
            requested: n,
            result: tx,
            cancelled: cancelled.clone(),
        });
        CreditRequestOutcome::Pending(CreditRequest { rx, cancelled })
    }

    /// Applies `delta` to the window (e.g. from a WINDOW_UPDATE or a
    /// SETTINGS-driven `InitialWindowSize` change) and wakes FIFO waiters
    /// while the window stays positive.
    pub fn adjust_credit(&self, delta: i64) {
        let mut inner = self.inner.lock();
        inner.window += delta;

        while inner.window > 0 {
            let Some(waiter) = inner.waiters.front() else {
                break;
            };
            if waiter.cancelled.load(std::sync::atomic::Ordering::SeqCst) {
                inner.waiters.pop_front();
                continue;
            }
            let waiter = inner.waiters.pop_front().unwrap();
            let granted = (waiter.requested as i64).min(inner.window).min(MAX_GRANT as i64) as u32;
            inner.window -= granted as i64;
            let _ = waiter.result.send(Ok(granted));
        }
    }

    /// Directly decrements the window, used by the coordinator right
    /// before it enqueues bytes it already knows it has credit for,
    /// decremented under this lock before the bytes are handed to the
    /// writer.
    pub fn spend(&self, n: u32) {
        self.inner.lock().window -= n as i64;
    }

    /// Fails every pending waiter, used when a stream is reset or the
    /// connection aborts — the window itself is meaningless past this
    /// point.
    pub fn fail_all(&self, reason: StreamError) {
        let mut inner = self.inner.lock();
        for waiter in inner.waiters.drain(..) {
            let _ = waiter.result.send(Err(reason));
        }
    }
}

pub enum CreditRequestOutcome {
    Granted(u32),
    Pending(CreditRequest),
}
