//! A pool-facing lock-free LIFO of idle connections. Pop and push never
//! hold a lock across their CAS retry loop; only `register`/`unregister`
//! (connection creation/destruction, rare relative to pop/push) take a
//! short lock to grow the slot array.
//!
//! Each connection gets a stable fixed-index *entry* at registration. The
//! entry is the linked-list node; the stack head is a single 64-bit word
//! packing `{head_index:32, push_count:32}`. Every pop CAS bumps
//! `push_count` on the entry it leaves, so a reader holding a stale view
//! of the head can never mistake a recycled entry for the one it
//! originally observed — the classic ABA hazard.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

const SENTINEL: u32 = u32::MAX;

struct Entry<T> {
    next_index: AtomicU32,
    push_count: AtomicU32,
    owner: parking_lot::Mutex<Option<T>>,
}

impl<T> Entry<T> {
    fn empty() -> Self {
        Entry {
            next_index: AtomicU32::new(SENTINEL),
            push_count: AtomicU32::new(0),
            owner: parking_lot::Mutex::new(None),
        }
    }
}

fn pack(index: u32, count: u32) -> u64 {
    ((index as u64) << 32) | (count as u64)
}

fn unpack(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, word as u32)
}

/// A lock-free stack of idle connections, most-recently-used first.
pub struct IdleStack<T> {
    head: AtomicU64,
    entries: parking_lot::Mutex<Vec<Entry<T>>>,
    free: parking_lot::Mutex<Vec<u32>>,
}

impl<T> IdleStack<T> {
    pub fn new() -> Self {
        IdleStack {
            head: AtomicU64::new(pack(SENTINEL, 0)),
            entries: parking_lot::Mutex::new(Vec::new()),
            free: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Allocates a stable index for a newly created connection. Growing
    /// the slot array only ever appends — existing indices, and any
    /// in-flight reader holding one, stay valid.
    pub fn register(&self) -> u32 {
        let mut free = self.free.lock();
        if let Some(idx) = free.pop() {
            return idx;
        }
        drop(free);

        let mut entries = self.entries.lock();
        if entries.is_empty() {
            entries.reserve(4);
        }
        let idx = entries.len() as u32;
        entries.push(Entry::empty());
        idx
    }

    /// Returns a connection's index to the free list. Caller must ensure
    /// the connection isn't currently sitting in the stack.
    pub fn unregister(&self, index: u32) {
        self.free.lock().push(index);
    }

    /// Pushes the connection at `index` onto the stack, rooting `conn` in
    /// the entry's `owner` slot.
    pub fn push(&self, index: u32, conn: T) {
        {
            let entries = self.entries.lock();
            let entry = &entries[index as usize];
            *entry.owner.lock() = Some(conn);
            entry.push_count.fetch_add(1, Ordering::AcqRel);
        }

        loop {
            let old_head = self.head.load(Ordering::Acquire);
            let (old_index, old_count) = unpack(old_head);

            {
                let entries = self.entries.lock();
                entries[index as usize].next_index.store(old_index, Ordering::Release);
            }

            let new_head = pack(index, old_count.wrapping_add(1));
            if self
                .head
                .compare_exchange(old_head, new_head, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }
    }

    /// Pops the most-recently-pushed connection, if any. Clears the
    /// entry's `owner` slot so an idle connection isn't rooted against
    /// reclamation once it's handed back out.
    pub fn pop(&self) -> Option<T> {
        loop {
            let old_head = self.head.load(Ordering::Acquire);
            let (old_index, old_count) = unpack(old_head);
            if old_index == SENTINEL {
                return None;
            }

            let entries = self.entries.lock();
            let entry = &entries[old_index as usize];
            let next_index = entry.next_index.load(Ordering::Acquire);
            drop(entries);

            let new_head = pack(next_index, old_count.wrapping_add(1));
            if self
                .head
                .compare_exchange(old_head, new_head, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let entries = self.entries.lock();
                let entry = &entries[old_index as usize];
                let conn = entry.owner.lock().take();
                if conn.is_some() {
                    return conn;
                }
                // Another pop raced us to the same generation somehow —
                // shouldn't happen given the CAS above, but don't spin
                // forever on a logic bug; fall through to retry the loop.
            }
        }
    }
}

impl<T> Default for IdleStack<T> {
    fn default() -> Self {
        Self::new()
    }
}
