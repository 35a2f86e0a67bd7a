//! Priority-ordered pending-frame queue (§4.B).
//!
//! The teacher's node-local queues are plain `embassy_sync::channel::Channel`s
//! because FIFO is good enough there; the send queue needs strict priority
//! ordering on top, so it is built directly on an `embassy_sync::mutex::Mutex`
//! guarding a `Vec`, plus a `Signal` used to wake a waiting consumer — the
//! "in_use guard" from §9 is this mutex's RAII guard, not a hand-rolled flag.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embassy_sync::signal::Signal;

/// Highest legal priority (§3): "priority in 0..=MAX_PRIORITY".
pub const MAX_PRIORITY: u8 = 40;
/// Priority used for Hello beacons and other background traffic.
pub const DEFAULT_PRIORITY: u8 = 20;

struct Entry<T> {
    priority: u8,
    seq: u64,
    item: T,
}

/// Priority-ordered list of pending frames. Strict priority; FIFO among
/// entries of equal priority.
pub struct PacketQueue<M: RawMutex, T> {
    inner: Mutex<M, Vec<Entry<T>>>,
    non_empty: Signal<M, ()>,
    next_seq: Mutex<M, u64>,
}

impl<M: RawMutex, T> PacketQueue<M, T> {
    pub const fn new() -> Self {
        PacketQueue {
            inner: Mutex::new(Vec::new()),
            non_empty: Signal::new(),
            next_seq: Mutex::new(0),
        }
    }

    /// Inserts `item` ordered by `priority` (higher first), FIFO among ties,
    /// and wakes any task waiting in [`PacketQueue::pop_highest`].
    pub async fn push_ordered(&self, item: T, priority: u8) {
        let mut seq_guard = self.next_seq.lock().await;
        let seq = *seq_guard;
        *seq_guard = seq.wrapping_add(1);
        drop(seq_guard);

        let entry = Entry {
            priority,
            seq,
            item,
        };
        let mut guard = self.inner.lock().await;
        let pos = guard
            .iter()
            .position(|e| e.priority < entry.priority)
            .unwrap_or(guard.len());
        guard.insert(pos, entry);
        drop(guard);
        self.non_empty.signal(());
    }

    /// Removes and returns the highest-priority entry, waiting if the queue
    /// is empty.
    pub async fn pop_highest(&self) -> T {
        loop {
            {
                let mut guard = self.inner.lock().await;
                if !guard.is_empty() {
                    return guard.remove(0).item;
                }
            }
            self.non_empty.wait().await;
        }
    }

    /// Non-blocking variant of [`PacketQueue::pop_highest`].
    pub async fn try_pop_highest(&self) -> Option<T> {
        let mut guard = self.inner.lock().await;
        if guard.is_empty() {
            None
        } else {
            Some(guard.remove(0).item)
        }
    }

    pub async fn length(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Scoped acquisition of mutation rights over the raw list, released
    /// automatically when the guard is dropped — the "in_use" semantics of
    /// §9, expressed as an ordinary `MutexGuard`.
    pub async fn in_use_guard(&self) -> MutexGuard<'_, M, Vec<Entry<T>>> {
        self.inner.lock().await
    }
}

impl<T> Entry<T> {
    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn item(&self) -> &T {
        &self.item
    }

    pub fn into_item(self) -> T {
        self.item
    }
}
