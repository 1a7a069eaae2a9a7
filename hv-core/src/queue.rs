//! Bounded raw-block queue between the USB reader and the decoder.
//!
//! Overflow drops the oldest block: live viewing prefers fresh data over a
//! frozen backlog. Channel types were avoided on purpose, their bounded
//! variants block or drop the newest element instead.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Default capacity, sized to absorb multi-second USB stalls.
pub const DEFAULT_CAPACITY: usize = 6000;

struct Inner {
    blocks: VecDeque<Vec<u8>>,
    dropped: u64,
}

/// Bounded FIFO of raw USB blocks with drop-oldest overflow.
pub struct BlockQueue {
    capacity: usize,
    inner: Mutex<Inner>,
    available: Condvar,
}

impl BlockQueue {
    /// Creates a queue holding at most `capacity` blocks.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            capacity,
            inner: Mutex::new(Inner {
                blocks: VecDeque::with_capacity(capacity),
                dropped: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueues a block, evicting the oldest one when full. Never blocks.
    pub fn push(&self, block: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.blocks.len() == self.capacity {
            inner.blocks.pop_front();
            inner.dropped += 1;
        }
        inner.blocks.push_back(block);
        drop(inner);
        self.available.notify_one();
    }

    /// Dequeues the oldest block, waiting up to `timeout` for one to arrive.
    pub fn pop(&self, timeout: Duration) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        let (mut inner, _) = self
            .available
            .wait_timeout_while(inner, timeout, |inner| inner.blocks.is_empty())
            .unwrap();
        inner.blocks.pop_front()
    }

    /// Empties the queue atomically, returning the number of blocks removed.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let cleared = inner.blocks.len();
        inner.blocks.clear();
        cleared
    }

    /// Number of blocks currently queued.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().blocks.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of blocks evicted by overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().unwrap().dropped
    }

    /// Wakes every waiting consumer, e.g. on shutdown.
    pub fn notify_all(&self) {
        self.available.notify_all();
    }
}
