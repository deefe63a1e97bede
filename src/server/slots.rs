//! Connection slots bounding the number of concurrently served clients.
//!
//! A bounded channel pre-filled with one token per slot. The acceptor takes a
//! token before accepting; the token returns to the channel when the
//! connection's [`SlotGuard`] drops.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

/// Pool of connection slots.
#[derive(Debug, Clone)]
pub struct SlotPool {
    tx: Sender<()>,
    rx: Receiver<()>,
    capacity: usize,
}

impl SlotPool {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        for _ in 0..capacity {
            // Cannot fail: the channel has room for every token.
            let _ = tx.try_send(());
        }
        Self { tx, rx, capacity }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Waits up to `timeout` for a free slot.
    #[must_use]
    pub fn acquire(&self, timeout: Duration) -> Option<SlotGuard> {
        match self.rx.recv_timeout(timeout) {
            Ok(()) => Some(SlotGuard {
                tx: self.tx.clone(),
            }),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }
}

/// A held slot; released on drop.
#[derive(Debug)]
pub struct SlotGuard {
    tx: Sender<()>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let _ = self.tx.try_send(());
    }
}
