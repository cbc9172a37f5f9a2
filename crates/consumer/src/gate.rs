//! Admission gate for credit-based flow control
//!
//! Tracks free worker slots. The poller waits at the gate before fetching and
//! reserves a slot when it commits a message to a worker; the slot is released
//! when the worker's [`SlotPermit`] is dropped.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::error;

use crate::config::WaitStrategy;

/// Free-slot counter bounded in `[0, capacity]`
///
/// `capacity - free_slots()` always equals the number of outstanding
/// [`SlotPermit`]s.
pub struct AdmissionGate {
    capacity: usize,
    free: AtomicUsize,
    peak_in_flight: AtomicUsize,
    strategy: WaitStrategy,
    released: Notify,
}

impl AdmissionGate {
    /// Create a gate with `capacity` free slots (at least 1)
    pub fn new(capacity: usize, strategy: WaitStrategy) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            free: AtomicUsize::new(capacity),
            peak_in_flight: AtomicUsize::new(0),
            strategy,
            released: Notify::new(),
        }
    }

    /// Wait until at least one slot is free
    ///
    /// Does not reserve the slot; see [`try_reserve`](Self::try_reserve).
    pub async fn acquire(&self) {
        match self.strategy {
            WaitStrategy::Notify => loop {
                let notified = self.released.notified();
                tokio::pin!(notified);
                // Register before checking so a release in between is not lost
                notified.as_mut().enable();

                if self.free_slots() > 0 {
                    return;
                }
                notified.await;
            },
            WaitStrategy::Poll { interval } => {
                while self.free_slots() == 0 {
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }

    /// Atomically reserve a slot if one is free
    pub fn try_reserve(self: &Arc<Self>) -> Option<SlotPermit> {
        let previous = self
            .free
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |free| {
                free.checked_sub(1)
            })
            .ok()?;

        let in_flight = self.capacity - (previous - 1);
        self.peak_in_flight.fetch_max(in_flight, Ordering::AcqRel);

        Some(SlotPermit {
            gate: Arc::clone(self),
        })
    }

    /// Wait for a free slot and reserve it
    pub async fn reserve(self: &Arc<Self>) -> SlotPermit {
        loop {
            if let Some(permit) = self.try_reserve() {
                return permit;
            }
            self.acquire().await;
        }
    }

    /// Number of free slots
    pub fn free_slots(&self) -> usize {
        self.free.load(Ordering::Acquire)
    }

    /// Number of reserved slots
    pub fn in_flight(&self) -> usize {
        self.capacity - self.free_slots()
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Highest number of simultaneously reserved slots seen so far
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Acquire)
    }

    fn release(&self) {
        let result = self
            .free
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |free| {
                (free < self.capacity).then_some(free + 1)
            });

        match result {
            Ok(_) => self.released.notify_waiters(),
            Err(free) => error!(
                free,
                capacity = self.capacity,
                "Slot released while all slots were already free; ignoring"
            ),
        }
    }
}

impl fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("capacity", &self.capacity)
            .field("free", &self.free_slots())
            .field("strategy", &self.strategy)
            .finish()
    }
}

/// A reserved worker slot
///
/// Released exactly once, when dropped.
pub struct SlotPermit {
    gate: Arc<AdmissionGate>,
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}

impl fmt::Debug for SlotPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotPermit")
            .field("free_after_release", &(self.gate.free_slots() + 1))
            .finish()
    }
}
