//! Worker pool for message processing
//!
//! Each submitted message runs as an isolated unit: process, acknowledge on
//! success, and release the reserved slot on every exit path. Units are
//! tracked so the pool can stop accepting work and drain what is in flight.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::gate::SlotPermit;
use crate::message::Message;
use crate::processor::{MessageProcessor, ProcessError};
use crate::source::MessageSource;

/// Worker pool errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The pool no longer accepts work
    #[error("worker pool is closed")]
    Closed,

    /// In-flight units did not finish in time
    #[error("drain timed out with {remaining} units still running")]
    DrainTimeout { remaining: usize },
}

/// Outcome counters for worker units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub acknowledged: u64,
    pub ack_failed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

#[derive(Default)]
struct Counters {
    acknowledged: AtomicU64,
    ack_failed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

/// Fixed-capacity pool of isolated worker units
///
/// Capacity is enforced by the [`SlotPermit`] each submission carries; the
/// pool itself only runs and tracks units.
pub struct WorkerPool {
    source: Arc<dyn MessageSource>,
    processor: Arc<dyn MessageProcessor>,
    tracker: TaskTracker,
    abort: CancellationToken,
    next_unit: AtomicU64,
    counters: Arc<Counters>,
}

impl WorkerPool {
    pub fn new(source: Arc<dyn MessageSource>, processor: Arc<dyn MessageProcessor>) -> Self {
        Self {
            source,
            processor,
            tracker: TaskTracker::new(),
            abort: CancellationToken::new(),
            next_unit: AtomicU64::new(0),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Run `message` on a new worker unit
    ///
    /// The unit owns `permit` and releases it when it finishes. If the pool is
    /// closed the permit is released immediately and the message is left
    /// unacknowledged.
    pub fn submit(&self, message: Message, permit: SlotPermit) -> Result<(), PoolError> {
        if self.tracker.is_closed() {
            drop(permit);
            return Err(PoolError::Closed);
        }

        let unit = self.next_unit.fetch_add(1, Ordering::Relaxed) + 1;
        let span = info_span!(
            "unit",
            unit,
            stream_sequence = message.stream_sequence(),
            delivered_count = message.delivered_count()
        );

        let work = run_unit(
            Arc::clone(&self.source),
            Arc::clone(&self.processor),
            message,
            permit,
            self.abort.clone(),
            Arc::clone(&self.counters),
        );
        self.tracker.spawn(work.instrument(span));
        Ok(())
    }

    /// Stop accepting new work
    ///
    /// Returns `true` if this call closed the pool. In-flight units keep running.
    pub fn close(&self) -> bool {
        self.tracker.close()
    }

    pub fn is_closed(&self) -> bool {
        self.tracker.is_closed()
    }

    /// Number of units still running
    pub fn active_units(&self) -> usize {
        self.tracker.len()
    }

    /// Close the pool and wait for in-flight units to finish
    pub async fn drain(&self, timeout: Duration) -> Result<(), PoolError> {
        self.close();

        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => {
                debug!("All worker units finished");
                Ok(())
            }
            Err(_) => {
                let remaining = self.tracker.len();
                warn!(remaining, "Drain timed out");
                Err(PoolError::DrainTimeout { remaining })
            }
        }
    }

    /// Close the pool and interrupt in-flight units
    ///
    /// Interrupted units do not acknowledge their messages.
    pub fn abort_in_flight(&self) {
        self.close();
        self.abort.cancel();
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            acknowledged: self.counters.acknowledged.load(Ordering::Relaxed),
            ack_failed: self.counters.ack_failed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
        }
    }
}

async fn run_unit(
    source: Arc<dyn MessageSource>,
    processor: Arc<dyn MessageProcessor>,
    message: Message,
    permit: SlotPermit,
    abort: CancellationToken,
    counters: Arc<Counters>,
) {
    // Released on every exit path, including unwinding
    let _permit = permit;
    let sequence = message.stream_sequence();

    info!(
        stream_sequence = sequence,
        delivered_count = message.delivered_count(),
        "Processing message"
    );

    let result = tokio::select! {
        _ = abort.cancelled() => Err(ProcessError::Cancelled),
        caught = AssertUnwindSafe(processor.process(&message)).catch_unwind() => {
            caught.unwrap_or_else(|panic| {
                Err(ProcessError::Failed(format!("panicked: {}", panic_message(&*panic))))
            })
        }
    };

    match result {
        Ok(()) => match source.ack(&message).await {
            Ok(()) => {
                counters.acknowledged.fetch_add(1, Ordering::Relaxed);
                info!(stream_sequence = sequence, "Acknowledged message");
            }
            Err(e) => {
                counters.ack_failed.fetch_add(1, Ordering::Relaxed);
                error!(stream_sequence = sequence, error = %e, "Failed to acknowledge message");
            }
        },
        Err(ProcessError::Cancelled) => {
            counters.cancelled.fetch_add(1, Ordering::Relaxed);
            warn!(
                stream_sequence = sequence,
                "Message processing interrupted, leaving for redelivery"
            );
        }
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            error!(
                stream_sequence = sequence,
                error = %e,
                "Message processing failed, leaving for redelivery"
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
