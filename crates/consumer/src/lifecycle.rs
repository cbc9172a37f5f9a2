//! One-shot shutdown coordination
//!
//! Owns the `cancelled` flag. The first [`Lifecycle::shutdown`] call sets it,
//! unsubscribes and closes the worker pool. Every later or concurrent call
//! waits for that sequence to finish and does nothing else.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::pool::WorkerPool;
use crate::source::{MessageSource, Subscription};

pub struct Lifecycle {
    source: Arc<dyn MessageSource>,
    subscription: Subscription,
    pool: Arc<WorkerPool>,
    cancelled: AtomicBool,
    stop: CancellationToken,
    done: CancellationToken,
    shutdown_runs: AtomicUsize,
}

impl Lifecycle {
    pub fn new(
        source: Arc<dyn MessageSource>,
        subscription: Subscription,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            source,
            subscription,
            pool,
            cancelled: AtomicBool::new(false),
            stop: CancellationToken::new(),
            done: CancellationToken::new(),
            shutdown_runs: AtomicUsize::new(0),
        }
    }

    /// Stop consuming
    ///
    /// Sets the cancelled flag, unsubscribes if the subscription is still
    /// active and stops the pool from accepting new work. In-flight units are
    /// left to finish. Cleanup failures are logged, never returned.
    ///
    /// Returns only once the shutdown sequence has completed, whichever
    /// caller ran it.
    pub async fn shutdown(&self) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Shutdown already started, waiting for it to complete");
            self.done.cancelled().await;
            return;
        }
        self.shutdown_runs.fetch_add(1, Ordering::AcqRel);

        info!(subscription = %self.subscription.id(), "Shutting down...");
        self.stop.cancel();

        self.clean_unsubscribe().await;
        self.pool.close();

        self.done.cancel();

        info!(
            in_flight_units = self.pool.active_units(),
            "Shut down"
        );
    }

    /// Whether shutdown has started
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once shutdown has started
    pub async fn cancelled(&self) {
        self.stop.cancelled().await
    }

    /// Whether the shutdown sequence has completed
    pub fn is_shut_down(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Number of times the shutdown sequence actually ran (0 or 1)
    pub fn shutdown_runs(&self) -> usize {
        self.shutdown_runs.load(Ordering::Acquire)
    }

    async fn clean_unsubscribe(&self) {
        if !self.subscription.is_active() {
            debug!("Subscription already inactive, skipping unsubscribe");
            return;
        }

        match self.source.unsubscribe(&self.subscription).await {
            Ok(()) => debug!("Unsubscribed"),
            Err(e) if e.is_already_unsubscribed() => {
                debug!("Subscription was already unsubscribed");
            }
            Err(e) => error!(error = %e, "Error unsubscribing"),
        }
    }
}
