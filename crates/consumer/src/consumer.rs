//! Consumer facade
//!
//! Wires the admission gate, worker pool, lifecycle controller and poller
//! together for one subscription.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::config::ConsumerConfig;
use crate::gate::AdmissionGate;
use crate::lifecycle::Lifecycle;
use crate::poller::{Poller, PollerExit, PollerState};
use crate::pool::{PoolError, PoolStats, WorkerPool};
use crate::processor::MessageProcessor;
use crate::source::{MessageSource, SourceError, Subscription};

/// Consumer errors
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    /// Configuration rejected by validation
    #[error("invalid consumer configuration: {0}")]
    InvalidConfig(String),

    /// Source error
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Worker pool error
    #[error("worker pool error: {0}")]
    Pool(#[from] PoolError),

    /// The poller task panicked or was aborted
    #[error("poller task failed: {0}")]
    PollerJoin(String),
}

enum PollerTask {
    Running(JoinHandle<PollerExit>),
    Finished(PollerExit),
    Failed(String),
}

/// A running pull consumer
///
/// # Example
///
/// ```ignore
/// let consumer = Consumer::start(source, processor, config).await?;
///
/// // ... later, from any task
/// consumer.shutdown().await;
/// consumer.drain(Duration::from_secs(30)).await?;
/// let exit = consumer.wait_stopped().await?;
/// ```
pub struct Consumer {
    id: Uuid,
    config: ConsumerConfig,
    subscription: Subscription,
    gate: Arc<AdmissionGate>,
    pool: Arc<WorkerPool>,
    lifecycle: Arc<Lifecycle>,
    state: watch::Receiver<PollerState>,
    poller: Mutex<PollerTask>,
}

impl Consumer {
    /// Subscribe and start polling
    pub async fn start(
        source: Arc<dyn MessageSource>,
        processor: Arc<dyn MessageProcessor>,
        config: ConsumerConfig,
    ) -> Result<Self, ConsumerError> {
        config.validate().map_err(ConsumerError::InvalidConfig)?;

        let id = Uuid::now_v7();
        info!(
            consumer = %id,
            stream = %config.stream_name,
            durable = %config.durable_name,
            subject = %config.subject,
            workers = config.worker_count,
            "Starting consumer"
        );

        let subscription = source.subscribe(&config.subscription_spec()).await?;

        let gate = Arc::new(AdmissionGate::new(
            config.worker_count,
            config.wait_strategy,
        ));
        let pool = Arc::new(WorkerPool::new(Arc::clone(&source), processor));
        let lifecycle = Arc::new(Lifecycle::new(
            Arc::clone(&source),
            subscription.clone(),
            Arc::clone(&pool),
        ));

        let poller = Poller::new(
            source,
            subscription.clone(),
            Arc::clone(&gate),
            Arc::clone(&pool),
            Arc::clone(&lifecycle),
            config.fetch_timeout,
        );
        let state = poller.state();
        let handle = tokio::spawn(poller.run().instrument(info_span!("poller", consumer = %id)));

        Ok(Self {
            id,
            config,
            subscription,
            gate,
            pool,
            lifecycle,
            state,
            poller: Mutex::new(PollerTask::Running(handle)),
        })
    }

    /// Request shutdown (idempotent)
    ///
    /// In-flight messages keep processing; use [`drain`](Self::drain) to wait
    /// for them.
    pub async fn shutdown(&self) {
        self.lifecycle.shutdown().await
    }

    /// Wait for in-flight units after the pool was closed
    pub async fn drain(&self, timeout: Duration) -> Result<(), ConsumerError> {
        self.pool.drain(timeout).await?;
        Ok(())
    }

    /// Interrupt in-flight units; their messages stay unacknowledged
    pub fn abort_in_flight(&self) {
        self.pool.abort_in_flight()
    }

    /// Wait for the poller to stop and return why it stopped
    pub async fn wait_stopped(&self) -> Result<PollerExit, ConsumerError> {
        let mut task = self.poller.lock().await;

        let joined = match &mut *task {
            PollerTask::Finished(exit) => return Ok(exit.clone()),
            PollerTask::Failed(reason) => return Err(ConsumerError::PollerJoin(reason.clone())),
            PollerTask::Running(handle) => handle.await,
        };

        match joined {
            Ok(exit) => {
                *task = PollerTask::Finished(exit.clone());
                Ok(exit)
            }
            Err(e) => {
                let reason = e.to_string();
                *task = PollerTask::Failed(reason.clone());
                Err(ConsumerError::PollerJoin(reason))
            }
        }
    }

    pub fn poller_state(&self) -> PollerState {
        *self.state.borrow()
    }

    /// Receiver for poller state transitions
    pub fn state_changes(&self) -> watch::Receiver<PollerState> {
        self.state.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.lifecycle.is_cancelled()
    }

    /// Number of times the shutdown sequence actually ran (0 or 1)
    pub fn shutdown_runs(&self) -> usize {
        self.lifecycle.shutdown_runs()
    }

    pub fn free_slots(&self) -> usize {
        self.gate.free_slots()
    }

    pub fn in_flight(&self) -> usize {
        self.gate.in_flight()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.gate.peak_in_flight()
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}
