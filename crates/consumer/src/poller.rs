//! Single-message poll loop
//!
//! Waits at the admission gate, fetches at most one message, commits it to a
//! worker and repeats. Never waits for processing to finish.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::gate::AdmissionGate;
use crate::lifecycle::Lifecycle;
use crate::pool::WorkerPool;
use crate::source::{MessageSource, Subscription};

/// Poller state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// Fetching and dispatching
    Running,
    /// Loop exited, shutdown in progress
    Stopping,
    /// Shutdown complete
    Stopped,
}

/// Why the poll loop exited
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerExit {
    /// Shutdown was requested
    Cancelled,
    /// The subscription was unsubscribed or invalidated
    SubscriptionInactive,
    /// A fetch failed; the loop does not retry
    FetchFailed(String),
}

pub struct Poller {
    source: Arc<dyn MessageSource>,
    subscription: Subscription,
    gate: Arc<AdmissionGate>,
    pool: Arc<WorkerPool>,
    lifecycle: Arc<Lifecycle>,
    fetch_timeout: Duration,
    state: watch::Sender<PollerState>,
}

impl Poller {
    pub fn new(
        source: Arc<dyn MessageSource>,
        subscription: Subscription,
        gate: Arc<AdmissionGate>,
        pool: Arc<WorkerPool>,
        lifecycle: Arc<Lifecycle>,
        fetch_timeout: Duration,
    ) -> Self {
        let (state, _) = watch::channel(PollerState::Running);
        Self {
            source,
            subscription,
            gate,
            pool,
            lifecycle,
            fetch_timeout,
            state,
        }
    }

    /// Receiver for state transitions
    pub fn state(&self) -> watch::Receiver<PollerState> {
        self.state.subscribe()
    }

    /// Run until cancelled or the source fails, then shut down
    pub async fn run(self) -> PollerExit {
        info!(
            subscription = %self.subscription.id(),
            capacity = self.gate.capacity(),
            "Poller started"
        );

        let exit = self.poll_loop().await;
        self.state.send_replace(PollerState::Stopping);

        match &exit {
            PollerExit::Cancelled => debug!("Poller cancelled"),
            PollerExit::SubscriptionInactive => info!("Subscription became inactive"),
            PollerExit::FetchFailed(reason) => warn!(%reason, "Poller stopping after fetch error"),
        }

        self.lifecycle.shutdown().await;
        self.state.send_replace(PollerState::Stopped);

        info!(?exit, "Poller stopped");
        exit
    }

    async fn poll_loop(&self) -> PollerExit {
        loop {
            if self.lifecycle.is_cancelled() {
                return PollerExit::Cancelled;
            }

            tokio::select! {
                biased;
                _ = self.lifecycle.cancelled() => return PollerExit::Cancelled,
                _ = self.gate.acquire() => {}
            }

            let messages = match self
                .source
                .fetch(&self.subscription, 1, self.fetch_timeout)
                .await
            {
                Ok(messages) => messages,
                Err(e) if self.lifecycle.is_cancelled() => {
                    if !e.is_inactive_subscription() {
                        warn!(error = %e, "Fetch failed after shutdown was requested");
                    }
                    return PollerExit::Cancelled;
                }
                Err(e) if e.is_inactive_subscription() => return PollerExit::SubscriptionInactive,
                Err(e) => {
                    error!(error = %e, "Error fetching message");
                    return PollerExit::FetchFailed(e.to_string());
                }
            };

            for message in messages {
                // Only this loop reserves, so the slot seen at the gate is still free
                let permit = self.gate.reserve().await;
                let sequence = message.stream_sequence();

                if let Err(e) = self.pool.submit(message, permit) {
                    warn!(
                        stream_sequence = sequence,
                        error = %e,
                        "Message not dispatched, leaving for redelivery"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerConfig, InMemoryBroker};
    use crate::config::WaitStrategy;
    use crate::message::Message;
    use crate::processor::SimulatedProcessor;
    use crate::source::{SourceError, SubscriptionSpec};

    const SUBJECT: &str = "poller.test";

    struct Harness {
        broker: Arc<InMemoryBroker>,
        subscription: Subscription,
        gate: Arc<AdmissionGate>,
        pool: Arc<WorkerPool>,
        lifecycle: Arc<Lifecycle>,
    }

    async fn harness(messages: usize, workers: usize, delay: Duration) -> Harness {
        let broker = Arc::new(InMemoryBroker::new(BrokerConfig::default()));
        broker
            .create_stream("POLL", vec![SUBJECT.to_string()])
            .unwrap();
        for i in 0..messages {
            broker.publish(SUBJECT, i.to_string().into_bytes()).unwrap();
        }

        let subscription = broker
            .subscribe(&SubscriptionSpec::new(SUBJECT, "POLL-C", "POLL"))
            .await
            .unwrap();
        let gate = Arc::new(AdmissionGate::new(workers, WaitStrategy::Notify));
        let pool = Arc::new(WorkerPool::new(
            broker.clone(),
            Arc::new(SimulatedProcessor::new(delay)),
        ));
        let lifecycle = Arc::new(Lifecycle::new(
            broker.clone(),
            subscription.clone(),
            pool.clone(),
        ));

        Harness {
            broker,
            subscription,
            gate,
            pool,
            lifecycle,
        }
    }

    fn poller(h: &Harness, fetch_timeout: Duration) -> Poller {
        Poller::new(
            h.broker.clone(),
            h.subscription.clone(),
            h.gate.clone(),
            h.pool.clone(),
            h.lifecycle.clone(),
            fetch_timeout,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_on_inactive_subscription() {
        let h = harness(0, 2, Duration::ZERO).await;
        let poller = poller(&h, Duration::from_secs(5));
        let mut state = poller.state();
        let task = tokio::spawn(poller.run());

        assert_eq!(*state.borrow(), PollerState::Running);
        h.broker.invalidate(&h.subscription);

        assert_eq!(task.await.unwrap(), PollerExit::SubscriptionInactive);
        state.changed().await.ok();
        assert_eq!(*state.borrow(), PollerState::Stopped);
        assert_eq!(h.lifecycle.shutdown_runs(), 1);
        assert!(h.pool.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_on_fetch_error_without_retry() {
        let h = harness(3, 2, Duration::ZERO).await;
        h.broker.fail_next_fetch("connection reset");

        let exit = poller(&h, Duration::from_secs(5)).run().await;

        assert_eq!(
            exit,
            PollerExit::FetchFailed("fetch error: connection reset".into())
        );
        assert_eq!(h.broker.stats().fetches, 1);
        assert_eq!(h.broker.stream_len("POLL").unwrap(), 3);
        assert!(h.lifecycle.is_cancelled());
    }

    /// Fetch stalls for a second, then fails
    struct StalledFetch(InMemoryBroker);

    #[async_trait::async_trait]
    impl MessageSource for StalledFetch {
        async fn subscribe(&self, spec: &SubscriptionSpec) -> Result<Subscription, SourceError> {
            self.0.subscribe(spec).await
        }

        async fn fetch(
            &self,
            _subscription: &Subscription,
            _max: usize,
            _timeout: Duration,
        ) -> Result<Vec<Message>, SourceError> {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Err(SourceError::Fetch("connection reset".into()))
        }

        async fn ack(&self, message: &Message) -> Result<(), SourceError> {
            self.0.ack(message).await
        }

        async fn unsubscribe(&self, subscription: &Subscription) -> Result<(), SourceError> {
            self.0.unsubscribe(subscription).await
        }
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_fault_during_shutdown_is_logged() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer({
                let logs = logs.clone();
                move || logs.clone()
            })
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let broker = InMemoryBroker::new(BrokerConfig::default());
        broker
            .create_stream("STALL", vec!["stall.test".to_string()])
            .unwrap();
        let source: Arc<dyn MessageSource> = Arc::new(StalledFetch(broker));
        let subscription = source
            .subscribe(&SubscriptionSpec::new("stall.test", "STALL-C", "STALL"))
            .await
            .unwrap();
        let gate = Arc::new(AdmissionGate::new(1, WaitStrategy::Notify));
        let pool = Arc::new(WorkerPool::new(
            source.clone(),
            Arc::new(SimulatedProcessor::new(Duration::ZERO)),
        ));
        let lifecycle = Arc::new(Lifecycle::new(
            source.clone(),
            subscription.clone(),
            pool.clone(),
        ));

        let task = tokio::spawn(
            Poller::new(
                source,
                subscription,
                gate,
                pool,
                lifecycle.clone(),
                Duration::from_secs(5),
            )
            .run(),
        );

        // Shutdown lands while the fetch is still in progress
        tokio::time::sleep(Duration::from_millis(10)).await;
        lifecycle.shutdown().await;

        assert_eq!(task.await.unwrap(), PollerExit::Cancelled);
        let output = String::from_utf8_lossy(&logs.0.lock()).into_owned();
        assert!(output.contains("Fetch failed after shutdown was requested"));
        assert!(output.contains("connection reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_gate_is_closed() {
        let h = harness(5, 1, Duration::from_secs(60)).await;
        let task = tokio::spawn(poller(&h, Duration::from_secs(5)).run());

        // Let the single worker pick up a message and block the gate
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.gate.free_slots(), 0);

        h.lifecycle.shutdown().await;
        assert_eq!(task.await.unwrap(), PollerExit::Cancelled);
        assert_eq!(h.broker.stats().fetches, 1);
        assert_eq!(h.pool.active_units(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatches_without_waiting_for_processing() {
        let h = harness(3, 3, Duration::from_secs(1)).await;
        let task = tokio::spawn(poller(&h, Duration::from_secs(5)).run());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.gate.in_flight(), 3);
        assert_eq!(h.pool.active_units(), 3);

        h.lifecycle.shutdown().await;
        task.await.unwrap();
        h.pool.drain(Duration::from_secs(5)).await.unwrap();
        assert_eq!(h.pool.stats().acknowledged, 3);
    }
}
