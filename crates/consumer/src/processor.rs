//! Message processing hook

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::message::Message;

/// Processing outcome other than success
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessError {
    /// Processing was interrupted before it completed
    #[error("processing cancelled")]
    Cancelled,

    /// Processing failed
    #[error("processing failed: {0}")]
    Failed(String),
}

/// Domain-specific processing of a single message
///
/// Returning `Ok` causes the message to be acknowledged. Any error leaves it
/// unacknowledged so the broker redelivers it.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, message: &Message) -> Result<(), ProcessError>;
}

/// Processor that simulates work by sleeping
#[derive(Debug, Clone)]
pub struct SimulatedProcessor {
    delay: Duration,
}

impl SimulatedProcessor {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for SimulatedProcessor {
    fn default() -> Self {
        Self::new(Duration::from_millis(1500))
    }
}

#[async_trait]
impl MessageProcessor for SimulatedProcessor {
    async fn process(&self, _message: &Message) -> Result<(), ProcessError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(())
    }
}

/// Processor backed by a closure
pub struct FnProcessor<F> {
    f: F,
}

/// Wrap a closure as a [`MessageProcessor`]
///
/// The closure receives an owned copy of the message.
///
/// ```
/// use pullq_consumer::{processor_fn, ProcessError};
///
/// let processor = processor_fn(|message| async move {
///     if message.payload().is_empty() {
///         return Err(ProcessError::Failed("empty payload".into()));
///     }
///     Ok(())
/// });
/// # let _ = processor;
/// ```
pub fn processor_fn<F, Fut>(f: F) -> FnProcessor<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ProcessError>> + Send + 'static,
{
    FnProcessor { f }
}

#[async_trait]
impl<F, Fut> MessageProcessor for FnProcessor<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ProcessError>> + Send + 'static,
{
    async fn process(&self, message: &Message) -> Result<(), ProcessError> {
        (self.f)(message.clone()).await
    }
}
