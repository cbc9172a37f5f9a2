//! MessageSource trait definition
//!
//! The broker is an external collaborator. The consumer core only needs to
//! subscribe, fetch, acknowledge and unsubscribe; everything else (wire
//! format, connection management, storage) belongs to the implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::Message;

/// Error type for message source operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// The durable consumer could not be created
    #[error("subscription error: {0}")]
    Subscribe(String),

    /// The subscription was unsubscribed or invalidated by the broker
    #[error("subscription is no longer active")]
    InactiveSubscription,

    /// Transport or timeout fault while fetching
    #[error("fetch error: {0}")]
    Fetch(String),

    /// The broker rejected the acknowledgment
    #[error("ack error: {0}")]
    Ack(String),

    /// The subscription was already unsubscribed
    #[error("subscription already unsubscribed")]
    AlreadyUnsubscribed,

    /// Any other unsubscribe fault
    #[error("unsubscribe error: {0}")]
    Unsubscribe(String),
}

impl SourceError {
    /// Whether this is the expected terminal condition for a poller
    pub fn is_inactive_subscription(&self) -> bool {
        matches!(self, Self::InactiveSubscription)
    }

    /// Whether this unsubscribe outcome can be ignored
    pub fn is_already_unsubscribed(&self) -> bool {
        matches!(self, Self::AlreadyUnsubscribed)
    }
}

/// Where a durable subscription attaches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSpec {
    /// Subject filter
    pub subject: String,

    /// Durable consumer name, tracked by the broker across restarts
    pub durable_name: String,

    /// Stream holding the messages
    pub stream_name: String,
}

impl SubscriptionSpec {
    pub fn new(
        subject: impl Into<String>,
        durable_name: impl Into<String>,
        stream_name: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            durable_name: durable_name.into(),
            stream_name: stream_name.into(),
        }
    }
}

/// Handle to a live subscription
///
/// Clones share the same liveness flag. The active -> inactive transition is
/// one-way.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: Uuid,
    spec: SubscriptionSpec,
    active: Arc<AtomicBool>,
}

impl Subscription {
    /// Create a new active subscription handle (used by source implementations)
    pub fn new(spec: SubscriptionSpec) -> Self {
        Self {
            id: Uuid::now_v7(),
            spec,
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn spec(&self) -> &SubscriptionSpec {
        &self.spec
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Mark the subscription inactive
    ///
    /// Returns `true` if this call performed the transition.
    pub fn mark_inactive(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }
}

/// A durable, at-least-once message source
///
/// Unacknowledged messages are redelivered by the source after a
/// source-defined timeout, with `delivered_count` incremented.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Create (or resume) a durable subscription
    async fn subscribe(&self, spec: &SubscriptionSpec) -> Result<Subscription, SourceError>;

    /// Fetch up to `max` messages, waiting at most `timeout`
    ///
    /// An empty result is not an error.
    async fn fetch(
        &self,
        subscription: &Subscription,
        max: usize,
        timeout: Duration,
    ) -> Result<Vec<Message>, SourceError>;

    /// Acknowledge a processed message
    async fn ack(&self, message: &Message) -> Result<(), SourceError>;

    /// Remove interest in the subscription
    async fn unsubscribe(&self, subscription: &Subscription) -> Result<(), SourceError>;
}
