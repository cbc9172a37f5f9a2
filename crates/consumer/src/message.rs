//! Messages delivered by a [`MessageSource`](crate::source::MessageSource)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery metadata attached to every message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Stream the message was stored in
    pub stream: String,

    /// Broker-assigned, monotonically increasing position in the stream
    pub stream_sequence: u64,

    /// Position in the delivery order of this consumer (increases on redelivery too)
    pub consumer_sequence: u64,

    /// Number of times this message has been delivered (>= 1)
    pub delivered_count: u32,

    /// When the message was published
    pub published_at: DateTime<Utc>,
}

/// A message fetched from a subscription
///
/// Immutable once received. The `reply` handle is opaque to the consumer and
/// is only handed back to the source when acknowledging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    subject: String,
    payload: Vec<u8>,
    metadata: MessageMetadata,
    reply: String,
}

impl Message {
    /// Create a new message (used by source implementations)
    pub fn new(
        subject: impl Into<String>,
        payload: Vec<u8>,
        metadata: MessageMetadata,
        reply: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            payload,
            metadata,
            reply: reply.into(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn metadata(&self) -> &MessageMetadata {
        &self.metadata
    }

    /// Acknowledgment handle issued by the source
    pub fn reply(&self) -> &str {
        &self.reply
    }

    /// Shorthand for `metadata().stream_sequence`
    pub fn stream_sequence(&self) -> u64 {
        self.metadata.stream_sequence
    }

    /// Shorthand for `metadata().delivered_count`
    pub fn delivered_count(&self) -> u32 {
        self.metadata.delivered_count
    }
}
