//! # Pull Consumer
//!
//! A bounded-concurrency consumer for durable, at-least-once message queues.
//!
//! ## Features
//!
//! - **Credit-based flow control**: a single poller fetches one message at a time and
//!   only when a worker slot is free, so at most `worker_count` messages are in flight
//! - **Ack after processing**: messages are acknowledged only after successful processing;
//!   failures are left for the broker to redeliver
//! - **Unit isolation**: a fault in one worker unit never reaches the poller or other units
//! - **Idempotent shutdown**: concurrent or repeated shutdown requests clean up exactly once
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Lifecycle                             │
//! │  (cancelled flag, unsubscribe, close pool - at most once)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────┐   ┌─────────────────┐   ┌──────────────────┐
//! │    Poller    │──▶│  AdmissionGate  │   │  MessageSource   │
//! │ (fetch 1 msg)│   │  (free slots)   │   │ (fetch/ack/unsub)│
//! └──────┬───────┘   └────────▲────────┘   └────────▲─────────┘
//!        │                    │ release             │ ack
//!        ▼                    │                     │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                             │
//! │  [Unit 1] [Unit 2] ... [Unit N]   (TaskTracker-managed)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use pullq_consumer::prelude::*;
//!
//! let broker = Arc::new(InMemoryBroker::new(BrokerConfig::default()));
//! broker.create_stream("ORDERS", vec!["orders.created".into()])?;
//!
//! let config = ConsumerConfig::new("orders.created", "orders-worker", "ORDERS")
//!     .with_worker_count(4);
//! let processor = Arc::new(SimulatedProcessor::new(Duration::from_millis(100)));
//!
//! let consumer = Consumer::start(broker, processor, config).await?;
//! // ...
//! consumer.shutdown().await;
//! consumer.drain(Duration::from_secs(30)).await?;
//! ```

pub mod broker;
pub mod config;
pub mod consumer;
pub mod gate;
pub mod lifecycle;
pub mod message;
pub mod poller;
pub mod pool;
pub mod processor;
pub mod source;
pub mod telemetry;

/// Prelude for common imports
pub mod prelude {
    pub use crate::broker::{BrokerConfig, BrokerError, BrokerStats, InMemoryBroker};
    pub use crate::config::{ConsumerConfig, WaitStrategy};
    pub use crate::consumer::{Consumer, ConsumerError};
    pub use crate::gate::{AdmissionGate, SlotPermit};
    pub use crate::message::{Message, MessageMetadata};
    pub use crate::poller::{PollerExit, PollerState};
    pub use crate::pool::{PoolError, WorkerPool};
    pub use crate::processor::{processor_fn, MessageProcessor, ProcessError, SimulatedProcessor};
    pub use crate::source::{MessageSource, SourceError, Subscription, SubscriptionSpec};
}

// Re-export key types at crate root
pub use broker::{BrokerConfig, BrokerError, InMemoryBroker};
pub use config::{ConsumerConfig, WaitStrategy};
pub use consumer::{Consumer, ConsumerError};
pub use gate::{AdmissionGate, SlotPermit};
pub use message::{Message, MessageMetadata};
pub use poller::{PollerExit, PollerState};
pub use pool::{PoolError, WorkerPool};
pub use processor::{processor_fn, MessageProcessor, ProcessError, SimulatedProcessor};
pub use source::{MessageSource, SourceError, Subscription, SubscriptionSpec};
