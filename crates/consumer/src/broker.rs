//! In-memory durable broker
//!
//! Implements [`MessageSource`] with work-queue retention and at-least-once
//! delivery: a delivered message that is not acknowledged within
//! [`BrokerConfig::ack_wait`] becomes deliverable again with its delivery
//! count incremented. Durable consumers are keyed by name and keep their
//! state across unsubscribe/subscribe cycles.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::duration_millis;
use crate::message::{Message, MessageMetadata};
use crate::source::{MessageSource, SourceError, Subscription, SubscriptionSpec};

const ACK_PREFIX: &str = "$JS.ACK.";

/// Broker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// How long a delivered message may stay unacknowledged before redelivery
    #[serde(with = "duration_millis")]
    pub ack_wait: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            ack_wait: Duration::from_secs(30),
        }
    }
}

impl BrokerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the redelivery timeout
    pub fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }
}

/// Errors from stream management and publishing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("stream already exists: {0}")]
    StreamExists(String),

    #[error("stream not found: {0}")]
    StreamNotFound(String),

    #[error("no stream captures subject: {0}")]
    NoStreamForSubject(String),

    #[error("invalid name: {0:?}")]
    InvalidName(String),
}

/// Call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub fetches: u64,
    pub acks: u64,
    pub unsubscribes: u64,
}

struct StoredMessage {
    subject: String,
    payload: Vec<u8>,
    published_at: DateTime<Utc>,
}

struct StreamState {
    subjects: Vec<String>,
    messages: BTreeMap<u64, StoredMessage>,
    last_sequence: u64,
}

impl StreamState {
    fn captures(&self, subject: &str) -> bool {
        self.subjects.iter().any(|s| s == subject)
    }
}

struct Delivery {
    count: u32,
    delivered_at: Instant,
}

struct DurableState {
    stream: String,
    subject: String,
    consumer_sequence: u64,
    deliveries: HashMap<u64, Delivery>,
}

#[derive(Default)]
struct BrokerState {
    streams: HashMap<String, StreamState>,
    durables: HashMap<String, DurableState>,
    fetch_failure: Option<String>,
    stats: BrokerStats,
}

/// What a single pass over a stream produced
struct Collected {
    messages: Vec<Message>,
    /// Earliest instant at which an outstanding delivery becomes redeliverable
    next_expiry: Option<Instant>,
}

/// In-memory implementation of [`MessageSource`]
///
/// # Example
///
/// ```
/// use pullq_consumer::{BrokerConfig, InMemoryBroker};
///
/// let broker = InMemoryBroker::new(BrokerConfig::default());
/// broker.create_stream("ORDERS", vec!["orders.created".into()]).unwrap();
/// let seq = broker.publish("orders.created", b"hello".to_vec()).unwrap();
/// assert_eq!(seq, 1);
/// ```
pub struct InMemoryBroker {
    config: BrokerConfig,
    state: Mutex<BrokerState>,
    changed: Notify,
}

impl InMemoryBroker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BrokerState::default()),
            changed: Notify::new(),
        }
    }

    /// Create a work-queue stream capturing `subjects`
    pub fn create_stream(&self, name: &str, subjects: Vec<String>) -> Result<(), BrokerError> {
        validate_name(name)?;
        if subjects.is_empty() || subjects.iter().any(|s| s.trim().is_empty()) {
            return Err(BrokerError::InvalidName(format!("{name}: subjects")));
        }

        let mut state = self.state.lock();
        if state.streams.contains_key(name) {
            return Err(BrokerError::StreamExists(name.to_string()));
        }

        state.streams.insert(
            name.to_string(),
            StreamState {
                subjects,
                messages: BTreeMap::new(),
                last_sequence: 0,
            },
        );
        debug!(stream = name, "Stream created");
        Ok(())
    }

    /// Publish a message, returning its stream sequence
    pub fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<u64, BrokerError> {
        let sequence = {
            let mut state = self.state.lock();
            let stream = state
                .streams
                .values_mut()
                .find(|s| s.captures(subject))
                .ok_or_else(|| BrokerError::NoStreamForSubject(subject.to_string()))?;

            stream.last_sequence += 1;
            let sequence = stream.last_sequence;
            stream.messages.insert(
                sequence,
                StoredMessage {
                    subject: subject.to_string(),
                    payload,
                    published_at: Utc::now(),
                },
            );
            sequence
        };

        trace!(subject, sequence, "Message published");
        self.changed.notify_waiters();
        Ok(sequence)
    }

    /// Invalidate a subscription from the broker side
    pub fn invalidate(&self, subscription: &Subscription) {
        if subscription.mark_inactive() {
            debug!(subscription = %subscription.id(), "Subscription invalidated");
        }
        self.changed.notify_waiters();
    }

    /// Make the next fetch fail with [`SourceError::Fetch`]
    pub fn fail_next_fetch(&self, reason: impl Into<String>) {
        self.state.lock().fetch_failure = Some(reason.into());
        self.changed.notify_waiters();
    }

    /// Number of messages stored in a stream (not yet acknowledged)
    pub fn stream_len(&self, stream: &str) -> Result<usize, BrokerError> {
        self.state
            .lock()
            .streams
            .get(stream)
            .map(|s| s.messages.len())
            .ok_or_else(|| BrokerError::StreamNotFound(stream.to_string()))
    }

    /// Number of messages in a stream that a fetch could hand out right now
    ///
    /// Counts messages never delivered plus those whose ack wait has
    /// elapsed for every durable consumer that delivered them.
    pub fn pending_count(&self, stream: &str) -> Result<usize, BrokerError> {
        let state = self.state.lock();
        let stored = state
            .streams
            .get(stream)
            .ok_or_else(|| BrokerError::StreamNotFound(stream.to_string()))?;

        let now = Instant::now();
        let ack_wait = self.config.ack_wait;
        let in_ack_wait = |sequence: &u64| {
            state
                .durables
                .values()
                .filter(|d| d.stream == stream)
                .filter_map(|d| d.deliveries.get(sequence))
                .any(|delivery| now < delivery.delivered_at + ack_wait)
        };

        Ok(stored
            .messages
            .keys()
            .filter(|sequence| !in_ack_wait(*sequence))
            .count())
    }

    /// Number of delivered but unacknowledged messages for a durable consumer
    pub fn outstanding(&self, durable_name: &str) -> usize {
        self.state
            .lock()
            .durables
            .get(durable_name)
            .map(|d| d.deliveries.len())
            .unwrap_or(0)
    }

    /// How many times a message has been delivered to a durable consumer
    pub fn delivered_count(&self, durable_name: &str, stream_sequence: u64) -> Option<u32> {
        self.state
            .lock()
            .durables
            .get(durable_name)
            .and_then(|d| d.deliveries.get(&stream_sequence))
            .map(|d| d.count)
    }

    pub fn stats(&self) -> BrokerStats {
        self.state.lock().stats
    }

    fn collect(
        &self,
        state: &mut BrokerState,
        durable_name: &str,
        max: usize,
    ) -> Result<Collected, SourceError> {
        let BrokerState {
            streams, durables, ..
        } = state;

        let durable = durables
            .get_mut(durable_name)
            .ok_or_else(|| SourceError::Fetch(format!("consumer not found: {durable_name}")))?;
        let stream = streams
            .get(&durable.stream)
            .ok_or_else(|| SourceError::Fetch(format!("stream not found: {}", durable.stream)))?;

        let now = Instant::now();
        let mut collected = Collected {
            messages: Vec::new(),
            next_expiry: None,
        };

        for (&sequence, stored) in &stream.messages {
            if collected.messages.len() >= max {
                break;
            }
            if stored.subject != durable.subject {
                continue;
            }

            let delivered_count = match durable.deliveries.get(&sequence) {
                None => 1,
                Some(delivery) => {
                    let expires_at = delivery.delivered_at + self.config.ack_wait;
                    if now < expires_at {
                        collected.next_expiry = Some(
                            collected
                                .next_expiry
                                .map_or(expires_at, |e| e.min(expires_at)),
                        );
                        continue;
                    }
                    delivery.count + 1
                }
            };

            durable.consumer_sequence += 1;
            durable.deliveries.insert(
                sequence,
                Delivery {
                    count: delivered_count,
                    delivered_at: now,
                },
            );

            let reply = format!(
                "{}{}.{}.{}.{}.{}",
                ACK_PREFIX,
                durable.stream,
                durable_name,
                delivered_count,
                sequence,
                durable.consumer_sequence
            );
            collected.messages.push(Message::new(
                stored.subject.clone(),
                stored.payload.clone(),
                MessageMetadata {
                    stream: durable.stream.clone(),
                    stream_sequence: sequence,
                    consumer_sequence: durable.consumer_sequence,
                    delivered_count,
                    published_at: stored.published_at,
                },
                reply,
            ));
        }

        Ok(collected)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

#[async_trait]
impl MessageSource for InMemoryBroker {
    async fn subscribe(&self, spec: &SubscriptionSpec) -> Result<Subscription, SourceError> {
        validate_name(&spec.durable_name).map_err(|e| SourceError::Subscribe(e.to_string()))?;

        let mut state = self.state.lock();
        let stream = state.streams.get(&spec.stream_name).ok_or_else(|| {
            SourceError::Subscribe(format!("stream not found: {}", spec.stream_name))
        })?;
        if !stream.captures(&spec.subject) {
            return Err(SourceError::Subscribe(format!(
                "subject {} is not captured by stream {}",
                spec.subject, spec.stream_name
            )));
        }

        match state.durables.get(&spec.durable_name) {
            Some(existing)
                if existing.stream != spec.stream_name || existing.subject != spec.subject =>
            {
                return Err(SourceError::Subscribe(format!(
                    "durable {} is bound to {}/{}",
                    spec.durable_name, existing.stream, existing.subject
                )));
            }
            Some(_) => {
                debug!(durable = %spec.durable_name, "Resuming durable consumer");
            }
            None => {
                state.durables.insert(
                    spec.durable_name.clone(),
                    DurableState {
                        stream: spec.stream_name.clone(),
                        subject: spec.subject.clone(),
                        consumer_sequence: 0,
                        deliveries: HashMap::new(),
                    },
                );
                debug!(durable = %spec.durable_name, "Durable consumer created");
            }
        }

        Ok(Subscription::new(spec.clone()))
    }

    async fn fetch(
        &self,
        subscription: &Subscription,
        max: usize,
        timeout: Duration,
    ) -> Result<Vec<Message>, SourceError> {
        self.state.lock().stats.fetches += 1;
        if max == 0 {
            return Ok(vec![]);
        }

        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !subscription.is_active() {
                return Err(SourceError::InactiveSubscription);
            }

            let next_expiry = {
                let mut state = self.state.lock();
                if let Some(reason) = state.fetch_failure.take() {
                    return Err(SourceError::Fetch(reason));
                }
                let collected =
                    self.collect(&mut state, &subscription.spec().durable_name, max)?;
                if !collected.messages.is_empty() {
                    return Ok(collected.messages);
                }
                collected.next_expiry
            };

            if Instant::now() >= deadline {
                return Ok(vec![]);
            }

            let wake_at = next_expiry.map_or(deadline, |e| e.min(deadline));
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn ack(&self, message: &Message) -> Result<(), SourceError> {
        let mut state = self.state.lock();
        state.stats.acks += 1;

        let (stream_name, durable_name, delivered, sequence) = parse_reply(message.reply())?;

        let durable = state
            .durables
            .get_mut(durable_name)
            .ok_or_else(|| SourceError::Ack(format!("consumer not found: {durable_name}")))?;

        let current = durable
            .deliveries
            .get(&sequence)
            .map(|d| d.count)
            .ok_or_else(|| SourceError::Ack(format!("message {sequence} already acknowledged")))?;
        if current != delivered {
            return Err(SourceError::Ack(format!(
                "delivery {delivered} of message {sequence} was superseded by delivery {current}"
            )));
        }
        durable.deliveries.remove(&sequence);

        if let Some(stream) = state.streams.get_mut(stream_name) {
            stream.messages.remove(&sequence);
        }
        Ok(())
    }

    async fn unsubscribe(&self, subscription: &Subscription) -> Result<(), SourceError> {
        self.state.lock().stats.unsubscribes += 1;

        if !subscription.mark_inactive() {
            return Err(SourceError::AlreadyUnsubscribed);
        }
        self.changed.notify_waiters();
        debug!(subscription = %subscription.id(), "Unsubscribed");
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<(), BrokerError> {
    let invalid = name.is_empty()
        || name
            .chars()
            .any(|c| c == '.' || c == '*' || c == '>' || c.is_whitespace());
    if invalid {
        return Err(BrokerError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn parse_reply(reply: &str) -> Result<(&str, &str, u32, u64), SourceError> {
    let malformed = || SourceError::Ack(format!("malformed ack handle: {reply}"));

    let rest = reply.strip_prefix(ACK_PREFIX).ok_or_else(malformed)?;
    let parts: Vec<&str> = rest.split('.').collect();
    let [stream, durable, delivered, sequence, _consumer_sequence] = parts.as_slice() else {
        return Err(malformed());
    };

    let delivered = delivered.parse().map_err(|_| malformed())?;
    let sequence = sequence.parse().map_err(|_| malformed())?;
    Ok((*stream, *durable, delivered, sequence))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUBJECT: &str = "test.stream.run";

    fn broker_with_messages(count: usize, ack_wait: Duration) -> InMemoryBroker {
        let broker = InMemoryBroker::new(BrokerConfig::new().with_ack_wait(ack_wait));
        broker
            .create_stream("TEST", vec![SUBJECT.to_string()])
            .unwrap();
        for i in 0..count {
            broker.publish(SUBJECT, i.to_string().into_bytes()).unwrap();
        }
        broker
    }

    fn spec() -> SubscriptionSpec {
        SubscriptionSpec::new(SUBJECT, "TEST-C", "TEST")
    }

    #[test]
    fn test_create_stream_rejects_duplicates_and_bad_names() {
        let broker = InMemoryBroker::default();
        broker.create_stream("A", vec!["a".into()]).unwrap();

        assert_eq!(
            broker.create_stream("A", vec!["a2".into()]),
            Err(BrokerError::StreamExists("A".into()))
        );
        assert!(matches!(
            broker.create_stream("B.C", vec!["b".into()]),
            Err(BrokerError::InvalidName(_))
        ));
        assert!(matches!(
            broker.create_stream("D", vec![]),
            Err(BrokerError::InvalidName(_))
        ));
    }

    #[test]
    fn test_publish_assigns_monotonic_sequences() {
        let broker = broker_with_messages(0, Duration::from_secs(30));
        assert_eq!(broker.publish(SUBJECT, b"a".to_vec()).unwrap(), 1);
        assert_eq!(broker.publish(SUBJECT, b"b".to_vec()).unwrap(), 2);
        assert_eq!(broker.stream_len("TEST").unwrap(), 2);

        assert_eq!(
            broker.publish("other", b"c".to_vec()),
            Err(BrokerError::NoStreamForSubject("other".into()))
        );
    }

    #[tokio::test]
    async fn test_subscribe_validates_target() {
        let broker = broker_with_messages(0, Duration::from_secs(30));

        let missing_stream = SubscriptionSpec::new(SUBJECT, "C1", "MISSING");
        assert!(matches!(
            broker.subscribe(&missing_stream).await,
            Err(SourceError::Subscribe(_))
        ));

        let wrong_subject = SubscriptionSpec::new("nope", "C1", "TEST");
        assert!(matches!(
            broker.subscribe(&wrong_subject).await,
            Err(SourceError::Subscribe(_))
        ));

        let bad_durable = SubscriptionSpec::new(SUBJECT, "C.1", "TEST");
        assert!(matches!(
            broker.subscribe(&bad_durable).await,
            Err(SourceError::Subscribe(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_delivers_in_sequence_order() {
        let broker = broker_with_messages(3, Duration::from_secs(30));
        let sub = broker.subscribe(&spec()).await.unwrap();

        let first = broker
            .fetch(&sub, 1, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].stream_sequence(), 1);
        assert_eq!(first[0].delivered_count(), 1);
        assert_eq!(first[0].payload(), b"0");

        let rest = broker
            .fetch(&sub, 10, Duration::from_millis(10))
            .await
            .unwrap();
        let sequences: Vec<_> = rest.iter().map(|m| m.stream_sequence()).collect();
        assert_eq!(sequences, vec![2, 3]);
        assert_eq!(broker.outstanding("TEST-C"), 3);
    }

    #[tokio::test]
    async fn test_ack_removes_message() {
        let broker = broker_with_messages(1, Duration::from_secs(30));
        let sub = broker.subscribe(&spec()).await.unwrap();

        let messages = broker
            .fetch(&sub, 1, Duration::from_millis(10))
            .await
            .unwrap();
        broker.ack(&messages[0]).await.unwrap();

        assert_eq!(broker.stream_len("TEST").unwrap(), 0);
        assert_eq!(broker.outstanding("TEST-C"), 0);

        // Double ack is rejected
        assert!(matches!(
            broker.ack(&messages[0]).await,
            Err(SourceError::Ack(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_fetch_waits_for_timeout() {
        let broker = broker_with_messages(0, Duration::from_secs(30));
        let sub = broker.subscribe(&spec()).await.unwrap();
        let started = Instant::now();

        let messages = broker.fetch(&sub, 1, Duration::from_secs(5)).await.unwrap();

        assert!(messages.is_empty());
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_waiting_fetch_wakes_on_publish() {
        let broker = std::sync::Arc::new(broker_with_messages(0, Duration::from_secs(30)));
        let sub = broker.subscribe(&spec()).await.unwrap();

        let fetcher = {
            let broker = broker.clone();
            let sub = sub.clone();
            tokio::spawn(async move { broker.fetch(&sub, 1, Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.publish(SUBJECT, b"late".to_vec()).unwrap();

        let messages = tokio::time::timeout(Duration::from_secs(1), fetcher)
            .await
            .expect("fetch should wake on publish")
            .unwrap()
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload(), b"late");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacked_message_is_redelivered_after_ack_wait() {
        let broker = broker_with_messages(1, Duration::from_secs(3));
        let sub = broker.subscribe(&spec()).await.unwrap();

        let first = broker
            .fetch(&sub, 1, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(first[0].delivered_count(), 1);

        // Still within ack wait: nothing deliverable
        let none = broker
            .fetch(&sub, 1, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(none.is_empty());

        // The waiting fetch picks up the redelivery once ack wait expires
        let again = broker.fetch(&sub, 1, Duration::from_secs(5)).await.unwrap();
        assert_eq!(again[0].stream_sequence(), first[0].stream_sequence());
        assert_eq!(again[0].delivered_count(), 2);
        assert!(again[0].metadata().consumer_sequence > first[0].metadata().consumer_sequence);

        // The superseded delivery can no longer be acknowledged
        assert!(matches!(
            broker.ack(&first[0]).await,
            Err(SourceError::Ack(_))
        ));
        broker.ack(&again[0]).await.unwrap();
        assert_eq!(broker.stream_len("TEST").unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_count_tracks_deliverable_messages() {
        let broker = broker_with_messages(3, Duration::from_secs(3));
        let sub = broker.subscribe(&spec()).await.unwrap();
        assert_eq!(broker.pending_count("TEST").unwrap(), 3);

        let first = broker
            .fetch(&sub, 2, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(broker.pending_count("TEST").unwrap(), 1);
        assert_eq!(broker.stream_len("TEST").unwrap(), 3);

        broker.ack(&first[0]).await.unwrap();
        assert_eq!(broker.pending_count("TEST").unwrap(), 1);

        // Unacknowledged delivery becomes deliverable again
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(broker.pending_count("TEST").unwrap(), 2);

        assert_eq!(
            broker.pending_count("MISSING"),
            Err(BrokerError::StreamNotFound("MISSING".into()))
        );
    }

    #[tokio::test]
    async fn test_durable_state_survives_resubscribe() {
        let broker = broker_with_messages(2, Duration::from_secs(30));
        let sub = broker.subscribe(&spec()).await.unwrap();
        let first = broker
            .fetch(&sub, 1, Duration::from_millis(10))
            .await
            .unwrap();
        broker.ack(&first[0]).await.unwrap();
        broker.unsubscribe(&sub).await.unwrap();

        let resumed = broker.subscribe(&spec()).await.unwrap();
        let next = broker
            .fetch(&resumed, 1, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(next[0].stream_sequence(), 2);

        let rebound = SubscriptionSpec::new(SUBJECT, "TEST-C", "OTHER");
        assert!(matches!(
            broker.subscribe(&rebound).await,
            Err(SourceError::Subscribe(_))
        ));
    }

    #[tokio::test]
    async fn test_unsubscribe_twice() {
        let broker = broker_with_messages(0, Duration::from_secs(30));
        let sub = broker.subscribe(&spec()).await.unwrap();

        broker.unsubscribe(&sub).await.unwrap();
        assert_eq!(
            broker.unsubscribe(&sub).await,
            Err(SourceError::AlreadyUnsubscribed)
        );
        assert_eq!(
            broker.fetch(&sub, 1, Duration::from_millis(10)).await,
            Err(SourceError::InactiveSubscription)
        );
        assert_eq!(broker.stats().unsubscribes, 2);
    }

    #[tokio::test]
    async fn test_invalidate_wakes_waiting_fetch() {
        let broker = std::sync::Arc::new(broker_with_messages(0, Duration::from_secs(30)));
        let sub = broker.subscribe(&spec()).await.unwrap();

        let fetcher = {
            let broker = broker.clone();
            let sub = sub.clone();
            tokio::spawn(async move { broker.fetch(&sub, 1, Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.invalidate(&sub);

        let result = tokio::time::timeout(Duration::from_secs(1), fetcher)
            .await
            .expect("fetch should wake on invalidation")
            .unwrap();
        assert_eq!(result, Err(SourceError::InactiveSubscription));
    }

    #[tokio::test]
    async fn test_injected_fetch_failure_is_one_shot() {
        let broker = broker_with_messages(1, Duration::from_secs(30));
        let sub = broker.subscribe(&spec()).await.unwrap();

        broker.fail_next_fetch("connection reset");
        assert_eq!(
            broker.fetch(&sub, 1, Duration::from_millis(10)).await,
            Err(SourceError::Fetch("connection reset".into()))
        );
        assert_eq!(
            broker
                .fetch(&sub, 1, Duration::from_millis(10))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_parse_reply() {
        assert_eq!(
            parse_reply("$JS.ACK.TEST.TEST-C.2.17.40").unwrap(),
            ("TEST", "TEST-C", 2, 17)
        );
        assert!(parse_reply("garbage").is_err());
        assert!(parse_reply("$JS.ACK.TEST.TEST-C.x.17.40").is_err());
        assert!(parse_reply("$JS.ACK.TEST.2.17").is_err());
        // Consumer sequence segment is required
        assert!(parse_reply("$JS.ACK.TEST.TEST-C.2.17").is_err());
    }
}
