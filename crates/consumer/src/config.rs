//! Consumer configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::source::SubscriptionSpec;

/// How the admission gate waits for a free slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WaitStrategy {
    /// Passive wait, woken whenever a slot is released
    Notify,

    /// Re-check the free slot count every `interval`
    Poll {
        #[serde(with = "duration_millis")]
        interval: Duration,
    },
}

impl Default for WaitStrategy {
    fn default() -> Self {
        Self::Poll {
            interval: Duration::from_millis(50),
        }
    }
}

/// Consumer configuration
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use pullq_consumer::ConsumerConfig;
///
/// let config = ConsumerConfig::new("orders.created", "orders-worker", "ORDERS")
///     .with_worker_count(8)
///     .with_fetch_timeout(Duration::from_secs(2));
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Subject filter for the subscription
    pub subject: String,

    /// Durable consumer name
    pub durable_name: String,

    /// Stream to consume from
    pub stream_name: String,

    /// Number of concurrent worker units (N)
    pub worker_count: usize,

    /// Maximum wait for a single fetch
    #[serde(with = "duration_millis")]
    pub fetch_timeout: Duration,

    /// How the poller waits for a free worker slot
    pub wait_strategy: WaitStrategy,

    /// Upper bound used by callers draining in-flight work after shutdown
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            subject: String::new(),
            durable_name: String::new(),
            stream_name: String::new(),
            worker_count: 4,
            fetch_timeout: Duration::from_secs(5),
            wait_strategy: WaitStrategy::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ConsumerConfig {
    /// Create a new consumer configuration
    pub fn new(
        subject: impl Into<String>,
        durable_name: impl Into<String>,
        stream_name: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            durable_name: durable_name.into(),
            stream_name: stream_name.into(),
            ..Default::default()
        }
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `PULLQ_SUBJECT`, `PULLQ_DURABLE`, `PULLQ_STREAM`: subscription target
    /// - `PULLQ_WORKERS`: worker count (default: 4)
    /// - `PULLQ_FETCH_TIMEOUT_MS`: fetch timeout (default: 5000)
    /// - `PULLQ_SLOT_POLL_MS`: slot poll interval; `0` selects passive waiting (default: 50)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let wait_strategy = match env_u64("PULLQ_SLOT_POLL_MS") {
            Some(0) => WaitStrategy::Notify,
            Some(ms) => WaitStrategy::Poll {
                interval: Duration::from_millis(ms),
            },
            None => defaults.wait_strategy,
        };

        Self {
            subject: std::env::var("PULLQ_SUBJECT").unwrap_or_default(),
            durable_name: std::env::var("PULLQ_DURABLE").unwrap_or_default(),
            stream_name: std::env::var("PULLQ_STREAM").unwrap_or_default(),
            worker_count: env_u64("PULLQ_WORKERS")
                .map(|n| n as usize)
                .unwrap_or(defaults.worker_count),
            fetch_timeout: env_u64("PULLQ_FETCH_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.fetch_timeout),
            wait_strategy,
            shutdown_timeout: defaults.shutdown_timeout,
        }
    }

    /// Set the worker count
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the fetch timeout
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set the slot wait strategy
    pub fn with_wait_strategy(mut self, strategy: WaitStrategy) -> Self {
        self.wait_strategy = strategy;
        self
    }

    /// Set the shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Subscription target described by this configuration
    pub fn subscription_spec(&self) -> SubscriptionSpec {
        SubscriptionSpec::new(&self.subject, &self.durable_name, &self.stream_name)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.subject.is_empty() {
            return Err("subject must not be empty".into());
        }
        if self.durable_name.is_empty() {
            return Err("durable_name must not be empty".into());
        }
        if self.stream_name.is_empty() {
            return Err("stream_name must not be empty".into());
        }
        if self.worker_count == 0 {
            return Err("worker_count must be at least 1".into());
        }
        if self.fetch_timeout.is_zero() {
            return Err("fetch_timeout must be greater than zero".into());
        }
        if let WaitStrategy::Poll { interval } = self.wait_strategy {
            if interval.is_zero() {
                return Err("slot poll interval must be greater than zero".into());
            }
        }
        Ok(())
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
