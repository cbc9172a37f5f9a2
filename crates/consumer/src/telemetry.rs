// Telemetry Module
//
// Console logging for the consumer and its host process:
// - Timestamped, thread-named log lines so worker units can be told apart
// - EnvFilter-driven log levels (RUST_LOG or LOG_LEVEL)

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

// ============================================================================
// Telemetry Configuration
// ============================================================================

/// Configuration for logging
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name, recorded once at startup
    pub service_name: String,
    /// Whether to enable console logging
    pub enable_console: bool,
    /// Log filter (e.g., "info", "debug", "pullq_consumer=debug")
    pub log_filter: Option<String>,
    /// Include the thread name in every log line
    pub thread_names: bool,
    /// Emit JSON lines instead of human-readable text
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "pullq".to_string(),
            enable_console: true,
            log_filter: None,
            thread_names: true,
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `PULLQ_SERVICE_NAME`: Service name (default: "pullq")
    /// - `RUST_LOG` or `LOG_LEVEL`: Log filter
    /// - `LOG_FORMAT`: "json" for JSON lines (default: text)
    pub fn from_env() -> Self {
        Self {
            service_name: std::env::var("PULLQ_SERVICE_NAME")
                .unwrap_or_else(|_| "pullq".to_string()),
            enable_console: true,
            log_filter: std::env::var("RUST_LOG")
                .ok()
                .or_else(|| std::env::var("LOG_LEVEL").ok()),
            thread_names: true,
            json: std::env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        }
    }

    fn filter(&self) -> EnvFilter {
        self.log_filter
            .as_ref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new("info"))
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Initialize the global tracing subscriber
///
/// Returns an error if a global subscriber is already installed.
///
/// # Example
///
/// ```ignore
/// use pullq_consumer::telemetry::{init_telemetry, TelemetryConfig};
///
/// #[tokio::main]
/// async fn main() {
///     init_telemetry(TelemetryConfig::from_env()).ok();
///     // ... your application code
/// }
/// ```
pub fn init_telemetry(
    config: TelemetryConfig,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = config.filter();

    let console_layer = if config.enable_console {
        let layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_names(config.thread_names);
        let layer = if config.json {
            layer.json().with_filter(filter).boxed()
        } else {
            layer.with_filter(filter).boxed()
        };
        Some(layer)
    } else {
        None
    };

    tracing_subscriber::registry().with(console_layer).try_init()?;

    tracing::debug!(service = %config.service_name, "Telemetry initialized");
    Ok(())
}
