//! Session timing and HTTP retry configuration.

use std::time::Duration;

/// Server used when `COMIC_SERVER_URL` is unset.
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080";
/// Trailing debounce for cosmetic edits (milliseconds).
const DEFAULT_SAVE_DEBOUNCE_MS: u64 = 500;
/// Transform commit interval, one display refresh (milliseconds).
const DEFAULT_FRAME_INTERVAL_MS: u64 = 16;
/// Push channel reconnect delay after a transport error (milliseconds).
const DEFAULT_RETRY_DELAY_MS: u64 = 5_000;
/// Push channel reconnect delay after a keepalive (milliseconds).
const DEFAULT_KEEPALIVE_RECONNECT_MS: u64 = 1_000;
/// Delay before re-examining a push that arrived mid-rebuild (milliseconds).
const DEFAULT_PUSH_DEFER_MS: u64 = 100;

/// Timings for a sync session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Base URL of the page server.
    pub server_url: String,
    /// Trailing debounce before a cosmetic edit is persisted.
    pub save_debounce: Duration,
    /// Interval at which staged transforms are committed.
    pub frame_interval: Duration,
    /// Reconnect delay after the push channel fails.
    pub retry_delay: Duration,
    /// Reconnect delay after a keepalive closes the push channel.
    pub keepalive_reconnect: Duration,
    /// Delay applied to pushes that arrive while a rebuild is running.
    pub push_defer: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            save_debounce: Duration::from_millis(DEFAULT_SAVE_DEBOUNCE_MS),
            frame_interval: Duration::from_millis(DEFAULT_FRAME_INTERVAL_MS),
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            keepalive_reconnect: Duration::from_millis(DEFAULT_KEEPALIVE_RECONNECT_MS),
            push_defer: Duration::from_millis(DEFAULT_PUSH_DEFER_MS),
        }
    }
}

impl SyncConfig {
    /// Create a configuration for `server_url` with default timings.
    #[must_use]
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    /// Create a configuration from environment variables or defaults.
    ///
    /// Environment variables:
    /// - `COMIC_SERVER_URL`: server base URL (default: `http://127.0.0.1:8080`)
    /// - `COMIC_SAVE_DEBOUNCE_MS`: save debounce (default: 500)
    /// - `COMIC_FRAME_INTERVAL_MS`: transform commit interval (default: 16)
    /// - `COMIC_RETRY_DELAY_MS`: push reconnect after error (default: 5000)
    /// - `COMIC_KEEPALIVE_RECONNECT_MS`: push reconnect after keepalive (default: 1000)
    /// - `COMIC_PUSH_DEFER_MS`: push deferral during rebuild (default: 100)
    #[must_use]
    pub fn from_env() -> Self {
        let server_url =
            std::env::var("COMIC_SERVER_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());
        Self {
            server_url,
            save_debounce: env_millis("COMIC_SAVE_DEBOUNCE_MS", DEFAULT_SAVE_DEBOUNCE_MS),
            frame_interval: env_millis("COMIC_FRAME_INTERVAL_MS", DEFAULT_FRAME_INTERVAL_MS),
            retry_delay: env_millis("COMIC_RETRY_DELAY_MS", DEFAULT_RETRY_DELAY_MS),
            keepalive_reconnect: env_millis(
                "COMIC_KEEPALIVE_RECONNECT_MS",
                DEFAULT_KEEPALIVE_RECONNECT_MS,
            ),
            push_defer: env_millis("COMIC_PUSH_DEFER_MS", DEFAULT_PUSH_DEFER_MS),
        }
    }
}

fn env_millis(key: &str, default: u64) -> Duration {
    let millis = std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default);
    Duration::from_millis(millis)
}

/// Configuration for retry with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Initial delay between retries in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom values.
    #[must_use]
    pub fn new(max_attempts: u32, initial_delay_ms: u64, max_delay_ms: u64, multiplier: f64) -> Self {
        Self {
            max_attempts,
            initial_delay_ms,
            max_delay_ms,
            multiplier,
        }
    }

    /// A configuration that tries once and never sleeps.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::new(1, 0, 0, 1.0)
    }

    /// Calculate delay for a given attempt number (0-indexed).
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let base_delay = self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay_ms as f64) as u64;
        // Spread simultaneous clients a little.
        let jitter = (capped_delay / 4).max(1);
        capped_delay.saturating_add(jitter / 2)
    }
}
