//! Indexer configuration, fluent builder and runtime state.
//!
//! # Example
//!
//! ```rust
//! use blockscribe_core::IndexerBuilder;
//!
//! let config = IndexerBuilder::new()
//!     .http_url("http://localhost:8545")
//!     .ws_url("ws://localhost:8546")
//!     .lag(5)
//!     .uncles(false)
//!     .build_config();
//! assert_eq!(config.features.lag, Some(5));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Feature toggles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features {
    /// Enqueue every block between the last seen head and the new one.
    pub backfill: bool,
    /// Fetch and store uncles.
    pub uncles: bool,
    /// Create the schema on startup.
    pub automigrate: bool,
    /// Stay this many blocks behind the head. `None` disables lag.
    pub lag: Option<u64>,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            backfill: true,
            uncles: true,
            automigrate: true,
            lag: None,
        }
    }
}

impl Features {
    /// Effective lag (0 when disabled).
    pub fn lag(&self) -> u64 {
        self.lag.unwrap_or(0)
    }
}

/// Head tracking configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadTrackerConfig {
    /// HTTP endpoint used for polling and direct head queries.
    pub http_url: String,
    /// Optional WebSocket endpoint; when set heads are pushed via `newHeads`.
    pub ws_url: Option<String>,
    /// Polling interval when no WebSocket endpoint is configured (milliseconds).
    pub poll_interval_ms: u64,
    /// Pause before re-establishing a failed transport (milliseconds).
    pub reconnect_backoff_ms: u64,
    /// Capacity of each subscriber's mailbox.
    pub subscriber_capacity: usize,
}

impl Default for HeadTrackerConfig {
    fn default() -> Self {
        Self {
            http_url: "http://localhost:8545".into(),
            ws_url: None,
            poll_interval_ms: 15_000,
            reconnect_backoff_ms: 5_000,
            subscriber_capacity: 4096,
        }
    }
}

impl HeadTrackerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

/// Task queue configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Upper bound on one blocking pop; also bounds how long `pause` waits.
    pub pop_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { pop_timeout_ms: 1_000 }
    }
}

impl QueueConfig {
    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }
}

/// Configuration for an indexer instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerConfig {
    pub head: HeadTrackerConfig,
    pub queue: QueueConfig,
    pub features: Features,
    /// Pause after a failed fetch before taking the next block (milliseconds).
    pub retry_pause_ms: u64,
    /// How long `close` waits for the queue to wind down (milliseconds).
    pub shutdown_timeout_ms: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            head: HeadTrackerConfig::default(),
            queue: QueueConfig::default(),
            features: Features::default(),
            retry_pause_ms: 2_000,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl IndexerConfig {
    pub fn retry_pause(&self) -> Duration {
        Duration::from_millis(self.retry_pause_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Fluent builder for `IndexerConfig`.
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self {
            config: IndexerConfig::default(),
        }
    }

    /// Set the HTTP JSON-RPC endpoint.
    pub fn http_url(mut self, url: impl Into<String>) -> Self {
        self.config.head.http_url = url.into();
        self
    }

    /// Set the WebSocket endpoint used for `newHeads`.
    pub fn ws_url(mut self, url: impl Into<String>) -> Self {
        self.config.head.ws_url = Some(url.into());
        self
    }

    /// Set the head polling interval in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.head.poll_interval_ms = ms;
        self
    }

    /// Set the head tracker's reconnect backoff in milliseconds.
    pub fn reconnect_backoff_ms(mut self, ms: u64) -> Self {
        self.config.head.reconnect_backoff_ms = ms;
        self
    }

    /// Set the per-subscriber mailbox capacity.
    pub fn subscriber_capacity(mut self, capacity: usize) -> Self {
        self.config.head.subscriber_capacity = capacity;
        self
    }

    /// Set the blocking pop timeout in milliseconds.
    pub fn pop_timeout_ms(mut self, ms: u64) -> Self {
        self.config.queue.pop_timeout_ms = ms;
        self
    }

    pub fn backfill(mut self, enabled: bool) -> Self {
        self.config.features.backfill = enabled;
        self
    }

    pub fn uncles(mut self, enabled: bool) -> Self {
        self.config.features.uncles = enabled;
        self
    }

    pub fn automigrate(mut self, enabled: bool) -> Self {
        self.config.features.automigrate = enabled;
        self
    }

    /// Enable lag: stay `blocks` behind the head.
    pub fn lag(mut self, blocks: u64) -> Self {
        self.config.features.lag = Some(blocks);
        self
    }

    /// Set the pause after a failed fetch in milliseconds.
    pub fn retry_pause_ms(mut self, ms: u64) -> Self {
        self.config.retry_pause_ms = ms;
        self
    }

    /// Set the shutdown timeout in milliseconds.
    pub fn shutdown_timeout_ms(mut self, ms: u64) -> Self {
        self.config.shutdown_timeout_ms = ms;
        self
    }

    /// Build the `IndexerConfig`.
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }
}

/// Runtime state of the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexerState {
    /// Not yet started.
    Idle,
    /// Dequeuing and storing blocks.
    Running,
    /// Queue suspended by an operator.
    Paused,
    /// Shutting down gracefully.
    Stopping,
    /// Terminated.
    Stopped,
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
