//! Configuration sections.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Complete platform configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HiveConfig {
    /// Request/response bus.
    pub rpc: RpcSection,
    /// Client subscription managers.
    pub subscriptions: SubscriptionSection,
    /// Persistent socket server and connector.
    pub socket: SocketSection,
    /// Message cache.
    pub cache: CacheSection,
    /// Logging.
    pub logging: LoggingSection,
}

/// Request/response bus settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcSection {
    /// Number of ordered partitions, one worker each.
    pub workers: usize,
    /// Default deadline for a single-reply call.
    pub request_timeout_secs: u64,
    /// Ping attempts before the bus is declared unreachable.
    pub ping_attempts: u32,
    /// Per-attempt ping deadline.
    pub ping_timeout_ms: u64,
}

impl Default for RpcSection {
    fn default() -> Self {
        Self {
            workers: 3,
            request_timeout_secs: 10,
            ping_attempts: 10,
            ping_timeout_ms: 3000,
        }
    }
}

impl RpcSection {
    /// Call deadline.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Per-attempt ping deadline.
    #[must_use]
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}

/// Subscription manager settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionSection {
    /// Upper bound on concurrently running poll loops.
    pub max_poll_tasks: usize,
    /// Long-poll wait, in seconds (0..=60).
    pub wait_timeout_secs: u64,
    /// How long shutdown waits for poll loops to finish.
    pub shutdown_grace_secs: u64,
}

impl Default for SubscriptionSection {
    fn default() -> Self {
        Self {
            max_poll_tasks: 100,
            wait_timeout_secs: 30,
            shutdown_grace_secs: 10,
        }
    }
}

impl SubscriptionSection {
    /// Long-poll wait.
    #[must_use]
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    /// Shutdown grace period.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Persistent socket settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketSection {
    /// Endpoint the connector dials.
    pub url: String,
    /// Address the socket server listens on.
    pub bind: String,
    /// How long a connector send waits for its reply.
    pub response_timeout_secs: u64,
    /// Ping period.
    pub heartbeat_interval_secs: u64,
    /// Missed heartbeats before the connection is force-closed.
    pub heartbeat_miss_limit: u32,
    /// First reconnect delay.
    pub reconnect_base_ms: u64,
    /// Reconnect delay ceiling.
    pub reconnect_max_ms: u64,
}

impl Default for SocketSection {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/api/websocket".to_owned(),
            bind: "127.0.0.1:8080".to_owned(),
            response_timeout_secs: 60,
            heartbeat_interval_secs: 30,
            heartbeat_miss_limit: 4,
            reconnect_base_ms: 1000,
            reconnect_max_ms: 60_000,
        }
    }
}

impl SocketSection {
    /// Reply deadline.
    #[must_use]
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    /// Ping period.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// First reconnect delay.
    #[must_use]
    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    /// Reconnect delay ceiling.
    #[must_use]
    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }
}

/// Message cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Maximum items returned by a search or a subscribe backlog.
    pub search_limit: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self { search_limit: 100 }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Base level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Line format (`pretty`, `compact`, `json`).
    pub format: String,
    /// Write rotated files here instead of stderr.
    pub directory: Option<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directory: None,
        }
    }
}
