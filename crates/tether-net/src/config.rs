//! Construction parameters for the connection roles.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_io_timeout() -> Duration {
    Duration::from_millis(100)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_retry_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_max_connections() -> usize {
    1
}

/// Client-side configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CltConfig {
    /// `host:port` to dial, resolved at connect time.
    pub addr: String,
    /// Diagnostic label; defaults to `"clt"`.
    #[serde(default)]
    pub name: Option<String>,
    /// Bound on blocking queries and send enqueue.
    #[serde(default = "default_io_timeout")]
    pub io_timeout: Duration,
    /// Deadline for one handshake attempt.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    /// Pause between attempts of the auto variant.
    #[serde(default = "default_retry_interval")]
    pub retry_interval: Duration,
}

impl CltConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            name: None,
            io_timeout: default_io_timeout(),
            connect_timeout: default_connect_timeout(),
            retry_interval: default_retry_interval(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }
}

/// Server-side configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvcConfig {
    /// `host:port` to bind, resolved at bind time.
    pub addr: String,
    /// Diagnostic label; defaults to `"svc"`.
    #[serde(default)]
    pub name: Option<String>,
    /// Bound on simultaneous pool membership.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Bound on blocking queries and send enqueue.
    #[serde(default = "default_io_timeout")]
    pub io_timeout: Duration,
    /// Pause between bind attempts of the auto variant.
    #[serde(default = "default_retry_interval")]
    pub retry_interval: Duration,
}

impl SvcConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            name: None,
            max_connections: default_max_connections(),
            io_timeout: default_io_timeout(),
            retry_interval: default_retry_interval(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }
}
