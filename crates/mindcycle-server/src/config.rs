// Bridge configuration

use std::net::SocketAddr;
use std::time::Duration;

/// Outbound queue tuning
#[derive(Debug, Clone)]
pub struct OutboundConfig {
    /// Coalescing window before a batch is flushed
    pub flush_delay: Duration,
    /// Maximum frames per batch
    pub max_batch: usize,
    /// Bounded retries per batch
    pub max_retries: u32,
    /// Base backoff between retries (doubles each attempt)
    pub backoff_base: Duration,
    /// How long pending frames are drained after a disconnect
    pub disconnect_grace: Duration,
    /// Per-socket queue depth; non-critical overflow is dropped
    pub queue_depth: usize,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            flush_delay: Duration::from_millis(25),
            max_batch: 32,
            max_retries: 5,
            backoff_base: Duration::from_millis(100),
            disconnect_grace: Duration::from_secs(5),
            queue_depth: 512,
        }
    }
}

/// Bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub bind_addr: SocketAddr,
    /// Ping period
    pub heartbeat_period: Duration,
    /// Close the socket after this much silence. The default is long
    /// enough to tolerate slow LLM operations on the client side.
    pub heartbeat_timeout: Duration,
    pub outbound: OutboundConfig,
    /// Secret for bearer token verification
    pub jwt_secret: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 7070)),
            heartbeat_period: Duration::from_secs(25),
            heartbeat_timeout: Duration::from_secs(120),
            outbound: OutboundConfig::default(),
            jwt_secret: String::new(),
        }
    }
}

impl BridgeConfig {
    /// Load overrides from the environment
    ///
    /// Recognized: MINDCYCLE_BIND, MINDCYCLE_JWT_SECRET,
    /// MINDCYCLE_HEARTBEAT_TIMEOUT_SECS.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(bind) = std::env::var("MINDCYCLE_BIND") {
            if let Ok(addr) = bind.parse() {
                config.bind_addr = addr;
            }
        }
        if let Ok(secret) = std::env::var("MINDCYCLE_JWT_SECRET") {
            config.jwt_secret = secret;
        }
        if let Ok(timeout) = std::env::var("MINDCYCLE_HEARTBEAT_TIMEOUT_SECS") {
            if let Ok(secs) = timeout.parse() {
                config.heartbeat_timeout = Duration::from_secs(secs);
            }
        }
        config
    }

    pub fn with_jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.jwt_secret = secret.into();
        self
    }
}
