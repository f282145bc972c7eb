//! Session configuration.

use std::time::Duration;

use crate::core::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_PAYLOAD};
use crate::transport::BackoffPolicy;

/// Session configuration.
#[derive(Clone)]
pub struct SessionConfig {
    /// Server URL (`ws://` or `wss://`).
    pub host: String,

    /// Bearer credential sent as the `authorization` query parameter.
    pub bearer: String,

    /// Require the CALE handshake and encrypt all non-handshake frames.
    pub use_cale: bool,

    /// Bound on opening a single transport.
    pub connect_timeout: Duration,

    /// Largest inbound message accepted.
    pub max_payload: usize,

    /// Extra query parameters added to the connection URL.
    pub query_params: Vec<(String, String)>,

    /// Reconnect schedule.
    pub backoff: BackoffPolicy,

    /// Resend unacknowledged data frames once a reconnected channel is usable.
    pub resend_unacked_on_reconnect: bool,
}

impl SessionConfig {
    /// Configuration with defaults for everything but host and bearer.
    pub fn new(host: impl Into<String>, bearer: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            bearer: bearer.into(),
            use_cale: true,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_payload: DEFAULT_MAX_PAYLOAD,
            query_params: Vec::new(),
            backoff: BackoffPolicy::default(),
            resend_unacked_on_reconnect: false,
        }
    }

    /// Start a builder.
    pub fn builder(host: impl Into<String>, bearer: impl Into<String>) -> SessionConfigBuilder {
        SessionConfigBuilder::new(host, bearer)
    }
}

// The bearer is a credential; keep it out of debug output.
impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("host", &self.host)
            .field("bearer", &"<redacted>")
            .field("use_cale", &self.use_cale)
            .field("connect_timeout", &self.connect_timeout)
            .field("max_payload", &self.max_payload)
            .field(
                "query_params",
                &self.query_params.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            )
            .field("backoff", &self.backoff)
            .field(
                "resend_unacked_on_reconnect",
                &self.resend_unacked_on_reconnect,
            )
            .finish()
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Create a new builder.
    pub fn new(host: impl Into<String>, bearer: impl Into<String>) -> Self {
        Self {
            config: SessionConfig::new(host, bearer),
        }
    }

    /// Enable or disable CALE.
    pub fn use_cale(mut self, enabled: bool) -> Self {
        self.config.use_cale = enabled;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the inbound message size limit.
    pub fn max_payload(mut self, bytes: usize) -> Self {
        self.config.max_payload = bytes;
        self
    }

    /// Add a query parameter. A repeated key replaces the earlier value.
    pub fn query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.config.query_params.retain(|(k, _)| *k != key);
        self.config.query_params.push((key, value.into()));
        self
    }

    /// Set the reconnect schedule.
    pub fn backoff(mut self, policy: BackoffPolicy) -> Self {
        self.config.backoff = policy;
        self
    }

    /// Resend unacknowledged data after reconnecting.
    pub fn resend_unacked_on_reconnect(mut self, enabled: bool) -> Self {
        self.config.resend_unacked_on_reconnect = enabled;
        self
    }

    /// Build the session configuration.
    pub fn build(self) -> SessionConfig {
        self.config
    }
}
