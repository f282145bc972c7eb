//! Connection acquisition with exponential backoff.
//!
//! [`ConnectionHelper`] owns the current transport. [`ConnectionHelper::acquire`]
//! hands it out, reconnecting first when there is none. Because acquisition
//! borrows the helper mutably, at most one attempt is ever in flight.

use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::error::{ConnectError, TransportError, TransportResult};
use super::socket::Connector;
use crate::core::{
    BACKOFF_BASE_DELAY, BACKOFF_MAX_ATTEMPTS, BACKOFF_MAX_DELAY, QUERY_AUTHORIZATION,
    QUERY_SESSION_ID,
};

/// Exponential backoff schedule for connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Attempts before giving up.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: BACKOFF_MAX_ATTEMPTS,
            base_delay: BACKOFF_BASE_DELAY,
            max_delay: BACKOFF_MAX_DELAY,
        }
    }
}

impl BackoffPolicy {
    /// Delay after failed attempt `attempt` (0-based): `min(base * 2^n, max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Every delay of the schedule, in order.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts).map(|attempt| self.delay_for(attempt))
    }
}

/// Build the connection URL for a session.
///
/// Query parameters have set semantics: each key appears once, and later
/// values replace earlier ones.
pub fn build_url(
    host: &str,
    bearer: &str,
    session_id: Uuid,
    extra: &[(String, String)],
) -> TransportResult<Url> {
    let mut url = Url::parse(host).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

    let mut params: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    let mut set = |key: &str, value: String| {
        params.retain(|(existing, _)| existing != key);
        params.push((key.to_owned(), value));
    };
    set(QUERY_AUTHORIZATION, format!("Bearer {bearer}"));
    set(QUERY_SESSION_ID, session_id.to_string());
    for (key, value) in extra {
        set(key, value.clone());
    }

    url.query_pairs_mut().clear().extend_pairs(&params);
    Ok(url)
}

/// Owns the current transport and replaces it on demand.
#[derive(Debug)]
pub struct ConnectionHelper<C: Connector> {
    connector: C,
    url: Url,
    policy: BackoffPolicy,
    socket: Option<C::Transport>,
}

impl<C: Connector> ConnectionHelper<C> {
    /// Create a helper with no open transport.
    pub fn new(connector: C, url: Url, policy: BackoffPolicy) -> Self {
        Self {
            connector,
            url,
            policy,
            socket: None,
        }
    }

    /// Host of the target URL, safe to log.
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or("<unknown>")
    }

    /// Whether a transport is currently held.
    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    /// The current transport, if any.
    pub fn socket_mut(&mut self) -> Option<&mut C::Transport> {
        self.socket.as_mut()
    }

    /// Drop the current transport. Returns it so the caller may close it.
    pub fn discard(&mut self) -> Option<C::Transport> {
        self.socket.take()
    }

    /// The current transport, connecting with backoff when there is none.
    pub async fn acquire(&mut self) -> Result<&mut C::Transport, ConnectError> {
        let socket = match self.socket.take() {
            Some(socket) => socket,
            None => {
                let policy = self.policy;
                self.connect_with_backoff(&policy).await?
            }
        };
        Ok(self.socket.insert(socket))
    }

    /// Try up to `policy.max_attempts` times, sleeping after each failure.
    pub async fn connect_with_backoff(
        &mut self,
        policy: &BackoffPolicy,
    ) -> Result<C::Transport, ConnectError> {
        let host = self.host().to_owned();
        let mut last_error = TransportError::ConnectionClosed;

        for attempt in 0..policy.max_attempts {
            debug!(%host, attempt, "connecting");
            match self.connector.connect(&self.url).await {
                Ok(socket) => {
                    info!(%host, attempt, "connected");
                    return Ok(socket);
                }
                Err(e) => {
                    let delay = policy.delay_for(attempt);
                    warn!(%host, attempt, error = %e, ?delay, "connection attempt failed");
                    last_error = e;
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(ConnectError::Exhausted {
            host,
            attempts: policy.max_attempts,
            last_error,
        })
    }
}
