//! Long-lived IMAP session.
//!
//! A session owns one connection inside a spawned actor task and is
//! driven through a cloneable [`SessionHandle`]. The actor:
//!
//! - reconnects with bounded exponential [`Backoff`] when the transport
//!   fails, failing the commands that were outstanding with
//!   [`Error::ConnectionLost`](crate::Error::ConnectionLost);
//! - pipelines independent commands that queue up while it is busy;
//! - idles on a watched mailbox between requests, leaving IDLE as soon as
//!   a request arrives, and falls back to NOOP polling when the server
//!   lacks IDLE;
//! - treats a command that exceeds its deadline like a lost connection.
//!
//! Phase changes are observable through a `watch` channel and mailbox
//! changes through a `broadcast` channel of [`SessionEvent`]s.

mod actor;
mod backoff;
mod connector;
mod fetched;
mod handle;
mod phase;

use std::time::Duration;

use crate::pipeline::PipelineConfig;

pub use backoff::Backoff;
pub use connector::{Connector, Credentials, TcpConnector};
pub use fetched::{ChangedSince, FetchedMessage, SearchResult, collect_fetches};
pub use handle::{SessionHandle, StoreResult};
pub use phase::{SessionEvent, SessionPhase};

/// Tuning for a [`SessionHandle`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Deadline for one command or pipelined batch.
    pub command_timeout: Duration,
    /// Deadline for opening a connection and reading the greeting.
    pub connect_timeout: Duration,
    /// Reconnect schedule.
    pub backoff: Backoff,
    /// Pipelining limits; narrowed further by server capabilities.
    pub pipeline: PipelineConfig,
    /// How long one IDLE runs before it is renewed. Servers may drop a
    /// client after 30 minutes of IDLE.
    pub idle_refresh: Duration,
    /// NOOP interval when the server has no IDLE, and the pause after a
    /// failed watch attempt.
    pub poll_interval: Duration,
    /// Capacity of the request queue.
    pub queue_depth: usize,
    /// Capacity of the event broadcast; slow subscribers lag.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
            backoff: Backoff::default(),
            pipeline: PipelineConfig::default(),
            idle_refresh: Duration::from_secs(25 * 60),
            poll_interval: Duration::from_secs(60),
            queue_depth: 64,
            event_capacity: 256,
        }
    }
}

impl SessionConfig {
    /// Sets the command deadline.
    #[must_use]
    pub const fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the connect deadline.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the reconnect schedule.
    #[must_use]
    pub const fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the pipelining limits.
    #[must_use]
    pub fn pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Sets the IDLE renewal interval.
    #[must_use]
    pub const fn idle_refresh(mut self, interval: Duration) -> Self {
        self.idle_refresh = interval;
        self
    }

    /// Sets the polling interval.
    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_renew_idle_before_server_timeout() {
        let config = SessionConfig::default();
        assert!(config.idle_refresh < Duration::from_secs(30 * 60));
        assert!(config.queue_depth > 0);
    }

    #[test]
    fn builder_overrides() {
        let config = SessionConfig::default()
            .command_timeout(Duration::from_millis(50))
            .poll_interval(Duration::from_secs(5));
        assert_eq!(config.command_timeout, Duration::from_millis(50));
        assert_eq!(config.poll_interval, Duration::from_secs(5));
    }
}
