//! Connection configuration types.

use std::time::Duration;

/// Connection security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// No encryption (port 143). Only for local test servers.
    None,
    /// Start with plaintext, upgrade with STARTTLS (port 143).
    StartTls,
    /// TLS from the start (port 993).
    #[default]
    Implicit,
}

impl Security {
    /// Returns the default port for this security mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::None | Self::StartTls => 143,
            Self::Implicit => 993,
        }
    }
}

/// Where and how to reach an IMAP server.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server hostname, also used for certificate verification.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Security mode.
    pub security: Security,
    /// Limit for TCP connect plus TLS handshake plus greeting.
    pub connect_timeout: Duration,
}

impl Config {
    /// Creates a configuration with implicit TLS on port 993.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self::builder(host).build()
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(host: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(host)
    }

    /// `host:port` for socket connection.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Builder for [`Config`].
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    host: String,
    port: Option<u16>,
    security: Security,
    connect_timeout: Duration,
}

impl ConfigBuilder {
    /// Creates a new builder with the given hostname.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            security: Security::Implicit,
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the port. Defaults to the security mode's well-known port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the security mode.
    #[must_use]
    pub const fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> Config {
        Config {
            port: self.port.unwrap_or_else(|| self.security.default_port()),
            host: self.host,
            security: self.security,
            connect_timeout: self.connect_timeout,
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn port_follows_security() {
        assert_eq!(Config::new("imap.example.org").port, 993);
        let starttls = Config::builder("imap.example.org")
            .security(Security::StartTls)
            .build();
        assert_eq!(starttls.port, 143);
        assert_eq!(starttls.address(), "imap.example.org:143");
    }

    #[test]
    fn explicit_port_wins() {
        let config = Config::builder("localhost")
            .security(Security::None)
            .port(1143)
            .connect_timeout(Duration::from_secs(2))
            .build();
        assert_eq!(config.port, 1143);
        assert_eq!(config.security, Security::None);
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
    }
}
