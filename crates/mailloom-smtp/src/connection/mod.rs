//! Transport and the type-state client.

mod client;
mod stream;

pub use client::{
    Authenticated, Client, CommandState, Connected, Data, MailTransaction, RecipientAdded,
    SmtpConnection, dot_stuff,
};
pub use stream::{SmtpStream, connect, connect_tls};

use std::collections::HashSet;

use crate::types::{AuthMechanism, Extension};

/// What the server announced in its greeting and EHLO reply.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    /// First word of the greeting.
    pub hostname: String,
    /// EHLO extensions; empty after a HELO fallback.
    pub extensions: HashSet<Extension>,
}

impl ServerInfo {
    /// Returns true if `ext` was advertised.
    #[must_use]
    pub fn supports(&self, ext: &Extension) -> bool {
        self.extensions.contains(ext)
    }

    /// STARTTLS advertised.
    #[must_use]
    pub fn supports_starttls(&self) -> bool {
        self.supports(&Extension::StartTls)
    }

    /// SIZE limit, when one was stated.
    #[must_use]
    pub fn max_message_size(&self) -> Option<usize> {
        self.extensions.iter().find_map(|ext| match ext {
            Extension::Size(limit) => *limit,
            _ => None,
        })
    }

    /// AUTH mechanisms this client can use, in the server's order.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Vec<AuthMechanism> {
        self.extensions
            .iter()
            .find_map(|ext| match ext {
                Extension::Auth(mechanisms) => Some(mechanisms.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }
}
