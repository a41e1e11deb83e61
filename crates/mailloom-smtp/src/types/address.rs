//! Envelope addresses.

use crate::error::{Error, Result};

/// A bare `local@domain` address as used in MAIL FROM and RCPT TO.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Validates and wraps an address. Surrounding angle brackets and
    /// whitespace are removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] for anything that is not a single
    /// `local@domain` without spaces or control characters.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        let trimmed = addr.trim().trim_start_matches('<').trim_end_matches('>');
        validate(trimmed)?;
        Ok(Self(trimmed.to_string()))
    }

    /// The address.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the address needs SMTPUTF8.
    #[must_use]
    pub fn is_ascii(&self) -> bool {
        self.0.is_ascii()
    }
}

fn validate(addr: &str) -> Result<()> {
    let Some((local, domain)) = addr.rsplit_once('@') else {
        return Err(Error::InvalidAddress(format!("{addr:?} has no @")));
    };
    if local.is_empty() || domain.is_empty() {
        return Err(Error::InvalidAddress(format!(
            "{addr:?} has an empty local part or domain"
        )));
    }
    if local.contains('@') && !local.starts_with('"') {
        return Err(Error::InvalidAddress(format!("{addr:?} has more than one @")));
    }
    if addr.chars().any(|c| c.is_whitespace() || c.is_control() || c == '<' || c == '>') {
        return Err(Error::InvalidAddress(format!(
            "{addr:?} contains spaces or control characters"
        )));
    }
    Ok(())
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
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
    fn valid_address() {
        assert_eq!(Address::new("user@example.com").unwrap().as_str(), "user@example.com");
    }

    #[test]
    fn brackets_are_stripped() {
        assert_eq!(Address::new(" <user@example.com> ").unwrap().as_str(), "user@example.com");
    }

    #[test]
    fn invalid_addresses() {
        for bad in ["", "userexample.com", "@example.com", "user@", "a@b@c", "us er@x.org", "a\r\n@x.org"] {
            assert!(Address::new(bad).is_err(), "{bad:?} accepted");
        }
    }

    #[test]
    fn utf8_detection() {
        assert!(Address::new("a@example.com").unwrap().is_ascii());
        assert!(!Address::new("jörg@example.com").unwrap().is_ascii());
    }
}
