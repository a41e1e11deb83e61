//! EHLO keywords.

/// Service extension advertised in the EHLO reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Extension {
    /// STARTTLS (RFC 3207).
    StartTls,
    /// AUTH with the mechanisms this client can use.
    Auth(Vec<AuthMechanism>),
    /// SIZE, with the limit when the server states one.
    Size(Option<usize>),
    /// 8BITMIME.
    EightBitMime,
    /// PIPELINING.
    Pipelining,
    /// SMTPUTF8.
    SmtpUtf8,
    /// Anything else, verbatim.
    Unknown(String),
}

impl Extension {
    /// Parses one EHLO reply line (without the code).
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        let Some(keyword) = words.next() else {
            return Self::Unknown(line.to_string());
        };
        match keyword.to_ascii_uppercase().as_str() {
            "STARTTLS" => Self::StartTls,
            "AUTH" => Self::Auth(words.filter_map(AuthMechanism::parse).collect()),
            "SIZE" => Self::Size(words.next().and_then(|s| s.parse().ok()).filter(|&n| n > 0)),
            "8BITMIME" => Self::EightBitMime,
            "PIPELINING" => Self::Pipelining,
            "SMTPUTF8" => Self::SmtpUtf8,
            _ => Self::Unknown(line.to_string()),
        }
    }
}

/// SASL mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMechanism {
    /// PLAIN (RFC 4616).
    Plain,
    /// LOGIN, for servers that predate PLAIN.
    Login,
}

impl AuthMechanism {
    /// Parses a mechanism name; `None` for mechanisms this client lacks.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PLAIN" => Some(Self::Plain),
            "LOGIN" => Some(Self::Login),
            _ => None,
        }
    }

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
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

    mod extension_parse_tests {
        use super::*;

        #[test]
        fn keywords_are_case_insensitive() {
            assert_eq!(Extension::parse("starttls"), Extension::StartTls);
            assert_eq!(Extension::parse("8BITMIME"), Extension::EightBitMime);
        }

        #[test]
        fn auth_keeps_known_mechanisms() {
            assert_eq!(
                Extension::parse("AUTH PLAIN LOGIN XOAUTH2 CRAM-MD5"),
                Extension::Auth(vec![AuthMechanism::Plain, AuthMechanism::Login])
            );
        }

        #[test]
        fn size_with_and_without_limit() {
            assert_eq!(Extension::parse("SIZE 52428800"), Extension::Size(Some(52_428_800)));
            assert_eq!(Extension::parse("SIZE"), Extension::Size(None));
            // Zero means no fixed limit.
            assert_eq!(Extension::parse("SIZE 0"), Extension::Size(None));
        }

        #[test]
        fn unknown_and_empty() {
            assert_eq!(
                Extension::parse("X-CUSTOM 1"),
                Extension::Unknown("X-CUSTOM 1".to_string())
            );
            assert!(matches!(Extension::parse(""), Extension::Unknown(_)));
        }
    }
}
