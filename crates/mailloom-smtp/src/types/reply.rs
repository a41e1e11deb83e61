//! Server replies.

use crate::error::Error;

/// A complete (possibly multi-line) server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Three-digit reply code.
    pub code: ReplyCode,
    /// Text of each line, code and separator removed.
    pub lines: Vec<String>,
}

impl Reply {
    /// Creates a reply.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(code: ReplyCode, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// 2xx.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// Reply text, lines joined by a space.
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join(" ")
    }

    /// RFC 3463 enhanced status (`5.1.1`) at the start of the first line.
    #[must_use]
    pub fn enhanced_status(&self) -> Option<&str> {
        let first = self.lines.first()?.split_whitespace().next()?;
        let mut parts = first.split('.');
        let class = parts.next()?;
        let valid = matches!(class, "2" | "4" | "5")
            && parts.clone().count() == 2
            && parts.all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()));
        valid.then_some(first)
    }

    /// Converts a rejection into [`Error::SmtpError`], keeping the
    /// server's code and text.
    #[must_use]
    pub fn into_error(self) -> Error {
        Error::smtp_error(self.code.as_u16(), self.text())
    }

    /// Passes a success through and turns anything else into an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SmtpError`] unless the code is `expected`.
    pub fn expect_code(self, expected: ReplyCode) -> crate::Result<Self> {
        if self.code == expected {
            Ok(self)
        } else {
            Err(self.into_error())
        }
    }

    /// Like [`Self::expect_code`] for any 2xx code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SmtpError`] for non-2xx replies.
    pub fn expect_success(self) -> crate::Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.into_error())
        }
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.text())
    }
}

/// SMTP reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// 220 Service ready.
    pub const SERVICE_READY: Self = Self(220);
    /// 221 Closing channel.
    pub const CLOSING: Self = Self(221);
    /// 235 Authentication succeeded.
    pub const AUTH_OK: Self = Self(235);
    /// 250 Completed.
    pub const OK: Self = Self(250);
    /// 334 Authentication challenge.
    pub const AUTH_CONTINUE: Self = Self(334);
    /// 354 Start mail input.
    pub const START_DATA: Self = Self(354);
    /// 421 Service not available.
    pub const SERVICE_UNAVAILABLE: Self = Self(421);
    /// 500 Command unrecognized.
    pub const SYNTAX_ERROR: Self = Self(500);
    /// 502 Command not implemented.
    pub const NOT_IMPLEMENTED: Self = Self(502);
    /// 550 Mailbox unavailable.
    pub const MAILBOX_UNAVAILABLE: Self = Self(550);

    /// Creates a code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Numeric value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// 2xx.
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 >= 200 && self.0 < 300
    }

    /// 3xx.
    #[must_use]
    pub const fn is_intermediate(self) -> bool {
        self.0 >= 300 && self.0 < 400
    }

    /// 4xx: try again later.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        self.0 >= 400 && self.0 < 500
    }

    /// 5xx: do not repeat.
    #[must_use]
    pub const fn is_permanent(self) -> bool {
        self.0 >= 500 && self.0 < 600
    }
}

impl std::fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
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

    fn reply(code: u16, lines: &[&str]) -> Reply {
        Reply::new(
            ReplyCode::new(code),
            lines.iter().map(ToString::to_string).collect(),
        )
    }

    mod reply_code_tests {
        use super::*;

        #[test]
        fn classes() {
            assert!(ReplyCode::OK.is_success());
            assert!(ReplyCode::START_DATA.is_intermediate());
            assert!(ReplyCode::SERVICE_UNAVAILABLE.is_transient());
            assert!(ReplyCode::MAILBOX_UNAVAILABLE.is_permanent());
            assert!(!ReplyCode::MAILBOX_UNAVAILABLE.is_transient());
        }
    }

    mod reply_tests {
        use super::*;

        #[test]
        fn display_keeps_code_and_text() {
            let r = reply(550, &["5.1.1 <bob@example.org>: user unknown"]);
            assert_eq!(r.to_string(), "550 5.1.1 <bob@example.org>: user unknown");
        }

        #[test]
        fn multi_line_text_is_joined() {
            let r = reply(421, &["try again", "later"]);
            assert_eq!(r.text(), "try again later");
        }

        #[test]
        fn enhanced_status_detected() {
            assert_eq!(reply(550, &["5.1.1 no such user"]).enhanced_status(), Some("5.1.1"));
            assert_eq!(reply(550, &["no such user"]).enhanced_status(), None);
            assert_eq!(reply(250, &[]).enhanced_status(), None);
        }

        #[test]
        fn rejection_becomes_error() {
            let err = reply(552, &["too big"]).expect_success().unwrap_err();
            assert!(err.is_permanent());
            assert_eq!(err.to_string(), "552 too big");
        }

        #[test]
        fn expect_code_requires_exact_match() {
            assert!(reply(250, &["ok"]).expect_code(ReplyCode::START_DATA).is_err());
            assert!(reply(354, &["go"]).expect_code(ReplyCode::START_DATA).is_ok());
        }
    }
}
