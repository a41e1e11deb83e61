//! SMTP command builder.

use crate::types::{Address, AuthMechanism};

/// SMTP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// HELO, for servers that reject EHLO.
    Helo {
        /// Client hostname.
        hostname: String,
    },
    /// EHLO.
    Ehlo {
        /// Client hostname.
        hostname: String,
    },
    /// STARTTLS.
    StartTls,
    /// AUTH.
    Auth {
        /// Mechanism.
        mechanism: AuthMechanism,
        /// Base64 initial response.
        initial_response: Option<String>,
    },
    /// MAIL FROM.
    MailFrom {
        /// Reverse path.
        from: Address,
        /// `BODY=8BITMIME`.
        eight_bit: bool,
        /// `SIZE=` declaration.
        size: Option<usize>,
        /// `SMTPUTF8`.
        utf8: bool,
    },
    /// RCPT TO.
    RcptTo {
        /// Forward path.
        to: Address,
    },
    /// DATA.
    Data,
    /// QUIT.
    Quit,
}

impl Command {
    /// Encodes the command line including CRLF.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let line = match self {
            Self::Helo { hostname } => format!("HELO {hostname}"),
            Self::Ehlo { hostname } => format!("EHLO {hostname}"),
            Self::StartTls => "STARTTLS".to_string(),
            Self::Auth {
                mechanism,
                initial_response: Some(response),
            } => format!("AUTH {} {response}", mechanism.as_str()),
            Self::Auth {
                mechanism,
                initial_response: None,
            } => format!("AUTH {}", mechanism.as_str()),
            Self::MailFrom {
                from,
                eight_bit,
                size,
                utf8,
            } => {
                let mut line = format!("MAIL FROM:<{from}>");
                if *eight_bit {
                    line.push_str(" BODY=8BITMIME");
                }
                if let Some(size) = size {
                    line.push_str(&format!(" SIZE={size}"));
                }
                if *utf8 {
                    line.push_str(" SMTPUTF8");
                }
                line
            }
            Self::RcptTo { to } => format!("RCPT TO:<{to}>"),
            Self::Data => "DATA".to_string(),
            Self::Quit => "QUIT".to_string(),
        };
        let mut bytes = line.into_bytes();
        bytes.extend_from_slice(b"\r\n");
        bytes
    }

    /// Command verb, safe to log (AUTH responses are never included).
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Helo { .. } => "HELO",
            Self::Ehlo { .. } => "EHLO",
            Self::StartTls => "STARTTLS",
            Self::Auth { .. } => "AUTH",
            Self::MailFrom { .. } => "MAIL",
            Self::RcptTo { .. } => "RCPT",
            Self::Data => "DATA",
            Self::Quit => "QUIT",
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
    fn greetings() {
        let ehlo = Command::Ehlo {
            hostname: "client.example.com".to_string(),
        };
        assert_eq!(ehlo.serialize(), b"EHLO client.example.com\r\n");
        assert_eq!(ehlo.verb(), "EHLO");
    }

    #[test]
    fn auth_with_and_without_initial_response() {
        let ir = Command::Auth {
            mechanism: AuthMechanism::Plain,
            initial_response: Some("AHVzZXIAcGFzcw==".to_string()),
        };
        assert_eq!(ir.serialize(), b"AUTH PLAIN AHVzZXIAcGFzcw==\r\n");
        let login = Command::Auth {
            mechanism: AuthMechanism::Login,
            initial_response: None,
        };
        assert_eq!(login.serialize(), b"AUTH LOGIN\r\n");
    }

    #[test]
    fn mail_from_parameters() {
        let plain = Command::MailFrom {
            from: Address::new("sender@example.com").unwrap(),
            eight_bit: false,
            size: None,
            utf8: false,
        };
        assert_eq!(plain.serialize(), b"MAIL FROM:<sender@example.com>\r\n");

        let full = Command::MailFrom {
            from: Address::new("sender@example.com").unwrap(),
            eight_bit: true,
            size: Some(12345),
            utf8: true,
        };
        assert_eq!(
            full.serialize(),
            b"MAIL FROM:<sender@example.com> BODY=8BITMIME SIZE=12345 SMTPUTF8\r\n"
        );
    }

    #[test]
    fn rcpt_to() {
        let cmd = Command::RcptTo {
            to: Address::new("recipient@example.com").unwrap(),
        };
        assert_eq!(cmd.serialize(), b"RCPT TO:<recipient@example.com>\r\n");
    }
}
