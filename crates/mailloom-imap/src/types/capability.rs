//! Server capabilities and response status.

/// Completion status of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Command completed successfully.
    Ok,
    /// Command failed (operational error).
    No,
    /// Command failed (protocol/syntax error).
    Bad,
    /// Server greeting (pre-authenticated).
    PreAuth,
    /// Server is closing connection.
    Bye,
}

impl Status {
    /// Returns true if this is a successful status.
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok | Self::PreAuth)
    }
}

/// Server capability.
///
/// Only capabilities the engine acts on get their own variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    /// `IMAP4rev1` (RFC 3501)
    Imap4Rev1,
    /// `IMAP4rev2` (RFC 9051)
    Imap4Rev2,
    /// IDLE (RFC 2177)
    Idle,
    /// LITERAL+ (RFC 7888)
    LiteralPlus,
    /// LITERAL- (RFC 7888)
    LiteralMinus,
    /// STARTTLS
    StartTls,
    /// LOGIN disabled until TLS is active
    LoginDisabled,
    /// SASL initial response (RFC 4959)
    SaslIr,
    /// AUTH mechanism
    Auth(String),
    /// ENABLE (RFC 5161)
    Enable,
    /// CONDSTORE (RFC 7162)
    CondStore,
    /// QRESYNC (RFC 7162)
    QResync,
    /// SPECIAL-USE (RFC 6154)
    SpecialUse,
    /// UIDPLUS (RFC 4315)
    UidPlus,
    /// Anything else, kept verbatim.
    Unknown(String),
}

impl Capability {
    /// Parses a capability atom.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let upper = s.to_ascii_uppercase();
        match upper.as_str() {
            "IMAP4REV1" => Self::Imap4Rev1,
            "IMAP4REV2" => Self::Imap4Rev2,
            "IDLE" => Self::Idle,
            "LITERAL+" => Self::LiteralPlus,
            "LITERAL-" => Self::LiteralMinus,
            "STARTTLS" => Self::StartTls,
            "LOGINDISABLED" => Self::LoginDisabled,
            "SASL-IR" => Self::SaslIr,
            "ENABLE" => Self::Enable,
            "CONDSTORE" => Self::CondStore,
            "QRESYNC" => Self::QResync,
            "SPECIAL-USE" => Self::SpecialUse,
            "UIDPLUS" => Self::UidPlus,
            _ => upper
                .strip_prefix("AUTH=")
                .map_or_else(|| Self::Unknown(s.to_string()), |m| Self::Auth(m.to_string())),
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Imap4Rev1 => f.write_str("IMAP4rev1"),
            Self::Imap4Rev2 => f.write_str("IMAP4rev2"),
            Self::Idle => f.write_str("IDLE"),
            Self::LiteralPlus => f.write_str("LITERAL+"),
            Self::LiteralMinus => f.write_str("LITERAL-"),
            Self::StartTls => f.write_str("STARTTLS"),
            Self::LoginDisabled => f.write_str("LOGINDISABLED"),
            Self::SaslIr => f.write_str("SASL-IR"),
            Self::Auth(mech) => write!(f, "AUTH={mech}"),
            Self::Enable => f.write_str("ENABLE"),
            Self::CondStore => f.write_str("CONDSTORE"),
            Self::QResync => f.write_str("QRESYNC"),
            Self::SpecialUse => f.write_str("SPECIAL-USE"),
            Self::UidPlus => f.write_str("UIDPLUS"),
            Self::Unknown(s) => f.write_str(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok() {
        assert!(Status::Ok.is_ok());
        assert!(Status::PreAuth.is_ok());
        assert!(!Status::No.is_ok());
        assert!(!Status::Bye.is_ok());
    }

    #[test]
    fn parse_known_and_unknown() {
        assert_eq!(Capability::parse("imap4rev1"), Capability::Imap4Rev1);
        assert_eq!(Capability::parse("CONDSTORE"), Capability::CondStore);
        assert_eq!(Capability::parse("SASL-IR"), Capability::SaslIr);
        assert_eq!(Capability::parse("AUTH=plain"), Capability::Auth("PLAIN".into()));
        assert_eq!(
            Capability::parse("X-GM-EXT-1"),
            Capability::Unknown("X-GM-EXT-1".into())
        );
    }

    #[test]
    fn display_round_trips() {
        for atom in ["IMAP4rev2", "IDLE", "QRESYNC", "AUTH=PLAIN", "LITERAL+"] {
            assert_eq!(Capability::parse(atom).to_string(), atom);
        }
    }
}
