//! # mailloom-imap
//!
//! IMAP client for the mailloom engine, speaking RFC 9051 (`IMAP4rev2`)
//! with RFC 3501 (`IMAP4rev1`) servers supported as well.
//!
//! Two layers:
//!
//! - **Protocol driver** ([`connection`]): a type-state [`Client`] over any
//!   `AsyncRead + AsyncWrite` stream. Sans-I/O [`parser`], command
//!   encoding with synchronizing and `LITERAL+` literals, tagged
//!   pipelining, cancel-safe IDLE, STARTTLS and SASL PLAIN.
//! - **Session manager** ([`session`]): an actor owning one connection
//!   that reconnects with bounded backoff, pipelines queued commands,
//!   idles between requests and reports phase changes and mailbox events.
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailloom_imap::session::{Credentials, SessionConfig, SessionHandle, TcpConnector};
//! use mailloom_imap::{Config, SearchCriteria, Security};
//!
//! #[tokio::main]
//! async fn main() -> mailloom_imap::Result<()> {
//!     let config = Config::new("imap.example.com", Security::Implicit);
//!     let connector = TcpConnector::new(config, Credentials::new("me@example.com", "secret"));
//!     let session = SessionHandle::spawn(connector, SessionConfig::default());
//!
//!     let inbox = session.select("INBOX").await?;
//!     println!("{} messages, uidvalidity {:?}", inbox.exists, inbox.uid_validity);
//!
//!     let unseen = session.uid_search(SearchCriteria::Unseen).await?;
//!     println!("unseen: {:?}", unseen.uids);
//!
//!     session.logout().await
//! }
//! ```
//!
//! ## Connection States
//!
//! ```text
//! ┌─────────────────────┐
//! │  NotAuthenticated   │ ── login() / authenticate_plain() ──→ Authenticated
//! └─────────────────────┘
//!            │ starttls()
//!            ▼
//! ┌─────────────────────┐
//! │    Authenticated    │ ── select()/examine() keeps the state and
//! └─────────────────────┘    records the selected mailbox
//! ```
//!
//! The session adds its own observable phases on top:
//! `Disconnected → Connecting → Authenticating → Authenticated →
//! Selected ⇄ Idle`, falling back to `Disconnected` on any transport
//! failure.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod pipeline;
pub mod session;
pub mod types;

pub use command::{
    Command, FetchAttribute, LiteralMode, SearchCriteria, StatusAttribute, StoreAction,
    StoreOperation, TagGenerator,
};
pub use connection::{
    Authenticated, Client, CommandOutcome, Config, ConfigBuilder, FramedStream, IdleEvent,
    IdleHandle, ImapStream, NotAuthenticated, Security,
};
pub use error::{Error, Result};
pub use parser::{Response, ResponseParser, UntaggedResponse};
pub use pipeline::PipelineConfig;
pub use session::{SessionConfig, SessionEvent, SessionHandle, SessionPhase};
pub use types::{
    Capability, Flag, Flags, ListResponse, Mailbox, MailboxAttribute, ResponseCode,
    SelectedMailbox, SeqNum, SpecialUse, Status, Tag, Uid, UidSet, UidValidity,
};

/// IMAP protocol version supported.
pub const IMAP_VERSION: &str = "IMAP4rev2";
