//! # mailloom-smtp
//!
//! SMTP submission client (RFC 5321) used by the mailloom engine to send
//! outgoing mail.
//!
//! - Type-state client: commands are only callable in the state where the
//!   protocol allows them
//! - Implicit TLS (port 465) and STARTTLS
//! - AUTH PLAIN and LOGIN
//! - SIZE, 8BITMIME and SMTPUTF8 on MAIL FROM
//! - Rejections keep the server's code and text, so a `550` stays
//!   distinguishable from a `451`
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailloom_smtp::{Address, Client};
//! use mailloom_smtp::connection::connect;
//!
//! #[tokio::main]
//! async fn main() -> mailloom_smtp::Result<()> {
//!     let stream = connect("smtp.example.com", 587).await?;
//!     let client = Client::from_stream(stream).await?
//!         .ehlo("client.example.com").await?
//!         .starttls("smtp.example.com").await?
//!         .authenticate("user@example.com", "password").await?;
//!
//!     let message = b"Subject: Test\r\n\r\nHello\r\n";
//!     let (client, _reply) = client
//!         .mail_from(Address::new("sender@example.com")?, Some(message.len()), false).await?
//!         .rcpt_to(Address::new("recipient@example.com")?).await?
//!         .data().await?
//!         .send_message(message).await?;
//!     client.quit().await
//! }
//! ```
//!
//! ## Connection States
//!
//! ```text
//! Connected ── authenticate() ──→ Authenticated
//!     │                                │
//!     └──────── mail_from() ───────────┘
//!                   │
//!                   ▼
//!            MailTransaction ── rcpt_to() ──→ RecipientAdded ── data() ──→ Data
//!                                                                           │
//!            Connected ←──────────────── send_message() ────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod types;

pub use connection::{
    Authenticated, Client, CommandState, Connected, Data, MailTransaction, RecipientAdded,
    ServerInfo, SmtpConnection, SmtpStream,
};
pub use error::{Error, Result};
pub use types::{Address, AuthMechanism, Extension, Reply, ReplyCode};
