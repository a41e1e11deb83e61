//! IMAP connection management.
//!
//! - Configuration (host, port, security mode)
//! - TLS/plaintext transport
//! - Cancel-safe framed I/O
//! - Type-state client with tagged request/response and pipelining
//! - IDLE

mod client;
mod config;
mod framed;
mod idle;
mod stream;

pub use client::{Authenticated, Client, CommandOutcome, NotAuthenticated};
pub use config::{Config, ConfigBuilder, Security};
pub use framed::FramedStream;
pub use idle::{IdleEvent, IdleHandle};
pub use stream::{ImapStream, connect, create_tls_connector};
