//! # mailloom-mime
//!
//! Immutable message model for the mailloom engine.
//!
//! ## Features
//!
//! - **Parsing**: headers with folding and RFC 2047 words, nested
//!   multiparts, Base64 and Quoted-Printable bodies, common charsets
//! - **Addresses**: `"Name" <local@domain>` lists with groups and comments
//! - **Threading fields**: `Message-ID`, `In-Reply-To`, `References`
//! - **Envelope**: the summary the cache stores for every message
//! - **Composition**: [`MessageBuilder`] produces RFC 5322 bytes and the
//!   SMTP envelope
//!
//! ## Parsing
//!
//! ```
//! use mailloom_mime::Message;
//!
//! let raw = b"From: Alice <alice@example.com>\r\n\
//!             Subject: Hello\r\n\
//!             Message-ID: <1@example.com>\r\n\
//!             \r\n\
//!             Hi Bob";
//!
//! let message = Message::parse(raw).unwrap();
//! assert_eq!(message.subject().as_deref(), Some("Hello"));
//! assert_eq!(message.message_id().as_deref(), Some("1@example.com"));
//! assert_eq!(message.text_body().as_deref(), Some("Hi Bob"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod address;
mod builder;
mod content_type;
mod envelope;
mod error;
mod header;
mod message;
mod message_id;

pub mod encoding;

pub use address::{Mailbox, format_address_list, parse_address_list};
pub use builder::{Attachment, ComposedMessage, MessageBuilder};
pub use content_type::{ContentDisposition, ContentType};
pub use envelope::{Envelope, parse_date};
pub use error::{Error, Result};
pub use header::{Headers, split_entity};
pub use message::{MAX_NESTING, Message, Part, TransferEncoding};
pub use message_id::{format_msg_id_list, parse_msg_id, parse_msg_id_list};
