//! IMAP protocol parser.
//!
//! A sans-I/O parser for IMAP server responses. The framed reader hands
//! it one complete response at a time (literals included); nothing here
//! touches a socket.
//!
//! - **Lexer**: tokenizes raw bytes into atoms, strings, numbers, literals
//! - **Response parser**: builds structured responses from tokens
//!
//! # Example
//!
//! ```
//! use mailloom_imap::parser::{Response, ResponseParser, UntaggedResponse};
//!
//! let input = b"* OK IMAP4rev2 server ready\r\n";
//! let response = ResponseParser::parse(input).unwrap();
//!
//! match response {
//!     Response::Untagged(UntaggedResponse::Ok { text, .. }) => {
//!         assert!(text.contains("IMAP4rev2"));
//!     }
//!     _ => panic!("Expected untagged OK"),
//! }
//! ```

pub mod lexer;
pub mod response;

pub use lexer::{Lexer, Token};
pub use response::{
    Address, Envelope, FetchItem, Response, ResponseParser, StatusItem, UntaggedResponse,
};
