//! # mailloom-core
//!
//! The engine half of `mailloom`: everything between the protocol crates
//! and a user interface.
//!
//! This crate provides:
//! - Configuration and account validation
//! - A local `SQLite` store with versioned migrations and full-text search
//! - Batched, resumable folder synchronization with trigger coalescing
//! - Incremental conversation grouping
//! - Message submission with bounded retry
//!
//! ## Example
//!
//! ```ignore
//! use mailloom_core::{Account, EngineConfig};
//!
//! let config = EngineConfig::load(&path).await?;
//! let account = Account::open(&config.accounts[0], &config.store_path(&config.accounts[0])).await?;
//! account.refresh_folders().await?;
//! account.sync_folder("INBOX").await?;
//! for conversation in account.conversations_in("INBOX").await? {
//!     println!("{:?} ({} messages)", conversation.subject, conversation.members.len());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod account;
pub mod config;
pub mod conversation;
mod error;
pub mod store;
pub mod submit;
pub mod sync;

pub use account::Account;
pub use config::{AccountConfig, EngineConfig, validate_account};
pub use conversation::{ConversationFeed, ConversationId, ConversationSummary, Conversations};
pub use error::{Error, Result};
pub use store::{Folder, FolderId, MessageKey, MessageRecord, SearchHit, Store};
pub use submit::{Submission, Submitter};
pub use sync::{SyncEngine, SyncEvent, SyncReport, SyncScheduler};
