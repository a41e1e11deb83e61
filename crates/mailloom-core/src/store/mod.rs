//! Local store.
//!
//! One SQLite database per account holding folders, message metadata,
//! bodies, sync checkpoints and a full-text index. Every mutation runs in
//! a transaction; writes to one folder are serialized, reads never wait.

mod locks;
mod migrations;
mod model;
mod repository;

pub use migrations::SCHEMA_VERSION;
pub use model::{
    AppliedBatch, Checkpoint, FlagUpdate, Folder, FolderId, LinkFields, MessageKey, MessageRecord,
    NewMessage, SearchHit, SyncBatch,
};
pub use repository::Store;
