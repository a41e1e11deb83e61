//! Engine configuration.
//!
//! Read from a JSON file, by default `<config dir>/mailloom/config.json`.
//! Every field has a default, so a file only needs to name what differs.

mod model;
mod validation;

pub use model::{
    AccountConfig, Credentials, EngineConfig, Endpoint, RetrySettings, Security, SyncSettings,
};
pub use validation::validate_account;
