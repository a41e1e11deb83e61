//! Configuration types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Top-level configuration: where data lives and which accounts to run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding one store per account. Defaults to
    /// `<data dir>/mailloom`.
    pub data_dir: Option<PathBuf>,
    /// Configured accounts.
    pub accounts: Vec<AccountConfig>,
}

impl EngineConfig {
    /// `<config dir>/mailloom/config.json`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mailloom").join("config.json"))
    }

    /// Reads and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if an
    /// account is invalid.
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), accounts = config.accounts.len(), "configuration loaded");
        Ok(config)
    }

    /// Checks every account and rejects names that are equal, or that map
    /// to the same store file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing every problem found.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        for (i, account) in self.accounts.iter().enumerate() {
            if let Err(Error::Config(message)) = super::validate_account(account) {
                problems.push(message);
            }
            if self.accounts[..i].iter().any(|other| other.name == account.name) {
                problems.push(format!("duplicate account name {:?}", account.name));
            } else if let Some(other) = self.accounts[..i]
                .iter()
                .find(|other| other.store_name().eq_ignore_ascii_case(&account.store_name()))
            {
                problems.push(format!(
                    "accounts {:?} and {:?} would share the store file {}.sqlite",
                    other.name,
                    account.name,
                    account.store_name()
                ));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(problems.join("; ")))
        }
    }

    /// Resolved data directory.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("mailloom")
        })
    }

    /// Store file for an account.
    #[must_use]
    pub fn store_path(&self, account: &AccountConfig) -> PathBuf {
        self.data_dir().join(format!("{}.sqlite", account.store_name()))
    }
}

/// Connection security.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    /// Implicit TLS.
    #[default]
    Tls,
    /// Plaintext upgraded with STARTTLS.
    StartTls,
    /// No encryption. Only for local test servers.
    None,
}

/// A server address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    /// Hostname.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Security mode.
    pub security: Security,
}

impl Endpoint {
    /// IMAP connection settings for this endpoint.
    #[must_use]
    pub fn imap_config(&self) -> mailloom_imap::Config {
        let security = match self.security {
            Security::Tls => mailloom_imap::Security::Implicit,
            Security::StartTls => mailloom_imap::Security::StartTls,
            Security::None => mailloom_imap::Security::None,
        };
        mailloom_imap::Config::builder(&self.host)
            .port(self.port)
            .security(security)
            .build()
    }
}

/// Resolved login credentials.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    /// Login name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// What to sync and how often.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Folders to sync; empty means every selectable folder.
    pub folders: Vec<String>,
    /// Keep at most this many of the newest messages per folder.
    pub max_messages_per_folder: Option<usize>,
    /// Only fetch messages received in the last N days.
    pub since_days: Option<u32>,
    /// Seconds between polls of every folder.
    pub poll_interval_secs: u64,
    /// Watch the inbox with IDLE.
    pub idle: bool,
    /// Messages fetched and committed per batch.
    pub batch_size: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            folders: Vec::new(),
            max_messages_per_folder: None,
            since_days: None,
            poll_interval_secs: 300,
            idle: true,
            batch_size: 200,
        }
    }
}

impl SyncSettings {
    /// Poll period.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Bounded exponential backoff, shared by reconnects and submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts, the first included.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_backoff_ms: u64,
    /// Cap on any single delay.
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetrySettings {
    /// The schedule as used by the IMAP session.
    #[must_use]
    pub const fn backoff(&self) -> mailloom_imap::session::Backoff {
        mailloom_imap::session::Backoff::new(
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
            self.max_attempts,
        )
    }
}

/// One mail account.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Unique account name; also names the store file.
    pub name: String,
    /// Sender address.
    pub address: String,
    /// Display name for outgoing mail.
    pub display_name: Option<String>,
    /// IMAP server.
    pub imap: Endpoint,
    /// SMTP submission server.
    pub smtp: Endpoint,
    /// Credentials for both servers.
    pub credentials: Credentials,
    /// Separate SMTP credentials, when they differ.
    pub smtp_credentials: Option<Credentials>,
    /// Name sent in EHLO. Defaults to `localhost`.
    pub hello_name: Option<String>,
    /// Sync scope and timing.
    pub sync: SyncSettings,
    /// Retry schedule.
    pub retry: RetrySettings,
}

impl AccountConfig {
    /// File-system safe form of the account name.
    #[must_use]
    pub fn store_name(&self) -> String {
        self.name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    }

    /// Credentials for the submission server.
    #[must_use]
    pub fn submission_credentials(&self) -> &Credentials {
        self.smtp_credentials.as_ref().unwrap_or(&self.credentials)
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

    const MINIMAL: &str = r#"{
        "accounts": [{
            "name": "work",
            "address": "me@example.com",
            "imap": { "host": "imap.example.com", "port": 993 },
            "smtp": { "host": "smtp.example.com", "port": 587, "security": "starttls" },
            "credentials": { "username": "me", "password": "secret" }
        }]
    }"#;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: EngineConfig = serde_json::from_str(MINIMAL).unwrap();
        config.validate().unwrap();
        let account = &config.accounts[0];
        assert_eq!(account.imap.security, Security::Tls);
        assert_eq!(account.smtp.security, Security::StartTls);
        assert_eq!(account.sync.batch_size, 200);
        assert!(account.sync.idle);
        assert_eq!(account.retry.max_attempts, 5);
        assert_eq!(account.submission_credentials().username, "me");
    }

    #[test]
    fn store_path_is_sanitized() {
        let config = EngineConfig {
            data_dir: Some(PathBuf::from("/tmp/ml")),
            accounts: Vec::new(),
        };
        let account = AccountConfig {
            name: "me@home/x".into(),
            ..AccountConfig::default()
        };
        assert_eq!(config.store_path(&account), PathBuf::from("/tmp/ml/me_home_x.sqlite"));
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut config: EngineConfig = serde_json::from_str(MINIMAL).unwrap();
        config.accounts.push(config.accounts[0].clone());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate account name"));
    }

    #[test]
    fn names_sharing_a_store_file_rejected() {
        let mut config: EngineConfig = serde_json::from_str(MINIMAL).unwrap();
        let mut first = config.accounts[0].clone();
        first.name = "work mail".into();
        let mut second = first.clone();
        second.name = "work/mail".into();
        let mut third = first.clone();
        third.name = "Work-Mail".into();
        config.accounts = vec![first, second];
        config.data_dir = Some(PathBuf::from("/tmp/ml"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("share the store file work_mail.sqlite"));

        // File systems that ignore case would collide too.
        config.accounts[1].name = "Work_Mail".into();
        assert!(config.validate().is_err());

        config.accounts[1] = third;
        config.validate().unwrap();
        assert_ne!(
            config.store_path(&config.accounts[0]),
            config.store_path(&config.accounts[1])
        );
    }

    #[test]
    fn retry_schedule() {
        let backoff = RetrySettings::default().backoff();
        assert_eq!(backoff.delay(0), Duration::from_millis(500));
        assert_eq!(backoff.delay(20), Duration::from_secs(30));
        assert_eq!(backoff.max_attempts, 5);
    }

    #[test]
    fn credentials_debug_hides_password() {
        let shown = format!(
            "{:?}",
            Credentials {
                username: "me".into(),
                password: "hunter2".into()
            }
        );
        assert!(!shown.contains("hunter2"));
    }
}
