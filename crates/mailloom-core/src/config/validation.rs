//! Account validation.

use super::model::{AccountConfig, Endpoint};
use crate::{Error, Result};

/// Validates an account, reporting every problem at once.
///
/// # Errors
///
/// Returns [`Error::Config`] naming the account and each invalid field.
pub fn validate_account(account: &AccountConfig) -> Result<()> {
    let mut problems = Vec::new();

    if account.name.trim().is_empty() {
        problems.push("name is required".to_string());
    }
    match account.address.split_once('@') {
        _ if account.address.trim().is_empty() => problems.push("address is required".to_string()),
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
        _ => problems.push(format!("address {:?} is not an email address", account.address)),
    }
    check_endpoint("imap", &account.imap, &mut problems);
    check_endpoint("smtp", &account.smtp, &mut problems);
    if account.sync.batch_size == 0 {
        problems.push("sync.batch_size must be positive".to_string());
    }
    if account.sync.poll_interval_secs == 0 {
        problems.push("sync.poll_interval_secs must be positive".to_string());
    }
    if account.retry.max_attempts == 0 {
        problems.push("retry.max_attempts must be positive".to_string());
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "account {:?}: {}",
            account.name,
            problems.join(", ")
        )))
    }
}

fn check_endpoint(label: &str, endpoint: &Endpoint, problems: &mut Vec<String>) {
    if endpoint.host.trim().is_empty() {
        problems.push(format!("{label}.host is required"));
    }
    if endpoint.port == 0 {
        problems.push(format!("{label}.port must be 1-65535"));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::Security;

    fn valid() -> AccountConfig {
        AccountConfig {
            name: "work".into(),
            address: "me@example.com".into(),
            imap: Endpoint {
                host: "imap.example.com".into(),
                port: 993,
                security: Security::Tls,
            },
            smtp: Endpoint {
                host: "smtp.example.com".into(),
                port: 465,
                security: Security::Tls,
            },
            ..AccountConfig::default()
        }
    }

    #[test]
    fn valid_account_passes() {
        validate_account(&valid()).unwrap();
    }

    #[test]
    fn every_problem_reported() {
        let mut account = valid();
        account.imap.host = String::new();
        account.smtp.port = 0;
        account.address = String::new();
        let message = validate_account(&account).unwrap_err().to_string();
        assert!(message.contains("imap.host is required"));
        assert!(message.contains("smtp.port must be 1-65535"));
        assert!(message.contains("address is required"));
    }

    #[test]
    fn malformed_address() {
        let mut account = valid();
        account.address = "nobody".into();
        assert!(validate_account(&account).is_err());
    }
}
