//! IMAP credential resolution.
//!
//! An account names exactly one password source: inline, an environment
//! variable, or an OS keychain entry. Keychain reads go through `keyring`
//! on the blocking pool.

use thiserror::Error;

use crate::config::ImapSettings;

/// Keychain service the `password_keychain` entries live under.
pub const KEYCHAIN_SERVICE: &str = "mail-triage";

#[derive(Debug, Error)]
pub enum KeychainError {
    #[error("keychain: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("no keychain entry {0}")]
    NotFound(String),

    #[error("environment variable `{0}` is not set")]
    MissingEnv(String),

    #[error("keychain lookup task failed: {0}")]
    TaskFailed(String),
}

pub type Result<T> = std::result::Result<T, KeychainError>;

/// Resolves IMAP passwords for configured accounts.
#[derive(Debug, Clone)]
pub struct KeychainAccess {
    service: String,
}

impl KeychainAccess {
    pub fn new() -> Self {
        Self::with_service(KEYCHAIN_SERVICE)
    }

    /// Reads entries under `service` instead of [`KEYCHAIN_SERVICE`].
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Looks up `entry`; a missing entry is `Ok(None)`.
    pub async fn lookup(&self, entry: &str) -> Result<Option<String>> {
        let service = self.service.clone();
        let entry = entry.to_string();

        let lookup = tokio::task::spawn_blocking(move || {
            match keyring::Entry::new(&service, &entry)?.get_password() {
                Ok(secret) => Ok(Some(secret)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(KeychainError::Keyring(e)),
            }
        });
        lookup
            .await
            .map_err(|e| KeychainError::TaskFailed(e.to_string()))?
    }

    /// Resolves the IMAP password named by `settings`.
    ///
    /// Sources are consulted in order: inline `password`, then
    /// `password_env`, then `password_keychain`.
    pub async fn imap_password(&self, settings: &ImapSettings) -> Result<String> {
        if let Some(password) = &settings.password {
            return Ok(password.clone());
        }

        if let Some(var) = &settings.password_env {
            return std::env::var(var).map_err(|_| KeychainError::MissingEnv(var.clone()));
        }

        if let Some(key) = &settings.password_keychain {
            return self
                .lookup(key)
                .await?
                .ok_or_else(|| KeychainError::NotFound(format!("{}/{}", self.service, key)));
        }

        Err(KeychainError::NotFound(format!(
            "no password source for {}",
            settings.username
        )))
    }
}

impl Default for KeychainAccess {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ImapSettings {
        ImapSettings {
            server: "imap.example.com".to_string(),
            port: 993,
            username: "me@example.com".to_string(),
            password: None,
            password_env: None,
            password_keychain: None,
            mailbox: "INBOX".to_string(),
            query: "ALL".to_string(),
            processed_tag: "AIProcessed".to_string(),
            failed_tag: "AIProcessingFailed".to_string(),
        }
    }

    #[test]
    fn service_override() {
        assert_eq!(KeychainAccess::new().service(), KEYCHAIN_SERVICE);
        assert_eq!(KeychainAccess::with_service("triage.test").service(), "triage.test");
    }

    #[tokio::test]
    async fn inline_password_wins() {
        let mut s = settings();
        s.password = Some("inline".to_string());
        s.password_env = Some("MAIL_TRIAGE_TEST_UNSET_PASS".to_string());

        let password = KeychainAccess::new().imap_password(&s).await.unwrap();
        assert_eq!(password, "inline");
    }

    #[tokio::test]
    async fn missing_env_is_reported() {
        let mut s = settings();
        s.password_env = Some("MAIL_TRIAGE_TEST_UNSET_PASS".to_string());

        let err = KeychainAccess::new().imap_password(&s).await.unwrap_err();
        assert!(matches!(err, KeychainError::MissingEnv(ref v) if v == "MAIL_TRIAGE_TEST_UNSET_PASS"));
    }

    #[tokio::test]
    async fn env_password_is_read() {
        std::env::set_var("MAIL_TRIAGE_TEST_ENV_PASS", "from-env");
        let mut s = settings();
        s.password_env = Some("MAIL_TRIAGE_TEST_ENV_PASS".to_string());

        let password = KeychainAccess::new().imap_password(&s).await.unwrap();
        assert_eq!(password, "from-env");
    }

    #[tokio::test]
    async fn no_source_is_not_found() {
        let err = KeychainAccess::new()
            .imap_password(&settings())
            .await
            .unwrap_err();
        assert!(matches!(err, KeychainError::NotFound(_)));
    }
}
