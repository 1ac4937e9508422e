//! Resolved per-account configuration.
//!
//! A [`ResolvedConfig`] is built once per account per run from the merged
//! YAML document. Construction validates required keys and numeric ranges so
//! malformed configuration fails here and nowhere else. There is no setter:
//! every account receives its own owned value.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};
use serde_yaml::Value;
use thiserror::Error;

use super::merge::lookup;
use crate::domain::{AccountId, SCORE_MAX, SCORE_MIN};

/// Errors raised while loading or resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required key is absent after merging.
    #[error("account `{account}`: missing required key `{path}`")]
    MissingKey { account: AccountId, path: String },

    /// A numeric value is outside its permitted range.
    #[error("account `{account}`: `{path}` = {value} is out of range ({expected})")]
    OutOfRange {
        account: AccountId,
        path: String,
        value: String,
        expected: String,
    },

    /// The merged document does not fit the schema.
    #[error("account `{account}`: invalid configuration: {message}")]
    Invalid { account: AccountId, message: String },

    /// A configuration or rule file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration or rule file is not valid YAML for its schema.
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The requested account is not configured.
    #[error("unknown account `{0}`")]
    UnknownAccount(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Key paths that must be present after merging.
pub const REQUIRED_KEYS: &[&str] = &[
    "imap.server",
    "imap.username",
    "paths.notes_dir",
    "classifier.model",
    "thresholds.importance",
    "thresholds.spam",
];

/// Keys of which at least one must name the IMAP password source.
const CREDENTIAL_KEYS: &[&str] = &[
    "imap.password",
    "imap.password_env",
    "imap.password_keychain",
];

/// IMAP connection and marker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImapSettings {
    /// Server hostname.
    pub server: String,
    /// Server port; implicit TLS.
    #[serde(default = "default_imap_port")]
    pub port: u16,
    /// Login name.
    pub username: String,
    /// Inline password. Redacted when printed.
    #[serde(default, serialize_with = "redact")]
    pub password: Option<String>,
    /// Environment variable holding the password.
    #[serde(default)]
    pub password_env: Option<String>,
    /// OS keychain entry holding the password.
    #[serde(default)]
    pub password_keychain: Option<String>,
    /// Mailbox to select.
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    /// IMAP SEARCH criteria selecting candidate messages.
    #[serde(default = "default_query")]
    pub query: String,
    /// Keyword applied after a message is handled.
    #[serde(default = "default_processed_tag")]
    pub processed_tag: String,
    /// Keyword applied when classification gave up.
    #[serde(default = "default_failed_tag")]
    pub failed_tag: String,
}

/// Filesystem locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSettings {
    /// Directory notes are written to.
    pub notes_dir: PathBuf,
    /// Blacklist rule document.
    #[serde(default)]
    pub blacklist_file: Option<PathBuf>,
    /// Whitelist rule document.
    #[serde(default)]
    pub whitelist_file: Option<PathBuf>,
}

/// Remote model backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI or any compatible chat-completions endpoint.
    #[default]
    OpenAi,
    /// Anthropic messages API.
    Anthropic,
    /// Local Ollama server.
    Ollama,
}

/// Classifier model parameters and retry contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierSettings {
    /// Backend kind.
    #[serde(default)]
    pub provider: ProviderKind,
    /// Model identifier.
    pub model: String,
    /// Endpoint override.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Total attempts before giving up.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: f64,
    /// Per-request wait bound.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl ClassifierSettings {
    /// Base retry delay as a [`Duration`].
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay_seconds.max(0.0))
    }

    /// Per-request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Decision thresholds on the `[0, 10]` score scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Adjusted importance at or above this is important.
    pub importance: i64,
    /// Spam score at or above this is spam.
    pub spam: i64,
}

/// Run-size and payload limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSettings {
    /// Hard cap on characters sent to the classifier.
    #[serde(default = "default_max_body_chars")]
    pub max_body_chars: usize,
    /// Hard cap on messages handled per account per run.
    #[serde(default = "default_max_emails_per_run")]
    pub max_emails_per_run: usize,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            max_body_chars: default_max_body_chars(),
            max_emails_per_run: default_max_emails_per_run(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConfigDocument {
    imap: ImapSettings,
    paths: PathSettings,
    classifier: ClassifierSettings,
    thresholds: Thresholds,
    #[serde(default)]
    processing: ProcessingSettings,
}

/// Validated configuration for one account.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedConfig {
    account: AccountId,
    imap: ImapSettings,
    paths: PathSettings,
    classifier: ClassifierSettings,
    thresholds: Thresholds,
    processing: ProcessingSettings,
}

impl ResolvedConfig {
    /// Validates a merged document and builds the typed configuration.
    ///
    /// Relative paths are resolved against `base_dir`; a leading `~/` expands
    /// to the user's home directory.
    pub fn from_document(account: AccountId, doc: &Value, base_dir: &Path) -> ConfigResult<Self> {
        for path in REQUIRED_KEYS {
            if lookup(doc, path).is_none() {
                return Err(ConfigError::MissingKey {
                    account,
                    path: (*path).to_string(),
                });
            }
        }

        if !CREDENTIAL_KEYS.iter().any(|path| lookup(doc, path).is_some()) {
            return Err(ConfigError::MissingKey {
                account,
                path: CREDENTIAL_KEYS.join(" | "),
            });
        }

        let parsed: ConfigDocument =
            serde_yaml::from_value(doc.clone()).map_err(|e| ConfigError::Invalid {
                account: account.clone(),
                message: e.to_string(),
            })?;

        let score_range = format!("{}..={}", SCORE_MIN, SCORE_MAX);
        for (path, value) in [
            ("thresholds.importance", parsed.thresholds.importance),
            ("thresholds.spam", parsed.thresholds.spam),
        ] {
            if !(i64::from(SCORE_MIN)..=i64::from(SCORE_MAX)).contains(&value) {
                return Err(ConfigError::OutOfRange {
                    account,
                    path: path.to_string(),
                    value: value.to_string(),
                    expected: score_range,
                });
            }
        }

        if parsed.classifier.retry_attempts == 0 {
            return Err(ConfigError::OutOfRange {
                account,
                path: "classifier.retry_attempts".to_string(),
                value: "0".to_string(),
                expected: ">= 1".to_string(),
            });
        }

        if !parsed.classifier.retry_delay_seconds.is_finite()
            || parsed.classifier.retry_delay_seconds < 0.0
        {
            return Err(ConfigError::OutOfRange {
                account,
                path: "classifier.retry_delay_seconds".to_string(),
                value: parsed.classifier.retry_delay_seconds.to_string(),
                expected: ">= 0".to_string(),
            });
        }

        if !(0.0..=2.0).contains(&parsed.classifier.temperature) {
            return Err(ConfigError::OutOfRange {
                account,
                path: "classifier.temperature".to_string(),
                value: parsed.classifier.temperature.to_string(),
                expected: "0.0..=2.0".to_string(),
            });
        }

        if parsed.processing.max_body_chars == 0 {
            return Err(ConfigError::OutOfRange {
                account,
                path: "processing.max_body_chars".to_string(),
                value: "0".to_string(),
                expected: ">= 1".to_string(),
            });
        }

        let paths = PathSettings {
            notes_dir: resolve_path(base_dir, &parsed.paths.notes_dir),
            blacklist_file: parsed
                .paths
                .blacklist_file
                .as_deref()
                .map(|p| resolve_path(base_dir, p)),
            whitelist_file: parsed
                .paths
                .whitelist_file
                .as_deref()
                .map(|p| resolve_path(base_dir, p)),
        };

        Ok(Self {
            account,
            imap: parsed.imap,
            paths,
            classifier: parsed.classifier,
            thresholds: parsed.thresholds,
            processing: parsed.processing,
        })
    }

    /// Account this configuration belongs to.
    pub fn account(&self) -> &AccountId {
        &self.account
    }

    /// IMAP settings.
    pub fn imap(&self) -> &ImapSettings {
        &self.imap
    }

    /// Filesystem locations.
    pub fn paths(&self) -> &PathSettings {
        &self.paths
    }

    /// Classifier settings.
    pub fn classifier(&self) -> &ClassifierSettings {
        &self.classifier
    }

    /// Decision thresholds.
    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Processing limits.
    pub fn processing(&self) -> &ProcessingSettings {
        &self.processing
    }

    /// Renders the configuration as YAML with secrets redacted.
    pub fn to_yaml(&self) -> ConfigResult<String> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::Invalid {
            account: self.account.clone(),
            message: e.to_string(),
        })
    }
}

fn resolve_path(base_dir: &Path, path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(dirs) = directories::BaseDirs::new() {
            return dirs.home_dir().join(rest);
        }
    }
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn redact<S: Serializer>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(_) => serializer.serialize_str("********"),
        None => serializer.serialize_none(),
    }
}

fn default_imap_port() -> u16 {
    993
}

fn default_mailbox() -> String {
    "INBOX".to_string()
}

fn default_query() -> String {
    "ALL".to_string()
}

fn default_processed_tag() -> String {
    "AIProcessed".to_string()
}

fn default_failed_tag() -> String {
    "AIProcessingFailed".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_seconds() -> f64 {
    2.0
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_max_body_chars() -> usize {
    4000
}

fn default_max_emails_per_run() -> usize {
    50
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
imap:
  server: imap.example.com
  username: me@example.com
  password_env: IMAP_PASS
paths:
  notes_dir: notes
  blacklist_file: /etc/triage/blacklist.yaml
classifier:
  model: gpt-4o-mini
thresholds:
  importance: 8
  spam: 5
"#;

    fn doc(src: &str) -> Value {
        serde_yaml::from_str(src).unwrap()
    }

    fn resolve(src: &str) -> ConfigResult<ResolvedConfig> {
        ResolvedConfig::from_document(AccountId::from("work"), &doc(src), Path::new("/cfg"))
    }

    #[test]
    fn minimal_document_gets_defaults() {
        let config = resolve(MINIMAL).unwrap();

        assert_eq!(config.account().as_str(), "work");
        assert_eq!(config.imap().port, 993);
        assert_eq!(config.imap().mailbox, "INBOX");
        assert_eq!(config.imap().query, "ALL");
        assert_eq!(config.imap().processed_tag, "AIProcessed");
        assert_eq!(config.classifier().provider, ProviderKind::OpenAi);
        assert_eq!(config.classifier().retry_attempts, 3);
        assert_eq!(config.classifier().retry_delay(), Duration::from_secs(2));
        assert_eq!(config.processing().max_body_chars, 4000);
        assert_eq!(config.processing().max_emails_per_run, 50);
        assert_eq!(config.thresholds().importance, 8);
    }

    #[test]
    fn relative_paths_resolve_against_base_dir() {
        let config = resolve(MINIMAL).unwrap();

        assert_eq!(config.paths().notes_dir, PathBuf::from("/cfg/notes"));
        assert_eq!(
            config.paths().blacklist_file,
            Some(PathBuf::from("/etc/triage/blacklist.yaml"))
        );
        assert_eq!(config.paths().whitelist_file, None);
    }

    #[test]
    fn missing_required_key_names_path() {
        let src = MINIMAL.replace("  spam: 5\n", "");
        let err = resolve(&src).unwrap_err();

        match err {
            ConfigError::MissingKey { account, path } => {
                assert_eq!(account.as_str(), "work");
                assert_eq!(path, "thresholds.spam");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_credential_reference_is_rejected() {
        let src = MINIMAL.replace("  password_env: IMAP_PASS\n", "");
        let err = resolve(&src).unwrap_err();

        assert!(matches!(err, ConfigError::MissingKey { ref path, .. } if path.contains("password_env")));
    }

    #[test]
    fn threshold_out_of_range_is_rejected() {
        let src = MINIMAL.replace("importance: 8", "importance: 11");
        let err = resolve(&src).unwrap_err();

        assert!(
            matches!(err, ConfigError::OutOfRange { ref path, .. } if path == "thresholds.importance")
        );

        let src = MINIMAL.replace("spam: 5", "spam: -1");
        assert!(matches!(
            resolve(&src).unwrap_err(),
            ConfigError::OutOfRange { .. }
        ));
    }

    #[test]
    fn wrong_type_is_invalid() {
        let src = MINIMAL.replace("importance: 8", "importance: high");
        assert!(matches!(
            resolve(&src).unwrap_err(),
            ConfigError::Invalid { .. }
        ));
    }

    #[test]
    fn zero_retry_attempts_is_rejected() {
        let src = MINIMAL.replace("  model: gpt-4o-mini\n", "  model: gpt-4o-mini\n  retry_attempts: 0\n");
        assert!(matches!(
            resolve(&src).unwrap_err(),
            ConfigError::OutOfRange { ref path, .. } if path == "classifier.retry_attempts"
        ));
    }

    #[test]
    fn inline_password_is_redacted_in_yaml() {
        let src = MINIMAL.replace("password_env: IMAP_PASS", "password: hunter2");
        let yaml = resolve(&src).unwrap().to_yaml().unwrap();

        assert!(!yaml.contains("hunter2"));
        assert!(yaml.contains("********"));
        assert!(yaml.contains("account: work"));
    }

    #[test]
    fn provider_kind_deserialization() {
        let kind: ProviderKind = serde_yaml::from_str("anthropic").unwrap();
        assert_eq!(kind, ProviderKind::Anthropic);
        let kind: ProviderKind = serde_yaml::from_str("ollama").unwrap();
        assert_eq!(kind, ProviderKind::Ollama);
    }
}
