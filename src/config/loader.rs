//! Configuration document discovery and per-account resolution.
//!
//! Layout under the config root:
//!
//! ```text
//! <root>/config.yaml            global defaults (required)
//! <root>/accounts/<name>.yaml   optional per-account override
//! ```

use std::path::{Path, PathBuf};

use serde_yaml::Value;

use super::merge::deep_merge;
use super::settings::{ConfigError, ConfigResult, ResolvedConfig};
use crate::domain::AccountId;

/// File name of the global configuration document.
pub const GLOBAL_CONFIG_FILE: &str = "config.yaml";
/// Directory holding per-account override documents.
pub const ACCOUNTS_DIR: &str = "accounts";
/// Account name used when no accounts are declared or discovered.
pub const DEFAULT_ACCOUNT: &str = "default";
/// Environment variable overriding the config root.
pub const CONFIG_DIR_ENV: &str = "MAIL_TRIAGE_CONFIG_DIR";

/// Merges the global document with an optional override and validates it.
pub fn resolve(
    account: AccountId,
    global: &Value,
    account_override: Option<&Value>,
    base_dir: &Path,
) -> ConfigResult<ResolvedConfig> {
    let merged = match account_override {
        Some(overlay) => {
            if !overlay.is_mapping() {
                return Err(ConfigError::Invalid {
                    account,
                    message: "account override must be a mapping".to_string(),
                });
            }
            deep_merge(global, overlay)
        }
        None => global.clone(),
    };
    ResolvedConfig::from_document(account, &merged, base_dir)
}

/// Reads configuration documents from a root directory.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    root: PathBuf,
}

impl ConfigSource {
    /// Creates a source rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default root: `$MAIL_TRIAGE_CONFIG_DIR`, else the platform config dir.
    pub fn default_root() -> Option<PathBuf> {
        if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
            return Some(PathBuf::from(dir));
        }
        directories::ProjectDirs::from("", "", "mail-triage")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the global document.
    pub fn global_path(&self) -> PathBuf {
        self.root.join(GLOBAL_CONFIG_FILE)
    }

    /// Path of an account's override document.
    pub fn override_path(&self, account: &AccountId) -> PathBuf {
        self.root
            .join(ACCOUNTS_DIR)
            .join(format!("{}.yaml", account.as_str()))
    }

    /// Loads the global document. Absence is an error.
    pub fn load_global(&self) -> ConfigResult<Value> {
        let path = self.global_path();
        let doc = read_yaml(&path)?;
        if !doc.is_mapping() {
            return Err(ConfigError::Parse {
                path,
                source: serde::de::Error::custom("global configuration must be a mapping"),
            });
        }
        Ok(doc)
    }

    /// Loads an account's override document, if the file exists.
    ///
    /// An empty file counts as no override.
    pub fn load_override(&self, account: &AccountId) -> ConfigResult<Option<Value>> {
        let path = self.override_path(account);
        if !path.exists() {
            return Ok(None);
        }
        let doc = read_yaml(&path)?;
        Ok((!doc.is_null()).then_some(doc))
    }

    /// Lists configured accounts.
    ///
    /// Uses the global `accounts` list when present, else the override files
    /// found in `accounts/`, else a single [`DEFAULT_ACCOUNT`].
    pub fn account_names(&self, global: &Value) -> ConfigResult<Vec<AccountId>> {
        let mut names: Vec<AccountId> = Vec::new();

        if let Some(declared) = global.get("accounts") {
            let list = declared.as_sequence().ok_or_else(|| ConfigError::Parse {
                path: self.global_path(),
                source: serde::de::Error::custom("`accounts` must be a list of names"),
            })?;
            for entry in list {
                let name = entry.as_str().ok_or_else(|| ConfigError::Parse {
                    path: self.global_path(),
                    source: serde::de::Error::custom("account names must be strings"),
                })?;
                names.push(AccountId::from(name));
            }
        } else {
            let dir = self.root.join(ACCOUNTS_DIR);
            if dir.is_dir() {
                let entries = std::fs::read_dir(&dir).map_err(|source| ConfigError::Io {
                    path: dir.clone(),
                    source,
                })?;
                for entry in entries.flatten() {
                    let path = entry.path();
                    let is_yaml = path.extension().and_then(|e| e.to_str()) == Some("yaml");
                    if let (true, Some(stem)) = (is_yaml, path.file_stem().and_then(|s| s.to_str()))
                    {
                        names.push(AccountId::from(stem));
                    }
                }
                names.sort();
            }
        }

        let mut seen = std::collections::HashSet::new();
        names.retain(|name| seen.insert(name.clone()));

        if names.is_empty() {
            names.push(AccountId::from(DEFAULT_ACCOUNT));
        }
        Ok(names)
    }

    /// Loads the account's override and resolves it against `global`.
    pub fn resolve_account(
        &self,
        global: &Value,
        account: &AccountId,
    ) -> ConfigResult<ResolvedConfig> {
        let account_override = self.load_override(account)?;
        resolve(
            account.clone(),
            global,
            account_override.as_ref(),
            &self.root,
        )
    }
}

fn read_yaml(path: &Path) -> ConfigResult<Value> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const GLOBAL: &str = r#"
imap:
  server: imap.example.com
  username: me@example.com
  password_env: IMAP_PASS
paths:
  notes_dir: notes
classifier:
  model: gpt-4o-mini
thresholds:
  importance: 8
  spam: 5
"#;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn override_wins_per_key() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), GLOBAL_CONFIG_FILE, GLOBAL);
        write(dir.path(), "accounts/work.yaml", "thresholds:\n  importance: 9\n");

        let source = ConfigSource::new(dir.path());
        let global = source.load_global().unwrap();
        let config = source
            .resolve_account(&global, &AccountId::from("work"))
            .unwrap();

        assert_eq!(config.thresholds().importance, 9);
        assert_eq!(config.thresholds().spam, 5);
        assert_eq!(config.paths().notes_dir, dir.path().join("notes"));
    }

    #[test]
    fn account_without_override_uses_global() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), GLOBAL_CONFIG_FILE, GLOBAL);

        let source = ConfigSource::new(dir.path());
        let global = source.load_global().unwrap();
        let config = source
            .resolve_account(&global, &AccountId::from("personal"))
            .unwrap();

        assert_eq!(config.thresholds().importance, 8);
    }

    #[test]
    fn malformed_override_fails_only_that_account() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), GLOBAL_CONFIG_FILE, GLOBAL);
        write(dir.path(), "accounts/broken.yaml", "thresholds: [unclosed\n");
        write(dir.path(), "accounts/fine.yaml", "imap:\n  query: UNSEEN\n");

        let source = ConfigSource::new(dir.path());
        let global = source.load_global().unwrap();

        let broken = source.resolve_account(&global, &AccountId::from("broken"));
        assert!(matches!(broken, Err(ConfigError::Parse { .. })));

        let fine = source
            .resolve_account(&global, &AccountId::from("fine"))
            .unwrap();
        assert_eq!(fine.imap().query, "UNSEEN");
    }

    #[test]
    fn non_mapping_override_is_invalid() {
        let global: Value = serde_yaml::from_str(GLOBAL).unwrap();
        let overlay: Value = serde_yaml::from_str("[1, 2]").unwrap();

        let err = resolve(
            AccountId::from("x"),
            &global,
            Some(&overlay),
            Path::new("/"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn missing_global_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = ConfigSource::new(dir.path());
        assert!(matches!(source.load_global(), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn account_names_from_declared_list() {
        let dir = tempfile::tempdir().unwrap();
        let source = ConfigSource::new(dir.path());
        let global: Value = serde_yaml::from_str("accounts: [work, personal, work]\n").unwrap();

        let names = source.account_names(&global).unwrap();
        assert_eq!(
            names,
            vec![AccountId::from("work"), AccountId::from("personal")]
        );
    }

    #[test]
    fn account_names_discovered_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "accounts/zeta.yaml", "{}\n");
        write(dir.path(), "accounts/alpha.yaml", "{}\n");
        write(dir.path(), "accounts/notes.txt", "ignored\n");

        let source = ConfigSource::new(dir.path());
        let names = source.account_names(&Value::Null).unwrap();
        assert_eq!(names, vec![AccountId::from("alpha"), AccountId::from("zeta")]);
    }

    #[test]
    fn account_names_default_when_nothing_configured() {
        let dir = tempfile::tempdir().unwrap();
        let source = ConfigSource::new(dir.path());
        let names = source.account_names(&Value::Null).unwrap();
        assert_eq!(names, vec![AccountId::from(DEFAULT_ACCOUNT)]);
    }

    #[test]
    fn empty_override_file_is_no_override() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "accounts/empty.yaml", "");

        let source = ConfigSource::new(dir.path());
        assert!(source
            .load_override(&AccountId::from("empty"))
            .unwrap()
            .is_none());
    }
}
