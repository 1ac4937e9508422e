//! Multi-account run driver.
//!
//! The [`Orchestrator`] walks the selected accounts one after another. Each
//! account gets a freshly resolved configuration, its own rule set, classifier
//! client and note sink, and a new [`AccountProcessor`]. A failure in one
//! account is recorded in the [`RunSummary`] and the run moves on; only an
//! unreadable global configuration stops the run before any account starts.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_yaml::Value;
use thiserror::Error;

use crate::config::{ConfigError, ConfigSource, ResolvedConfig};
use crate::domain::AccountId;
use crate::providers::ai::{self, LlmProvider, LlmResult};
use crate::providers::email::{self, ImapMailbox, Mailbox, ProviderError};
use crate::storage::{FileNoteSink, KeychainAccess, NoteSink};

use super::account_processor::{
    cleanup_flags, AccountProcessor, AccountSummary, CleanupSummary, Connector, ProcessOptions,
};
use super::classifier::ClassifierClient;
use super::rules_engine::load_rules;

/// Fatal errors that stop a run before any account is processed.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for run-level operations.
pub type Result<T> = std::result::Result<T, RunError>;

/// External collaborators an account run needs.
pub trait Backends: Connector {
    /// Builds the remote model provider for an account.
    fn classifier(&self, config: &ResolvedConfig) -> LlmResult<Arc<dyn LlmProvider>>;

    /// Returns where the account's notes go.
    fn note_sink(&self, config: &ResolvedConfig) -> Arc<dyn NoteSink>;
}

/// Production collaborators: IMAP over TLS, HTTP model APIs, note files.
#[derive(Debug, Clone, Default)]
pub struct LiveBackends {
    keychain: KeychainAccess,
}

impl LiveBackends {
    pub fn new(keychain: KeychainAccess) -> Self {
        Self { keychain }
    }
}

#[async_trait]
impl Connector for LiveBackends {
    async fn connect(&self, config: &ResolvedConfig) -> email::Result<Box<dyn Mailbox>> {
        let password = self
            .keychain
            .imap_password(config.imap())
            .await
            .map_err(|e| ProviderError::Authentication(e.to_string()))?;
        let mailbox = ImapMailbox::connect(config.imap(), &password).await?;
        Ok(Box::new(mailbox))
    }
}

impl Backends for LiveBackends {
    fn classifier(&self, config: &ResolvedConfig) -> LlmResult<Arc<dyn LlmProvider>> {
        ai::from_settings(config.classifier())
    }

    fn note_sink(&self, config: &ResolvedConfig) -> Arc<dyn NoteSink> {
        Arc::new(FileNoteSink::new(config.paths().notes_dir.clone()))
    }
}

/// Which accounts a command applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountSelection {
    All,
    Named(AccountId),
}

impl AccountSelection {
    /// `None` or `"all"` selects every account.
    pub fn parse(name: Option<&str>) -> Self {
        match name {
            None | Some("all") => AccountSelection::All,
            Some(name) => AccountSelection::Named(AccountId::from(name)),
        }
    }
}

/// How an account's part of the run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum AccountStatus {
    Completed,
    ConfigError(String),
    ConnectionError(String),
}

impl AccountStatus {
    /// Short label for summaries.
    pub fn label(&self) -> &'static str {
        match self {
            AccountStatus::Completed => "completed",
            AccountStatus::ConfigError(_) => "config_error",
            AccountStatus::ConnectionError(_) => "connection_error",
        }
    }
}

/// Outcome for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountReport<T> {
    pub account: AccountId,
    pub status: AccountStatus,
    pub counts: T,
}

impl<T: Default> AccountReport<T> {
    fn failed(account: AccountId, status: AccountStatus) -> Self {
        Self {
            account,
            status,
            counts: T::default(),
        }
    }
}

/// Per-account outcomes of a whole run, in processing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary<T = AccountSummary> {
    pub accounts: Vec<AccountReport<T>>,
}

impl<T> Default for RunSummary<T> {
    fn default() -> Self {
        Self {
            accounts: Vec::new(),
        }
    }
}

impl<T> RunSummary<T> {
    /// Whether every account ran to completion.
    pub fn all_completed(&self) -> bool {
        self.accounts
            .iter()
            .all(|report| report.status == AccountStatus::Completed)
    }

    /// Report for one account.
    pub fn get(&self, account: &AccountId) -> Option<&AccountReport<T>> {
        self.accounts.iter().find(|report| &report.account == account)
    }
}

impl RunSummary<AccountSummary> {
    /// Counters summed over all accounts.
    pub fn totals(&self) -> AccountSummary {
        self.accounts
            .iter()
            .fold(AccountSummary::default(), |mut acc, report| {
                let c = &report.counts;
                acc.fetched += c.fetched;
                acc.processed += c.processed;
                acc.important += c.important;
                acc.spam += c.spam;
                acc.neutral += c.neutral;
                acc.recorded += c.recorded;
                acc.dropped += c.dropped;
                acc.errored += c.errored;
                acc.failed += c.failed;
                acc
            })
    }
}

/// Runs commands across configured accounts.
pub struct Orchestrator {
    source: ConfigSource,
    backends: Arc<dyn Backends>,
}

impl Orchestrator {
    /// Creates an orchestrator reading configuration from `source`.
    pub fn new(source: ConfigSource, backends: Arc<dyn Backends>) -> Self {
        Self { source, backends }
    }

    /// Configuration source in use.
    pub fn source(&self) -> &ConfigSource {
        &self.source
    }

    /// Triages the selected accounts sequentially.
    pub async fn run(
        &self,
        selection: &AccountSelection,
        options: ProcessOptions,
    ) -> Result<RunSummary> {
        let global = self.source.load_global()?;
        let accounts = self.select(&global, selection)?;

        let mut summary = RunSummary::default();
        for account in accounts {
            let report = self.process_account(&global, account, options).await;
            summary.accounts.push(report);
        }

        let totals = summary.totals();
        tracing::info!(
            accounts = summary.accounts.len(),
            all_completed = summary.all_completed(),
            processed = totals.processed,
            recorded = totals.recorded,
            dropped = totals.dropped,
            errored = totals.errored,
            failed = totals.failed,
            "run finished"
        );
        Ok(summary)
    }

    async fn process_account(
        &self,
        global: &Value,
        account: AccountId,
        options: ProcessOptions,
    ) -> AccountReport<AccountSummary> {
        tracing::info!(account = %account, "processing account");

        let config = match self.source.resolve_account(global, &account) {
            Ok(config) => config,
            Err(e) => return config_failure(account, e.to_string()),
        };
        let rules = match load_rules(config.paths()) {
            Ok(rules) => rules,
            Err(e) => return config_failure(account, e.to_string()),
        };
        let provider = match self.backends.classifier(&config) {
            Ok(provider) => provider,
            Err(e) => return config_failure(account, e.to_string()),
        };

        let classifier = ClassifierClient::new(provider, config.classifier());
        let sink = self.backends.note_sink(&config);
        let processor = AccountProcessor::new(config, rules, classifier, sink, options);

        match processor.run(self.backends.as_ref()).await {
            Ok(counts) => AccountReport {
                account,
                status: AccountStatus::Completed,
                counts,
            },
            Err(e) => connection_failure(account, e),
        }
    }

    /// Removes triage markers on the selected accounts.
    pub async fn cleanup_flags(
        &self,
        selection: &AccountSelection,
        include_processed: bool,
        dry_run: bool,
    ) -> Result<RunSummary<CleanupSummary>> {
        let global = self.source.load_global()?;
        let accounts = self.select(&global, selection)?;

        let mut summary = RunSummary::default();
        for account in accounts {
            let config = match self.source.resolve_account(&global, &account) {
                Ok(config) => config,
                Err(e) => {
                    summary.accounts.push(config_failure(account, e.to_string()));
                    continue;
                }
            };

            let report =
                match cleanup_flags(&config, self.backends.as_ref(), include_processed, dry_run)
                    .await
                {
                    Ok(counts) => AccountReport {
                        account,
                        status: AccountStatus::Completed,
                        counts,
                    },
                    Err(e) => connection_failure(account, e),
                };
            summary.accounts.push(report);
        }
        Ok(summary)
    }

    /// Resolves the selected accounts and renders each as YAML.
    ///
    /// Accounts whose configuration does not resolve carry the error instead.
    pub fn show_config(
        &self,
        selection: &AccountSelection,
    ) -> Result<Vec<(AccountId, std::result::Result<String, ConfigError>)>> {
        let global = self.source.load_global()?;
        let accounts = self.select(&global, selection)?;

        Ok(accounts
            .into_iter()
            .map(|account| {
                let rendered = self
                    .source
                    .resolve_account(&global, &account)
                    .and_then(|config| config.to_yaml());
                (account, rendered)
            })
            .collect())
    }

    fn select(&self, global: &Value, selection: &AccountSelection) -> Result<Vec<AccountId>> {
        let known = self.source.account_names(global)?;
        match selection {
            AccountSelection::All => Ok(known),
            AccountSelection::Named(name) => {
                if known.contains(name) || self.source.override_path(name).is_file() {
                    Ok(vec![name.clone()])
                } else {
                    Err(ConfigError::UnknownAccount(name.to_string()).into())
                }
            }
        }
    }
}

fn config_failure<T: Default>(account: AccountId, reason: String) -> AccountReport<T> {
    tracing::error!(account = %account, error = %reason, "configuration error, skipping account");
    AccountReport::failed(account, AccountStatus::ConfigError(reason))
}

fn connection_failure<T: Default>(account: AccountId, error: ProviderError) -> AccountReport<T> {
    tracing::error!(account = %account, error = %error, "mailbox unavailable, skipping account");
    AccountReport::failed(account, AccountStatus::ConnectionError(error.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn selection_parse() {
        assert_eq!(AccountSelection::parse(None), AccountSelection::All);
        assert_eq!(AccountSelection::parse(Some("all")), AccountSelection::All);
        assert_eq!(
            AccountSelection::parse(Some("work")),
            AccountSelection::Named(AccountId::from("work"))
        );
    }

    #[test]
    fn totals_sum_accounts() {
        let summary = RunSummary {
            accounts: vec![
                AccountReport {
                    account: AccountId::from("a"),
                    status: AccountStatus::Completed,
                    counts: AccountSummary {
                        fetched: 3,
                        processed: 2,
                        neutral: 2,
                        dropped: 1,
                        ..AccountSummary::default()
                    },
                },
                AccountReport {
                    account: AccountId::from("b"),
                    status: AccountStatus::ConnectionError("refused".to_string()),
                    counts: AccountSummary::default(),
                },
            ],
        };

        let totals = summary.totals();
        assert_eq!(totals.fetched, 3);
        assert_eq!(totals.dropped, 1);
        assert!(!summary.all_completed());
        assert_eq!(
            summary.get(&AccountId::from("b")).map(|r| r.status.label()),
            Some("connection_error")
        );
    }

    #[test]
    fn status_serializes_with_reason() {
        let json = serde_json::to_string(&AccountStatus::ConfigError("bad".to_string())).unwrap();
        assert_eq!(json, r#"{"status":"config_error","reason":"bad"}"#);
    }
}
