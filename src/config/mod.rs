//! Configuration loading and per-account resolution.
//!
//! A global `config.yaml` supplies defaults; each account may override any
//! subset of keys in `accounts/<name>.yaml`. The two are deep-merged and
//! validated into an immutable [`ResolvedConfig`].

mod loader;
mod merge;
mod settings;

pub use loader::{
    resolve, ConfigSource, ACCOUNTS_DIR, CONFIG_DIR_ENV, DEFAULT_ACCOUNT, GLOBAL_CONFIG_FILE,
};
pub use merge::{deep_merge, lookup};
pub use settings::{
    ClassifierSettings, ConfigError, ConfigResult, ImapSettings, PathSettings,
    ProcessingSettings, ProviderKind, ResolvedConfig, Thresholds, REQUIRED_KEYS,
};
