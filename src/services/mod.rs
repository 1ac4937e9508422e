//! Triage pipeline services.
//!
//! Services sit between the command line and the infrastructure layer:
//!
//! ```text
//! CLI (process, cleanup-flags, show-config)
//!          |
//!          v
//!    Orchestrator -> AccountProcessor
//!          |
//!          v
//! Rules engine, normalizer, classifier client, decision engine
//!          |
//!          v
//! Infrastructure (providers, storage)
//! ```
//!
//! - [`Orchestrator`]: iterates accounts and aggregates the [`RunSummary`]
//! - [`AccountProcessor`]: one account's fetch, triage, emit and mark loop
//! - [`ClassifierClient`]: scores content through the remote model with retries

mod account_processor;
mod classifier;
mod decision;
mod normalizer;
mod orchestrator;
mod rules_engine;

pub use account_processor::{
    cleanup_flags, AccountProcessor, AccountSummary, CleanupSummary, Connector, MessageError,
    ProcessOptions, RunStage,
};
pub use classifier::{parse_scores, AttemptError, ClassifierClient, RetryPolicy, SYSTEM_PROMPT};
pub use decision::{clamp_score, decide, Decision};
pub use normalizer::{html_to_markdown, normalize, truncate_chars, ContentError, Normalized};
pub use orchestrator::{
    AccountReport, AccountSelection, AccountStatus, Backends, LiveBackends, Orchestrator,
    RunError, RunSummary,
};
pub use rules_engine::{
    apply_whitelist, evaluate_blacklist, load_rules, BlacklistVerdict, WhitelistOutcome,
};
