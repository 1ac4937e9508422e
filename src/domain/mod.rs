//! Domain layer types for mail triage.
//!
//! This module contains the core types that flow through the pipeline:
//! identifiers, parsed emails, rule entries, and the per-message context.

mod context;
mod email;
mod rules;
mod types;

pub use context::{
    ActionTaken, Classification, Disposition, EmailContext, SCORE_MAX, SCORE_MIN,
    TAG_HTML_FALLBACK, TAG_RECORDED, TAG_UNSCORED,
};
pub use email::{Address, FetchedEmail};
pub use rules::{BlacklistAction, BlacklistRule, RuleSet, Trigger, WhitelistRule};
pub use types::{AccountId, MessageUid};
