//! Blacklist and whitelist evaluation.
//!
//! The blacklist is consulted before any content work and may short-circuit a
//! message. The whitelist is consulted after classification and only adjusts
//! the importance score and tag set.

use std::collections::BTreeSet;
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::config::{ConfigError, ConfigResult, PathSettings};
use crate::domain::{
    BlacklistAction, BlacklistRule, EmailContext, RuleSet, WhitelistRule,
};

/// Result of the pre-classification check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlacklistVerdict {
    /// No rule matched; continue the pipeline.
    Pass,
    /// Discard the message with no artifact.
    Drop,
    /// Write an unscored note without classifying.
    Record,
}

/// Accumulated effect of every matching whitelist rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WhitelistOutcome {
    /// Sum of score boosts, unclamped.
    pub delta: i32,
    /// Union of added tags.
    pub tags: BTreeSet<String>,
}

/// Evaluates blacklist rules in order; the first match decides.
pub fn evaluate_blacklist(ctx: &EmailContext, rules: &[BlacklistRule]) -> BlacklistVerdict {
    let hit = rules
        .iter()
        .enumerate()
        .find(|(_, rule)| rule.trigger.matches(&rule.value, &ctx.sender, &ctx.subject));

    match hit {
        Some((index, rule)) => {
            tracing::trace!(
                uid = %ctx.uid,
                rule = index,
                trigger = ?rule.trigger,
                value = %rule.value,
                "blacklist rule matched"
            );
            match rule.action {
                BlacklistAction::Drop => BlacklistVerdict::Drop,
                BlacklistAction::Record => BlacklistVerdict::Record,
            }
        }
        None => BlacklistVerdict::Pass,
    }
}

/// Applies every matching whitelist rule: boosts sum, tags union.
pub fn apply_whitelist(ctx: &EmailContext, rules: &[WhitelistRule]) -> WhitelistOutcome {
    rules
        .iter()
        .filter(|rule| rule.trigger.matches(&rule.value, &ctx.sender, &ctx.subject))
        .fold(WhitelistOutcome::default(), |mut acc, rule| {
            acc.delta = acc.delta.saturating_add(rule.score_boost);
            acc.tags.extend(rule.add_tags.iter().cloned());
            acc
        })
}

/// Loads the rule documents an account's paths reference.
///
/// A missing file means no rules of that kind.
pub fn load_rules(paths: &PathSettings) -> ConfigResult<RuleSet> {
    Ok(RuleSet {
        blacklist: load_rule_file(paths.blacklist_file.as_deref())?,
        whitelist: load_rule_file(paths.whitelist_file.as_deref())?,
    })
}

fn load_rule_file<T: DeserializeOwned>(path: Option<&Path>) -> ConfigResult<Vec<T>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };

    if !path.exists() {
        tracing::debug!(path = %path.display(), "rule file not found, no rules loaded");
        return Ok(Vec::new());
    }

    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
