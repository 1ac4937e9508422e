//! Blacklist and whitelist rule types.
//!
//! Rules are declared in YAML documents as ordered lists. Blacklist rules are
//! consulted before classification and the first match wins; whitelist rules
//! are consulted after classification and every match contributes.

use serde::{Deserialize, Serialize};

use super::Address;

/// Which message field a rule matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// Full sender address, case-insensitive equality.
    Sender,
    /// Subject line, case-insensitive substring.
    Subject,
    /// Sender domain or any of its parent domains, case-insensitive.
    Domain,
}

impl Trigger {
    /// Tests `value` against the relevant field of a message.
    pub fn matches(&self, value: &str, sender: &Address, subject: &str) -> bool {
        let needle = value.trim().to_lowercase();
        if needle.is_empty() {
            return false;
        }

        match self {
            Trigger::Sender => sender.email.trim().to_lowercase() == needle,
            Trigger::Subject => subject.to_lowercase().contains(&needle),
            Trigger::Domain => {
                let needle = needle.trim_start_matches('@');
                sender.domain().is_some_and(|domain| {
                    domain == needle || domain.ends_with(&format!(".{}", needle))
                })
            }
        }
    }
}

/// What happens to a message matched by a blacklist rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlacklistAction {
    /// Discard silently: no note, no classification.
    Drop,
    /// Skip classification but still write an unscored note.
    Record,
}

/// One entry of the blacklist document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistRule {
    /// Field to match.
    pub trigger: Trigger,
    /// Value compared against the field.
    pub value: String,
    /// Action taken on match.
    pub action: BlacklistAction,
}

/// One entry of the whitelist document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistRule {
    /// Field to match.
    pub trigger: Trigger,
    /// Value compared against the field.
    pub value: String,
    /// Signed adjustment added to the importance score.
    #[serde(default)]
    pub score_boost: i32,
    /// Tags added to the note.
    #[serde(default)]
    pub add_tags: Vec<String>,
}

/// The rule documents in effect for one account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    /// Ordered blacklist.
    pub blacklist: Vec<BlacklistRule>,
    /// Ordered whitelist.
    pub whitelist: Vec<WhitelistRule>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_trigger_is_case_insensitive_equality() {
        let sender = Address::new("Boss@Example.com");
        assert!(Trigger::Sender.matches("boss@example.com", &sender, ""));
        assert!(!Trigger::Sender.matches("example.com", &sender, ""));
    }

    #[test]
    fn subject_trigger_is_substring() {
        let sender = Address::new("a@b.c");
        assert!(Trigger::Subject.matches("invoice", &sender, "Your INVOICE #42"));
        assert!(!Trigger::Subject.matches("receipt", &sender, "Your invoice #42"));
    }

    #[test]
    fn domain_trigger_matches_parent_domains() {
        let sender = Address::new("news@mail.shop.example");
        assert!(Trigger::Domain.matches("shop.example", &sender, ""));
        assert!(Trigger::Domain.matches("@mail.shop.example", &sender, ""));
        assert!(!Trigger::Domain.matches("op.example", &sender, ""));
    }

    #[test]
    fn empty_value_never_matches() {
        let sender = Address::new("a@b.c");
        assert!(!Trigger::Subject.matches("  ", &sender, "anything"));
    }

    #[test]
    fn whitelist_rule_defaults() {
        let rule: WhitelistRule =
            serde_yaml::from_str("trigger: domain\nvalue: example.com\n").unwrap();
        assert_eq!(rule.score_boost, 0);
        assert!(rule.add_tags.is_empty());
    }

    #[test]
    fn blacklist_rule_deserialization() {
        let rule: BlacklistRule =
            serde_yaml::from_str("trigger: subject\nvalue: webinar\naction: record\n").unwrap();
        assert_eq!(rule.trigger, Trigger::Subject);
        assert_eq!(rule.action, BlacklistAction::Record);
    }
}
