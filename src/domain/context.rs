//! Per-message pipeline state.
//!
//! An [`EmailContext`] is created when a message is fetched, filled in by each
//! pipeline stage, and dropped once the note is written and the message is
//! marked. It is never persisted itself.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{Address, FetchedEmail, MessageUid};

/// Lower bound of the classifier score scale.
pub const SCORE_MIN: i32 = 0;
/// Upper bound of the classifier score scale.
pub const SCORE_MAX: i32 = 10;

/// Tag added when content normalization fell back to the plain-text body.
pub const TAG_HTML_FALLBACK: &str = "html_fallback";
/// Tag added to notes written without classification.
pub const TAG_UNSCORED: &str = "unscored";
/// Tag added to notes written on the blacklist `record` path.
pub const TAG_RECORDED: &str = "recorded";

/// Outcome of a classifier call.
///
/// `Failed` is the terminal value after retries are exhausted; it is an
/// ordinary value, not an error, so callers pattern-match on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Classification {
    /// Both scores validated within `[0, 10]`.
    Scored {
        /// How much the message needs the reader's attention.
        importance: u8,
        /// How likely the message is unsolicited bulk mail.
        spam: u8,
    },
    /// Every attempt failed.
    Failed {
        /// Number of attempts made.
        attempts: u32,
        /// Description of the last failure.
        last_error: String,
    },
}

impl Classification {
    /// Returns `(importance, spam)` when scored.
    pub fn scores(&self) -> Option<(u8, u8)> {
        match self {
            Classification::Scored { importance, spam } => Some((*importance, *spam)),
            Classification::Failed { .. } => None,
        }
    }

    /// Whether this is the terminal failure value.
    pub fn is_failed(&self) -> bool {
        matches!(self, Classification::Failed { .. })
    }
}

/// Final classification outcome for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Importance (after whitelist adjustment) met the threshold.
    Important,
    /// Spam score met the threshold.
    Spam,
    /// Neither threshold met.
    Neutral,
    /// Classifier gave up.
    Error,
}

impl Disposition {
    /// Tag written to the note for this disposition.
    pub fn tag(&self) -> &'static str {
        match self {
            Disposition::Important => "important",
            Disposition::Spam => "spam",
            Disposition::Neutral => "neutral",
            Disposition::Error => "process_error",
        }
    }
}

/// What the pipeline finally did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTaken {
    /// Classified, note written, processed marker applied.
    Processed,
    /// Discarded by a blacklist `drop` rule.
    Dropped,
    /// Written unscored by a blacklist `record` rule.
    Recorded,
    /// Classifier failed; note written and failure marker applied.
    Errored,
    /// A pipeline stage raised; message left for the next run.
    Failed,
}

/// The unit of work flowing through one account's pipeline.
#[derive(Debug, Clone)]
pub struct EmailContext {
    /// Server UID.
    pub uid: MessageUid,
    /// Sender address.
    pub sender: Address,
    /// Subject line.
    pub subject: String,
    /// `Date` header.
    pub date: Option<chrono::DateTime<chrono::Utc>>,
    /// Raw HTML body.
    pub raw_html: Option<String>,
    /// Raw plain-text body.
    pub raw_text: Option<String>,
    /// Body after normalization and truncation.
    pub body: String,
    /// Whether normalization fell back to the plain-text body.
    pub used_fallback: bool,
    /// Classifier outcome; `None` until classified, and forever on the record path.
    pub classification: Option<Classification>,
    /// Sum of matching whitelist score boosts.
    pub whitelist_delta: i32,
    /// Accumulated tags.
    pub tags: BTreeSet<String>,
    /// Final disposition; `None` for unscored notes.
    pub disposition: Option<Disposition>,
    /// Importance after whitelist adjustment and clamping.
    pub adjusted_importance: Option<u8>,
    /// Final action.
    pub action: Option<ActionTaken>,
}

impl EmailContext {
    /// Starts a fresh context for a fetched message.
    pub fn new(email: FetchedEmail) -> Self {
        Self {
            uid: email.uid,
            sender: email.sender,
            subject: email.subject,
            date: email.date,
            raw_html: email.html_body,
            raw_text: email.text_body,
            body: String::new(),
            used_fallback: false,
            classification: None,
            whitelist_delta: 0,
            tags: BTreeSet::new(),
            disposition: None,
            adjusted_importance: None,
            action: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetched() -> FetchedEmail {
        FetchedEmail {
            uid: MessageUid(9),
            sender: Address::new("a@example.com"),
            subject: "Hello".to_string(),
            date: None,
            html_body: Some("<p>Hi</p>".to_string()),
            text_body: Some("Hi".to_string()),
        }
    }

    #[test]
    fn new_context_starts_unset() {
        let ctx = EmailContext::new(fetched());
        assert_eq!(ctx.uid, MessageUid(9));
        assert!(ctx.body.is_empty());
        assert!(ctx.classification.is_none());
        assert!(ctx.disposition.is_none());
        assert!(ctx.action.is_none());
        assert_eq!(ctx.whitelist_delta, 0);
    }

    #[test]
    fn classification_scores() {
        let scored = Classification::Scored {
            importance: 7,
            spam: 1,
        };
        assert_eq!(scored.scores(), Some((7, 1)));
        assert!(!scored.is_failed());

        let failed = Classification::Failed {
            attempts: 3,
            last_error: "timeout".to_string(),
        };
        assert_eq!(failed.scores(), None);
        assert!(failed.is_failed());
    }

    #[test]
    fn disposition_tags() {
        assert_eq!(Disposition::Important.tag(), "important");
        assert_eq!(Disposition::Spam.tag(), "spam");
        assert_eq!(Disposition::Neutral.tag(), "neutral");
        assert_eq!(Disposition::Error.tag(), "process_error");
    }

    #[test]
    fn classification_serialization() {
        let json = serde_json::to_string(&Classification::Scored {
            importance: 4,
            spam: 2,
        })
        .unwrap();
        assert!(json.contains("\"status\":\"scored\""));
    }
}
