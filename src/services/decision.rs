//! Threshold-based disposition.

use std::collections::BTreeSet;

use crate::config::Thresholds;
use crate::domain::{
    Classification, Disposition, EmailContext, SCORE_MAX, SCORE_MIN, TAG_HTML_FALLBACK,
};

/// Outcome of the decision step for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub disposition: Disposition,
    /// Importance after whitelist delta and clamping; `None` on error.
    pub adjusted_importance: Option<u8>,
    /// Full tag set for the note.
    pub tags: BTreeSet<String>,
}

/// Clamps a raw score into the valid range.
pub fn clamp_score(score: i64) -> u8 {
    score.clamp(i64::from(SCORE_MIN), i64::from(SCORE_MAX)) as u8
}

/// Decides a message's disposition.
///
/// Order: classifier failure, then importance (with the whitelist delta),
/// then spam, else neutral. Tags already on the context (whitelist tags) are
/// kept; the fallback tag and the disposition tag are added.
pub fn decide(ctx: &EmailContext, thresholds: Thresholds) -> Decision {
    let (disposition, adjusted_importance) = match &ctx.classification {
        Some(Classification::Scored { importance, spam }) => {
            let adjusted = clamp_score(i64::from(*importance) + i64::from(ctx.whitelist_delta));
            let disposition = if i64::from(adjusted) >= thresholds.importance {
                Disposition::Important
            } else if i64::from(*spam) >= thresholds.spam {
                Disposition::Spam
            } else {
                Disposition::Neutral
            };
            (disposition, Some(adjusted))
        }
        Some(Classification::Failed { .. }) | None => (Disposition::Error, None),
    };

    let mut tags = ctx.tags.clone();
    if ctx.used_fallback {
        tags.insert(TAG_HTML_FALLBACK.to_string());
    }
    tags.insert(disposition.tag().to_string());

    Decision {
        disposition,
        adjusted_importance,
        tags,
    }
}
