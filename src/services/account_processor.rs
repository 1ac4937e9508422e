//! Per-account pipeline driver.
//!
//! An [`AccountProcessor`] owns one account's run from connection to logout:
//!
//! ```text
//! Init -> Connected -> Fetching
//!      -> (per message: Filtering -> Normalizing -> Classifying
//!                       -> Deciding -> Emitting -> Marking)
//!      -> Summarizing -> Closed
//! ```
//!
//! A processor is built fresh for every account and consumed by
//! [`AccountProcessor::run`], so nothing it holds outlives the account.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::config::ResolvedConfig;
use crate::domain::{
    AccountId, ActionTaken, Disposition, EmailContext, FetchedEmail, MessageUid, RuleSet,
    TAG_RECORDED, TAG_UNSCORED,
};
use crate::providers::email::{self, any_marker, exclude_markers, Mailbox, ProviderError};
use crate::storage::{EmitError, Note, NoteSink};

use super::classifier::ClassifierClient;
use super::decision::decide;
use super::normalizer::{normalize, truncate_chars};
use super::rules_engine::{apply_whitelist, evaluate_blacklist, BlacklistVerdict};

/// Opens mailbox sessions for accounts.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects, authenticates and selects the account's mailbox.
    async fn connect(&self, config: &ResolvedConfig) -> email::Result<Box<dyn Mailbox>>;
}

/// Per-invocation switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessOptions {
    /// Ignore the processed and failed markers when searching.
    pub force_reprocess: bool,
    /// Decide and log, but write no note and apply no marker.
    pub dry_run: bool,
    /// Process exactly this message instead of searching.
    pub target_uid: Option<MessageUid>,
    /// Overrides `processing.max_emails_per_run`.
    pub max_emails: Option<usize>,
}

/// Where an account run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Init,
    Connected,
    Fetching,
    Filtering,
    Normalizing,
    Classifying,
    Deciding,
    Emitting,
    Marking,
    Summarizing,
    Closed,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Init => "init",
            RunStage::Connected => "connected",
            RunStage::Fetching => "fetching",
            RunStage::Filtering => "filtering",
            RunStage::Normalizing => "normalizing",
            RunStage::Classifying => "classifying",
            RunStage::Deciding => "deciding",
            RunStage::Emitting => "emitting",
            RunStage::Marking => "marking",
            RunStage::Summarizing => "summarizing",
            RunStage::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Failure confined to one message.
///
/// The message is left without a marker so the next run picks it up again.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("message {0} no longer exists")]
    Vanished(MessageUid),

    #[error("message {0} could not be parsed")]
    Unparseable(MessageUid),

    #[error("mailbox error on message {uid} while {stage}: {source}")]
    Mailbox {
        uid: MessageUid,
        stage: RunStage,
        #[source]
        source: ProviderError,
    },

    #[error("note for message {uid} could not be written: {source}")]
    Emit {
        uid: MessageUid,
        #[source]
        source: EmitError,
    },
}

impl MessageError {
    /// Stage the message was in when it failed.
    pub fn stage(&self) -> RunStage {
        match self {
            MessageError::Vanished(_) | MessageError::Unparseable(_) => RunStage::Fetching,
            MessageError::Mailbox { stage, .. } => *stage,
            MessageError::Emit { .. } => RunStage::Emitting,
        }
    }

    /// Whether the message got past fetching and parsing.
    ///
    /// Failures before the blacklist ran never reached the classifier, so
    /// they do not count against the per-run limit.
    pub fn reached_pipeline(&self) -> bool {
        !matches!(self.stage(), RunStage::Fetching)
    }

    /// Message the failure belongs to.
    pub fn uid(&self) -> MessageUid {
        match self {
            MessageError::Vanished(uid) | MessageError::Unparseable(uid) => *uid,
            MessageError::Mailbox { uid, .. } | MessageError::Emit { uid, .. } => *uid,
        }
    }
}

/// Counters for one account run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccountSummary {
    /// Messages fetched this run, dropped ones included.
    pub fetched: usize,
    /// Messages classified and marked (important + spam + neutral).
    pub processed: usize,
    pub important: usize,
    pub spam: usize,
    pub neutral: usize,
    /// Unscored notes from blacklist `record` rules.
    pub recorded: usize,
    /// Discarded by blacklist `drop` rules.
    pub dropped: usize,
    /// Classifier gave up; note written with the failure marker.
    pub errored: usize,
    /// A stage raised; message left unmarked.
    pub failed: usize,
}

impl AccountSummary {
    fn tally(&mut self, action: ActionTaken, disposition: Option<Disposition>) {
        match action {
            ActionTaken::Processed => {
                self.processed += 1;
                match disposition {
                    Some(Disposition::Important) => self.important += 1,
                    Some(Disposition::Spam) => self.spam += 1,
                    Some(Disposition::Neutral) => self.neutral += 1,
                    Some(Disposition::Error) | None => {}
                }
            }
            ActionTaken::Dropped => self.dropped += 1,
            ActionTaken::Recorded => self.recorded += 1,
            ActionTaken::Errored => self.errored += 1,
            ActionTaken::Failed => self.failed += 1,
        }
    }
}

/// Result of a marker cleanup on one account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupSummary {
    /// Messages carrying a targeted marker.
    pub matched: usize,
    /// Messages whose markers were removed; zero on a dry run.
    pub cleared: usize,
}

/// Drives one account through the triage pipeline.
pub struct AccountProcessor {
    config: ResolvedConfig,
    rules: RuleSet,
    classifier: ClassifierClient,
    sink: Arc<dyn NoteSink>,
    options: ProcessOptions,
    stage: RunStage,
    summary: AccountSummary,
}

impl AccountProcessor {
    /// Creates a processor for one account run.
    pub fn new(
        config: ResolvedConfig,
        rules: RuleSet,
        classifier: ClassifierClient,
        sink: Arc<dyn NoteSink>,
        options: ProcessOptions,
    ) -> Self {
        Self {
            config,
            rules,
            classifier,
            sink,
            options,
            stage: RunStage::Init,
            summary: AccountSummary::default(),
        }
    }

    /// Account this processor serves.
    pub fn account(&self) -> &AccountId {
        self.config.account()
    }

    /// Runs the account to completion.
    ///
    /// Per-message failures are counted, not returned. An error means the
    /// session could not be opened or the search failed; the session is
    /// logged out either way once it exists.
    pub async fn run<C>(mut self, connector: &C) -> email::Result<AccountSummary>
    where
        C: Connector + ?Sized,
    {
        let mut mailbox = connector.connect(&self.config).await?;
        self.enter(RunStage::Connected);

        let outcome = self.process_mailbox(mailbox.as_mut()).await;
        if outcome.is_ok() {
            self.enter(RunStage::Summarizing);
            let s = &self.summary;
            tracing::info!(
                account = %self.account(),
                fetched = s.fetched,
                processed = s.processed,
                important = s.important,
                spam = s.spam,
                neutral = s.neutral,
                recorded = s.recorded,
                dropped = s.dropped,
                errored = s.errored,
                failed = s.failed,
                dry_run = self.options.dry_run,
                "account run finished"
            );
        }

        if let Err(e) = mailbox.logout().await {
            tracing::warn!(account = %self.account(), error = %e, "logout failed");
        }
        self.enter(RunStage::Closed);

        outcome.map(|()| self.summary)
    }

    fn enter(&mut self, stage: RunStage) {
        tracing::trace!(account = %self.config.account(), from = %self.stage, to = %stage, "stage");
        self.stage = stage;
    }

    /// Walks the candidates until `limit` messages have been classified or
    /// recorded. Dropped and unparseable messages stay unmarked, so they are
    /// skipped without using up the limit.
    async fn process_mailbox(&mut self, mailbox: &mut dyn Mailbox) -> email::Result<()> {
        self.enter(RunStage::Fetching);
        let uids = self.select(mailbox).await?;
        let limit = self.limit();
        let mut handled = 0;

        for (index, &uid) in uids.iter().enumerate() {
            if handled == limit {
                tracing::info!(
                    account = %self.account(),
                    remaining = uids.len() - index,
                    limit,
                    "per-run limit reached, deferring the rest"
                );
                break;
            }
            self.summary.fetched += 1;

            match self.process_message(mailbox, uid).await {
                Ok(ctx) => {
                    if let Some(action) = ctx.action {
                        if action != ActionTaken::Dropped {
                            handled += 1;
                        }
                        self.summary.tally(action, ctx.disposition);
                    }
                }
                Err(e) => {
                    if e.reached_pipeline() {
                        handled += 1;
                    }
                    tracing::error!(
                        account = %self.account(),
                        uid = %e.uid(),
                        stage = %e.stage(),
                        error = %e,
                        "message failed, left for next run"
                    );
                    self.summary.tally(ActionTaken::Failed, None);
                }
            }
        }
        Ok(())
    }

    fn limit(&self) -> usize {
        self.options
            .max_emails
            .unwrap_or(self.config.processing().max_emails_per_run)
    }

    /// Candidate UIDs in ascending order.
    async fn select(&self, mailbox: &mut dyn Mailbox) -> email::Result<Vec<MessageUid>> {
        if let Some(uid) = self.options.target_uid {
            tracing::info!(account = %self.account(), uid = %uid, "processing targeted message");
            return Ok(vec![uid]);
        }

        let imap = self.config.imap();
        let criteria = if self.options.force_reprocess {
            imap.query.clone()
        } else {
            exclude_markers(&imap.query, &[&imap.processed_tag, &imap.failed_tag])
        };

        let mut uids = mailbox.search(&criteria).await?;
        uids.sort();
        uids.dedup();

        tracing::debug!(account = %self.account(), criteria = %criteria, count = uids.len(), "search complete");
        Ok(uids)
    }

    async fn process_message(
        &mut self,
        mailbox: &mut dyn Mailbox,
        uid: MessageUid,
    ) -> Result<EmailContext, MessageError> {
        let raw = mailbox
            .fetch(uid)
            .await
            .map_err(|source| MessageError::Mailbox {
                uid,
                stage: RunStage::Fetching,
                source,
            })?
            .ok_or(MessageError::Vanished(uid))?;
        let email = FetchedEmail::parse(uid, &raw).ok_or(MessageError::Unparseable(uid))?;
        let mut ctx = EmailContext::new(email);

        self.enter(RunStage::Filtering);
        let action = match evaluate_blacklist(&ctx, &self.rules.blacklist) {
            BlacklistVerdict::Drop => {
                tracing::debug!(
                    account = %self.account(),
                    uid = %uid,
                    sender = %ctx.sender.email,
                    "dropped by blacklist"
                );
                ctx.action = Some(ActionTaken::Dropped);
                return Ok(ctx);
            }
            BlacklistVerdict::Record => {
                self.record(&mut ctx);
                ActionTaken::Recorded
            }
            BlacklistVerdict::Pass => self.triage(&mut ctx).await,
        };

        self.enter(RunStage::Emitting);
        if self.options.dry_run {
            tracing::debug!(account = %self.account(), uid = %uid, "dry run, note and marker skipped");
        } else {
            let note = Note::from_context(self.config.account(), &ctx);
            let path = self
                .sink
                .emit(&note)
                .await
                .map_err(|source| MessageError::Emit { uid, source })?;
            tracing::debug!(account = %self.account(), uid = %uid, path = %path.display(), "note written");

            self.enter(RunStage::Marking);
            let imap = self.config.imap();
            let marker = match action {
                ActionTaken::Errored => imap.failed_tag.as_str(),
                _ => imap.processed_tag.as_str(),
            };
            mailbox
                .add_flags(&[uid], &[marker])
                .await
                .map_err(|source| MessageError::Mailbox {
                    uid,
                    stage: RunStage::Marking,
                    source,
                })?;
        }

        ctx.action = Some(action);
        Ok(ctx)
    }

    /// Blacklist `record` path: raw text only, no classification.
    fn record(&mut self, ctx: &mut EmailContext) {
        let max = self.config.processing().max_body_chars;
        ctx.body = truncate_chars(ctx.raw_text.as_deref().unwrap_or_default(), max);
        ctx.tags.insert(TAG_UNSCORED.to_string());
        ctx.tags.insert(TAG_RECORDED.to_string());

        tracing::info!(
            account = %self.account(),
            uid = %ctx.uid,
            sender = %ctx.sender.email,
            "recorded without scoring"
        );
    }

    /// Normal path: normalize, classify, apply the whitelist, decide.
    async fn triage(&mut self, ctx: &mut EmailContext) -> ActionTaken {
        self.enter(RunStage::Normalizing);
        let normalized = normalize(
            ctx.raw_html.as_deref(),
            ctx.raw_text.as_deref(),
            self.config.processing().max_body_chars,
        );
        if normalized.used_fallback {
            tracing::warn!(
                account = %self.account(),
                uid = %ctx.uid,
                "html body unusable, fell back to plain text"
            );
        }
        ctx.body = normalized.text;
        ctx.used_fallback = normalized.used_fallback;

        self.enter(RunStage::Classifying);
        let payload = format!(
            "From: {}\nSubject: {}\n\n{}",
            ctx.sender.display(),
            ctx.subject,
            ctx.body
        );
        ctx.classification = Some(self.classifier.classify(&payload).await);

        let whitelist = apply_whitelist(ctx, &self.rules.whitelist);
        ctx.whitelist_delta = whitelist.delta;
        ctx.tags.extend(whitelist.tags);

        self.enter(RunStage::Deciding);
        let decision = decide(ctx, self.config.thresholds());
        ctx.disposition = Some(decision.disposition);
        ctx.adjusted_importance = decision.adjusted_importance;
        ctx.tags = decision.tags;

        let scores = ctx.classification.as_ref().and_then(|c| c.scores());
        tracing::info!(
            account = %self.account(),
            uid = %ctx.uid,
            sender = %ctx.sender.email,
            disposition = ?decision.disposition,
            importance = ?scores.map(|(i, _)| i),
            spam = ?scores.map(|(_, s)| s),
            adjusted_importance = ?ctx.adjusted_importance,
            whitelist_delta = ctx.whitelist_delta,
            tags = ?ctx.tags,
            "message triaged"
        );

        match decision.disposition {
            Disposition::Error => ActionTaken::Errored,
            _ => ActionTaken::Processed,
        }
    }
}

/// Removes triage markers from an account's mailbox so messages are requeued.
///
/// Clears the failure marker, and with `include_processed` the processed
/// marker too. A dry run only counts.
pub async fn cleanup_flags<C>(
    config: &ResolvedConfig,
    connector: &C,
    include_processed: bool,
    dry_run: bool,
) -> email::Result<CleanupSummary>
where
    C: Connector + ?Sized,
{
    let imap = config.imap();
    let mut markers = vec![imap.failed_tag.as_str()];
    if include_processed {
        markers.push(imap.processed_tag.as_str());
    }

    let mut mailbox = connector.connect(config).await?;
    let outcome = clear_markers(mailbox.as_mut(), &markers, dry_run).await;
    if let Err(e) = mailbox.logout().await {
        tracing::warn!(account = %config.account(), error = %e, "logout failed");
    }

    let summary = outcome?;
    tracing::info!(
        account = %config.account(),
        markers = ?markers,
        matched = summary.matched,
        cleared = summary.cleared,
        dry_run,
        "marker cleanup finished"
    );
    Ok(summary)
}

async fn clear_markers(
    mailbox: &mut dyn Mailbox,
    markers: &[&str],
    dry_run: bool,
) -> email::Result<CleanupSummary> {
    let mut uids = mailbox.search(&any_marker(markers)).await?;
    uids.sort();
    uids.dedup();

    let mut summary = CleanupSummary {
        matched: uids.len(),
        cleared: 0,
    };
    if !dry_run && !uids.is_empty() {
        mailbox.remove_flags(&uids, markers).await?;
        summary.cleared = uids.len();
    }
    Ok(summary)
}
