//! Note emission.
//!
//! A [`Note`] is the persisted form of one triaged message: a Markdown
//! document with a YAML front-matter block. [`FileNoteSink`] writes it to
//! `<notes_dir>/<account>-<uid>.md`, so emitting the same message twice
//! overwrites instead of duplicating.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::domain::{AccountId, Classification, Disposition, EmailContext, MessageUid};

/// Errors that can occur while emitting a note.
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("failed to render note: {0}")]
    Render(#[from] serde_yaml::Error),

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for note emission.
pub type Result<T> = std::result::Result<T, EmitError>;

/// Front matter and body of one emitted note.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Note {
    pub account: AccountId,
    pub uid: MessageUid,
    pub sender: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    /// `None` for unscored (recorded) notes.
    pub disposition: Option<Disposition>,
    pub importance_score: Option<u8>,
    pub adjusted_importance: Option<u8>,
    pub spam_score: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifier_error: Option<String>,
    pub html_fallback: bool,
    pub tags: Vec<String>,
    #[serde(skip)]
    pub body: String,
}

impl Note {
    /// Builds the note for a message whose pipeline has finished deciding.
    pub fn from_context(account: &AccountId, ctx: &EmailContext) -> Self {
        let scores = ctx.classification.as_ref().and_then(Classification::scores);
        let (importance_score, spam_score) = match scores {
            Some((importance, spam)) => (Some(importance), Some(spam)),
            None => (None, None),
        };
        let classifier_error = match &ctx.classification {
            Some(Classification::Failed { last_error, .. }) => Some(last_error.clone()),
            _ => None,
        };

        Self {
            account: account.clone(),
            uid: ctx.uid,
            sender: ctx.sender.email.clone(),
            sender_name: ctx.sender.name.clone(),
            subject: ctx.subject.clone(),
            date: ctx.date,
            disposition: ctx.disposition,
            importance_score,
            adjusted_importance: ctx.adjusted_importance,
            spam_score,
            classifier_error,
            html_fallback: ctx.used_fallback,
            tags: ctx.tags.iter().cloned().collect(),
            body: ctx.body.clone(),
        }
    }

    /// File name of the note: `<account>-<uid>.md`.
    pub fn file_name(&self) -> String {
        format!("{}-{}.md", sanitize(self.account.as_str()), self.uid)
    }

    /// Renders the note as Markdown with YAML front matter.
    pub fn render(&self) -> Result<String> {
        let front_matter = serde_yaml::to_string(self)?;
        let title = if self.subject.trim().is_empty() {
            "(no subject)"
        } else {
            self.subject.trim()
        };
        Ok(format!(
            "---\n{}---\n\n# {}\n\n{}\n",
            front_matter,
            title,
            self.body.trim_end()
        ))
    }
}

/// Destination for emitted notes.
#[async_trait]
pub trait NoteSink: Send + Sync {
    /// Persists a note, replacing any earlier note for the same message.
    ///
    /// Returns where the note was written.
    async fn emit(&self, note: &Note) -> Result<PathBuf>;
}

/// Writes notes as files in one directory.
#[derive(Debug, Clone)]
pub struct FileNoteSink {
    dir: PathBuf,
}

impl FileNoteSink {
    /// Creates a sink writing into `dir`, created on first emit.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Target directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl NoteSink for FileNoteSink {
    async fn emit(&self, note: &Note) -> Result<PathBuf> {
        let rendered = note.render()?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| EmitError::Io {
                path: self.dir.clone(),
                source,
            })?;

        let path = self.dir.join(note.file_name());
        tokio::fs::write(&path, rendered)
            .await
            .map_err(|source| EmitError::Io {
                path: path.clone(),
                source,
            })?;

        Ok(path)
    }
}

/// Keeps account names safe as file-name components.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
