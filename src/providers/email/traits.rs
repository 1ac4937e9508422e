//! Mailbox trait definition.
//!
//! This module defines the [`Mailbox`] trait, the narrow view of a remote mail
//! store the triage pipeline needs: search by criteria, fetch one raw message,
//! and add or remove keyword flags.

use async_trait::async_trait;

use crate::domain::MessageUid;

/// Result type alias for mailbox operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors that can occur during mailbox operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Authentication failed or credentials are missing.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Network or connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// The server rejected a command.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Connected session against one selected mailbox.
///
/// Implementations hold a live session; callers must call
/// [`logout`](Mailbox::logout) once done, on success and failure alike.
#[async_trait]
pub trait Mailbox: Send {
    /// Returns UIDs matching an IMAP SEARCH criteria string.
    async fn search(&mut self, criteria: &str) -> Result<Vec<MessageUid>>;

    /// Fetches the raw RFC 822 bytes of one message without marking it seen.
    ///
    /// Returns `None` when the UID no longer exists.
    async fn fetch(&mut self, uid: MessageUid) -> Result<Option<Vec<u8>>>;

    /// Adds keyword flags to messages.
    async fn add_flags(&mut self, uids: &[MessageUid], flags: &[&str]) -> Result<()>;

    /// Removes keyword flags from messages.
    async fn remove_flags(&mut self, uids: &[MessageUid], flags: &[&str]) -> Result<()>;

    /// Ends the session.
    async fn logout(&mut self) -> Result<()>;
}

/// Builds an IMAP sequence set (`1,5,9`) from UIDs.
pub fn uid_set(uids: &[MessageUid]) -> String {
    uids.iter()
        .map(|u| u.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Builds the search criteria excluding messages that carry any marker.
///
/// `ALL` is dropped when exclusions follow, since `ALL UNKEYWORD x` and
/// `UNKEYWORD x` select the same set.
pub fn exclude_markers(criteria: &str, markers: &[&str]) -> String {
    let criteria = criteria.trim();
    let exclusions = markers
        .iter()
        .map(|m| format!("UNKEYWORD {}", m))
        .collect::<Vec<_>>()
        .join(" ");

    match (criteria, exclusions.is_empty()) {
        (c, true) => c.to_string(),
        ("" | "ALL", false) => exclusions,
        (c, false) => format!("({}) {}", c, exclusions),
    }
}

/// Builds the search criteria selecting messages that carry any marker.
pub fn any_marker(markers: &[&str]) -> String {
    match markers {
        [] => "ALL".to_string(),
        [only] => format!("KEYWORD {}", only),
        [first, rest @ ..] => format!("OR KEYWORD {} {}", first, any_marker(rest)),
    }
}
