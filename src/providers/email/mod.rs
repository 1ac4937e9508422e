//! Mailbox provider implementations.
//!
//! This module contains the [`Mailbox`] trait and its IMAP implementation,
//! [`ImapMailbox`]. Each account run opens one session, selects the configured
//! mailbox, and logs out when the run ends.

mod imap;
mod traits;

pub use imap::ImapMailbox;
pub use traits::{any_marker, exclude_markers, uid_set, Mailbox, ProviderError, Result};
