//! Core identifier types for domain entities.
//!
//! These newtype wrappers keep account names and mailbox UIDs from being
//! mixed up with arbitrary strings and integers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a configured mailbox account (e.g. `work`, `personal`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl AccountId {
    /// Returns the account name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// IMAP UID of a message within the selected mailbox.
///
/// Stable for the lifetime of the mailbox's UIDVALIDITY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageUid(pub u32);

impl fmt::Display for MessageUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for MessageUid {
    fn from(uid: u32) -> Self {
        Self(uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_id_display() {
        let id = AccountId::from("work");
        assert_eq!(id.to_string(), "work");
        assert_eq!(id.as_str(), "work");
    }

    #[test]
    fn account_id_equality() {
        assert_eq!(AccountId::from("work"), AccountId::from("work".to_string()));
        assert_ne!(AccountId::from("work"), AccountId::from("personal"));
    }

    #[test]
    fn message_uid_ordering() {
        let mut uids = vec![MessageUid(42), MessageUid(7), MessageUid(19)];
        uids.sort();
        assert_eq!(uids, vec![MessageUid(7), MessageUid(19), MessageUid(42)]);
        assert_eq!(MessageUid(7).to_string(), "7");
    }

    #[test]
    fn message_uid_serialization() {
        let json = serde_json::to_string(&MessageUid(314)).unwrap();
        assert_eq!(json, "314");
    }
}
