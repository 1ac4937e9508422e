//! Email domain types.
//!
//! A [`FetchedEmail`] is the parsed view of one raw RFC 5322 message pulled
//! from the mailbox: just the fields the triage pipeline reads.

use chrono::{DateTime, Utc};
use mail_parser::{Addr, MessageParser, PartType};
use serde::{Deserialize, Serialize};

use super::MessageUid;

/// An email address with optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Email address.
    pub email: String,
    /// Display name (e.g., "John Doe").
    pub name: Option<String>,
}

impl Address {
    /// Creates a new address with just an email.
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
        }
    }

    /// Creates a new address with email and display name.
    pub fn with_name(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: Some(name.into()),
        }
    }

    /// Returns the display representation of this address.
    ///
    /// If a name is present, returns "Name <email>", otherwise just the email.
    pub fn display(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }

    /// Returns the lowercased domain part of the address, if any.
    pub fn domain(&self) -> Option<String> {
        self.email
            .rsplit_once('@')
            .map(|(_, domain)| domain.trim().trim_end_matches('>').to_lowercase())
            .filter(|domain| !domain.is_empty())
    }

    fn from_addr(addr: &Addr) -> Self {
        Self {
            email: addr.address().unwrap_or("").to_string(),
            name: addr.name().map(|s| s.to_string()),
        }
    }
}

/// A message fetched from the mailbox and parsed into triage-relevant parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedEmail {
    /// Server UID.
    pub uid: MessageUid,
    /// First `From` address.
    pub sender: Address,
    /// Subject line, empty when absent.
    pub subject: String,
    /// `Date` header, if it parsed.
    pub date: Option<DateTime<Utc>>,
    /// First `text/html` body part, undecoded markup.
    pub html_body: Option<String>,
    /// First `text/plain` body part.
    pub text_body: Option<String>,
}

impl FetchedEmail {
    /// Parses raw message bytes.
    ///
    /// Returns `None` when the bytes are not a recognisable message.
    pub fn parse(uid: MessageUid, raw: &[u8]) -> Option<Self> {
        let message = MessageParser::default().parse(raw)?;

        let sender = message
            .from()
            .and_then(|addr| addr.first())
            .map(Address::from_addr)
            .unwrap_or_else(|| Address::new("unknown@unknown"));

        let subject = message.subject().unwrap_or_default().to_string();

        let date = message
            .date()
            .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0));

        // mail-parser synthesises html from text (and vice versa) through
        // body_html/body_text, so read the parts directly.
        let html_body = message.html_part(0).and_then(|part| match &part.body {
            PartType::Html(html) => Some(html.to_string()),
            _ => None,
        });
        let text_body = message.text_part(0).and_then(|part| match &part.body {
            PartType::Text(text) => Some(text.to_string()),
            _ => None,
        });

        Some(Self {
            uid,
            sender,
            subject,
            date,
            html_body,
            text_body,
        })
    }
}
