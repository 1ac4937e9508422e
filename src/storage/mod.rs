//! Credential and note storage.
//!
//! - OS keychain integration for IMAP passwords, via
//!   tokio::task::spawn_blocking
//! - Note emission to the filesystem through the [`NoteSink`] seam

mod keychain;
mod notes;

pub use keychain::{KeychainAccess, KeychainError};
pub use notes::{EmitError, FileNoteSink, Note, NoteSink};
