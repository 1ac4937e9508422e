//! mail-triage - Scheduled, multi-account email triage
//!
//! This crate connects to IMAP mailboxes, scores new messages with a remote
//! language model, applies blacklist and whitelist overrides, and writes one
//! Markdown note per message while marking the source message as handled.

pub mod config;
pub mod domain;
pub mod providers;
pub mod services;
pub mod storage;

pub use services::{AccountSelection, LiveBackends, Orchestrator, ProcessOptions, RunSummary};
