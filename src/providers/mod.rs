//! Mailbox and AI provider implementations.
//!
//! - [`email`] - Mailbox access over IMAP
//! - [`ai`] - AI/LLM providers (OpenAI, Anthropic, Ollama)

pub mod ai;
pub mod email;
