//! Codex Companion: live status for Codex coding sessions
//!
//! Tails the active Codex session rollout, classifies each record into a small
//! status vocabulary and publishes the result to a shared status file.

pub mod agents;
pub mod companion;
pub mod config;
pub mod status;

pub use status::{PetState, StatusUpdate, TokenUsage};
