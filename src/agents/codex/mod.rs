//! Codex agent integration.
//!
//! The companion consumes Codex **session rollout JSONL files** under
//! `~/.codex/sessions/YYYY/MM/DD/rollout-*.jsonl` (or `$CODEX_HOME/sessions`):
//! [`sessions`] tails them, [`entry`] types each line, and [`mapper`] turns
//! the interesting lines into pet status updates.

pub mod entry;
pub mod mapper;
pub mod sessions;

pub use entry::{EntryItem, SessionEntry};
pub use mapper::{classify, extract_usage};
pub use sessions::{
    SessionWatch, TailConfig, WatchError, find_latest_session, watch_for_first_session,
    watch_session,
};
