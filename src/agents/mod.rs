//! Agent integration modules
//!
//! Each submodule consumes the on-disk session format of a specific AI coding agent.

pub mod codex;

/// Default visible length for truncated free text.
pub(crate) const TRUNCATE_MAX: usize = 40;

/// Truncate `text` to at most `max` characters, appending `...` when cut.
///
/// Prefers cutting at the last space inside the window when that space falls
/// past 60% of `max`; otherwise hard-cuts at `max` characters.
pub(crate) fn truncate_text(text: &str, max: usize) -> String {
    let Some((cut, _)) = text.char_indices().nth(max) else {
        return text.to_string();
    };

    let window = &text[..cut];
    if let Some(space) = window.rfind(' ') {
        // `space` is a byte index; compare in characters.
        if window[..space].chars().count() * 10 > max * 6 {
            return format!("{}...", &window[..space]);
        }
    }
    format!("{window}...")
}

/// First whitespace-separated token of a shell command line.
pub(crate) fn first_shell_token(command: &str) -> Option<&str> {
    command.split_whitespace().next()
}
