//! Incremental JSONL parsing.
//!
//! A rollout is read in arbitrary chunks while Codex is still appending to it,
//! so a read may end in the middle of a record. [`parse_jsonl_chunk`] threads
//! the unfinished tail through as a remainder.

use serde::de::DeserializeOwned;

/// Records parsed from one chunk plus the text still waiting for its newline.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedChunk<T> {
    pub entries: Vec<T>,
    /// Never contains a newline.
    pub remainder: String,
}

/// Parse `chunk` appended to `remainder` from the previous call.
///
/// Blank and malformed lines are skipped. A trailing segment without a newline
/// is consumed if it already parses as a complete record (files need not end
/// in a newline); otherwise it is returned verbatim as the new remainder.
pub fn parse_jsonl_chunk<T: DeserializeOwned>(chunk: &str, remainder: &str) -> ParsedChunk<T> {
    let mut combined = String::with_capacity(remainder.len() + chunk.len());
    combined.push_str(remainder);
    combined.push_str(chunk);

    let (complete, tail) = match combined.rfind('\n') {
        Some(idx) => (&combined[..idx], &combined[idx + 1..]),
        None => ("", combined.as_str()),
    };

    let mut entries: Vec<T> = complete.split('\n').filter_map(parse_line).collect();

    let remainder = match parse_line(tail) {
        Some(entry) => {
            entries.push(entry);
            String::new()
        }
        None => tail.to_string(),
    };

    ParsedChunk { entries, remainder }
}

fn parse_line<T: DeserializeOwned>(line: &str) -> Option<T> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    serde_json::from_str(line).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::codex::entry::{EntryItem, EventMsg, SessionEntry};
    use serde_json::{Value, json};

    fn line(value: Value) -> String {
        serde_json::to_string(&value).unwrap()
    }

    fn event(kind: &str) -> String {
        line(json!({
            "timestamp": "2026-02-15T00:00:00.000Z",
            "type": "event_msg",
            "payload": { "type": kind }
        }))
    }

    #[test]
    fn parses_complete_lines() {
        let input = format!("{}\n{}\n", event("user_message"), event("task_complete"));
        let parsed: ParsedChunk<SessionEntry> = parse_jsonl_chunk(&input, "");

        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.entries[0].item, EntryItem::EventMsg(EventMsg::UserMessage));
        assert_eq!(parsed.entries[1].item, EntryItem::EventMsg(EventMsg::TaskComplete));
        assert_eq!(parsed.remainder, "");
    }

    #[test]
    fn keeps_incomplete_trailing_record() {
        let partial = r#"{"timestamp":"2026-02-15T00:00:00.000Z","type":"event_msg","payload":{"type":"task_complete""#;
        let parsed: ParsedChunk<SessionEntry> = parse_jsonl_chunk(partial, "");

        assert!(parsed.entries.is_empty());
        assert_eq!(parsed.remainder, partial);
    }

    #[test]
    fn reconstructs_record_split_across_reads() {
        let full = event("task_complete");
        let (a, b) = full.split_at(full.len() / 2);

        let first: ParsedChunk<SessionEntry> = parse_jsonl_chunk(a, "");
        let second: ParsedChunk<SessionEntry> =
            parse_jsonl_chunk(&format!("{b}\n"), &first.remainder);

        assert!(first.entries.is_empty());
        assert_eq!(second.entries.len(), 1);
        assert_eq!(second.entries[0].item, EntryItem::EventMsg(EventMsg::TaskComplete));
        assert_eq!(second.remainder, "");
    }

    #[test]
    fn complete_final_line_without_newline_is_consumed() {
        let parsed: ParsedChunk<SessionEntry> = parse_jsonl_chunk(&event("task_complete"), "");

        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.remainder, "");
    }

    #[test]
    fn malformed_lines_do_not_affect_neighbours() {
        let input = format!(
            "{}\nnot-json\n{{\"type\":\"event_msg\"\n{}\n",
            event("user_message"),
            event("task_complete")
        );
        let parsed: ParsedChunk<SessionEntry> = parse_jsonl_chunk(&input, "");

        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.entries[0].item, EntryItem::EventMsg(EventMsg::UserMessage));
        assert_eq!(parsed.entries[1].item, EntryItem::EventMsg(EventMsg::TaskComplete));
        assert_eq!(parsed.remainder, "");
    }

    #[test]
    fn blank_lines_and_crlf_are_tolerated() {
        let input = format!("\n   \n{}\r\n\n", event("task_started"));
        let parsed: ParsedChunk<SessionEntry> = parse_jsonl_chunk(&input, "");

        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.remainder, "");
    }

    #[test]
    fn remainder_never_contains_newline() {
        let input = format!("{}\n{{\"type\":", event("task_started"));
        let parsed: ParsedChunk<Value> = parse_jsonl_chunk(&input, "");

        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.remainder, "{\"type\":");
        assert!(!parsed.remainder.contains('\n'));
    }

    fn feed(chunks: &[&str]) -> Vec<Value> {
        let mut remainder = String::new();
        let mut out = Vec::new();
        for chunk in chunks {
            let parsed: ParsedChunk<Value> = parse_jsonl_chunk(chunk, &remainder);
            out.extend(parsed.entries);
            remainder = parsed.remainder;
        }
        out
    }

    #[test]
    fn any_split_matches_single_pass() {
        let records = [
            line(json!({ "type": "session_meta", "payload": { "id": "s", "cwd": "/tmp/é" } })),
            event("task_started"),
            line(json!({ "type": "event_msg", "payload": { "type": "agent_reasoning", "text": "naïve → plan" } })),
            event("task_complete"),
        ];
        let input = format!("{}\n", records.join("\n"));
        let expected = feed(&[&input]);
        assert_eq!(expected.len(), records.len());

        let boundaries: Vec<usize> = (0..=input.len())
            .filter(|i| input.is_char_boundary(*i))
            .collect();

        for &i in &boundaries {
            assert_eq!(feed(&[&input[..i], &input[i..]]), expected, "split at {i}");
        }

        // Every pair of split points, three chunks.
        for (n, &i) in boundaries.iter().enumerate() {
            for &j in &boundaries[n..] {
                let chunks = [&input[..i], &input[i..j], &input[j..]];
                assert_eq!(feed(&chunks), expected, "split at {i}/{j}");
            }
        }
    }
}
