//! Maps Codex rollout records to status updates.
//!
//! Pure functions, no I/O. [`classify`] returns `None` for records that do not
//! change what the agent is doing.

use super::entry::{EntryItem, EventMsg, ResponseItem, SessionEntry, TokenCountInfo};
use crate::agents::{TRUNCATE_MAX, first_shell_token, truncate_text};
use crate::status::{PetState, StatusUpdate, TokenUsage};
use serde_json::Value;

const AGENT_NAME: &str = "Codex";

const SHELL_TOOLS: &[&str] = &["exec_command", "shell_command", "shell"];
const PATCH_TOOL: &str = "apply_patch";
const RESOURCE_TOOL: &str = "read_mcp_resource";

const ESCALATED: &str = "require_escalated";
const FINAL_ANSWER: &str = "final_answer";

/// Classify one rollout record.
pub fn classify(entry: &SessionEntry) -> Option<StatusUpdate> {
    match &entry.item {
        EntryItem::SessionMeta(_) => Some(StatusUpdate::new(
            PetState::Idle,
            format!("{AGENT_NAME} session started!"),
        )),
        EntryItem::TurnContext(_) => None,
        EntryItem::EventMsg(msg) => classify_event_msg(msg),
        EntryItem::ResponseItem(item) => classify_response_item(item),
        EntryItem::Unrecognized(_) => None,
    }
}

/// Token usage carried by a `token_count` event, if any.
pub fn extract_usage(entry: &SessionEntry) -> Option<TokenUsage> {
    match &entry.item {
        EntryItem::EventMsg(EventMsg::TokenCount { info: Some(info) }) => usage_from_info(info),
        _ => None,
    }
}

fn usage_from_info(info: &TokenCountInfo) -> Option<TokenUsage> {
    // The cumulative total grows without bound over a long session; the last
    // request reflects the current context load.
    let tally = info.last_token_usage.or(info.total_token_usage)?;
    Some(TokenUsage {
        // input_tokens already includes cached_input_tokens.
        context: tally.input_tokens,
        output: tally.output_tokens,
    })
}

fn thinking() -> StatusUpdate {
    StatusUpdate::new(PetState::Thinking, "Thinking...")
}

fn responding() -> StatusUpdate {
    StatusUpdate::new(PetState::Thinking, "Responding...")
}

fn all_done() -> StatusUpdate {
    StatusUpdate::new(PetState::Done, "All done!")
}

fn classify_event_msg(msg: &EventMsg) -> Option<StatusUpdate> {
    match msg {
        EventMsg::TaskStarted | EventMsg::UserMessage => Some(thinking()),
        EventMsg::TaskComplete => Some(all_done()),
        EventMsg::AgentReasoning { text } => Some(StatusUpdate::new(
            PetState::Thinking,
            format!("Thinking: \"{}\"", truncate_text(text, TRUNCATE_MAX)),
        )),
        EventMsg::AgentMessage => Some(responding()),
        // Usage only; see `extract_usage`.
        EventMsg::TokenCount { .. } => None,
        EventMsg::Other => None,
    }
}

fn classify_response_item(item: &ResponseItem) -> Option<StatusUpdate> {
    match item {
        ResponseItem::FunctionCall { name, arguments } => Some(classify_function_call(name, arguments)),
        ResponseItem::CustomToolCall { name } if name == PATCH_TOOL => Some(editing()),
        ResponseItem::CustomToolCall { name } => Some(using(name)),
        ResponseItem::FunctionCallOutput | ResponseItem::CustomToolCallOutput => Some(thinking()),
        ResponseItem::Message { role, phase } => {
            if role != "assistant" {
                return None;
            }
            if phase.as_deref() == Some(FINAL_ANSWER) {
                Some(all_done())
            } else {
                Some(responding())
            }
        }
        ResponseItem::Reasoning | ResponseItem::Other => None,
    }
}

fn editing() -> StatusUpdate {
    StatusUpdate::new(PetState::Working, "Editing file...")
}

fn using(name: &str) -> StatusUpdate {
    StatusUpdate::new(PetState::Working, format!("Using {name}..."))
}

fn classify_function_call(name: &str, arguments: &str) -> StatusUpdate {
    if SHELL_TOOLS.contains(&name) {
        return classify_shell_call(arguments);
    }
    match name {
        PATCH_TOOL => editing(),
        RESOURCE_TOOL => StatusUpdate::new(PetState::Reading, "Reading resource..."),
        _ => using(name),
    }
}

fn classify_shell_call(arguments: &str) -> StatusUpdate {
    let Ok(args) = serde_json::from_str::<Value>(arguments) else {
        return StatusUpdate::new(PetState::Working, "Running command...");
    };

    let command = command_text(&args);
    let program = command.as_deref().and_then(first_shell_token);
    let escalated = args.get("sandbox_permissions").and_then(Value::as_str) == Some(ESCALATED);

    match (escalated, program) {
        (true, Some(program)) => StatusUpdate::new(
            PetState::Waiting,
            format!("Awaiting approval for {program}..."),
        ),
        (true, None) => StatusUpdate::new(PetState::Waiting, "Awaiting your approval..."),
        (false, Some(program)) => {
            StatusUpdate::new(PetState::Working, format!("Running {program}..."))
        }
        (false, None) => StatusUpdate::new(PetState::Working, "Running command..."),
    }
}

/// Command line from `cmd` or `command` (a string, or an argv array).
fn command_text(args: &Value) -> Option<String> {
    let value = args.get("cmd").or_else(|| args.get("command"))?;
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let argv: Vec<&str> = parts.iter().filter_map(Value::as_str).collect();
            (!argv.is_empty()).then(|| argv.join(" "))
        }
        _ => None,
    }
}
