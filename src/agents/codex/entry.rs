//! Typed view of one Codex rollout line.
//!
//! Every line is `{ "timestamp": ..., "type": ..., "payload": {...} }`. `event_msg`
//! and `response_item` payloads carry a second `type` discriminator. Unknown
//! discriminators (and known ones with unexpected field shapes) degrade to an
//! `Other`/`Unrecognized` variant so one odd record never breaks a batch.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// One parsed rollout record
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawEntry")]
pub struct SessionEntry {
    pub timestamp: String,
    pub item: EntryItem,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryItem {
    /// First line of each rollout
    SessionMeta(SessionMeta),
    /// Emitted at the start of each turn
    TurnContext(TurnContext),
    EventMsg(EventMsg),
    ResponseItem(ResponseItem),
    /// Top-level `type` not known to this build
    Unrecognized(String),
}

impl SessionEntry {
    /// Top-level `type` tag, for logging.
    pub fn kind(&self) -> &str {
        match &self.item {
            EntryItem::SessionMeta(_) => "session_meta",
            EntryItem::TurnContext(_) => "turn_context",
            EntryItem::EventMsg(_) => "event_msg",
            EntryItem::ResponseItem(_) => "response_item",
            EntryItem::Unrecognized(kind) => kind,
        }
    }

    pub fn is_session_start(&self) -> bool {
        matches!(self.item, EntryItem::SessionMeta(_))
    }
}

#[derive(Deserialize)]
struct RawEntry {
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

impl From<RawEntry> for SessionEntry {
    fn from(raw: RawEntry) -> Self {
        let item = match raw.kind.as_str() {
            "session_meta" => EntryItem::SessionMeta(typed(raw.payload).unwrap_or_default()),
            "turn_context" => EntryItem::TurnContext(typed(raw.payload).unwrap_or_default()),
            "event_msg" => EntryItem::EventMsg(typed(raw.payload).unwrap_or(EventMsg::Other)),
            "response_item" => {
                EntryItem::ResponseItem(typed(raw.payload).unwrap_or(ResponseItem::Other))
            }
            _ => EntryItem::Unrecognized(raw.kind),
        };

        Self {
            timestamp: raw.timestamp.unwrap_or_default(),
            item,
        }
    }
}

fn typed<T: DeserializeOwned>(payload: Value) -> Option<T> {
    serde_json::from_value(payload).ok()
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SessionMeta {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub cli_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TurnContext {
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// `event_msg` payloads
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventMsg {
    TaskStarted,
    TaskComplete,
    UserMessage,
    AgentReasoning {
        #[serde(default)]
        text: String,
    },
    AgentMessage,
    TokenCount {
        #[serde(default)]
        info: Option<TokenCountInfo>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TokenCountInfo {
    /// Usage of the most recent model request
    #[serde(default)]
    pub last_token_usage: Option<TokenTally>,
    /// Cumulative usage across the session
    #[serde(default)]
    pub total_token_usage: Option<TokenTally>,
    #[serde(default)]
    pub model_context_window: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TokenTally {
    pub input_tokens: u64,
    pub cached_input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_output_tokens: u64,
    pub total_tokens: u64,
}

/// `response_item` payloads
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseItem {
    FunctionCall {
        name: String,
        /// JSON-encoded argument object
        #[serde(default)]
        arguments: String,
    },
    CustomToolCall {
        name: String,
    },
    FunctionCallOutput,
    CustomToolCallOutput,
    Message {
        #[serde(default)]
        role: String,
        #[serde(default)]
        phase: Option<String>,
    },
    Reasoning,
    #[serde(other)]
    Other,
}
