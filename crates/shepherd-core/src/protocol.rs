//! Wire and log record types.
//!
//! The wrapped agent runtime speaks line-delimited JSON on its streams and
//! writes the same record shape into the per-session JSONL logs. Different
//! record types populate different optional fields, so the struct is
//! permissive: every field beyond the discriminant is optional and defaults
//! when missing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single log entry / protocol line.
///
/// Recognized discriminants: `user`, `assistant`, `result`, `progress`,
/// `system`. File order equals temporal order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogEntry {
    /// The record type discriminant.
    #[serde(rename = "type")]
    pub entry_type: String,

    /// Unique id of this entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    /// Session id, present on head entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Entry timestamp, when the runtime recorded one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    /// Message payload for `user` and `assistant` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<EntryMessage>,

    /// Delegation id linking a synthesized entry to its `Task` tool use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,

    /// Meta entries do not count toward the turn index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_meta: Option<bool>,

    /// Model identifier, present on head entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Git branch, present on head entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Result text for `result` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    /// Error flag for `result` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,

    /// Wrapped original content for synthesized `progress` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Message payload with role and content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMessage {
    pub role: String,
    #[serde(default)]
    pub content: MessageContent,
}

/// Message content is either a bare string or a list of content blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Blocks(Vec::new())
    }
}

/// A content block in a message (text, thinking, tool_use).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,

    /// Block id (for `tool_use` blocks); doubles as the delegation id for
    /// `Task` tool uses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
}

impl LogEntry {
    /// Whether this entry advances the turn index: a non-meta `user` entry.
    pub fn counts_as_turn(&self) -> bool {
        self.entry_type == "user" && !self.is_meta.unwrap_or(false)
    }

    /// The plain text of the entry's message, if any.
    ///
    /// For block content, the first text block wins. This is the text the
    /// mirror compares against delegation prompts.
    pub fn message_text(&self) -> Option<String> {
        let message = self.message.as_ref()?;
        match &message.content {
            MessageContent::Text(text) => Some(text.clone()),
            MessageContent::Blocks(blocks) => blocks.iter().find_map(|b| b.text.clone()),
        }
    }

    /// Extract `(delegation_id, prompt)` pairs from `Task` tool-use blocks.
    ///
    /// Only `assistant` entries carry delegations.
    pub fn task_invocations(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        if self.entry_type != "assistant" {
            return out;
        }
        let Some(message) = &self.message else {
            return out;
        };
        let MessageContent::Blocks(blocks) = &message.content else {
            return out;
        };
        for block in blocks {
            if block.block_type != "tool_use" || block.name.as_deref() != Some("Task") {
                continue;
            }
            let prompt = block
                .input
                .as_ref()
                .and_then(|input| input.get("prompt"))
                .and_then(|v| v.as_str());
            if let (Some(id), Some(prompt)) = (block.id.clone(), prompt) {
                out.push((id, prompt.to_string()));
            }
        }
        out
    }

    /// Build a synthesized `progress` entry mirroring subagent activity.
    ///
    /// Carries a fresh uuid, the resolved delegation id, the wrapped original
    /// record, and the original timestamp (falling back to now).
    pub fn progress(
        delegation_id: &str,
        original: serde_json::Value,
        timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        LogEntry {
            entry_type: "progress".to_string(),
            uuid: Some(Uuid::new_v4().to_string()),
            parent_tool_use_id: Some(delegation_id.to_string()),
            timestamp: Some(timestamp.unwrap_or_else(Utc::now)),
            data: Some(original),
            ..Default::default()
        }
    }
}

/// Count the turn index over a sequence of entries.
pub fn turn_count<'a>(entries: impl IntoIterator<Item = &'a LogEntry>) -> u64 {
    entries
        .into_iter()
        .filter(|entry| entry.counts_as_turn())
        .count() as u64
}
