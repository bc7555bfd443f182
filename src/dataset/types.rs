//! Conversation records produced by the generate, persona and finalize stages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Speaker of one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "human")]
    Human,
    #[serde(rename = "gpt")]
    Assistant,
    #[serde(rename = "tool")]
    Tool,
}

impl Role {
    /// Role name in chat-template vocabulary.
    pub fn chat_role(self) -> &'static str {
        match self {
            Role::Human => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A tool invocation made by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub from: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Turn {
    pub fn human(value: impl Into<String>) -> Self {
        Self {
            from: Role::Human,
            value: Some(value.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(value: impl Into<String>) -> Self {
        Self {
            from: Role::Assistant,
            value: Some(value.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// An assistant turn that invokes tools, with optional accompanying text.
    pub fn assistant_with_tools(value: Option<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            from: Role::Assistant,
            value,
            tool_calls: (!calls.is_empty()).then_some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: Option<String>, value: impl Into<String>) -> Self {
        Self {
            from: Role::Tool,
            value: Some(value.into()),
            tool_calls: None,
            tool_call_id: call_id,
        }
    }

    /// Text of the turn, or "" when it carries none.
    pub fn text(&self) -> &str {
        self.value.as_deref().unwrap_or("")
    }

    /// True if the turn carries neither text nor tool calls.
    pub fn is_empty(&self) -> bool {
        self.text().trim().is_empty() && self.tool_calls.as_ref().map_or(true, |c| c.is_empty())
    }

    /// Same role, tool-call ids, names, arguments and result linkage.
    pub fn same_structure(&self, other: &Turn) -> bool {
        self.from == other.from
            && self.tool_call_id == other.tool_call_id
            && self.tool_calls.as_deref().unwrap_or_default()
                == other.tool_calls.as_deref().unwrap_or_default()
    }
}

/// One multi-turn conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetItem {
    pub conversations: Vec<Turn>,
    /// Candidate task the conversation was generated for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
}

impl DatasetItem {
    pub fn new(conversations: Vec<Turn>) -> Self {
        Self {
            conversations,
            task: None,
        }
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// True if both items have the same turn count and structurally equal turns.
    pub fn same_structure(&self, other: &DatasetItem) -> bool {
        self.conversations.len() == other.conversations.len()
            && self
                .conversations
                .iter()
                .zip(&other.conversations)
                .all(|(a, b)| a.same_structure(b))
    }
}

/// Training-ready record: the conversation flattened by a chat template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalRecord {
    pub text: String,
}
