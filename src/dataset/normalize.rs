//! Normalisation of generated conversations into typed [`DatasetItem`]s.
//!
//! Completion services return conversations in several loose shapes:
//!
//! - canonical turns: `{"from": "gpt", "value": "...", "tool_calls": [...]}`
//! - speaker-keyed turns: `{"human": "..."}`, `{"gpt": {"content": "...", "tool_uses": [...]}}`
//! - tool invocations as `tool_uses: [{recipient_name, parameters}]` or `tool` + `input`
//! - tool results as `tool_responses: [{content}]` or `observation` / `error`
//!
//! All of them become [`Turn`]s. Tool calls without an id get the lowest
//! `call_N` not already used as an explicit id anywhere in the conversation.

use std::collections::HashSet;

use serde_json::{Map, Value};

use super::types::{DatasetItem, Role, ToolCall, Turn};
use crate::llm::responses::{value_to_text, ValidatedResponse};

/// Minimum number of turns for a conversation to be kept.
pub const MIN_TURNS: usize = 2;

const HUMAN_KEYS: [&str; 2] = ["human", "user"];
const ASSISTANT_KEYS: [&str; 2] = ["gpt", "assistant"];
const TEXT_KEYS: [&str; 5] = ["content", "message", "text", "response", "summary"];

/// Normalises one conversation, rejecting those with fewer than [`MIN_TURNS`] turns.
pub fn normalize_conversation(value: &Value) -> Result<DatasetItem, String> {
    let turns = match value {
        Value::Array(turns) => turns,
        Value::Object(map) => match map.get("conversations") {
            Some(Value::Array(turns)) => turns,
            _ => return Err("missing conversations list".to_string()),
        },
        _ => return Err("conversation is not an object".to_string()),
    };

    let mut normalizer = Normalizer::new(explicit_call_ids(turns));
    for turn in turns {
        if let Value::Object(map) = turn {
            normalizer.push_turn(map);
        }
    }

    let conversations: Vec<Turn> = normalizer
        .turns
        .into_iter()
        .filter(|t| !t.is_empty())
        .collect();

    if conversations.len() < MIN_TURNS {
        return Err(format!(
            "conversation has {} usable turns, need at least {}",
            conversations.len(),
            MIN_TURNS
        ));
    }

    let task = value
        .get("task")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(DatasetItem {
        conversations,
        task,
    })
}

impl ValidatedResponse for DatasetItem {
    const KIND: &'static str = "conversation";

    fn from_json(value: Value) -> Result<Self, String> {
        normalize_conversation(&value)
    }
}

/// Every non-empty `id` on a canonical tool call in the conversation.
fn explicit_call_ids(turns: &[Value]) -> HashSet<String> {
    turns
        .iter()
        .filter_map(|turn| turn.get("tool_calls").and_then(Value::as_array))
        .flatten()
        .filter_map(|call| call.get("id").and_then(Value::as_str))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

struct Normalizer {
    turns: Vec<Turn>,
    /// Ids already taken, explicit or generated.
    used: HashSet<String>,
    next_call: usize,
    /// Id of the most recent tool call, for results that do not name one.
    last_call: Option<String>,
}

impl Normalizer {
    fn new(explicit: HashSet<String>) -> Self {
        Self {
            turns: Vec::new(),
            used: explicit,
            next_call: 0,
            last_call: None,
        }
    }

    fn next_id(&mut self) -> String {
        loop {
            let id = format!("call_{}", self.next_call);
            self.next_call += 1;
            if self.used.insert(id.clone()) {
                self.last_call = Some(id.clone());
                return id;
            }
        }
    }

    fn last_id(&self) -> Option<String> {
        self.last_call.clone()
    }

    fn push_turn(&mut self, turn: &Map<String, Value>) {
        if let Some(from) = turn.get("from").and_then(Value::as_str) {
            self.push_canonical(from, turn);
            return;
        }

        if let Some(text) = HUMAN_KEYS
            .iter()
            .find_map(|k| turn.get(*k))
            .map(extract_text)
            .filter(|t| !t.trim().is_empty())
        {
            self.turns.push(Turn::human(text));
            return;
        }

        let Some(data) = ASSISTANT_KEYS.iter().find_map(|k| turn.get(*k)) else {
            return;
        };
        let text = Some(extract_text(data)).filter(|t| !t.trim().is_empty());
        let calls = match data {
            Value::Object(obj) => self.speaker_tool_calls(obj),
            _ => Vec::new(),
        };
        let issued: Vec<String> = calls.iter().map(|c| c.id.clone()).collect();
        self.turns.push(Turn::assistant_with_tools(text, calls));

        if let Some(Value::Array(responses)) = turn.get("tool_responses") {
            for (i, response) in responses.iter().enumerate() {
                let content = response.get("content").unwrap_or(response);
                let call_id = issued.get(i).cloned().or_else(|| self.last_id());
                self.turns
                    .push(Turn::tool_result(call_id, value_to_text(content)));
            }
        } else if let Some(observation) = turn.get("observation").or_else(|| turn.get("error")) {
            let content = if turn.contains_key("observation") {
                value_to_text(observation)
            } else {
                serde_json::json!({ "error": observation }).to_string()
            };
            self.turns.push(Turn::tool_result(self.last_id(), content));
        }
    }

    fn speaker_tool_calls(&mut self, data: &Map<String, Value>) -> Vec<ToolCall> {
        if let Some(Value::Array(uses)) = data.get("tool_uses") {
            return uses
                .iter()
                .filter_map(|u| {
                    let name = u
                        .get("recipient_name")
                        .or_else(|| u.get("name"))
                        .and_then(Value::as_str)?
                        .trim_start_matches("functions.")
                        .to_string();
                    if name.is_empty() {
                        return None;
                    }
                    let arguments = u.get("parameters").cloned().unwrap_or_else(empty_object);
                    Some(ToolCall {
                        id: self.next_id(),
                        name,
                        arguments,
                    })
                })
                .collect();
        }

        if let Some(name) = data.get("tool").and_then(Value::as_str) {
            let arguments = data.get("input").cloned().unwrap_or_else(empty_object);
            return vec![ToolCall {
                id: self.next_id(),
                name: name.to_string(),
                arguments,
            }];
        }

        Vec::new()
    }

    fn push_canonical(&mut self, from: &str, turn: &Map<String, Value>) {
        let Some(role) = canonical_role(from) else {
            return;
        };
        let text = turn
            .get("value")
            .or_else(|| turn.get("content"))
            .map(extract_text)
            .filter(|t| !t.trim().is_empty());

        match role {
            Role::Human => {
                if let Some(text) = text {
                    self.turns.push(Turn::human(text));
                }
            }
            Role::Assistant => {
                let calls = match turn.get("tool_calls") {
                    Some(Value::Array(calls)) => calls
                        .iter()
                        .filter_map(|c| self.canonical_tool_call(c))
                        .collect(),
                    _ => Vec::new(),
                };
                self.turns.push(Turn::assistant_with_tools(text, calls));
            }
            Role::Tool => {
                let call_id = turn
                    .get("tool_call_id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| self.last_id());
                self.turns
                    .push(Turn::tool_result(call_id, text.unwrap_or_default()));
            }
        }
    }

    /// Accepts `{id, name, arguments}` as well as the OpenAI `{id, function: {name, arguments}}` shape.
    fn canonical_tool_call(&mut self, call: &Value) -> Option<ToolCall> {
        let function = call.get("function").unwrap_or(call);
        let name = function.get("name").and_then(Value::as_str)?.to_string();
        let arguments = match function.get("arguments").or_else(|| function.get("parameters")) {
            Some(Value::String(raw)) => {
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
            }
            Some(other) => other.clone(),
            None => empty_object(),
        };
        let id = match call.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => {
                self.last_call = Some(id.to_string());
                id.to_string()
            }
            _ => self.next_id(),
        };
        Some(ToolCall {
            id,
            name,
            arguments,
        })
    }
}

fn canonical_role(from: &str) -> Option<Role> {
    match from {
        f if HUMAN_KEYS.contains(&f) => Some(Role::Human),
        f if ASSISTANT_KEYS.contains(&f) => Some(Role::Assistant),
        "tool" | "function" | "observation" => Some(Role::Tool),
        _ => None,
    }
}

/// Text of a turn payload: the string itself, or the first textual field of an object.
fn extract_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => TEXT_KEYS
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_speaker_keyed_turns_with_tool_uses() {
        let raw = json!({"conversations": [
            {"user": "Find the latest tokio release."},
            {"assistant": {"content": "Checking the registry.", "tool_uses": [
                {"recipient_name": "functions.crates_lookup", "parameters": {"name": "tokio"}}
            ]}, "tool_responses": [{"name": "crates_lookup", "content": {"version": "1.47"}}]},
            {"gpt": "The latest release is 1.47."}
        ]});

        let item = normalize_conversation(&raw).unwrap();
        assert_eq!(item.conversations.len(), 4);

        let call_turn = &item.conversations[1];
        assert_eq!(call_turn.from, Role::Assistant);
        let calls = call_turn.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "call_0");
        assert_eq!(calls[0].name, "crates_lookup");
        assert_eq!(calls[0].arguments, json!({"name": "tokio"}));

        let result = &item.conversations[2];
        assert_eq!(result.from, Role::Tool);
        assert_eq!(result.tool_call_id.as_deref(), Some("call_0"));
        assert_eq!(result.text(), r#"{"version":"1.47"}"#);
    }

    #[test]
    fn test_tool_and_observation_shape() {
        let raw = json!({"conversations": [
            {"human": {"message": "Run the linter"}},
            {"gpt": {"tool": "shell", "input": {"cmd": "cargo clippy"}}, "observation": "no warnings"},
            {"gpt": {"text": "Clean."}},
            {"gpt": {"tool": "shell", "input": {"cmd": "false"}}, "error": "exit 1"}
        ]});

        let item = normalize_conversation(&raw).unwrap();
        let turns = &item.conversations;
        assert_eq!(turns.len(), 6);
        assert!(turns[1].value.is_none());
        assert_eq!(turns[2].tool_call_id.as_deref(), Some("call_0"));
        assert_eq!(turns[2].text(), "no warnings");
        assert_eq!(turns[5].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(turns[5].text(), r#"{"error":"exit 1"}"#);
    }

    #[test]
    fn test_canonical_turns_keep_ids() {
        let raw = json!([
            {"from": "human", "value": "q"},
            {"from": "gpt", "value": null, "tool_calls": [
                {"id": "call_7", "function": {"name": "lookup", "arguments": "{\"k\": 1}"}},
                {"name": "other", "arguments": {}}
            ]},
            {"from": "tool", "tool_call_id": "call_7", "value": "v"}
        ]);

        let item = normalize_conversation(&raw).unwrap();
        let calls = item.conversations[1].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "call_7");
        assert_eq!(calls[0].arguments, json!({"k": 1}));
        assert_eq!(calls[1].id, "call_0");
        assert_eq!(item.conversations[2].tool_call_id.as_deref(), Some("call_7"));
    }

    #[test]
    fn test_generated_id_skips_later_explicit_id() {
        let raw = json!([
            {"from": "human", "value": "q"},
            {"from": "gpt", "tool_calls": [{"name": "first", "arguments": {}}]},
            {"from": "tool", "value": "r1"},
            {"from": "gpt", "tool_calls": [{"id": "call_0", "name": "second", "arguments": {}}]},
            {"from": "tool", "value": "r2"}
        ]);

        let item = normalize_conversation(&raw).unwrap();
        let turns = &item.conversations;
        let first = &turns[1].tool_calls.as_ref().unwrap()[0];
        let second = &turns[3].tool_calls.as_ref().unwrap()[0];
        assert_eq!(second.id, "call_0");
        assert_ne!(first.id, second.id);
        assert_eq!(turns[2].tool_call_id.as_deref(), Some(first.id.as_str()));
        assert_eq!(turns[4].tool_call_id.as_deref(), Some("call_0"));
    }

    #[test]
    fn test_persona_names_are_not_roles() {
        let raw = json!({"conversations": [
            {"Dr. Caldwell": "hello"},
            {"Sin": "hi"}
        ]});
        assert!(normalize_conversation(&raw).is_err());
    }

    #[test]
    fn test_round_trip_of_normalized_item_is_stable() {
        let raw = json!({"conversations": [
            {"human": "a"},
            {"gpt": {"content": "b", "tool_uses": [{"recipient_name": "t", "parameters": {"x": 1}}]},
             "tool_responses": [{"content": "r"}]},
            {"gpt": "c"}
        ]});
        let item = normalize_conversation(&raw).unwrap();
        let again = normalize_conversation(&serde_json::to_value(&item).unwrap()).unwrap();
        assert_eq!(item, again);
    }

    #[test]
    fn test_too_short_conversations_rejected() {
        assert!(normalize_conversation(&json!({"conversations": [{"human": "only"}]})).is_err());
        assert!(normalize_conversation(&json!({"conversations": "text"})).is_err());
        assert!(normalize_conversation(&json!({"turns": []})).is_err());
        assert!(normalize_conversation(&json!({"conversations": [
            {"human": ""}, {"gpt": ""}, {"narrator": "x"}
        ]}))
        .is_err());
    }
}
