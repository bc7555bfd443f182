//! Typed views of completion-service responses.
//!
//! Every structured call is validated here, at the adapter boundary, so the
//! stages only ever see strongly shaped values. Coercion is deliberately
//! lenient about shape (numbers as strings, objects where strings were asked
//! for) and strict about meaning (an empty plan is rejected).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A response type that can be validated from the JSON a completion returned.
pub trait ValidatedResponse: Sized {
    /// Short name used in error messages.
    const KIND: &'static str;

    /// Validates and converts the raw JSON value.
    fn from_json(value: Value) -> Result<Self, String>;
}

/// Search queries and relevance keywords for a learning goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedPlan {
    pub search_queries: Vec<String>,
    pub relevance_keywords: Vec<String>,
}

impl ValidatedResponse for ParsedPlan {
    const KIND: &'static str = "research plan";

    fn from_json(value: Value) -> Result<Self, String> {
        let search_queries = string_list(value.get("search_queries"));
        if search_queries.is_empty() {
            return Err("no usable search_queries".to_string());
        }
        Ok(Self {
            search_queries,
            relevance_keywords: string_list(value.get("relevance_keywords")),
        })
    }
}

/// Relevance of one document to the goal, clamped to [0.0, 1.0].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParsedScore {
    pub relevance_score: f64,
}

impl ValidatedResponse for ParsedScore {
    const KIND: &'static str = "relevance score";

    fn from_json(value: Value) -> Result<Self, String> {
        let raw = match value.get("relevance_score") {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .ok_or_else(|| "missing numeric relevance_score".to_string())?;

        if !raw.is_finite() {
            return Err(format!("relevance_score {raw} is not finite"));
        }
        Ok(Self {
            relevance_score: raw.clamp(0.0, 1.0),
        })
    }
}

/// Summary of one curated document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedSummary {
    pub summary: String,
}

impl ValidatedResponse for ParsedSummary {
    const KIND: &'static str = "document summary";

    fn from_json(value: Value) -> Result<Self, String> {
        let summary = value
            .get("summary")
            .map(value_to_text)
            .unwrap_or_default();
        if summary.trim().is_empty() {
            return Err("empty summary".to_string());
        }
        Ok(Self { summary })
    }
}

/// A named entity with its description and relations to other entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyEntity {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<String>,
}

/// Cross-document synthesis produced by the reduce step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedKnowledge {
    pub main_themes: Vec<String>,
    pub key_entities: Vec<KeyEntity>,
    pub potential_tasks: Vec<String>,
}

impl ValidatedResponse for ParsedKnowledge {
    const KIND: &'static str = "distilled knowledge";

    fn from_json(value: Value) -> Result<Self, String> {
        let main_themes = labelled_list(value.get("main_themes"));
        if main_themes.is_empty() {
            return Err("no main_themes".to_string());
        }
        Ok(Self {
            main_themes,
            key_entities: entity_list(value.get("key_entities")),
            potential_tasks: labelled_list(value.get("potential_tasks")),
        })
    }
}

/// Documents the automatic reviewer wants removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedReview {
    pub files_to_discard: Vec<String>,
}

impl ValidatedResponse for ParsedReview {
    const KIND: &'static str = "curation review";

    fn from_json(value: Value) -> Result<Self, String> {
        match value.get("files_to_discard") {
            Some(list @ Value::Array(_)) => Ok(Self {
                files_to_discard: string_list(Some(list)),
            }),
            Some(Value::Null) => Ok(Self {
                files_to_discard: Vec::new(),
            }),
            _ => Err("missing files_to_discard list".to_string()),
        }
    }
}

/// Non-empty trimmed strings from a JSON array; other shapes yield nothing.
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .map(value_to_text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

/// Like `string_list`, but objects contribute their most descriptive label.
fn labelled_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(map) => object_label(map),
                other => Some(value_to_text(other)),
            })
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::Object(map)) => map.keys().cloned().collect(),
        other => string_list(other),
    }
}

fn entity_list(value: Option<&Value>) -> Vec<KeyEntity> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(entity_from_value).collect(),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(name, detail)| match detail {
                Value::Object(inner) => KeyEntity {
                    name: name.clone(),
                    description: text_field(inner, &["description", "desc", "summary"]),
                    relationships: string_list(
                        inner.get("relationships").or_else(|| inner.get("relations")),
                    ),
                },
                other => KeyEntity {
                    name: name.clone(),
                    description: value_to_text(other),
                    relationships: Vec::new(),
                },
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn entity_from_value(value: &Value) -> Option<KeyEntity> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(KeyEntity {
            name: s.trim().to_string(),
            description: String::new(),
            relationships: Vec::new(),
        }),
        Value::Object(map) => {
            let name = text_field(map, &["name", "entity", "title"]);
            if name.is_empty() {
                return None;
            }
            Some(KeyEntity {
                name,
                description: text_field(map, &["description", "desc", "summary"]),
                relationships: string_list(
                    map.get("relationships").or_else(|| map.get("relations")),
                ),
            })
        }
        _ => None,
    }
}

fn object_label(map: &Map<String, Value>) -> Option<String> {
    for key in ["name", "theme", "title", "task", "description"] {
        if let Some(Value::String(s)) = map.get(key) {
            if !s.trim().is_empty() {
                return Some(s.clone());
            }
        }
    }
    serde_json::to_string(map).ok()
}

fn text_field(map: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|k| map.get(*k).map(value_to_text))
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Renders a JSON value as plain text: strings verbatim, everything else as JSON.
pub(crate) fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
