//! Prompts for each completion call the pipeline makes.
//!
//! Every call pairs a fixed system prompt (public, so test doubles can route
//! on it) with a user prompt built from the stage's inputs. Each system prompt
//! names the JSON keys the matching response type in
//! [`crate::llm::responses`] validates.

use crate::llm::responses::ParsedKnowledge;

/// Maximum characters of document text sent for relevance scoring.
pub const SCORE_SNIPPET_CHARS: usize = 2000;

/// Maximum characters of document text sent to the automatic reviewer.
pub const REVIEW_PREVIEW_CHARS: usize = 500;

/// Maximum characters of document text sent for summarisation.
pub const SUMMARY_INPUT_CHARS: usize = 12_000;

/// A system and user prompt pair for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePrompt {
    pub system: String,
    pub user: String,
}

impl StagePrompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

pub const PLAN_SYSTEM_PROMPT: &str = "You are an AI research strategist. Based on the user's \
learning goal, generate a detailed research plan. Provide a JSON object with keys: \
'search_queries' (list of 5 diverse, effective queries) and 'relevance_keywords' (list of 10 \
specific keywords). ONLY return the JSON object.";

pub const SCORE_SYSTEM_PROMPT: &str = "You are an AI content relevance assessor. Score the \
relevance of the text to the user's goal from 0.0 to 1.0. Return a JSON object with one key: \
'relevance_score' (float).";

pub const REVIEW_SYSTEM_PROMPT: &str = "You are a meticulous research editor. Identify documents \
that are low-quality, redundant, or irrelevant to the user's primary goal. Return a JSON object \
with one key: 'files_to_discard', a list of document identifiers to remove.";

pub const SUMMARY_SYSTEM_PROMPT: &str = "Provide a concise but detailed summary of the key facts, \
concepts, and conclusions in the following text. Return a JSON object with one key: 'summary'.";

pub const DISTILL_SYSTEM_PROMPT: &str = "You are a master knowledge architect. Based on this \
collection of document summaries, distill the information into a structured JSON object. \
Identify 'main_themes' (list of strings), 'key_entities' (list of objects with 'name', \
'description' and 'relationships') and 'potential_tasks' (list of strings) that could be \
performed with this knowledge. Be comprehensive.";

pub const SCENARIO_SYSTEM_PROMPT: &str = "You are a finetuning data generation bot. Based on the \
provided knowledge summary, create one complex, multi-turn conversational example for \
finetuning an AI assistant. The scenario should require the assistant to reason about the \
provided themes and entities and use hypothetical but plausible tools to solve a problem. \
Output ONLY the JSON object for the conversation: {\"conversations\": [{\"from\": \"human\", \
\"value\": \"...\"}, {\"from\": \"gpt\", \"value\": \"...\", \"tool_calls\": [{\"id\": \
\"call_0\", \"name\": \"...\", \"arguments\": {}}]}, {\"from\": \"tool\", \"tool_call_id\": \
\"call_0\", \"value\": \"...\"}]}";

pub const PERSONA_SYSTEM_PROMPT: &str = "You are a master AI persona stylist. Rewrite the 'gpt' \
responses in the following conversation to match the tone and style of the persona shown in \
the provided examples. Do not change the content, the number or order of turns, or any tool \
calls; only the style of the assistant text. Return the full conversation in the original \
JSON format.";

pub fn build_plan_prompt(goal: &str) -> StagePrompt {
    StagePrompt::new(PLAN_SYSTEM_PROMPT, goal)
}

pub fn build_score_prompt(goal: &str, keywords: &[String], text: &str) -> StagePrompt {
    StagePrompt::new(
        SCORE_SYSTEM_PROMPT,
        format!(
            "User's Goal: \"{}\"\nRelevance Keywords: {}\n\nText Snippet:\n{}",
            goal,
            keywords.join(", "),
            truncate_chars(text, SCORE_SNIPPET_CHARS)
        ),
    )
}

/// `documents` pairs each document identifier with its text.
pub fn build_review_prompt(goal: &str, documents: &[(String, String)]) -> StagePrompt {
    let previews: Vec<serde_json::Value> = documents
        .iter()
        .map(|(id, text)| {
            serde_json::json!({
                "document": id,
                "preview": truncate_chars(text, REVIEW_PREVIEW_CHARS),
            })
        })
        .collect();
    let rendered =
        serde_json::to_string_pretty(&previews).unwrap_or_else(|_| "[]".to_string());
    StagePrompt::new(
        REVIEW_SYSTEM_PROMPT,
        format!("Primary Goal: '{goal}'\n\nDocument Summaries:\n{rendered}"),
    )
}

pub fn build_summary_prompt(text: &str) -> StagePrompt {
    StagePrompt::new(SUMMARY_SYSTEM_PROMPT, truncate_chars(text, SUMMARY_INPUT_CHARS))
}

pub fn build_distill_prompt(summaries: &[String]) -> StagePrompt {
    StagePrompt::new(DISTILL_SYSTEM_PROMPT, summaries.join("\n\n---\n\n"))
}

pub fn build_scenario_prompt(knowledge: &ParsedKnowledge, task: &str) -> StagePrompt {
    let rendered = serde_json::to_string_pretty(knowledge).unwrap_or_default();
    StagePrompt::new(
        SCENARIO_SYSTEM_PROMPT,
        format!(
            "Knowledge Summary:\n{rendered}\n\nGenerate a scenario where the assistant must \
             accomplish this task: '{task}'"
        ),
    )
}

pub fn build_persona_prompt(persona_examples: &str, conversation_json: &str) -> StagePrompt {
    StagePrompt::new(
        PERSONA_SYSTEM_PROMPT,
        format!(
            "Persona Examples:\n{persona_examples}\n\nConversation to Stylize:\n{conversation_json}"
        ),
    )
}

/// First `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
