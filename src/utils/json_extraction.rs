//! JSON extraction from completion-service responses.
//!
//! Models often wrap the requested JSON in markdown fences or surround it with
//! explanatory text. The extraction tries, in order:
//! 1. A fenced ```json block, then any fenced block
//! 2. The whole trimmed content
//! 3. The last balanced `{...}` object that parses (reasoning text often precedes it)
//! 4. The first balanced `[...]` array that parses
//!
//! # Example
//!
//! ```
//! use knowledge_forge::utils::json_extraction::extract_json_from_response;
//!
//! let response = "Here is the plan: {\"search_queries\": [\"rust\"]}";
//! let json = extract_json_from_response(response).unwrap();
//! assert_eq!(json["search_queries"][0], "rust");
//! ```

use serde_json::Value;
use thiserror::Error;

/// Error type for JSON extraction failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JsonExtractionError {
    #[error("JSON appears truncated: {unclosed} unclosed delimiters. Partial: {partial_preview}...")]
    Truncated {
        partial_preview: String,
        unclosed: usize,
    },
    #[error("No JSON content found in response. Content starts with: '{content_preview}'")]
    NotFound { content_preview: String },
}

/// Extracts and parses the JSON value embedded in `content`.
pub fn extract_json_from_response(content: &str) -> Result<Value, JsonExtractionError> {
    let trimmed = content.trim();

    for block in fenced_blocks(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(block) {
            return Ok(value);
        }
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    if let Some(value) = last_balanced(trimmed, '{', '}') {
        return Ok(value);
    }
    if let Some(value) = first_balanced(trimmed, '[', ']') {
        return Ok(value);
    }

    let unclosed = unclosed_delimiters(trimmed);
    if unclosed > 0 {
        let start = trimmed.find(['{', '[']).unwrap_or(0);
        return Err(JsonExtractionError::Truncated {
            partial_preview: preview(&trimmed[start..], 100),
            unclosed,
        });
    }

    Err(JsonExtractionError::NotFound {
        content_preview: preview(trimmed, 50),
    })
}

/// Returns the bodies of fenced code blocks, `json`-tagged ones first.
fn fenced_blocks(content: &str) -> Vec<&str> {
    let mut tagged = Vec::new();
    let mut untagged = Vec::new();
    let mut rest = content;

    while let Some(open) = rest.find("```") {
        let after_fence = &rest[open + 3..];
        let Some(line_end) = after_fence.find('\n') else {
            break;
        };
        let lang = after_fence[..line_end].trim();
        let body = &after_fence[line_end + 1..];
        let Some(close) = body.find("```") else {
            break;
        };
        let block = body[..close].trim();
        if lang.eq_ignore_ascii_case("json") {
            tagged.push(block);
        } else {
            untagged.push(block);
        }
        rest = &body[close + 3..];
    }

    tagged.extend(untagged);
    tagged
}

/// Finds the byte index of the delimiter closing the one at position 0.
///
/// String literals and escapes are honoured.
fn matching_close(s: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Scans top-level balanced spans left to right, returning every one that parses.
///
/// A span that parses is skipped as a whole, so nested values are never
/// reported separately from their parent.
fn balanced_values(s: &str, open: char, close: char) -> Vec<Value> {
    let mut values = Vec::new();
    let mut cursor = 0;
    while let Some(offset) = s[cursor..].find(open) {
        let start = cursor + offset;
        if let Some(end) = matching_close(&s[start..], open, close) {
            if let Ok(value) = serde_json::from_str::<Value>(&s[start..=start + end]) {
                values.push(value);
                cursor = start + end + 1;
                continue;
            }
        }
        cursor = start + open.len_utf8();
    }
    values
}

fn last_balanced(s: &str, open: char, close: char) -> Option<Value> {
    balanced_values(s, open, close).pop()
}

fn first_balanced(s: &str, open: char, close: char) -> Option<Value> {
    balanced_values(s, open, close).into_iter().next()
}

fn unclosed_delimiters(s: &str) -> usize {
    let mut depth: isize = 0;
    let mut in_string = false;
    let mut escape_next = false;
    for c in s.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth += 1,
            '}' | ']' if !in_string => depth -= 1,
            _ => {}
        }
    }
    depth.max(0) as usize
}

fn preview(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
