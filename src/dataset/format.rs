//! Chat-template formatting of dataset items into final training records.
//!
//! Templates are rendered with Tera. The context holds `messages`, each with
//! `role` (`user`/`assistant`/`tool`), `content`, `tool_calls` (one JSON
//! string per call) and `tool_call_id`.

use std::path::Path;

use serde::Serialize;
use tera::{Context, Tera};

use super::types::{DatasetItem, FinalRecord};
use crate::error::FormatError;

/// Name of the built-in ChatML template.
pub const CHATML: &str = "chatml";

const TEMPLATE_NAME: &str = "chat";

const CHATML_TEMPLATE: &str = "{% for message in messages %}<|im_start|>{{ message.role }}\n\
{{ message.content }}\
{% for call in message.tool_calls %}{% if message.content or not loop.first %}\n{% endif %}\
<tool_call>\n{{ call }}\n</tool_call>{% endfor %}<|im_end|>\n{% endfor %}";

/// Renders one conversation into its final training text.
pub trait ChatFormatter: Send + Sync {
    fn format(&self, item: &DatasetItem) -> Result<FinalRecord, FormatError>;
}

#[derive(Debug, Serialize)]
struct TemplateMessage<'a> {
    role: &'static str,
    content: &'a str,
    tool_calls: Vec<String>,
    tool_call_id: Option<&'a str>,
}

/// A Tera chat template, either built in or loaded from a file.
#[derive(Debug)]
pub struct TeraChatTemplate {
    tera: Tera,
}

impl TeraChatTemplate {
    /// Resolves `source` as a built-in template name or a template file path.
    ///
    /// # Errors
    ///
    /// `FormatError::Unavailable` if the file cannot be read or does not parse.
    pub fn load(source: &str) -> Result<Self, FormatError> {
        if source.eq_ignore_ascii_case(CHATML) {
            return Self::from_source(CHATML_TEMPLATE, CHATML);
        }
        Self::from_file(Path::new(source))
    }

    /// The built-in ChatML template.
    pub fn chatml() -> Result<Self, FormatError> {
        Self::from_source(CHATML_TEMPLATE, CHATML)
    }

    /// Loads a template file.
    pub fn from_file(path: &Path) -> Result<Self, FormatError> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| FormatError::Unavailable(format!("{}: {}", path.display(), e)))?;
        Self::from_source(&source, &path.display().to_string())
    }

    fn from_source(source: &str, label: &str) -> Result<Self, FormatError> {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        tera.add_raw_template(TEMPLATE_NAME, source)
            .map_err(|e| FormatError::Unavailable(format!("{label}: {e}")))?;
        Ok(Self { tera })
    }
}

impl ChatFormatter for TeraChatTemplate {
    fn format(&self, item: &DatasetItem) -> Result<FinalRecord, FormatError> {
        if item.conversations.is_empty() {
            return Err(FormatError::InvalidConversation(
                "conversation has no turns".to_string(),
            ));
        }

        let messages: Vec<TemplateMessage<'_>> = item
            .conversations
            .iter()
            .map(|turn| TemplateMessage {
                role: turn.from.chat_role(),
                content: turn.text(),
                tool_calls: turn
                    .tool_calls
                    .iter()
                    .flatten()
                    .map(|call| {
                        serde_json::json!({"name": call.name, "arguments": call.arguments})
                            .to_string()
                    })
                    .collect(),
                tool_call_id: turn.tool_call_id.as_deref(),
            })
            .collect();

        let mut context = Context::new();
        context.insert("messages", &messages);
        context.insert("add_generation_prompt", &false);

        let text = self.tera.render(TEMPLATE_NAME, &context)?;
        Ok(FinalRecord { text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::types::{ToolCall, Turn};
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_chatml_plain_conversation() {
        let item = DatasetItem::new(vec![Turn::human("Hi"), Turn::assistant("Hello")]);
        let record = TeraChatTemplate::chatml().unwrap().format(&item).unwrap();
        assert_eq!(
            record.text,
            "<|im_start|>user\nHi<|im_end|>\n<|im_start|>assistant\nHello<|im_end|>\n"
        );
    }

    #[test]
    fn test_chatml_tool_calls_are_not_escaped() {
        let item = DatasetItem::new(vec![
            Turn::human("Weather?"),
            Turn::assistant_with_tools(
                None,
                vec![ToolCall {
                    id: "call_0".into(),
                    name: "weather".into(),
                    arguments: json!({"city": "Oslo"}),
                }],
            ),
            Turn::tool_result(Some("call_0".into()), "<4°C>"),
        ]);

        let text = TeraChatTemplate::load("chatml").unwrap().format(&item).unwrap().text;
        assert!(text.contains("<|im_start|>assistant\n<tool_call>\n{"));
        assert!(text.contains("\"name\":\"weather\""));
        assert!(text.contains("\"city\":\"Oslo\""));
        assert!(text.contains("}\n</tool_call><|im_end|>"));
        assert!(text.contains("<|im_start|>tool\n<4°C><|im_end|>"));
    }

    #[test]
    fn test_template_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "{{% for m in messages %}}[{{{{ m.role }}}}] {{{{ m.content }}}}\n{{% endfor %}}"
        )
        .unwrap();

        let template = TeraChatTemplate::load(file.path().to_str().unwrap()).unwrap();
        let item = DatasetItem::new(vec![Turn::human("a"), Turn::assistant("b")]);
        assert_eq!(template.format(&item).unwrap().text, "[user] a\n[assistant] b\n");
    }

    #[test]
    fn test_missing_template_is_unavailable() {
        let err = TeraChatTemplate::load("/nonexistent/template.jinja").unwrap_err();
        assert!(matches!(err, FormatError::Unavailable(_)));
    }

    #[test]
    fn test_empty_item_rejected() {
        let err = TeraChatTemplate::chatml()
            .unwrap()
            .format(&DatasetItem::new(vec![]))
            .unwrap_err();
        assert!(matches!(err, FormatError::InvalidConversation(_)));
    }
}
