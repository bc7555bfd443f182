//! Structured completion calls.
//!
//! Wraps an [`LlmProvider`] with the "system + user prompt in, JSON out"
//! contract the stages rely on. A response that is empty, has no extractable
//! JSON, or is tagged with an `error` key is a failed call.

use std::sync::Arc;

use serde_json::Value;

use super::litellm::{GenerationRequest, LlmProvider, Message};
use super::responses::ValidatedResponse;
use crate::error::LlmError;
use crate::utils::json_extraction::extract_json_from_response;

/// Model and sampling settings for one call.
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl CompletionOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_tokens: 3000,
            temperature: 0.5,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }
}

/// JSON-returning completion service over any provider.
#[derive(Clone)]
pub struct CompletionService {
    provider: Arc<dyn LlmProvider>,
}

impl CompletionService {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    /// Runs one completion and returns the JSON value it contained.
    pub async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &CompletionOptions,
    ) -> Result<Value, LlmError> {
        let request = GenerationRequest::new(
            options.model.clone(),
            vec![Message::system(system_prompt), Message::user(user_prompt)],
        )
        .with_temperature(options.temperature)
        .with_max_tokens(options.max_tokens);

        let response = self.provider.generate(request).await?;
        let content = response
            .first_content()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| LlmError::ParseError("No content in LLM response".to_string()))?;

        let value =
            extract_json_from_response(content).map_err(|e| LlmError::ParseError(e.to_string()))?;

        if let Some(reported) = value.get("error").filter(|e| !e.is_null()) {
            let message = match reported {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Err(LlmError::ServiceReported(message));
        }

        Ok(value)
    }

    /// Runs one completion and validates it into `T`.
    pub async fn complete_as<T: ValidatedResponse>(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &CompletionOptions,
    ) -> Result<T, LlmError> {
        let value = self.complete(system_prompt, user_prompt, options).await?;
        T::from_json(value)
            .map_err(|reason| LlmError::InvalidResponse(format!("{}: {}", T::KIND, reason)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::litellm::GenerationResponse;
    use crate::llm::responses::ParsedScore;
    use async_trait::async_trait;

    struct FixedProvider(String);

    #[async_trait]
    impl LlmProvider for FixedProvider {
        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            assert_eq!(request.messages.len(), 2);
            Ok(GenerationResponse::from_text(request.model, self.0.clone()))
        }
    }

    fn service(content: &str) -> CompletionService {
        CompletionService::new(Arc::new(FixedProvider(content.to_string())))
    }

    #[tokio::test]
    async fn test_complete_extracts_json() {
        let value = service("```json\n{\"summary\": \"ok\"}\n```")
            .complete("s", "u", &CompletionOptions::new("m"))
            .await
            .unwrap();
        assert_eq!(value["summary"], "ok");
    }

    #[tokio::test]
    async fn test_error_tagged_response_fails() {
        let err = service(r#"{"error": "quota exceeded"}"#)
            .complete("s", "u", &CompletionOptions::new("m"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::ServiceReported(ref m) if m == "quota exceeded"));
    }

    #[tokio::test]
    async fn test_non_json_is_parse_error() {
        let err = service("I'd rather not.")
            .complete("s", "u", &CompletionOptions::new("m"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::ParseError(_)));
    }

    #[tokio::test]
    async fn test_complete_as_validates() {
        let score: ParsedScore = service(r#"{"relevance_score": 0.9}"#)
            .complete_as("s", "u", &CompletionOptions::new("m"))
            .await
            .unwrap();
        assert_eq!(score.relevance_score, 0.9);

        let err = service(r#"{"score": 0.9}"#)
            .complete_as::<ParsedScore>("s", "u", &CompletionOptions::new("m"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }
}
