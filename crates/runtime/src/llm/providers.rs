//! OpenAI-compatible completion providers
//!
//! OpenRouter and Groq both speak the `chat/completions` dialect, so a
//! single provider type covers both; only name, base URL, key, and model
//! differ.

use std::time::Duration;

use async_trait::async_trait;

use super::{LlmError, SummaryProvider};
use crate::config::LlmConfig;

const SYSTEM_PROMPT: &str = "You summarize repository architecture for developers.";

pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    http: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(name: &str, base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SummaryProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, prompt: &str, timeout: Duration) -> Result<String, LlmError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
            "temperature": 0.2,
            "max_tokens": 220,
        });

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .timeout(timeout)
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(timeout)
                } else {
                    LlmError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body: body.chars().take(300).collect(),
            });
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Request(format!("invalid JSON response: {e}")))?;

        let text = payload
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .map(str::trim)
            .unwrap_or("");

        if text.is_empty() {
            return Err(LlmError::EmptyCompletion);
        }
        Ok(text.to_string())
    }
}

/// Build a provider by name, returning None when its API key is absent.
pub fn build(
    config: &LlmConfig,
    name: &str,
    model: &str,
) -> Option<Box<dyn SummaryProvider>> {
    match name {
        "openrouter" => config.openrouter_api_key.as_deref().map(|key| {
            Box::new(OpenAiCompatProvider::new(
                "openrouter",
                &config.openrouter_base_url,
                key,
                model,
            )) as Box<dyn SummaryProvider>
        }),
        "groq" => config.groq_api_key.as_deref().map(|key| {
            Box::new(OpenAiCompatProvider::new(
                "groq",
                &config.groq_base_url,
                key,
                model,
            )) as Box<dyn SummaryProvider>
        }),
        other => {
            tracing::warn!(provider = other, "unknown summary provider configured");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn llm_config() -> LlmConfig {
        LlmConfig {
            openrouter_api_key: Some("or-key".to_string()),
            openrouter_base_url: "https://openrouter.ai/api/v1".to_string(),
            groq_api_key: None,
            groq_base_url: "https://api.groq.com/openai/v1".to_string(),
            summary_model: "meta-llama/llama-3.1-8b-instruct".to_string(),
            summary_timeout_seconds: 20,
            primary_provider: Some("openrouter".to_string()),
            fallback_provider: Some("groq".to_string()),
            fallback_model: None,
        }
    }

    #[test]
    fn build_skips_providers_without_keys() {
        let config = llm_config();
        assert!(build(&config, "openrouter", "m").is_some());
        assert!(build(&config, "groq", "m").is_none());
        assert!(build(&config, "does-not-exist", "m").is_none());
    }

    #[test]
    fn provider_names_are_stable() {
        let config = llm_config();
        let provider = build(&config, "openrouter", "m").unwrap();
        assert_eq!(provider.name(), "openrouter");
    }
}
