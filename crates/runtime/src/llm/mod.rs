//! LLM summary providers
//!
//! A `SummaryProvider` is the minimal completion capability the analysis
//! stage needs. The orchestrator tries the configured primary, then the
//! fallback, and finally renders a deterministic template so the pipeline
//! never blocks on a provider outage.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::config::LlmConfig;
use crate::observability;

pub mod providers;

pub use providers::OpenAiCompatProvider;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Provider API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Provider returned an empty completion")]
    EmptyCompletion,
}

/// A text-completion capability for architecture summaries.
#[async_trait]
pub trait SummaryProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str, timeout: Duration) -> Result<String, LlmError>;
}

/// Metadata the summary is written from. Everything here is derived from
/// chunk rows; providers must not invent beyond it.
#[derive(Debug, Clone)]
pub struct SummaryInput {
    pub full_name: String,
    pub default_branch: String,
    pub top_language: String,
    pub language_breakdown: Value,
    pub unique_path_count: usize,
    pub chunk_count: usize,
    /// First 25 unique paths, alphabetical.
    pub top_paths: Vec<String>,
}

impl SummaryInput {
    pub fn prompt(&self) -> String {
        let files = if self.top_paths.is_empty() {
            "none".to_string()
        } else {
            self.top_paths.join(", ")
        };
        format!(
            "Repository: {}\nBranch: {}\nFiles discovered: {} sampled from {} chunks\n\
             Language breakdown: {}\nRepresentative files: {}\n\n\
             Write a concise architecture summary (3-5 sentences) for an engineering dashboard. \
             Mention major layers/modules and likely responsibilities. \
             Do not invent files or technologies not reflected in the provided metadata.",
            self.full_name,
            self.default_branch,
            self.top_paths.len(),
            self.chunk_count,
            self.language_breakdown,
            files,
        )
    }

    /// The deterministic paragraph used when no provider succeeds.
    pub fn template_summary(&self) -> String {
        let sample = if self.top_paths.is_empty() {
            "no source files discovered".to_string()
        } else {
            self.top_paths
                .iter()
                .take(5)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "Repository {} (branch {}) is primarily {}. The parse/index stage identified {} \
             source files and {} chunks. Representative paths include: {}. This summary is \
             generated from structural chunk metadata and should be refined with LLM synthesis \
             in later stages.",
            self.full_name,
            self.default_branch,
            self.top_language,
            self.unique_path_count,
            self.chunk_count,
            sample,
        )
    }
}

/// Tries providers in configured order, falling back to the template.
pub struct SummaryOrchestrator {
    providers: Vec<Box<dyn SummaryProvider>>,
    timeout: Duration,
}

impl SummaryOrchestrator {
    pub fn new(providers: Vec<Box<dyn SummaryProvider>>, timeout: Duration) -> Self {
        Self { providers, timeout }
    }

    /// Build the provider chain from configuration. Providers without an API
    /// key are skipped entirely.
    pub fn from_config(config: &LlmConfig) -> Self {
        let primary = config.primary_provider.as_deref().unwrap_or("openrouter");
        let fallback = config.fallback_provider.as_deref();

        let mut providers: Vec<Box<dyn SummaryProvider>> = Vec::new();
        if let Some(provider) = providers::build(config, primary, &config.summary_model) {
            providers.push(provider);
        }
        if let Some(name) = fallback {
            if name != primary {
                let model = config
                    .fallback_model
                    .as_deref()
                    .unwrap_or(&config.summary_model);
                if let Some(provider) = providers::build(config, name, model) {
                    providers.push(provider);
                }
            }
        }

        Self::new(providers, Duration::from_secs(config.summary_timeout_seconds))
    }

    /// Generate the architecture summary. Infallible: the template is the
    /// terminal fallback.
    pub async fn generate(&self, input: &SummaryInput) -> String {
        let prompt = input.prompt();

        for provider in &self.providers {
            match provider.complete(&prompt, self.timeout).await {
                Ok(text) => {
                    observability::llm_summary_attempts()
                        .with_label_values(&[provider.name(), "success"])
                        .inc();
                    return text;
                }
                Err(error) => {
                    observability::llm_summary_attempts()
                        .with_label_values(&[provider.name(), "error"])
                        .inc();
                    observability::llm_summary_fallbacks()
                        .with_label_values(&[provider.name()])
                        .inc();
                    tracing::warn!(provider = provider.name(), %error, "summary provider failed");
                }
            }
        }

        input.template_summary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> SummaryInput {
        SummaryInput {
            full_name: "octo/widgets".to_string(),
            default_branch: "main".to_string(),
            top_language: "rs".to_string(),
            language_breakdown: serde_json::json!({"rs": 88.5, "toml": 11.5}),
            unique_path_count: 12,
            chunk_count: 47,
            top_paths: vec![
                "src/lib.rs".to_string(),
                "src/main.rs".to_string(),
            ],
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl SummaryProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }
        async fn complete(&self, _prompt: &str, _timeout: Duration) -> Result<String, LlmError> {
            Err(LlmError::Request("connection refused".to_string()))
        }
    }

    struct EchoProvider;

    #[async_trait]
    impl SummaryProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }
        async fn complete(&self, prompt: &str, _timeout: Duration) -> Result<String, LlmError> {
            Ok(format!("summary of: {}", &prompt[..20.min(prompt.len())]))
        }
    }

    #[tokio::test]
    async fn falls_back_to_template_when_all_providers_fail() {
        let orchestrator =
            SummaryOrchestrator::new(vec![Box::new(FailingProvider)], Duration::from_secs(1));
        let summary = orchestrator.generate(&input()).await;
        assert!(summary.starts_with("Repository octo/widgets (branch main) is primarily rs."));
        assert!(summary.contains("12 source files and 47 chunks"));
    }

    #[tokio::test]
    async fn second_provider_covers_primary_failure() {
        let orchestrator = SummaryOrchestrator::new(
            vec![Box::new(FailingProvider), Box::new(EchoProvider)],
            Duration::from_secs(1),
        );
        let summary = orchestrator.generate(&input()).await;
        assert!(summary.starts_with("summary of:"));
    }

    #[tokio::test]
    async fn empty_chain_renders_the_template() {
        let orchestrator = SummaryOrchestrator::new(vec![], Duration::from_secs(1));
        let summary = orchestrator.generate(&input()).await;
        assert!(summary.contains("Representative paths include: src/lib.rs, src/main.rs."));
    }

    #[test]
    fn prompt_carries_the_corpus_metadata() {
        let prompt = input().prompt();
        assert!(prompt.contains("Repository: octo/widgets"));
        assert!(prompt.contains("Branch: main"));
        assert!(prompt.contains("2 sampled from 47 chunks"));
        assert!(prompt.contains("Do not invent files"));
    }

    #[test]
    fn template_handles_empty_corpus() {
        let mut empty = input();
        empty.top_paths.clear();
        empty.unique_path_count = 0;
        empty.chunk_count = 0;
        assert!(empty
            .template_summary()
            .contains("no source files discovered"));
    }
}
