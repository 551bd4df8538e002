//! Natural-language completion service

use crate::config::CompletionConfig;
use crate::error::{CampaignError, Result};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde_json::json;

const DEFAULT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Text completion used for narratives and by the grader
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Complete `prompt`. `context`, when present, frames the request.
    async fn complete(&self, prompt: &str, context: Option<&str>) -> Result<String>;
}

/// Chat-completions client for OpenAI-compatible endpoints
pub struct OpenAiCompletionClient {
    config: CompletionConfig,
    http_client: HttpClient,
}

impl OpenAiCompletionClient {
    pub fn new(config: CompletionConfig) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn api_url(&self) -> String {
        self.config
            .base_url
            .as_ref()
            .map(|url| format!("{}/chat/completions", url.trim_end_matches('/')))
            .unwrap_or_else(|| DEFAULT_COMPLETIONS_URL.to_string())
    }
}

#[async_trait]
impl CompletionService for OpenAiCompletionClient {
    async fn complete(&self, prompt: &str, context: Option<&str>) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(context) = context {
            messages.push(json!({ "role": "system", "content": context }));
        }
        messages.push(json!({ "role": "user", "content": prompt }));

        let response = self
            .http_client
            .post(self.api_url())
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "model": self.config.model,
                "messages": messages,
                "temperature": self.config.temperature,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CampaignError::Completion(format!(
                "Completion API returned {}",
                response.status()
            )));
        }

        let result: serde_json::Value = response.json().await?;

        result["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| {
                CampaignError::Completion("No content in completion response".to_string())
            })
    }
}
