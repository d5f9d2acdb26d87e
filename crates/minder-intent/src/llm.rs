//! Text-completion collaborator interface.
//!
//! The pipeline depends on exactly one capability: a prompt goes out, free
//! text comes back, and that text is *likely* (never guaranteed) to contain
//! a JSON object. Everything stricter than that lives in the interpreter's
//! defensive unwrapping, not here.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("completion API error: {0}")]
    Api(String),
    #[error("invalid completion response: {0}")]
    InvalidResponse(String),
    #[error("network error: {0}")]
    Network(String),
}

/// The text-completion service.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;
}

// ============================================================================
// Mock Client
// ============================================================================

/// Scripted completion client for tests and the offline CLI mode. Cycles
/// through its canned responses.
pub struct MockCompletion {
    responses: Vec<String>,
    cursor: AtomicUsize,
}

impl MockCompletion {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn always(response: &str) -> Self {
        Self::new(vec![response.to_string()])
    }
}

#[async_trait]
impl CompletionClient for MockCompletion {
    async fn complete(&self, _prompt: &str) -> Result<String, CompletionError> {
        if self.responses.is_empty() {
            return Err(CompletionError::Api("no scripted responses".to_string()));
        }
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
        Ok(self.responses[idx % self.responses.len()].clone())
    }
}

// ============================================================================
// HTTP Client (OpenAI-compatible chat endpoint)
// ============================================================================

#[cfg(feature = "llm")]
pub use http::{HttpCompletion, HttpConfig};

#[cfg(feature = "llm")]
mod http {
    use super::{CompletionClient, CompletionError};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Configuration for the HTTP completion client, loaded from the
    /// environment.
    #[derive(Debug, Clone)]
    pub struct HttpConfig {
        pub base_url: String,
        pub api_key: String,
        pub model: String,
        pub timeout_secs: u64,
    }

    impl HttpConfig {
        pub fn from_env() -> Result<Self, CompletionError> {
            let api_key = std::env::var("MINDER_LLM_API_KEY").map_err(|_| {
                CompletionError::Api("MINDER_LLM_API_KEY is not set".to_string())
            })?;
            Ok(Self {
                base_url: std::env::var("MINDER_LLM_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                api_key,
                model: std::env::var("MINDER_LLM_MODEL")
                    .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                timeout_secs: 60,
            })
        }
    }

    pub struct HttpCompletion {
        client: reqwest::Client,
        config: HttpConfig,
    }

    impl HttpCompletion {
        pub fn new(config: HttpConfig) -> Result<Self, CompletionError> {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .map_err(|e| CompletionError::Network(e.to_string()))?;
            Ok(Self { client, config })
        }

        pub fn from_env() -> Result<Self, CompletionError> {
            Self::new(HttpConfig::from_env()?)
        }
    }

    #[async_trait]
    impl CompletionClient for HttpCompletion {
        async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
            let url = format!("{}/chat/completions", self.config.base_url);
            let body = serde_json::json!({
                "model": self.config.model,
                "messages": [{"role": "user", "content": prompt}],
                "temperature": 0.2,
            });

            let response = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.config.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await
                .map_err(|e| CompletionError::Network(e.to_string()))?;

            if !response.status().is_success() {
                let error_text = response.text().await.unwrap_or_default();
                return Err(CompletionError::Api(error_text));
            }

            let data: serde_json::Value = response
                .json()
                .await
                .map_err(|e| CompletionError::InvalidResponse(e.to_string()))?;

            data["choices"][0]["message"]["content"]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| {
                    CompletionError::InvalidResponse("missing message content".to_string())
                })
        }
    }
}
