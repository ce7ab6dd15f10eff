//! HTTP client for the local model runtime.

use std::time::{Duration, Instant};

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::types::{
    ChatMessage, ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse,
    GenerateRequest, GenerateResponse, ModelEntry, NamedModelRequest, PullResponse, TagsResponse,
};
use crate::config::ModelConfig;
use crate::error::{ModelError, ModelResult};

/// Client for the local runtime's HTTP API.
///
/// Every call carries the configured deadline; transport-level failures are
/// retried with exponential backoff, API rejections are not.
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    timeout_ms: u64,
    max_retries: u32,
}

impl OllamaClient {
    /// Create a new runtime client
    pub fn new(config: &ModelConfig) -> ModelResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(ModelError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url().trim_end_matches('/').to_string(),
            timeout_ms: config.timeout_ms,
            max_retries: config.max_retries,
        })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Chat completion.
    pub async fn chat(&self, model: &str, messages: Vec<ChatMessage>) -> ModelResult<ChatResponse> {
        let request = ChatRequest {
            model: model.to_string(),
            messages,
            stream: false,
        };
        self.post_with_retry("/api/chat", &request, model).await
    }

    /// Plain completion.
    pub async fn generate(&self, model: &str, prompt: &str) -> ModelResult<GenerateResponse> {
        let request = GenerateRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
            stream: false,
            images: None,
        };
        self.post_with_retry("/api/generate", &request, model).await
    }

    /// Completion over an image (vision models).
    pub async fn generate_with_image(
        &self,
        model: &str,
        prompt: &str,
        image_base64: &str,
    ) -> ModelResult<GenerateResponse> {
        let request = GenerateRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
            stream: false,
            images: Some(vec![image_base64.to_string()]),
        };
        self.post_with_retry("/api/generate", &request, model).await
    }

    /// Embedding vector for a text.
    pub async fn embed(&self, model: &str, text: &str) -> ModelResult<Vec<f64>> {
        let request = EmbeddingsRequest {
            model: model.to_string(),
            prompt: text.to_string(),
        };
        let response: EmbeddingsResponse =
            self.post_with_retry("/api/embeddings", &request, model).await?;
        Ok(response.embedding)
    }

    /// Locally available models.
    pub async fn list_models(&self) -> ModelResult<Vec<ModelEntry>> {
        let url = format!("{}/api/tags", self.base_url);
        let mut attempt = 0;
        loop {
            match self.get_once::<TagsResponse>(&url).await {
                Ok(tags) => return Ok(tags.models),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    self.backoff(attempt, "list_models", &e).await;
                }
                Err(e) if e.is_retryable() => {
                    return Err(ModelError::Unavailable {
                        message: e.to_string(),
                        retries: attempt,
                    })
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Details of one model.
    pub async fn show(&self, model: &str) -> ModelResult<serde_json::Value> {
        let request = NamedModelRequest {
            name: model.to_string(),
            stream: None,
        };
        self.post_with_retry("/api/show", &request, model).await
    }

    /// Pull a model from the registry; idempotent on models already present.
    pub async fn pull(&self, model: &str) -> ModelResult<PullResponse> {
        let request = NamedModelRequest {
            name: model.to_string(),
            stream: Some(false),
        };
        self.post_with_retry("/api/pull", &request, model).await
    }

    async fn post_with_retry<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        model: &str,
    ) -> ModelResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0;

        loop {
            let start = Instant::now();
            match self.post_once(&url, body, model).await {
                Ok(response) => {
                    info!(
                        model = %model,
                        path = %path,
                        latency_ms = start.elapsed().as_millis() as u64,
                        "Runtime call succeeded"
                    );
                    return Ok(response);
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    self.backoff(attempt, path, &e).await;
                }
                Err(e) if e.is_retryable() => {
                    error!(model = %model, path = %path, error = %e, retries = attempt, "Runtime exhausted retries");
                    return Err(ModelError::Unavailable {
                        message: e.to_string(),
                        retries: attempt,
                    });
                }
                Err(e) => {
                    error!(model = %model, path = %path, error = %e, "Runtime call failed");
                    return Err(e);
                }
            }
        }
    }

    async fn post_once<B: Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
        model: &str,
    ) -> ModelResult<T> {
        debug!(url = %url, model = %model, "Calling model runtime");

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            if status.as_u16() == 404 {
                return Err(ModelError::NotFound {
                    model: model.to_string(),
                });
            }
            return Err(ModelError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse {
                message: format!("failed to parse response: {}", e),
            })
    }

    async fn get_once<T: DeserializeOwned>(&self, url: &str) -> ModelResult<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse {
                message: format!("failed to parse response: {}", e),
            })
    }

    fn map_send_error(&self, e: reqwest::Error) -> ModelError {
        if e.is_timeout() {
            ModelError::Timeout {
                timeout_ms: self.timeout_ms,
            }
        } else {
            ModelError::Http(e)
        }
    }

    async fn backoff(&self, attempt: u32, context: &str, error: &ModelError) {
        let delay = Duration::from_secs(1u64 << (attempt - 1).min(6));
        warn!(
            context = %context,
            retry = attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying runtime request"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelDefaults;

    fn test_config() -> ModelConfig {
        ModelConfig {
            host: "localhost".to_string(),
            port: 11434,
            timeout_ms: 120_000,
            max_retries: 3,
            inventory_ttl_secs: 300,
            defaults: ModelDefaults {
                reasoning: "qwq:32b".into(),
                coding: "qwen2.5-coder:14b".into(),
                vision: "llama3.2-vision".into(),
                chat: "llama3.1:8b".into(),
                embedding: "nomic-embed-text".into(),
                general: "llama3.1:8b".into(),
                fallback: "llama3.1:8b".into(),
            },
        }
    }

    #[test]
    fn test_client_creation() {
        let client = OllamaClient::new(&test_config());
        assert!(client.is_ok());
        assert_eq!(client.unwrap().base_url(), "http://localhost:11434");
    }

    #[test]
    fn test_backoff_delays_are_exponential() {
        // delays are 2^(attempt-1) seconds, capped at 64s
        assert_eq!(1u64 << 0, 1);
        assert_eq!(1u64 << 1, 2);
        assert_eq!(1u64 << 2, 4);
        assert_eq!(1u64 << 6, 64);
    }
}
