//! Task-class routing over the local model runtime.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::client::OllamaClient;
use super::types::{ChatMessage, ModelEntry, TaskClass};
use crate::config::ModelConfig;
use crate::error::{ModelError, ModelResult};

/// Optional overrides for a routed call.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    /// Explicit model name, bypassing the class table.
    pub model: Option<String>,
    /// System prompt prepended to the conversation.
    pub system: Option<String>,
}

/// Result of a routed model call.
#[derive(Debug, Clone, Serialize)]
pub struct RouteOutcome {
    pub model: String,
    pub response: String,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_eval_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u64>,
    /// Set when the primary model was unavailable and the fallback ran.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub model_downgraded: bool,
}

struct InventoryCache {
    entries: Vec<ModelEntry>,
    fetched_at: Option<Instant>,
}

/// Routes task classes onto available models with fallback substitution.
///
/// The inventory cache is the only shared state: refresh holds the mutex,
/// readers clone a snapshot.
pub struct ModelRouter {
    client: OllamaClient,
    defaults: Mutex<HashMap<TaskClass, String>>,
    fallback: String,
    inventory: Mutex<InventoryCache>,
    inventory_ttl: Duration,
}

impl ModelRouter {
    /// Build a router from configuration.
    pub fn new(client: OllamaClient, config: &ModelConfig) -> Self {
        let mut defaults = HashMap::new();
        defaults.insert(TaskClass::Reasoning, config.defaults.reasoning.clone());
        defaults.insert(TaskClass::Coding, config.defaults.coding.clone());
        defaults.insert(TaskClass::Vision, config.defaults.vision.clone());
        defaults.insert(TaskClass::Chat, config.defaults.chat.clone());
        defaults.insert(TaskClass::Embedding, config.defaults.embedding.clone());
        defaults.insert(TaskClass::General, config.defaults.general.clone());

        Self {
            client,
            defaults: Mutex::new(defaults),
            fallback: config.defaults.fallback.clone(),
            inventory: Mutex::new(InventoryCache {
                entries: Vec::new(),
                fetched_at: None,
            }),
            inventory_ttl: Duration::from_secs(config.inventory_ttl_secs),
        }
    }

    /// Access the underlying client.
    pub fn client(&self) -> &OllamaClient {
        &self.client
    }

    /// The shared fallback model name.
    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// Route a prompt to the model configured for `class`.
    pub async fn route(
        &self,
        class: TaskClass,
        prompt: &str,
        opts: RouteOptions,
    ) -> ModelResult<RouteOutcome> {
        let (model, downgraded) = self.select_model(class, opts.model.as_deref()).await?;
        let start = Instant::now();

        let mut messages = Vec::new();
        if let Some(system) = &opts.system {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(prompt));

        let response = self.client.chat(&model, messages).await?;
        let outcome = RouteOutcome {
            model: response.model,
            response: response.message.content,
            duration_ms: start.elapsed().as_millis() as u64,
            prompt_eval_count: response.prompt_eval_count,
            eval_count: response.eval_count,
            model_downgraded: downgraded,
        };
        info!(
            class = %class,
            model = %outcome.model,
            duration_ms = outcome.duration_ms,
            downgraded = outcome.model_downgraded,
            "Routed model call completed"
        );
        Ok(outcome)
    }

    /// Chat with explicit messages.
    pub async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        model: Option<&str>,
    ) -> ModelResult<RouteOutcome> {
        let (model, downgraded) = self.select_model(TaskClass::Chat, model).await?;
        let start = Instant::now();
        let response = self.client.chat(&model, messages).await?;
        Ok(RouteOutcome {
            model: response.model,
            response: response.message.content,
            duration_ms: start.elapsed().as_millis() as u64,
            prompt_eval_count: response.prompt_eval_count,
            eval_count: response.eval_count,
            model_downgraded: downgraded,
        })
    }

    /// Embedding vector for a text.
    pub async fn embed(&self, text: &str, model: Option<&str>) -> ModelResult<(String, Vec<f64>)> {
        let (model, _) = self.select_model(TaskClass::Embedding, model).await?;
        let embedding = self.client.embed(&model, text).await?;
        Ok((model, embedding))
    }

    /// Describe an image with a vision model.
    pub async fn vision(
        &self,
        image_base64: &str,
        prompt: &str,
        model: Option<&str>,
    ) -> ModelResult<RouteOutcome> {
        let (model, downgraded) = self.select_model(TaskClass::Vision, model).await?;
        let start = Instant::now();
        let response = self
            .client
            .generate_with_image(&model, prompt, image_base64)
            .await?;
        Ok(RouteOutcome {
            model: response.model,
            response: response.response,
            duration_ms: start.elapsed().as_millis() as u64,
            prompt_eval_count: response.prompt_eval_count,
            eval_count: response.eval_count,
            model_downgraded: downgraded,
        })
    }

    /// Inventory snapshot, refreshed when stale or forced.
    pub async fn list(&self, force_refresh: bool) -> ModelResult<Vec<ModelEntry>> {
        let mut cache = self.inventory.lock().await;
        let stale = match cache.fetched_at {
            Some(at) => at.elapsed() >= self.inventory_ttl,
            None => true,
        };
        if stale || force_refresh {
            let entries = self.client.list_models().await?;
            debug!(models = entries.len(), "Model inventory refreshed");
            cache.entries = entries;
            cache.fetched_at = Some(Instant::now());
        }
        Ok(cache.entries.clone())
    }

    /// Details of one model.
    pub async fn info(&self, model: &str) -> ModelResult<serde_json::Value> {
        self.client.show(model).await
    }

    /// Pull a model; on success the inventory is refreshed.
    pub async fn pull(&self, model: &str) -> ModelResult<String> {
        let response = self.client.pull(model).await?;
        let _ = self.list(true).await;
        Ok(response.status)
    }

    /// Override the default model for a class in this process.
    pub async fn set_default(&self, class: TaskClass, model: &str) {
        let mut defaults = self.defaults.lock().await;
        info!(class = %class, model = %model, "Default model overridden");
        defaults.insert(class, model.to_string());
    }

    /// Current default for a class.
    pub async fn default_for(&self, class: TaskClass) -> Option<String> {
        self.defaults.lock().await.get(&class).cloned()
    }

    /// Seed the inventory cache directly (tests and warm starts).
    pub async fn seed_inventory(&self, entries: Vec<ModelEntry>) {
        let mut cache = self.inventory.lock().await;
        cache.entries = entries;
        cache.fetched_at = Some(Instant::now());
    }

    /// Pick the model for a call: explicit override, then the class table,
    /// then the shared fallback when the candidate is not in the inventory.
    ///
    /// Returns `(model, downgraded)`.
    pub async fn select_model(
        &self,
        class: TaskClass,
        explicit: Option<&str>,
    ) -> ModelResult<(String, bool)> {
        let candidate = match explicit {
            Some(model) => model.to_string(),
            None => self
                .default_for(class)
                .await
                .unwrap_or_else(|| self.fallback.clone()),
        };

        let inventory = self.list(false).await?;
        if inventory.iter().any(|m| m.name == candidate) {
            return Ok((candidate, false));
        }

        if candidate != self.fallback && inventory.iter().any(|m| m.name == self.fallback) {
            warn!(
                class = %class,
                requested = %candidate,
                fallback = %self.fallback,
                "model_downgraded: primary unavailable"
            );
            return Ok((self.fallback.clone(), true));
        }

        Err(ModelError::Unavailable {
            message: format!(
                "neither {} nor fallback {} is available",
                candidate, self.fallback
            ),
            retries: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelDefaults;

    fn router_with_inventory() -> ModelRouter {
        let config = ModelConfig {
            host: "localhost".to_string(),
            port: 11434,
            timeout_ms: 1000,
            max_retries: 3,
            inventory_ttl_secs: 300,
            defaults: ModelDefaults {
                reasoning: "qwq-reasoning".into(),
                coding: "coder".into(),
                vision: "vision".into(),
                chat: "chatter".into(),
                embedding: "embedder".into(),
                general: "generalist".into(),
                fallback: "llama-fallback".into(),
            },
        };
        let client = OllamaClient::new(&config).unwrap();
        ModelRouter::new(client, &config)
    }

    fn entry(name: &str) -> ModelEntry {
        ModelEntry {
            name: name.to_string(),
            size: None,
            digest: None,
            modified_at: None,
        }
    }

    #[tokio::test]
    async fn test_select_primary_when_available() {
        let router = router_with_inventory();
        router
            .seed_inventory(vec![entry("qwq-reasoning"), entry("llama-fallback")])
            .await;

        let (model, downgraded) = router
            .select_model(TaskClass::Reasoning, None)
            .await
            .unwrap();
        assert_eq!(model, "qwq-reasoning");
        assert!(!downgraded);
    }

    #[tokio::test]
    async fn test_select_fallback_when_primary_missing() {
        let router = router_with_inventory();
        router.seed_inventory(vec![entry("llama-fallback")]).await;

        let (model, downgraded) = router
            .select_model(TaskClass::Reasoning, None)
            .await
            .unwrap();
        assert_eq!(model, "llama-fallback");
        assert!(downgraded);
    }

    #[tokio::test]
    async fn test_select_fails_when_both_missing() {
        let router = router_with_inventory();
        router.seed_inventory(vec![entry("unrelated")]).await;

        let err = router
            .select_model(TaskClass::Reasoning, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_explicit_model_bypasses_class_table() {
        let router = router_with_inventory();
        router.seed_inventory(vec![entry("custom"), entry("llama-fallback")]).await;

        let (model, downgraded) = router
            .select_model(TaskClass::Reasoning, Some("custom"))
            .await
            .unwrap();
        assert_eq!(model, "custom");
        assert!(!downgraded);
    }

    #[tokio::test]
    async fn test_set_default_overrides_class() {
        let router = router_with_inventory();
        router.set_default(TaskClass::Reasoning, "new-reasoner").await;
        assert_eq!(
            router.default_for(TaskClass::Reasoning).await.unwrap(),
            "new-reasoner"
        );
    }

    #[test]
    fn test_route_outcome_serialization_omits_defaults() {
        let outcome = RouteOutcome {
            model: "llama-fallback".into(),
            response: "hi".into(),
            duration_ms: 10,
            prompt_eval_count: None,
            eval_count: None,
            model_downgraded: false,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert!(json.get("model_downgraded").is_none());
        assert!(json.get("prompt_eval_count").is_none());

        let outcome = RouteOutcome {
            model_downgraded: true,
            ..outcome
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["model_downgraded"], true);
    }
}
