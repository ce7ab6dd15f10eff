//! Wire types for the local model runtime API.

use serde::{Deserialize, Serialize};

/// Message in a chat conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

/// Message role
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl ChatMessage {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
            images: None,
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            images: None,
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            images: None,
        }
    }

    /// Attach base64-encoded images (vision models).
    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = Some(images);
        self
    }
}

/// Request to the chat endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
}

/// Response from the chat endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub model: String,
    pub message: ChatMessage,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
}

/// Request to the generate endpoint
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

/// Response from the generate endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse {
    pub model: String,
    pub response: String,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
}

/// Request to the embeddings endpoint
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingsRequest {
    pub model: String,
    pub prompt: String,
}

/// Response from the embeddings endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsResponse {
    pub embedding: Vec<f64>,
}

/// One locally available model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default)]
    pub modified_at: Option<String>,
}

/// Response from the inventory endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct TagsResponse {
    #[serde(default)]
    pub models: Vec<ModelEntry>,
}

/// Request to the show/pull endpoints
#[derive(Debug, Clone, Serialize)]
pub struct NamedModelRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

/// Response from the pull endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct PullResponse {
    #[serde(default)]
    pub status: String,
}

/// Routing class for model selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskClass {
    Reasoning,
    Coding,
    Vision,
    Chat,
    Embedding,
    General,
}

impl TaskClass {
    /// All classes in a stable order.
    pub fn all() -> [TaskClass; 6] {
        [
            TaskClass::Reasoning,
            TaskClass::Coding,
            TaskClass::Vision,
            TaskClass::Chat,
            TaskClass::Embedding,
            TaskClass::General,
        ]
    }
}

impl std::fmt::Display for TaskClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskClass::Reasoning => "reasoning",
            TaskClass::Coding => "coding",
            TaskClass::Vision => "vision",
            TaskClass::Chat => "chat",
            TaskClass::Embedding => "embedding",
            TaskClass::General => "general",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for TaskClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reasoning" => Ok(TaskClass::Reasoning),
            "coding" => Ok(TaskClass::Coding),
            "vision" => Ok(TaskClass::Vision),
            "chat" => Ok(TaskClass::Chat),
            "embedding" => Ok(TaskClass::Embedding),
            "general" => Ok(TaskClass::General),
            other => Err(format!("unknown task class: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_constructors() {
        let msg = ChatMessage::system("be terse");
        assert!(matches!(msg.role, MessageRole::System));
        assert_eq!(msg.content, "be terse");
        assert!(msg.images.is_none());

        let msg = ChatMessage::user("hello").with_images(vec!["aGk=".into()]);
        assert_eq!(msg.images.unwrap().len(), 1);
    }

    #[test]
    fn test_task_class_round_trip() {
        for class in TaskClass::all() {
            let parsed: TaskClass = class.to_string().parse().unwrap();
            assert_eq!(parsed, class);
        }
        assert!("juggling".parse::<TaskClass>().is_err());
    }

    #[test]
    fn test_chat_request_serialization() {
        let request = ChatRequest {
            model: "llama3.1:8b".to_string(),
            messages: vec![ChatMessage::user("hi")],
            stream: false,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "llama3.1:8b");
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0]["role"], "user");
        // images omitted when absent
        assert!(json["messages"][0].get("images").is_none());
    }

    #[test]
    fn test_tags_response_deserialization() {
        let json = r#"{"models":[{"name":"llama3.1:8b","size":4920753328,"digest":"abc"}]}"#;
        let tags: TagsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(tags.models.len(), 1);
        assert_eq!(tags.models[0].name, "llama3.1:8b");
        assert_eq!(tags.models[0].size, Some(4920753328));
        assert!(tags.models[0].modified_at.is_none());
    }
}
