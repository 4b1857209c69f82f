pub mod embeddings;
pub mod intent;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{ChatTurn, Role};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    /// Ask the provider to constrain output to a JSON object.
    pub json_mode: bool,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ChatRequest {
    /// Deterministic JSON completion, the only kind the agent issues.
    pub fn json(messages: Vec<Message>, max_tokens: u32) -> Self {
        Self {
            messages,
            json_mode: true,
            temperature: 0.0,
            max_tokens,
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> anyhow::Result<String>;
}

/// Chat history as sent to the model; marker turns stay local.
pub fn history_messages(history: &[ChatTurn]) -> Vec<Message> {
    history
        .iter()
        .filter(|t| t.role != Role::Marker)
        .map(|t| Message::new(t.role.as_str(), t.content.clone()))
        .collect()
}
