//! Inference server integrations

pub mod ollama;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

pub use ollama::OllamaProvider;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The server could not be reached or the transfer failed.
    #[error("{0}")]
    Unavailable(#[from] reqwest::Error),

    #[error("upstream returned {status}: {message}")]
    Status { status: StatusCode, message: String },

    /// An error reported inside an otherwise successful response.
    #[error("{0}")]
    Upstream(String),

    /// Nothing parseable could be extracted from the response body.
    #[error("Invalid response: {0}")]
    Malformed(String),
}

/// One non-streaming chat call carrying an already-flattened prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCall {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    pub num_predict: u32,
}

/// Text and token counters reassembled from a chat response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatReply {
    pub content: String,
    pub prompt_eval_count: Option<u32>,
    pub eval_count: Option<u32>,
}

#[async_trait]
pub trait InferenceProvider: Send + Sync {
    async fn chat(&self, call: &ChatCall) -> Result<ChatReply, ProviderError>;

    async fn list_models(&self) -> Result<Vec<String>, ProviderError>;

    /// Download a model. Returns the provider's final status document.
    async fn pull_model(&self, name: &str) -> Result<Value, ProviderError>;
}
