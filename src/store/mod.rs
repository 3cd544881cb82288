//! Conversation store
//!
//! Persists conversations and prompt/response interaction records. The
//! orchestrator only ever talks to the [`ConversationStore`] trait; the
//! backend is either a remote HTTP service or an embedded SQLite database.

pub mod remote;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conversation::Message;

pub use remote::HttpConversationStore;
pub use sqlite::SqliteConversationStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("store returned {0}")]
    Status(StatusCode),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store call timed out")]
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewConversation {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<i64>,
}

impl NewConversation {
    /// The given title, else one derived from the session id.
    pub fn resolved_title(&self) -> String {
        if !self.title.trim().is_empty() {
            return self.title.clone();
        }
        match &self.session_id {
            Some(session_id) => format!("Session {session_id}"),
            None => "Untitled".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationInfo {
    pub id: i64,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: i64,
    pub title: String,
    pub session_id: Option<String>,
    pub user_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload logged after every generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInteraction {
    pub prompt: String,
    pub response: String,
    pub model_name: String,
    pub temperature: f32,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
    #[serde(default)]
    pub context: Option<Vec<Message>>,
    #[serde(default)]
    pub retrieved_documents: Option<Value>,
    #[serde(default)]
    pub streamed: bool,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user: Option<i64>,
    #[serde(default)]
    pub conversation: Option<i64>,
}

/// An interaction as held by the store, including human feedback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRecord {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub user: Option<i64>,
    #[serde(default)]
    pub conversation: Option<i64>,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub context: Option<Value>,
    #[serde(default)]
    pub retrieved_documents: Option<Value>,
    #[serde(default)]
    pub streamed: bool,
    #[serde(default)]
    pub rating: Option<i64>,
    #[serde(default)]
    pub thumbs_up: Option<bool>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub feedback_comment: Option<String>,
    #[serde(default)]
    pub include_in_training: bool,
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for InteractionRecord {
    fn default() -> Self {
        Self {
            id: 0,
            user: None,
            conversation: None,
            prompt: String::new(),
            response: String::new(),
            model_name: String::new(),
            temperature: default_temperature(),
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            timestamp: None,
            context: None,
            retrieved_documents: None,
            streamed: false,
            rating: None,
            thumbs_up: None,
            comment: None,
            session_id: None,
            score: None,
            feedback_comment: None,
            include_in_training: false,
        }
    }
}

/// Human feedback on a stored interaction. Unset fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InteractionFeedback {
    #[serde(default)]
    pub rating: Option<i64>,
    #[serde(default)]
    pub thumbs_up: Option<bool>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub feedback_comment: Option<String>,
    #[serde(default)]
    pub include_in_training: Option<bool>,
}

/// Selection of stored interactions. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionFilter {
    #[serde(default)]
    pub user: Option<i64>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub conversation: Option<i64>,
    #[serde(default)]
    pub include_in_training: Option<bool>,
    #[serde(default)]
    pub limit: Option<u32>,
}

impl InteractionFilter {
    /// Query-string pairs for the store's list endpoint.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(user) = self.user {
            pairs.push(("user", user.to_string()));
        }
        if let Some(session_id) = &self.session_id {
            pairs.push(("session_id", session_id.clone()));
        }
        if let Some(conversation) = self.conversation {
            pairs.push(("conversation", conversation.to_string()));
        }
        if let Some(include) = self.include_in_training {
            pairs.push(("include_in_training", include.to_string()));
        }
        pairs
    }
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(
        &self,
        conversation: &NewConversation,
    ) -> Result<ConversationInfo, StoreError>;

    async fn log_interaction(&self, interaction: &NewInteraction) -> Result<(), StoreError>;

    /// Interactions flagged `include_in_training` that match `filter`,
    /// in the store's order.
    async fn training_interactions(
        &self,
        filter: &InteractionFilter,
    ) -> Result<Vec<InteractionRecord>, StoreError>;
}
