//! Test doubles shared across module tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::providers::{ChatCall, ChatReply, InferenceProvider, ProviderError};
use crate::store::{
    ConversationInfo, ConversationStore, InteractionFilter, InteractionRecord, NewConversation,
    NewInteraction, StoreError,
};

/// Serve `app` on an ephemeral localhost port and return its base URL.
pub async fn spawn_stub(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Inference provider returning a scripted reply and recording every call.
pub struct FakeProvider {
    reply: Mutex<Result<ChatReply, String>>,
    pub calls: Mutex<Vec<ChatCall>>,
    pub models: Vec<String>,
}

impl FakeProvider {
    pub fn replying(content: &str, prompt_tokens: u32, completion_tokens: u32) -> Arc<Self> {
        Arc::new(Self {
            reply: Mutex::new(Ok(ChatReply {
                content: content.to_string(),
                prompt_eval_count: Some(prompt_tokens),
                eval_count: Some(completion_tokens),
            })),
            calls: Mutex::new(Vec::new()),
            models: vec!["mistral:7b-instruct-q4".into()],
        })
    }

    /// Fails every chat call with an upstream-reported `message`.
    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Mutex::new(Err(message.to_string())),
            calls: Mutex::new(Vec::new()),
            models: Vec::new(),
        })
    }

    pub fn last_call(&self) -> ChatCall {
        self.calls.lock().unwrap().last().cloned().expect("no chat call recorded")
    }
}

#[async_trait]
impl InferenceProvider for FakeProvider {
    async fn chat(&self, call: &ChatCall) -> Result<ChatReply, ProviderError> {
        self.calls.lock().unwrap().push(call.clone());
        self.reply
            .lock()
            .unwrap()
            .clone()
            .map_err(ProviderError::Upstream)
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        Ok(self.models.clone())
    }

    async fn pull_model(&self, name: &str) -> Result<Value, ProviderError> {
        Ok(json!({"status": "success", "name": name}))
    }
}

/// Conversation store that keeps everything in memory and reports logged
/// interactions on a channel so tests can await background delivery.
pub struct RecordingStore {
    pub records: Vec<InteractionRecord>,
    pub fail: bool,
    pub created: Mutex<Vec<NewConversation>>,
    logged_tx: mpsc::UnboundedSender<NewInteraction>,
}

impl RecordingStore {
    pub fn new(records: Vec<InteractionRecord>) -> (Arc<Self>, mpsc::UnboundedReceiver<NewInteraction>) {
        let (logged_tx, logged_rx) = mpsc::unbounded_channel();
        let store = Arc::new(Self {
            records,
            fail: false,
            created: Mutex::new(Vec::new()),
            logged_tx,
        });
        (store, logged_rx)
    }

    /// Every operation fails with a status error.
    pub fn broken() -> (Arc<Self>, mpsc::UnboundedReceiver<NewInteraction>) {
        let (logged_tx, logged_rx) = mpsc::unbounded_channel();
        let store = Arc::new(Self {
            records: Vec::new(),
            fail: true,
            created: Mutex::new(Vec::new()),
            logged_tx,
        });
        (store, logged_rx)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail {
            Err(StoreError::Status(reqwest::StatusCode::SERVICE_UNAVAILABLE))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ConversationStore for RecordingStore {
    async fn create_conversation(
        &self,
        conversation: &NewConversation,
    ) -> Result<ConversationInfo, StoreError> {
        self.check()?;
        let mut created = self.created.lock().unwrap();
        created.push(conversation.clone());
        Ok(ConversationInfo {
            id: created.len() as i64,
            title: conversation.title.clone(),
            created_at: chrono::Utc::now(),
        })
    }

    async fn log_interaction(&self, interaction: &NewInteraction) -> Result<(), StoreError> {
        self.check()?;
        let _ = self.logged_tx.send(interaction.clone());
        Ok(())
    }

    async fn training_interactions(
        &self,
        _filter: &InteractionFilter,
    ) -> Result<Vec<InteractionRecord>, StoreError> {
        self.check()?;
        Ok(self
            .records
            .iter()
            .filter(|r| r.include_in_training)
            .cloned()
            .collect())
    }
}

/// A stored interaction with only the fields the orchestrator reads.
pub fn record(prompt: &str, response: &str, include_in_training: bool) -> InteractionRecord {
    InteractionRecord {
        prompt: prompt.into(),
        response: response.into(),
        include_in_training,
        ..InteractionRecord::default()
    }
}
