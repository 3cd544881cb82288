//! Conversation store reached over HTTP

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use super::{
    ConversationInfo, ConversationStore, InteractionFilter, InteractionRecord, NewConversation,
    NewInteraction, StoreError,
};

pub struct HttpConversationStore {
    client: Client,
    base_url: String,
    timeout: Duration,
}

/// The list endpoint answers with either a bare array or a paginated page.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RecordList {
    Plain(Vec<InteractionRecord>),
    Paged { results: Vec<InteractionRecord> },
}

impl RecordList {
    fn into_records(self) -> Vec<InteractionRecord> {
        match self {
            RecordList::Plain(records) | RecordList::Paged { results: records } => records,
        }
    }
}

impl HttpConversationStore {
    /// `base_url` includes the store's route prefix, e.g. `http://admin:8001/chat`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

fn ensure_success(response: Response) -> Result<Response, StoreError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(StoreError::Status(response.status()))
    }
}

#[async_trait]
impl ConversationStore for HttpConversationStore {
    async fn create_conversation(
        &self,
        conversation: &NewConversation,
    ) -> Result<ConversationInfo, StoreError> {
        let response = self
            .client
            .post(self.url("conversations/create/"))
            .timeout(self.timeout)
            .json(conversation)
            .send()
            .await?;

        if response.status() != StatusCode::CREATED {
            return Err(StoreError::Status(response.status()));
        }
        Ok(response.json().await?)
    }

    async fn log_interaction(&self, interaction: &NewInteraction) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.url("llm-interactions/log/"))
            .timeout(self.timeout)
            .json(interaction)
            .send()
            .await?;

        ensure_success(response)?;
        Ok(())
    }

    async fn training_interactions(
        &self,
        filter: &InteractionFilter,
    ) -> Result<Vec<InteractionRecord>, StoreError> {
        let mut query = InteractionFilter {
            include_in_training: Some(true),
            ..filter.clone()
        }
        .query_pairs();
        if let Some(limit) = filter.limit {
            query.push(("limit", limit.to_string()));
        }

        let response = self
            .client
            .get(self.url("llm-interactions/log/"))
            .timeout(self.timeout)
            .query(&query)
            .send()
            .await?;

        let list: RecordList = ensure_success(response)?.json().await?;

        // Remote stores are not trusted to honour the training flag.
        let mut records: Vec<InteractionRecord> = list
            .into_records()
            .into_iter()
            .filter(|r| r.include_in_training)
            .collect();
        if let Some(limit) = filter.limit {
            records.truncate(limit as usize);
        }
        Ok(records)
    }
}
