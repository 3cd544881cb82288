//! Training context: prior interactions flagged for reuse, spliced into a new
//! request as synthetic turns.

use std::sync::Arc;
use std::time::Duration;

use crate::conversation::Message;
use crate::store::{ConversationStore, InteractionFilter, InteractionRecord};

#[derive(Clone)]
pub struct TrainingContextRetriever {
    store: Arc<dyn ConversationStore>,
    timeout: Duration,
    limit: Option<u32>,
}

impl TrainingContextRetriever {
    pub fn new(store: Arc<dyn ConversationStore>, timeout: Duration, limit: Option<u32>) -> Self {
        Self {
            store,
            timeout,
            limit,
        }
    }

    /// Flagged interactions for the given identity. Never fails: any store
    /// error or timeout yields an empty list.
    pub async fn fetch(
        &self,
        user_id: Option<i64>,
        session_id: Option<&str>,
        conversation_id: Option<i64>,
    ) -> Vec<InteractionRecord> {
        let filter = InteractionFilter {
            user: user_id,
            session_id: session_id.map(str::to_string),
            conversation: conversation_id,
            include_in_training: Some(true),
            limit: self.limit,
        };

        match tokio::time::timeout(self.timeout, self.store.training_interactions(&filter)).await {
            Ok(Ok(records)) => records
                .into_iter()
                .filter(|r| r.include_in_training)
                .collect(),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "training context fetch failed");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "training context fetch timed out");
                Vec::new()
            }
        }
    }
}

/// Append one user/assistant pair per record after the existing context.
pub fn augment(context: &mut Vec<Message>, records: &[InteractionRecord]) {
    context.reserve(records.len() * 2);
    for record in records {
        context.push(Message::user(record.prompt.clone()));
        context.push(Message::assistant(record.response.clone()));
    }
}
