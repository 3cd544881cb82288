//! Best-effort interaction logging
//!
//! Delivery is at-most-once on a detached task; failures are reported through
//! `tracing` and never reach the caller.

use std::sync::Arc;
use std::time::Duration;

use crate::store::{ConversationStore, NewInteraction};

#[derive(Clone)]
pub struct InteractionLogger {
    store: Arc<dyn ConversationStore>,
    timeout: Duration,
}

impl InteractionLogger {
    pub fn new(store: Arc<dyn ConversationStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Queue `interaction` for delivery and return immediately.
    pub fn log(&self, interaction: NewInteraction) {
        let logger = self.clone();
        tokio::spawn(async move {
            logger.deliver(&interaction).await;
        });
    }

    /// Deliver one interaction, swallowing any failure.
    pub async fn deliver(&self, interaction: &NewInteraction) {
        match tokio::time::timeout(self.timeout, self.store.log_interaction(interaction)).await {
            Ok(Ok(())) => tracing::debug!(
                model = %interaction.model_name,
                conversation = ?interaction.conversation,
                "interaction logged"
            ),
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to log interaction"),
            Err(_) => tracing::warn!(timeout = ?self.timeout, "interaction logging timed out"),
        }
    }
}
