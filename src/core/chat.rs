//! Chat engine: the response orchestrator
//!
//! For every generation the ChatEngine:
//! 1. Resolves default model parameters
//! 2. Runs the advisory memory check
//! 3. Splices in training context when asked to
//! 4. Calls the inference client
//! 5. Hands the exchange to the interaction logger without waiting on it
//!
//! Only generation failures reach the caller.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{prompts, Config};
use crate::conversation::{GenerationRequest, GenerationResult};
use crate::providers::{InferenceProvider, ProviderError};
use crate::store::{ConversationInfo, ConversationStore, NewConversation, NewInteraction, StoreError};

use super::inference::InferenceClient;
use super::logger::InteractionLogger;
use super::resources::ResourceMonitor;
use super::training::{augment, TrainingContextRetriever};

/// Upstream message Ollama uses when a model does not fit in memory.
const OUT_OF_MEMORY_MARKER: &str = "model requires more system memory";

/// Title given to conversations opened by the duplex channel.
const CHANNEL_CONVERSATION_TITLE: &str = "Web Chat";

/// Errors from the chat engine
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Error communicating with Ollama: {source}{}", hint_suffix(.hint))]
    Generation {
        source: ProviderError,
        hint: Option<String>,
    },

    #[error("Error listing models: {0}")]
    ListModels(ProviderError),

    #[error("Error pulling model: {0}")]
    PullModel(ProviderError),
}

fn hint_suffix(hint: &Option<String>) -> String {
    hint.as_ref().map(|h| format!("\n{h}")).unwrap_or_default()
}

impl ChatError {
    fn generation(source: ProviderError, smaller_model: &str) -> Self {
        let hint = source
            .to_string()
            .contains(OUT_OF_MEMORY_MARKER)
            .then(|| format!("Try using a smaller model like '{smaller_model}'"));
        ChatError::Generation { source, hint }
    }
}

/// Inference server status as reported by the health endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub ollama_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model_available: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// The core chat engine
pub struct ChatEngine {
    inference: InferenceClient,
    training: TrainingContextRetriever,
    logger: InteractionLogger,
    resources: ResourceMonitor,
    store: Arc<dyn ConversationStore>,
    telemetry_timeout: Duration,
}

impl ChatEngine {
    pub fn new(
        config: &Config,
        provider: Arc<dyn InferenceProvider>,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        let telemetry_timeout = config.timeouts.telemetry();
        Self {
            inference: InferenceClient::new(provider, config.generation.clone()),
            training: TrainingContextRetriever::new(
                store.clone(),
                telemetry_timeout,
                config.store.training_context_limit,
            ),
            logger: InteractionLogger::new(store.clone(), telemetry_timeout),
            resources: ResourceMonitor::new(config.memory.clone()),
            store,
            telemetry_timeout,
        }
    }

    pub fn default_model(&self) -> &str {
        &self.inference.defaults().model
    }

    /// Generate a response and log the exchange
    pub async fn generate(
        &self,
        mut request: GenerationRequest,
    ) -> Result<GenerationResult, ChatError> {
        let params = self.inference.defaults().resolve(&request);
        self.resources.check(&params.model);

        if request.use_training_context {
            let records = self
                .training
                .fetch(
                    request.user_id,
                    request.session_id.as_deref(),
                    request.conversation_id,
                )
                .await;
            if !records.is_empty() {
                tracing::debug!(count = records.len(), "splicing training context");
                augment(request.context.get_or_insert_with(Vec::new), &records);
            }
        }

        let result = match self.inference.generate(&request).await {
            Ok(result) => result,
            Err(source) => {
                let err = ChatError::generation(source, &self.inference.defaults().smaller_model_hint);
                tracing::error!(model = %params.model, error = %err, "generation failed");
                return Err(err);
            }
        };

        tracing::info!(
            model = %result.model,
            session_id = ?request.session_id,
            conversation_id = ?request.conversation_id,
            total_tokens = result.usage.total_tokens,
            "generation complete"
        );

        self.logger.log(NewInteraction {
            prompt: request.prompt,
            response: result.content.clone(),
            model_name: result.model.clone(),
            temperature: params.temperature,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            context: request.context,
            retrieved_documents: None,
            streamed: false,
            session_id: request.session_id,
            user: request.user_id,
            conversation: request.conversation_id,
        });

        Ok(result)
    }

    /// Ask the model to grade a prior response
    pub async fn evaluate(
        &self,
        prompt: &str,
        response: &str,
        criteria: Option<BTreeMap<String, String>>,
    ) -> Result<GenerationResult, ChatError> {
        let criteria = criteria
            .filter(|c| !c.is_empty())
            .unwrap_or_else(prompts::default_criteria);

        self.generate(GenerationRequest {
            prompt: prompts::evaluation_prompt(prompt, response, &criteria),
            system_prompt: Some(prompts::EVALUATOR.to_string()),
            temperature: Some(prompts::EVALUATOR_TEMPERATURE),
            ..Default::default()
        })
        .await
    }

    pub async fn list_models(&self) -> Result<Vec<String>, ChatError> {
        self.inference
            .provider()
            .list_models()
            .await
            .map_err(ChatError::ListModels)
    }

    pub async fn pull_model(&self, name: &str) -> Result<Value, ChatError> {
        tracing::info!(model = name, "pulling model");
        self.inference
            .provider()
            .pull_model(name)
            .await
            .map_err(ChatError::PullModel)
    }

    pub async fn health(&self) -> HealthReport {
        match self.inference.provider().list_models().await {
            Ok(models) => HealthReport {
                status: "healthy".into(),
                ollama_status: "connected".into(),
                default_model_available: Some(models.iter().any(|m| m == self.default_model())),
                default_model: Some(self.default_model().to_string()),
                error: None,
            },
            Err(e) => HealthReport {
                status: "unhealthy".into(),
                ollama_status: "disconnected".into(),
                default_model_available: None,
                default_model: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Pull the default model if the inference server lacks it. Never fails;
    /// problems are logged and left for the health endpoint to report.
    pub async fn ensure_default_model(&self) {
        let report = self.health().await;
        if !report.is_healthy() {
            tracing::warn!(error = ?report.error, "inference server unreachable at startup");
            return;
        }
        if report.default_model_available == Some(true) {
            tracing::info!(model = self.default_model(), "default model available");
            return;
        }

        match self.pull_model(self.default_model()).await {
            Ok(_) => tracing::info!(model = self.default_model(), "default model pulled"),
            Err(e) => tracing::warn!(error = %e, "startup model pull failed"),
        }
    }

    /// Open a conversation record for a duplex channel
    pub async fn open_conversation(
        &self,
        session_id: &str,
        user_id: Option<i64>,
    ) -> Result<ConversationInfo, StoreError> {
        let request = NewConversation {
            title: CHANNEL_CONVERSATION_TITLE.to_string(),
            session_id: Some(session_id.to_string()),
            user_id,
        };
        tokio::time::timeout(self.telemetry_timeout, self.store.create_conversation(&request))
            .await
            .map_err(|_| StoreError::Timeout)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timeouts;
    use crate::conversation::{Message, Usage};
    use crate::providers::OllamaProvider;
    use crate::testing::{record, FakeProvider, RecordingStore};

    fn engine(provider: Arc<dyn InferenceProvider>, store: Arc<dyn ConversationStore>) -> ChatEngine {
        ChatEngine::new(&Config::default(), provider, store)
    }

    #[tokio::test]
    async fn test_generate_with_defaults() {
        let provider = FakeProvider::replying("2+2 is 4.", 9, 5);
        let (store, mut logged) = RecordingStore::new(Vec::new());
        let engine = engine(provider, store);

        let result = engine.generate(GenerationRequest::new("What is 2+2?")).await.unwrap();
        assert!(!result.content.is_empty());
        assert_eq!(result.model, "mistral:7b-instruct-q4");
        assert_eq!(result.usage, Usage::new(9, 5));

        let entry = tokio::time::timeout(Duration::from_secs(1), logged.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.prompt, "What is 2+2?");
        assert_eq!(entry.response, "2+2 is 4.");
        assert_eq!(entry.model_name, "mistral:7b-instruct-q4");
        assert!(entry.context.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_not_logged() {
        let provider = Arc::new(OllamaProvider::new("http://127.0.0.1:9", &Timeouts::default()));
        let (store, mut logged) = RecordingStore::new(Vec::new());
        let engine = engine(provider, store);

        let err = engine.generate(GenerationRequest::new("hi")).await.unwrap_err();
        assert!(err.to_string().contains("Error communicating"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(logged.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_training_context_spliced_before_prompt() {
        let provider = FakeProvider::replying("ok", 1, 1);
        let (store, mut logged) = RecordingStore::new(vec![record("P", "R", true)]);
        let engine = engine(provider.clone(), store);

        let mut request = GenerationRequest::new("next");
        request.context = Some(vec![Message::user("earlier")]);
        request.use_training_context = true;
        engine.generate(request).await.unwrap();

        assert_eq!(
            provider.last_call().prompt,
            "User: earlier\nUser: P\nAssistant: R\nUser: next"
        );

        let entry = logged.recv().await.unwrap();
        assert_eq!(
            entry.context.unwrap(),
            vec![
                Message::user("earlier"),
                Message::user("P"),
                Message::assistant("R"),
            ]
        );
    }

    #[tokio::test]
    async fn test_training_context_off_by_default() {
        let provider = FakeProvider::replying("ok", 1, 1);
        let (store, _logged) = RecordingStore::new(vec![record("P", "R", true)]);
        let engine = engine(provider.clone(), store);

        engine.generate(GenerationRequest::new("next")).await.unwrap();
        assert_eq!(provider.last_call().prompt, "User: next");
    }

    #[tokio::test]
    async fn test_no_training_records_leaves_context_untouched() {
        let provider = FakeProvider::replying("ok", 1, 1);
        let (store, mut logged) = RecordingStore::new(vec![record("P", "R", false)]);
        let engine = engine(provider.clone(), store);

        let mut request = GenerationRequest::new("next");
        request.use_training_context = true;
        engine.generate(request).await.unwrap();

        assert_eq!(provider.last_call().prompt, "User: next");
        assert!(logged.recv().await.unwrap().context.is_none());
    }

    #[tokio::test]
    async fn test_broken_store_does_not_fail_generation() {
        let provider = FakeProvider::replying("still here", 2, 2);
        let (store, _logged) = RecordingStore::broken();
        let engine = engine(provider, store);

        let mut request = GenerationRequest::new("hi");
        request.use_training_context = true;
        let result = engine.generate(request).await;

        tokio_test::assert_ok!(&result);
        assert_eq!(result.unwrap().content, "still here");
    }

    #[tokio::test]
    async fn test_out_of_memory_adds_hint() {
        let provider = FakeProvider::failing("model requires more system memory (9.1 GiB) than is available");
        let (store, _logged) = RecordingStore::new(Vec::new());
        let engine = engine(provider, store);

        let message = engine
            .generate(GenerationRequest::new("hi"))
            .await
            .unwrap_err()
            .to_string();
        assert!(message.starts_with("Error communicating with Ollama: "));
        assert!(message.contains("Try using a smaller model like 'mistral:7b-instruct-q4'"));
    }

    #[tokio::test]
    async fn test_other_failures_have_no_hint() {
        let provider = FakeProvider::failing("model not found");
        let (store, _logged) = RecordingStore::new(Vec::new());
        let engine = engine(provider, store);

        let message = engine
            .generate(GenerationRequest::new("hi"))
            .await
            .unwrap_err()
            .to_string();
        assert_eq!(message, "Error communicating with Ollama: model not found");
    }

    #[tokio::test]
    async fn test_evaluate_uses_evaluator_settings() {
        let provider = FakeProvider::replying("{\"scores\": {}}", 1, 1);
        let (store, _logged) = RecordingStore::new(Vec::new());
        let engine = engine(provider.clone(), store);

        engine.evaluate("What is 2+2?", "4", None).await.unwrap();

        let call = provider.last_call();
        assert!((call.temperature - 0.3).abs() < f32::EPSILON);
        assert!(call.prompt.starts_with("System: You are an expert AI evaluator."));
        assert!(call.prompt.contains("- clarity:"));
    }

    #[tokio::test]
    async fn test_health_reports_default_model() {
        let provider = FakeProvider::replying("", 0, 0);
        let (store, _logged) = RecordingStore::new(Vec::new());
        let engine = engine(provider, store);

        let report = engine.health().await;
        assert!(report.is_healthy());
        assert_eq!(report.default_model_available, Some(true));
    }

    #[tokio::test]
    async fn test_health_unreachable() {
        let provider = Arc::new(OllamaProvider::new("http://127.0.0.1:9", &Timeouts::default()));
        let (store, _logged) = RecordingStore::new(Vec::new());
        let engine = engine(provider, store);

        let report = engine.health().await;
        assert_eq!(report.status, "unhealthy");
        assert_eq!(report.ollama_status, "disconnected");
        assert!(report.error.is_some());
    }
}
