//! Inference client: default resolution, prompt flattening and result shaping
//! around an [`InferenceProvider`].

use std::sync::Arc;

use crate::config::prompts::FALLBACK_RESPONSE;
use crate::config::GenerationDefaults;
use crate::conversation::{GenerationRequest, GenerationResult, Usage};
use crate::providers::{ChatCall, InferenceProvider, ProviderError};

use super::prompt::flatten_prompt;

#[derive(Clone)]
pub struct InferenceClient {
    provider: Arc<dyn InferenceProvider>,
    defaults: GenerationDefaults,
}

impl InferenceClient {
    pub fn new(provider: Arc<dyn InferenceProvider>, defaults: GenerationDefaults) -> Self {
        Self { provider, defaults }
    }

    pub fn defaults(&self) -> &GenerationDefaults {
        &self.defaults
    }

    pub fn provider(&self) -> &Arc<dyn InferenceProvider> {
        &self.provider
    }

    /// Run one generation. The request's context is used as given; any
    /// training-context augmentation has already happened.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, ProviderError> {
        let params = self.defaults.resolve(request);
        let prompt = flatten_prompt(
            request.system_prompt.as_deref(),
            request.context_messages(),
            &request.prompt,
        );

        tracing::debug!(
            model = %params.model,
            context_messages = request.context_messages().len(),
            "sending chat request"
        );

        let reply = self
            .provider
            .chat(&ChatCall {
                model: params.model.clone(),
                prompt,
                temperature: params.temperature,
                num_predict: params.max_tokens,
            })
            .await?;

        let content = if reply.content.is_empty() {
            tracing::warn!(model = %params.model, "upstream returned no text, using fallback");
            FALLBACK_RESPONSE.to_string()
        } else {
            reply.content
        };

        Ok(GenerationResult {
            content,
            model: params.model,
            usage: Usage::new(
                reply.prompt_eval_count.unwrap_or(0),
                reply.eval_count.unwrap_or(0),
            ),
        })
    }
}
