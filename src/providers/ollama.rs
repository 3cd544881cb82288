//! Ollama provider implementation

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Timeouts;

use super::{ChatCall, ChatReply, InferenceProvider, ProviderError};

pub struct OllamaProvider {
    client: Client,
    base_url: String,
    chat_timeout: Duration,
    listing_timeout: Duration,
    pull_timeout: Duration,
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage<'a>>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

/// One JSON object of a chat response. A non-streaming reply is a single
/// chunk; a streamed reply is one chunk per line with the last flagged `done`.
#[derive(Debug, Default, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatChunk {
    fn text(&self) -> Option<&str> {
        self.message.as_ref().and_then(|m| m.content.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

#[derive(Debug, Serialize)]
struct PullRequest<'a> {
    name: &'a str,
    stream: bool,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>, timeouts: &Timeouts) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            chat_timeout: timeouts.generation(),
            listing_timeout: timeouts.telemetry(),
            pull_timeout: timeouts.provision(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl InferenceProvider for OllamaProvider {
    async fn chat(&self, call: &ChatCall) -> Result<ChatReply, ProviderError> {
        // The whole transcript travels as one synthesized user turn.
        let request = OllamaRequest {
            model: &call.model,
            messages: vec![OllamaMessage {
                role: "user",
                content: &call.prompt,
            }],
            stream: false,
            options: OllamaOptions {
                temperature: call.temperature,
                num_predict: call.num_predict,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .timeout(self.chat_timeout)
            .json(&request)
            .send()
            .await?;

        let body = checked(response).await?.text().await?;
        tracing::debug!(bytes = body.len(), "raw chat response received");

        reassemble(&body)
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(self.listing_timeout)
            .send()
            .await?;

        let body = checked(response).await?.text().await?;
        let tags: TagsResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Malformed(format!("invalid model list: {e}")))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn pull_model(&self, name: &str) -> Result<Value, ProviderError> {
        let response = self
            .client
            .post(format!("{}/api/pull", self.base_url))
            .timeout(self.pull_timeout)
            .json(&PullRequest {
                name,
                stream: false,
            })
            .send()
            .await?;

        let body = checked(response).await?.text().await?;
        last_json_document(&body)
            .ok_or_else(|| ProviderError::Malformed(format!("pull returned no JSON: {body}")))
    }
}

/// Turn a non-success status into [`ProviderError::Status`], preferring the
/// upstream's own `error` message over the raw body.
async fn checked(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(body);

    Err(ProviderError::Status { status, message })
}

/// Reassemble a chat response body.
///
/// The body is first decoded as a single JSON object. If that fails it is
/// treated as newline-delimited chunks: incremental `message.content` values
/// are concatenated and the last chunk flagged `done` supplies the token
/// counters. Lines that do not parse are skipped, and a body with no
/// parseable line yields an empty reply. Only an upstream `error` field fails.
pub fn reassemble(body: &str) -> Result<ChatReply, ProviderError> {
    if let Ok(chunk) = serde_json::from_str::<ChatChunk>(body) {
        if let Some(error) = &chunk.error {
            return Err(ProviderError::Upstream(error.clone()));
        }
        return Ok(ChatReply {
            content: chunk.text().unwrap_or_default().to_string(),
            prompt_eval_count: chunk.prompt_eval_count,
            eval_count: chunk.eval_count,
        });
    }

    let mut content = String::new();
    let mut terminal: Option<ChatChunk> = None;
    let mut parsed = 0usize;

    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let chunk: ChatChunk = match serde_json::from_str(line) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(error = %e, line, "skipping undecodable response chunk");
                continue;
            }
        };
        parsed += 1;

        if let Some(error) = &chunk.error {
            return Err(ProviderError::Upstream(error.clone()));
        }
        if let Some(text) = chunk.text() {
            content.push_str(text);
        }
        if chunk.done {
            terminal = Some(chunk);
        }
    }

    // Nothing usable; the caller substitutes its fallback text.
    if parsed == 0 {
        tracing::warn!(bytes = body.len(), "no JSON object found in chat response");
        return Ok(ChatReply::default());
    }

    Ok(ChatReply {
        content,
        prompt_eval_count: terminal.as_ref().and_then(|c| c.prompt_eval_count),
        eval_count: terminal.as_ref().and_then(|c| c.eval_count),
    })
}

/// The whole body as JSON, or failing that the last line that parses.
fn last_json_document(body: &str) -> Option<Value> {
    serde_json::from_str(body).ok().or_else(|| {
        body.lines()
            .rev()
            .find_map(|line| serde_json::from_str(line.trim()).ok())
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;

    use super::*;
    use crate::testing::spawn_stub;

    fn call(prompt: &str) -> ChatCall {
        ChatCall {
            model: "mistral:7b-instruct-q4".into(),
            prompt: prompt.into(),
            temperature: 0.7,
            num_predict: 2000,
        }
    }

    #[test]
    fn test_reassemble_streamed_chunks() {
        let body = "{\"message\":{\"content\":\"Hi\"}}\n\
                    {\"message\":{\"content\":\" there\"},\"done\":true,\"prompt_eval_count\":5,\"eval_count\":3}\n";

        let reply = reassemble(body).unwrap();
        assert_eq!(reply.content, "Hi there");
        assert_eq!(reply.prompt_eval_count, Some(5));
        assert_eq!(reply.eval_count, Some(3));
    }

    #[test]
    fn test_reassemble_single_body() {
        let body = r#"{"model":"m","message":{"role":"assistant","content":"4"},"done":true,"prompt_eval_count":12,"eval_count":1}"#;

        let reply = reassemble(body).unwrap();
        assert_eq!(reply.content, "4");
        assert_eq!(reply.prompt_eval_count, Some(12));
        assert_eq!(reply.eval_count, Some(1));
    }

    #[test]
    fn test_reassemble_skips_bad_lines() {
        let body = "{\"message\":{\"content\":\"a\"}}\nnot json\n{\"message\":{\"content\":\"b\"}}\n";

        let reply = reassemble(body).unwrap();
        assert_eq!(reply.content, "ab");
        assert_eq!(reply.prompt_eval_count, None);
    }

    #[test]
    fn test_reassemble_garbage_yields_empty_reply() {
        let reply = reassemble("<html>bad gateway</html>").unwrap();
        assert_eq!(reply, ChatReply::default());
    }

    #[test]
    fn test_reassemble_reports_upstream_error() {
        let err = reassemble(r#"{"error":"model requires more system memory (8 GiB)"}"#).unwrap_err();
        assert!(err.to_string().contains("model requires more system memory"));
    }

    #[test]
    fn test_last_json_document() {
        let body = "{\"status\":\"pulling\"}\n{\"status\":\"success\"}\n";
        assert_eq!(last_json_document(body), Some(json!({"status": "success"})));
        assert_eq!(last_json_document("nope"), None);
    }

    #[tokio::test]
    async fn test_chat_sends_flattened_prompt() {
        let seen = Arc::new(Mutex::new(None::<Value>));
        let captured = seen.clone();
        let app = Router::new().route(
            "/api/chat",
            post(move |Json(body): Json<Value>| {
                let captured = captured.clone();
                async move {
                    *captured.lock().unwrap() = Some(body);
                    Json(json!({"message": {"role": "assistant", "content": "4"}, "done": true}))
                }
            }),
        );
        let base = spawn_stub(app).await;

        let provider = OllamaProvider::new(base, &Timeouts::default());
        let reply = provider.chat(&call("User: What is 2+2?")).await.unwrap();
        assert_eq!(reply.content, "4");

        let body = seen.lock().unwrap().clone().unwrap();
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "User: What is 2+2?");
        assert_eq!(body["options"]["num_predict"], 2000);
    }

    #[tokio::test]
    async fn test_chat_status_error_carries_message() {
        let app = Router::new().route(
            "/api/chat",
            post(|| async {
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "model requires more system memory"})),
                )
            }),
        );
        let base = spawn_stub(app).await;

        let provider = OllamaProvider::new(base, &Timeouts::default());
        let err = provider.chat(&call("hi")).await.unwrap_err();
        match err {
            ProviderError::Status { status, message } => {
                assert_eq!(status.as_u16(), 500);
                assert_eq!(message, "model requires more system memory");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let provider = OllamaProvider::new("http://127.0.0.1:9", &Timeouts::default());
        let err = provider.chat(&call("hi")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_list_models() {
        let app = Router::new().route(
            "/api/tags",
            get(|| async { Json(json!({"models": [{"name": "llama3.2"}, {"name": "mistral:7b"}]})) }),
        );
        let base = spawn_stub(app).await;

        let provider = OllamaProvider::new(base, &Timeouts::default());
        let models = provider.list_models().await.unwrap();
        assert_eq!(models, vec!["llama3.2", "mistral:7b"]);
    }

    #[tokio::test]
    async fn test_list_models_undecodable_body() {
        let app = Router::new().route("/api/tags", get(|| async { "<html>proxy hiccup</html>" }));
        let base = spawn_stub(app).await;

        let provider = OllamaProvider::new(base, &Timeouts::default());
        let err = provider.list_models().await.unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }
}
