//! API routes

pub mod error;
pub mod store;
pub mod ws;

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::conversation::{GenerationRequest, GenerationResult, Usage};
use crate::core::HealthReport;
use crate::AppState;

use error::ApiError;

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
    pub model: String,
    pub usage: Usage,
}

impl From<GenerationResult> for GenerateResponse {
    fn from(result: GenerationResult) -> Self {
        Self {
            response: result.content,
            model: result.model,
            usage: result.usage,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    pub prompt: String,
    pub response: String,
    #[serde(default)]
    pub criteria: Option<BTreeMap<String, String>>,
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": "LLM orchestration service",
        "version": env!("CARGO_PKG_VERSION"),
        "websocket": "/ws",
    }))
}

async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.chat_engine.health().await)
}

async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerationRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let result = state.chat_engine.generate(request).await?;
    Ok(Json(result.into()))
}

async fn evaluate(
    State(state): State<AppState>,
    Json(request): Json<EvaluateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let result = state
        .chat_engine
        .evaluate(&request.prompt, &request.response, request.criteria)
        .await?;
    Ok(Json(result.into()))
}

async fn list_models(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.chat_engine.list_models().await?))
}

async fn pull_model(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.chat_engine.pull_model(&name).await?))
}

/// Build the full application router for `state`.
pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/ws", get(ws::channel))
        .route("/api/health", get(health))
        .route("/api/generate", post(generate))
        .route("/api/evaluate", post(evaluate))
        .route("/api/models", get(list_models))
        .route("/api/models/:name/pull", post(pull_model));

    if state.local_store.is_some() {
        let prefix = state.config.store.route_prefix();
        app = if prefix.is_empty() {
            app.merge(store::router())
        } else {
            app.nest(&prefix, store::router())
        };
    }

    app.with_state(state)
}
