//! HTTP API of the embedded conversation store
//!
//! Mounted under the configured store prefix when the SQLite backend is
//! active, so other instances can use it as their remote store.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::store::{
    ConversationInfo, ConversationStore, ConversationSummary, InteractionFeedback,
    InteractionFilter, InteractionRecord, NewConversation, NewInteraction,
    SqliteConversationStore,
};
use crate::AppState;

use super::error::ApiError;

fn local_store(state: &AppState) -> Result<&Arc<SqliteConversationStore>, ApiError> {
    state
        .local_store
        .as_ref()
        .ok_or_else(|| ApiError::ServiceUnavailable("embedded store is not enabled".into()))
}

async fn healthz() -> Json<Value> {
    Json(json!({"status": "healthy", "service": "conversation-store"}))
}

async fn create_conversation(
    State(state): State<AppState>,
    Json(request): Json<NewConversation>,
) -> Result<(StatusCode, Json<ConversationInfo>), ApiError> {
    let info = local_store(&state)?.create_conversation(&request).await?;
    Ok((StatusCode::CREATED, Json(info)))
}

async fn list_conversations(
    State(state): State<AppState>,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    Ok(Json(local_store(&state)?.list_conversations().await?))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ConversationSummary>, ApiError> {
    Ok(Json(local_store(&state)?.get_conversation(id).await?))
}

async fn log_interaction(
    State(state): State<AppState>,
    Json(interaction): Json<NewInteraction>,
) -> Result<(StatusCode, Json<InteractionRecord>), ApiError> {
    let record = local_store(&state)?.insert_interaction(&interaction).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_interactions(
    State(state): State<AppState>,
    Query(filter): Query<InteractionFilter>,
) -> Result<Json<Vec<InteractionRecord>>, ApiError> {
    Ok(Json(local_store(&state)?.list_interactions(&filter).await?))
}

async fn update_feedback(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(feedback): Json<InteractionFeedback>,
) -> Result<Json<InteractionRecord>, ApiError> {
    Ok(Json(local_store(&state)?.update_feedback(id, &feedback).await?))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz/", get(healthz))
        .route("/conversations/", get(list_conversations))
        .route("/conversations/create/", post(create_conversation))
        .route("/conversations/:id/", get(get_conversation))
        .route(
            "/llm-interactions/log/",
            get(list_interactions).post(log_interaction),
        )
        .route("/llm-interactions/:id/", patch(update_feedback))
}
