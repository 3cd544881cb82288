//! Duplex chat channel over WebSocket
//!
//! One inbound message is processed at a time. The channel remembers the
//! session id, user id and conversation id across turns; inbound values
//! replace the remembered ones.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use serde::Serialize;
use uuid::Uuid;

use crate::conversation::{GenerationRequest, Usage};
use crate::core::ChatEngine;
use crate::AppState;

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ChannelReply {
    Turn {
        response: String,
        model: String,
        usage: Usage,
        conversation_id: Option<i64>,
        session_id: String,
    },
    Error {
        error: String,
    },
}

/// Turn-scoped identity for one connection
pub struct ChannelSession {
    engine: Arc<ChatEngine>,
    session_id: Option<String>,
    user_id: Option<i64>,
    conversation_id: Option<i64>,
}

impl ChannelSession {
    pub fn new(engine: Arc<ChatEngine>) -> Self {
        Self {
            engine,
            session_id: None,
            user_id: None,
            conversation_id: None,
        }
    }

    pub async fn handle_text(&mut self, text: &str) -> ChannelReply {
        match serde_json::from_str::<GenerationRequest>(text) {
            Ok(request) => self.handle(request).await,
            Err(e) => ChannelReply::Error {
                error: format!("Invalid message: {e}"),
            },
        }
    }

    pub async fn handle(&mut self, mut request: GenerationRequest) -> ChannelReply {
        let session_id = request
            .session_id
            .take()
            .filter(|s| !s.is_empty())
            .or_else(|| self.session_id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        self.session_id = Some(session_id.clone());

        if request.user_id.is_some() {
            self.user_id = request.user_id;
        }
        if request.conversation_id.is_some() {
            self.conversation_id = request.conversation_id;
        }

        // Soft dependency: a failed creation is retried on the next turn.
        if self.conversation_id.is_none() {
            match self.engine.open_conversation(&session_id, self.user_id).await {
                Ok(info) => {
                    tracing::debug!(conversation_id = info.id, session_id = %session_id, "conversation opened");
                    self.conversation_id = Some(info.id);
                }
                Err(e) => {
                    tracing::warn!(error = %e, session_id = %session_id, "failed to create conversation");
                }
            }
        }

        request.session_id = Some(session_id.clone());
        request.user_id = self.user_id;
        request.conversation_id = self.conversation_id;

        match self.engine.generate(request).await {
            Ok(result) => ChannelReply::Turn {
                response: result.content,
                model: result.model,
                usage: result.usage,
                conversation_id: self.conversation_id,
                session_id,
            },
            Err(e) => ChannelReply::Error {
                error: e.to_string(),
            },
        }
    }
}

pub async fn channel(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| run_channel(socket, state.chat_engine))
}

async fn run_channel(mut socket: WebSocket, engine: Arc<ChatEngine>) {
    let mut session = ChannelSession::new(engine);

    while let Some(frame) = socket.recv().await {
        let text = match frame {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(error = %e, "channel receive failed");
                break;
            }
        };

        let reply = session.handle_text(&text).await;
        let payload = match serde_json::to_string(&reply) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode channel reply");
                continue;
            }
        };

        // The peer may have gone away mid-generation; the result is dropped.
        if socket.send(WsMessage::Text(payload)).await.is_err() {
            break;
        }
    }

    tracing::debug!("channel closed");
}
