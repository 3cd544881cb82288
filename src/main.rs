//! LLM orchestration service
//!
//! Forwards chat prompts to a locally hosted Ollama server, logs every
//! exchange to a conversation store, and serves results over HTTP and a
//! WebSocket channel.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod conversation;
mod core;
mod providers;
mod routes;
mod store;

#[cfg(test)]
mod testing;

use crate::config::{Config, StoreBackend};
use crate::core::ChatEngine;
use crate::providers::OllamaProvider;
use crate::store::{ConversationStore, HttpConversationStore, SqliteConversationStore};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub chat_engine: Arc<ChatEngine>,

    /// Set when the embedded SQLite store backs this instance
    pub local_store: Option<Arc<SqliteConversationStore>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llm_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let (store, local_store): (Arc<dyn ConversationStore>, Option<Arc<SqliteConversationStore>>) =
        match config.store.backend {
            StoreBackend::Remote => {
                let url = config.store.base_url();
                tracing::info!(%url, "using remote conversation store");
                let remote: Arc<dyn ConversationStore> =
                    Arc::new(HttpConversationStore::new(url, config.timeouts.telemetry()));
                (remote, None)
            }
            StoreBackend::Sqlite => {
                tracing::info!(path = %config.store.db_path.display(), "using embedded conversation store");
                let local = Arc::new(SqliteConversationStore::new(&config.store.db_path).await?);
                let shared: Arc<dyn ConversationStore> = local.clone();
                (shared, Some(local))
            }
        };

    let provider = Arc::new(OllamaProvider::new(
        config.ollama.base_url(),
        &config.timeouts,
    ));
    tracing::info!(url = provider.base_url(), model = %config.generation.model, "inference server configured");

    let chat_engine = Arc::new(ChatEngine::new(&config, provider, store));

    // Provisioning can take minutes; the API serves health checks meanwhile.
    let provisioner = chat_engine.clone();
    tokio::spawn(async move {
        provisioner.ensure_default_model().await;
    });

    let state = AppState {
        config,
        chat_engine,
        local_store,
    };

    let app = routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    tracing::info!("🔥 LLM orchestrator running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
