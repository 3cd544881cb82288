//! Conversation store backed by SQLite
//!
//! Holds conversations and interaction records locally. Training-context
//! selection is a filtered query rather than a full listing.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use super::{
    ConversationInfo, ConversationStore, ConversationSummary, InteractionFeedback,
    InteractionFilter, InteractionRecord, NewConversation, NewInteraction, StoreError,
};

const INTERACTION_COLUMNS: &str = "id, user_id, conversation_id, prompt, response, model_name, \
     temperature, top_p, frequency_penalty, presence_penalty, timestamp, context, \
     retrieved_documents, streamed, rating, thumbs_up, comment, session_id, score, \
     feedback_comment, include_in_training";

#[derive(Debug, sqlx::FromRow)]
struct InteractionRow {
    id: i64,
    user_id: Option<i64>,
    conversation_id: Option<i64>,
    prompt: String,
    response: String,
    model_name: String,
    temperature: f64,
    top_p: Option<f64>,
    frequency_penalty: Option<f64>,
    presence_penalty: Option<f64>,
    timestamp: String,
    context: Option<String>,
    retrieved_documents: Option<String>,
    streamed: bool,
    rating: Option<i64>,
    thumbs_up: Option<bool>,
    comment: Option<String>,
    session_id: Option<String>,
    score: Option<i64>,
    feedback_comment: Option<String>,
    include_in_training: bool,
}

impl From<InteractionRow> for InteractionRecord {
    fn from(row: InteractionRow) -> Self {
        InteractionRecord {
            id: row.id,
            user: row.user_id,
            conversation: row.conversation_id,
            prompt: row.prompt,
            response: row.response,
            model_name: row.model_name,
            temperature: row.temperature as f32,
            top_p: row.top_p.map(|v| v as f32),
            frequency_penalty: row.frequency_penalty.map(|v| v as f32),
            presence_penalty: row.presence_penalty.map(|v| v as f32),
            timestamp: parse_timestamp(&row.timestamp),
            context: row.context.and_then(|c| serde_json::from_str(&c).ok()),
            retrieved_documents: row
                .retrieved_documents
                .and_then(|d| serde_json::from_str(&d).ok()),
            streamed: row.streamed,
            rating: row.rating,
            thumbs_up: row.thumbs_up,
            comment: row.comment,
            session_id: row.session_id,
            score: row.score,
            feedback_comment: row.feedback_comment,
            include_in_training: row.include_in_training,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ConversationRow {
    id: i64,
    title: String,
    session_id: Option<String>,
    user_id: Option<i64>,
    created_at: String,
    updated_at: String,
}

impl From<ConversationRow> for ConversationSummary {
    fn from(row: ConversationRow) -> Self {
        ConversationSummary {
            id: row.id,
            title: row.title,
            session_id: row.session_id,
            user_id: row.user_id,
            created_at: parse_timestamp(&row.created_at).unwrap_or_else(Utc::now),
            updated_at: parse_timestamp(&row.updated_at).unwrap_or_else(Utc::now),
        }
    }
}

/// Fixed-width timestamps so text ordering matches time ordering.
fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

pub struct SqliteConversationStore {
    pool: SqlitePool,
}

impl SqliteConversationStore {
    /// Open (creating if missing) the database at `db_path`
    pub async fn new(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory store, used by tests
    pub async fn new_in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                session_id TEXT,
                user_id INTEGER,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS llm_interactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER,
                conversation_id INTEGER REFERENCES conversations(id) ON DELETE SET NULL,
                prompt TEXT NOT NULL,
                response TEXT NOT NULL,
                model_name TEXT NOT NULL,
                temperature REAL NOT NULL DEFAULT 0.7,
                top_p REAL,
                frequency_penalty REAL,
                presence_penalty REAL,
                timestamp TEXT NOT NULL,
                context TEXT,
                retrieved_documents TEXT,
                streamed INTEGER NOT NULL DEFAULT 0,
                rating INTEGER,
                thumbs_up INTEGER,
                comment TEXT,
                session_id TEXT,
                score INTEGER,
                feedback_comment TEXT,
                include_in_training INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_interactions_training
            ON llm_interactions(include_in_training, timestamp)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// All conversations, most recently updated first
    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, StoreError> {
        let rows: Vec<ConversationRow> = sqlx::query_as(
            r#"
            SELECT id, title, session_id, user_id, created_at, updated_at
            FROM conversations
            ORDER BY updated_at DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn get_conversation(&self, id: i64) -> Result<ConversationSummary, StoreError> {
        let row: Option<ConversationRow> = sqlx::query_as(
            r#"
            SELECT id, title, session_id, user_id, created_at, updated_at
            FROM conversations
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Into::into)
            .ok_or_else(|| StoreError::NotFound(format!("conversation {id}")))
    }

    /// Store an interaction and return it as persisted
    pub async fn insert_interaction(
        &self,
        interaction: &NewInteraction,
    ) -> Result<InteractionRecord, StoreError> {
        let context = interaction
            .context
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let documents = interaction
            .retrieved_documents
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let now = now_timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO llm_interactions (
                user_id, conversation_id, prompt, response, model_name, temperature,
                top_p, frequency_penalty, presence_penalty, timestamp, context,
                retrieved_documents, streamed, session_id
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(interaction.user)
        .bind(interaction.conversation)
        .bind(&interaction.prompt)
        .bind(&interaction.response)
        .bind(&interaction.model_name)
        .bind(f64::from(interaction.temperature))
        .bind(interaction.top_p.map(f64::from))
        .bind(interaction.frequency_penalty.map(f64::from))
        .bind(interaction.presence_penalty.map(f64::from))
        .bind(&now)
        .bind(context)
        .bind(documents)
        .bind(interaction.streamed)
        .bind(&interaction.session_id)
        .execute(&self.pool)
        .await?;

        if let Some(conversation_id) = interaction.conversation {
            sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
                .bind(&now)
                .bind(conversation_id)
                .execute(&self.pool)
                .await?;
        }

        self.get_interaction(result.last_insert_rowid()).await
    }

    pub async fn get_interaction(&self, id: i64) -> Result<InteractionRecord, StoreError> {
        let sql = format!("SELECT {INTERACTION_COLUMNS} FROM llm_interactions WHERE id = ?");
        let row: Option<InteractionRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Into::into)
            .ok_or_else(|| StoreError::NotFound(format!("interaction {id}")))
    }

    /// Interactions matching `filter`, newest first
    pub async fn list_interactions(
        &self,
        filter: &InteractionFilter,
    ) -> Result<Vec<InteractionRecord>, StoreError> {
        let sql = format!(
            r#"
            SELECT {INTERACTION_COLUMNS}
            FROM llm_interactions
            WHERE (?1 IS NULL OR user_id = ?1)
              AND (?2 IS NULL OR session_id = ?2)
              AND (?3 IS NULL OR conversation_id = ?3)
              AND (?4 IS NULL OR include_in_training = ?4)
            ORDER BY timestamp DESC, id DESC
            LIMIT ?5
            "#
        );

        // SQLite treats a negative LIMIT as unbounded.
        let limit = filter.limit.map(i64::from).unwrap_or(-1);

        let rows: Vec<InteractionRow> = sqlx::query_as(&sql)
            .bind(filter.user)
            .bind(&filter.session_id)
            .bind(filter.conversation)
            .bind(filter.include_in_training)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Record human feedback; unset fields keep their stored value
    pub async fn update_feedback(
        &self,
        id: i64,
        feedback: &InteractionFeedback,
    ) -> Result<InteractionRecord, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE llm_interactions SET
                rating = COALESCE(?, rating),
                thumbs_up = COALESCE(?, thumbs_up),
                comment = COALESCE(?, comment),
                score = COALESCE(?, score),
                feedback_comment = COALESCE(?, feedback_comment),
                include_in_training = COALESCE(?, include_in_training)
            WHERE id = ?
            "#,
        )
        .bind(feedback.rating)
        .bind(feedback.thumbs_up)
        .bind(&feedback.comment)
        .bind(feedback.score)
        .bind(&feedback.feedback_comment)
        .bind(feedback.include_in_training)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("interaction {id}")));
        }
        self.get_interaction(id).await
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn create_conversation(
        &self,
        conversation: &NewConversation,
    ) -> Result<ConversationInfo, StoreError> {
        let title = conversation.resolved_title();
        let now = now_timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO conversations (title, session_id, user_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&title)
        .bind(&conversation.session_id)
        .bind(conversation.user_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(ConversationInfo {
            id: result.last_insert_rowid(),
            title,
            created_at: parse_timestamp(&now).unwrap_or_else(Utc::now),
        })
    }

    async fn log_interaction(&self, interaction: &NewInteraction) -> Result<(), StoreError> {
        self.insert_interaction(interaction).await.map(|_| ())
    }

    async fn training_interactions(
        &self,
        filter: &InteractionFilter,
    ) -> Result<Vec<InteractionRecord>, StoreError> {
        let filter = InteractionFilter {
            include_in_training: Some(true),
            ..filter.clone()
        };
        self.list_interactions(&filter).await
    }
}
