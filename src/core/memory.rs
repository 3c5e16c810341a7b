//! Chat history storage
//!
//! The transport depends only on [`ChatStore`]. Two implementations: SQLite
//! for the terminal client, and an in-memory list for tests and throwaway
//! sessions. Both list the newest-created chat first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::conversation::{Chat, Message};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persistence for whole chats, keyed by id
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Chat>, StoreError>;

    /// Insert a new chat or replace the stored one with the same id.
    /// An empty `chat.name` keeps the stored name.
    async fn upsert(&self, chat: &Chat) -> Result<(), StoreError>;

    /// Set only the name of a stored chat. Returns `false` if `id` is unknown.
    async fn rename(&self, id: &str, name: &str) -> Result<bool, StoreError>;

    async fn list(&self) -> Result<Vec<Chat>, StoreError>;

    /// Deleting an unknown id is not an error.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

/// SQLite-backed chat store, one row per chat
pub struct SqliteChatStore {
    pool: SqlitePool,
}

type ChatRow = (String, String, String, String);

impl SqliteChatStore {
    /// Open (or create) a store at the given SQLite database path
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

    /// Create an in-memory database, mainly for tests
    pub async fn new_in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chats (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                messages TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn from_row((id, name, messages, created_at): ChatRow) -> Result<Chat, StoreError> {
        let messages: Vec<Message> = serde_json::from_str(&messages)?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(Chat {
            id,
            name,
            messages,
            created_at,
        })
    }
}

#[async_trait]
impl ChatStore for SqliteChatStore {
    async fn get(&self, id: &str) -> Result<Option<Chat>, StoreError> {
        let row: Option<ChatRow> = sqlx::query_as(
            r#"
            SELECT id, name, messages, created_at
            FROM chats
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::from_row).transpose()
    }

    async fn upsert(&self, chat: &Chat) -> Result<(), StoreError> {
        let messages = serde_json::to_string(&chat.messages)?;

        // ON CONFLICT keeps the rowid, so list order stays creation order
        sqlx::query(
            r#"
            INSERT INTO chats (id, name, messages, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = CASE WHEN excluded.name = '' THEN chats.name ELSE excluded.name END,
                messages = excluded.messages,
                updated_at = datetime('now')
            "#,
        )
        .bind(&chat.id)
        .bind(&chat.name)
        .bind(messages)
        .bind(chat.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn rename(&self, id: &str, name: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE chats
            SET name = ?, updated_at = datetime('now')
            WHERE id = ?
            "#,
        )
        .bind(name)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<Chat>, StoreError> {
        let rows: Vec<ChatRow> = sqlx::query_as(
            r#"
            SELECT id, name, messages, created_at
            FROM chats
            ORDER BY rowid DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::from_row).collect()
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM chats WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// Chats kept in process memory; new chats go to the front.
#[derive(Default)]
pub struct InMemoryChatStore {
    chats: RwLock<Vec<Chat>>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn get(&self, id: &str) -> Result<Option<Chat>, StoreError> {
        Ok(self.chats.read().await.iter().find(|c| c.id == id).cloned())
    }

    async fn upsert(&self, chat: &Chat) -> Result<(), StoreError> {
        let mut chats = self.chats.write().await;
        match chats.iter_mut().find(|c| c.id == chat.id) {
            Some(existing) => {
                let name = std::mem::take(&mut existing.name);
                *existing = chat.clone();
                if existing.name.is_empty() {
                    existing.name = name;
                }
            }
            None => chats.insert(0, chat.clone()),
        }
        Ok(())
    }

    async fn rename(&self, id: &str, name: &str) -> Result<bool, StoreError> {
        let mut chats = self.chats.write().await;
        Ok(match chats.iter_mut().find(|c| c.id == id) {
            Some(chat) => {
                chat.name = name.to_string();
                true
            }
            None => false,
        })
    }

    async fn list(&self) -> Result<Vec<Chat>, StoreError> {
        Ok(self.chats.read().await.clone())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.chats.write().await.retain(|c| c.id != id);
        Ok(())
    }
}
