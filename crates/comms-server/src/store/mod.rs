//! Message persistence bridge.
//!
//! Every `send-message` event becomes durable before it is relayed:
//! one transaction inserts the message row and touches the parent
//! thread's metadata, so a failed insert leaves the thread counters
//! untouched and nothing gets broadcast. Read receipts upsert on their
//! `(message_id, user_id)` pair, so re-marking refreshes the timestamp
//! instead of duplicating the row.
//!
//! The relay talks to the bridge through [`MessageSink`], which keeps
//! routing and presence decisions out of the data path and lets tests
//! inject a failing sink.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use comms_common::{Attachment, MessageRecord, ThreadSummary};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("attachment encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Input for one message insert.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub thread_id: String,
    pub author_id: String,
    pub author_name: Option<String>,
    pub content: String,
    pub reply_to_id: Option<String>,
    pub attachments: Vec<Attachment>,
}

/// The seam between the relay and the data store. Pure data operations;
/// no presence or routing decisions happen here.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Durably store a message and refresh its thread's metadata,
    /// atomically. Returns the stored record and the updated summary.
    async fn create_message(
        &self,
        input: NewMessage,
    ) -> Result<(MessageRecord, ThreadSummary), StoreError>;

    /// Upsert a read receipt for `(message_id, user_id)`; returns the
    /// recorded timestamp.
    async fn mark_seen(
        &self,
        message_id: &str,
        thread_id: &str,
        user_id: &str,
    ) -> Result<DateTime<Utc>, StoreError>;
}

/// SQLite-backed message store.
pub struct SqliteMessageStore {
    db_path: PathBuf,
    pool: SqlitePool,
}

impl SqliteMessageStore {
    pub async fn new(data_dir: &Path) -> Result<Self, StoreError> {
        let db_path = data_dir.join("messages.sqlite");
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let store = Self { db_path, pool };
        store.init_db().await?;

        info!("[Store] Initialized at {:?}", store.db_path);
        Ok(store)
    }

    async fn init_db(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL,
                author_id TEXT NOT NULL,
                author_name TEXT,
                content TEXT NOT NULL,
                reply_to_id TEXT,
                attachments TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS threads (
                id TEXT PRIMARY KEY,
                last_message_at TEXT NOT NULL,
                last_message_by TEXT,
                message_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS read_receipts (
                message_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                read_at TEXT NOT NULL,
                PRIMARY KEY (message_id, user_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Messages of a thread in insertion order, for the conversation API.
    pub async fn messages_for_thread(
        &self,
        thread_id: &str,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, thread_id, author_id, author_name, content, reply_to_id, attachments, created_at \
             FROM messages WHERE thread_id = ? ORDER BY created_at",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    pub async fn thread_summary(
        &self,
        thread_id: &str,
    ) -> Result<Option<ThreadSummary>, StoreError> {
        let row = sqlx::query(
            "SELECT id, last_message_at, last_message_by, message_count FROM threads WHERE id = ?",
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(ThreadSummary {
                thread_id: row.get("id"),
                last_message_at: parse_timestamp(&row.get::<String, _>("last_message_at"))?,
                last_message_by: row.get("last_message_by"),
                message_count: row.get("message_count"),
            })
        })
        .transpose()
    }

    pub async fn receipt_count(&self, message_id: &str) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM read_receipts WHERE message_id = ?")
            .bind(message_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Unavailable(format!("corrupt timestamp {:?}: {}", raw, e)))
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<MessageRecord, StoreError> {
    let attachments: Vec<Attachment> =
        serde_json::from_str(&row.get::<String, _>("attachments"))?;
    Ok(MessageRecord {
        id: row.get("id"),
        thread_id: row.get("thread_id"),
        author_id: row.get("author_id"),
        author_name: row.get("author_name"),
        content: row.get("content"),
        reply_to_id: row.get("reply_to_id"),
        attachments,
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
    })
}

#[async_trait]
impl MessageSink for SqliteMessageStore {
    async fn create_message(
        &self,
        input: NewMessage,
    ) -> Result<(MessageRecord, ThreadSummary), StoreError> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let attachments_json = serde_json::to_string(&input.attachments)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO messages (id, thread_id, author_id, author_name, content, reply_to_id, attachments, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&input.thread_id)
        .bind(&input.author_id)
        .bind(&input.author_name)
        .bind(&input.content)
        .bind(&input.reply_to_id)
        .bind(&attachments_json)
        .bind(created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO threads (id, last_message_at, last_message_by, message_count) \
             VALUES (?, ?, ?, 1) \
             ON CONFLICT(id) DO UPDATE SET \
                last_message_at = excluded.last_message_at, \
                last_message_by = excluded.last_message_by, \
                message_count = threads.message_count + 1",
        )
        .bind(&input.thread_id)
        .bind(created_at.to_rfc3339())
        .bind(&input.author_id)
        .execute(&mut *tx)
        .await?;

        let count: i64 = sqlx::query("SELECT message_count FROM threads WHERE id = ?")
            .bind(&input.thread_id)
            .fetch_one(&mut *tx)
            .await?
            .get("message_count");

        tx.commit().await?;

        let record = MessageRecord {
            id,
            thread_id: input.thread_id.clone(),
            author_id: input.author_id.clone(),
            author_name: input.author_name,
            content: input.content,
            reply_to_id: input.reply_to_id,
            attachments: input.attachments,
            created_at,
        };
        let summary = ThreadSummary {
            thread_id: input.thread_id,
            last_message_at: created_at,
            last_message_by: Some(input.author_id),
            message_count: count,
        };
        Ok((record, summary))
    }

    async fn mark_seen(
        &self,
        message_id: &str,
        _thread_id: &str,
        user_id: &str,
    ) -> Result<DateTime<Utc>, StoreError> {
        let read_at = Utc::now();
        sqlx::query(
            "INSERT INTO read_receipts (message_id, user_id, read_at) VALUES (?, ?, ?) \
             ON CONFLICT(message_id, user_id) DO UPDATE SET read_at = excluded.read_at",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(read_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(read_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_store(dir: &TempDir) -> SqliteMessageStore {
        SqliteMessageStore::new(dir.path()).await.unwrap()
    }

    fn text_message(thread_id: &str, author: &str, content: &str) -> NewMessage {
        NewMessage {
            thread_id: thread_id.to_string(),
            author_id: author.to_string(),
            author_name: None,
            content: content.to_string(),
            reply_to_id: None,
            attachments: vec![],
        }
    }

    #[tokio::test]
    async fn create_message_updates_thread_metadata() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let (first, summary) = store
            .create_message(text_message("t1", "u1", "hello"))
            .await
            .unwrap();
        assert!(!first.id.is_empty());
        assert_eq!(summary.message_count, 1);
        assert_eq!(summary.last_message_by.as_deref(), Some("u1"));

        let (_, summary) = store
            .create_message(text_message("t1", "u2", "again"))
            .await
            .unwrap();
        assert_eq!(summary.message_count, 2);
        assert_eq!(summary.last_message_by.as_deref(), Some("u2"));

        let messages = store.messages_for_thread("t1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "hello");
    }

    #[tokio::test]
    async fn attachments_and_replies_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let mut input = text_message("t1", "u1", "see attached");
        input.reply_to_id = Some("m0".to_string());
        input.attachments = vec![Attachment {
            name: "report.pdf".to_string(),
            url: "/files/report.pdf".to_string(),
            mime_type: Some("application/pdf".to_string()),
        }];

        let (record, _) = store.create_message(input).await.unwrap();
        let loaded = store.messages_for_thread("t1").await.unwrap();
        assert_eq!(loaded[0].id, record.id);
        assert_eq!(loaded[0].reply_to_id.as_deref(), Some("m0"));
        assert_eq!(loaded[0].attachments.len(), 1);
        assert_eq!(loaded[0].attachments[0].name, "report.pdf");
    }

    #[tokio::test]
    async fn marking_seen_twice_keeps_one_receipt() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let (record, _) = store
            .create_message(text_message("t1", "u1", "hi"))
            .await
            .unwrap();

        let first = store.mark_seen(&record.id, "t1", "u2").await.unwrap();
        let second = store.mark_seen(&record.id, "t1", "u2").await.unwrap();

        assert_eq!(store.receipt_count(&record.id).await.unwrap(), 1);
        assert!(second >= first);

        // A different reader is a separate receipt.
        store.mark_seen(&record.id, "t1", "u3").await.unwrap();
        assert_eq!(store.receipt_count(&record.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn store_reopens_over_existing_schema() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir).await;
            store
                .create_message(text_message("t1", "u1", "persisted"))
                .await
                .unwrap();
        }
        let store = open_store(&dir).await;
        let messages = store.messages_for_thread("t1").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "persisted");

        let summary = store.thread_summary("t1").await.unwrap().unwrap();
        assert_eq!(summary.message_count, 1);
    }
}
