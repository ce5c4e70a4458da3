//! Durable tier — SQLite.
//!
//! The authoritative long-term store. Every exchange is appended as two
//! rows (the user turn, and the assistant turn carrying model id, token
//! count, and latency) inside one transaction that rolls back entirely
//! on failure. Entries are never expired, only appended.
//!
//! rusqlite is synchronous, so every call hops onto the blocking pool;
//! the connection lives behind a mutex shared with the spawned closures.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use cv_domain::context::ContextWindow;
use cv_domain::error::{Error, Result};
use cv_domain::message::{ChatTurn, Role};
use rusqlite::{params, Connection};

use crate::buffer::PendingExchange;

const MAX_TEXT_LEN: usize = 8192;
const MAX_TOKENS: u32 = 100_000;
const MAX_LATENCY_SECONDS: f64 = 300.0;

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database and run the schema migration.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| Error::Storage(format!("open {}: {e}", path.display())))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             CREATE TABLE IF NOT EXISTS conversations (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 user_id INTEGER NOT NULL,
                 role TEXT NOT NULL,
                 message_text TEXT NOT NULL,
                 response_text TEXT,
                 ai_model TEXT,
                 tokens_used INTEGER,
                 response_time_ms INTEGER,
                 created_at TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_conversations_user_created
                 ON conversations (user_id, created_at);",
        )
        .map_err(|e| Error::Storage(format!("schema migration: {e}")))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Append one exchange: two rows, one transaction.
    pub async fn save_exchange(&self, user_id: i64, exchange: &PendingExchange) -> Result<()> {
        validate_exchange(exchange)?;

        let conn = self.conn.clone();
        let exchange = exchange.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = conn.lock().map_err(|_| poisoned())?;
            let tx = conn
                .transaction()
                .map_err(|e| Error::Storage(format!("begin transaction: {e}")))?;
            let now = Utc::now().to_rfc3339();

            tx.execute(
                "INSERT INTO conversations (user_id, role, message_text, created_at)
                 VALUES (?1, 'user', ?2, ?3)",
                params![user_id, exchange.user_message, now],
            )
            .map_err(|e| Error::Storage(format!("insert user row: {e}")))?;

            tx.execute(
                "INSERT INTO conversations
                     (user_id, role, message_text, response_text, ai_model,
                      tokens_used, response_time_ms, created_at)
                 VALUES (?1, 'assistant', ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    user_id,
                    exchange.user_message,
                    exchange.assistant_message,
                    exchange.model,
                    exchange.tokens_used,
                    (exchange.latency_seconds * 1000.0) as i64,
                    now,
                ],
            )
            .map_err(|e| Error::Storage(format!("insert assistant row: {e}")))?;

            // Rollback happens automatically when the transaction is
            // dropped without commit.
            tx.commit()
                .map_err(|e| Error::Storage(format!("commit exchange: {e}")))?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Storage(format!("blocking task: {e}")))?
    }

    /// Reconstruct a context window from the most recent rows within
    /// `max_age_hours`. `None` when the user has no stored history.
    pub async fn load_context(
        &self,
        user_id: i64,
        limit: u32,
        max_age_hours: u32,
    ) -> Result<Option<ContextWindow>> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || -> Result<Option<ContextWindow>> {
            let conn = conn.lock().map_err(|_| poisoned())?;
            let cutoff = (Utc::now() - Duration::hours(i64::from(max_age_hours))).to_rfc3339();

            let mut stmt = conn
                .prepare(
                    "SELECT role, message_text, response_text, created_at
                     FROM conversations
                     WHERE user_id = ?1 AND created_at >= ?2
                     ORDER BY created_at DESC, id DESC
                     LIMIT ?3",
                )
                .map_err(|e| Error::Storage(format!("prepare load: {e}")))?;

            let mut rows: Vec<(String, String, Option<String>, String)> = stmt
                .query_map(params![user_id, cutoff, limit * 2], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })
                .map_err(|e| Error::Storage(format!("query load: {e}")))?
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Storage(format!("read row: {e}")))?;

            if rows.is_empty() {
                return Ok(None);
            }

            // Rows arrive newest-first; replay oldest-first so the window
            // evicts correctly.
            rows.reverse();
            let mut window = ContextWindow::new();
            for (role, message_text, response_text, created_at) in rows {
                let timestamp = DateTime::parse_from_rfc3339(&created_at)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc));
                match role.as_str() {
                    "user" => window.push_user_turn(ChatTurn {
                        role: Role::User,
                        text: message_text,
                        timestamp,
                    }),
                    "assistant" => {
                        let text = response_text.unwrap_or(message_text);
                        window.push_assistant_turn(ChatTurn {
                            role: Role::Assistant,
                            text,
                            timestamp,
                        });
                    }
                    other => {
                        tracing::warn!(user_id, role = %other, "unknown role in durable row, skipping");
                    }
                }
            }
            Ok(Some(window))
        })
        .await
        .map_err(|e| Error::Storage(format!("blocking task: {e}")))?
    }

    /// Total stored rows for a user (tests, diagnostics).
    pub async fn row_count(&self, user_id: i64) -> Result<u64> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<u64> {
            let conn = conn.lock().map_err(|_| poisoned())?;
            let count: u64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM conversations WHERE user_id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )
                .map_err(|e| Error::Storage(format!("count rows: {e}")))?;
            Ok(count)
        })
        .await
        .map_err(|e| Error::Storage(format!("blocking task: {e}")))?
    }
}

fn poisoned() -> Error {
    Error::Storage("sqlite connection mutex poisoned".into())
}

fn validate_exchange(exchange: &PendingExchange) -> Result<()> {
    if exchange.user_message.is_empty() || exchange.user_message.len() > MAX_TEXT_LEN {
        return Err(Error::InvalidInput("user message length out of bounds".into()));
    }
    if exchange.assistant_message.is_empty() || exchange.assistant_message.len() > MAX_TEXT_LEN {
        return Err(Error::InvalidInput(
            "assistant message length out of bounds".into(),
        ));
    }
    if exchange.tokens_used > MAX_TOKENS {
        return Err(Error::InvalidInput(format!(
            "tokens_used {} out of bounds",
            exchange.tokens_used
        )));
    }
    if !(0.0..=MAX_LATENCY_SECONDS).contains(&exchange.latency_seconds) {
        return Err(Error::InvalidInput(format!(
            "latency {} out of bounds",
            exchange.latency_seconds
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(user: &str, assistant: &str) -> PendingExchange {
        PendingExchange {
            user_message: user.into(),
            assistant_message: assistant.into(),
            model: "test-model".into(),
            tokens_used: 10,
            latency_seconds: 0.5,
        }
    }

    fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("conv.db")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn exchange_writes_two_rows() {
        let (_dir, store) = temp_store();
        store.save_exchange(1, &exchange("hi", "hello")).await.unwrap();
        assert_eq!(store.row_count(1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn load_reconstructs_window_in_order() {
        let (_dir, store) = temp_store();
        store.save_exchange(1, &exchange("first", "one")).await.unwrap();
        store.save_exchange(1, &exchange("second", "two")).await.unwrap();

        let window = store.load_context(1, 6, 12).await.unwrap().unwrap();
        let users: Vec<&str> = window.user_turns.iter().map(|t| t.text.as_str()).collect();
        let assistants: Vec<&str> = window
            .assistant_turns
            .iter()
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(users, ["first", "second"]);
        assert_eq!(assistants, ["one", "two"]);
    }

    #[tokio::test]
    async fn unknown_user_loads_none() {
        let (_dir, store) = temp_store();
        assert!(store.load_context(42, 6, 12).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_exchange_is_rejected() {
        let (_dir, store) = temp_store();
        let mut bad = exchange("hi", "there");
        bad.latency_seconds = 400.0;
        assert!(store.save_exchange(1, &bad).await.is_err());
        assert_eq!(store.row_count(1).await.unwrap(), 0);
    }
}
