//! Local SQLite storage for chat messages.
//!
//! Every message lands here first with a sync flag; the cloud scheduler
//! drains unsynced rows later. Upserts are keyed by message id.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::{
    AppError, DeliveryState, Message, MessageStore, Recipient, Result, SyncState,
    BROADCAST_MARKER,
};

const MESSAGE_COLUMNS: &str =
    "id, content, sender, recipient, created_at, synced, delivery_state";

/// Local storage repository using SQLite.
pub struct LocalStorage {
    conn: Mutex<Connection>,
}

impl LocalStorage {
    /// Opens or creates the local storage database.
    ///
    /// # Errors
    /// Returns error if database cannot be opened or schema creation fails.
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::io("Failed to create storage directory", e))?;
        }

        let conn = Connection::open(path).map_err(AppError::database)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(AppError::database)?;

        Self::with_connection(conn)
    }

    /// Opens a throwaway in-memory database.
    ///
    /// # Errors
    /// Returns error if schema creation fails.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(AppError::database)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                r"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY NOT NULL,
                content TEXT NOT NULL,
                sender TEXT NOT NULL,
                recipient TEXT NOT NULL DEFAULT 'all',
                created_at TEXT NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0,
                delivery_state TEXT,
                sync_attempts INTEGER NOT NULL DEFAULT 0,
                last_sync_error TEXT,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_messages_unsynced
                ON messages(synced) WHERE synced = 0;
            CREATE INDEX IF NOT EXISTS idx_messages_created
                ON messages(created_at);
            ",
            )
            .map_err(AppError::database)?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| AppError::Database {
            message: "storage connection lock poisoned".into(),
            source: None,
        })
    }

    /// Convert a row to a Message.
    fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
        let recipient: String = row.get(3)?;
        let created_at_str: String = row.get(4)?;
        let created_at = DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_default();
        let delivery_state: Option<String> = row.get(6)?;

        Ok(Message {
            id: row.get(0)?,
            content: row.get(1)?,
            sender: row.get(2)?,
            recipient: Recipient::parse(Some(&recipient)),
            created_at,
            sync_state: if row.get::<_, i32>(5)? != 0 {
                SyncState::Synced
            } else {
                SyncState::Unsynced
            },
            delivery_state: delivery_state.and_then(|s| s.parse().ok()),
        })
    }

    fn query_messages(&self, sql: &str) -> Result<Vec<Message>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql).map_err(AppError::database)?;

        let rows = stmt
            .query_map([], Self::row_to_message)
            .map_err(AppError::database)?;

        let mut messages = Vec::new();
        for row in rows {
            match row {
                Ok(message) => messages.push(message),
                Err(e) => tracing::warn!("Failed to read message row: {}", e),
            }
        }

        Ok(messages)
    }
}

impl MessageStore for LocalStorage {
    fn put(&self, message: &Message) -> Result<()> {
        self.conn()?
            .execute(
                r"
            INSERT INTO messages
                (id, content, sender, recipient, created_at, synced, delivery_state)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                sender = excluded.sender,
                recipient = excluded.recipient,
                synced = MAX(synced, excluded.synced),
                delivery_state = COALESCE(excluded.delivery_state, delivery_state),
                updated_at = datetime('now')
            ",
                params![
                    &message.id,
                    &message.content,
                    &message.sender,
                    message.recipient.as_str(),
                    message.created_at.to_rfc3339(),
                    i32::from(message.is_synced()),
                    message.delivery_state.map(DeliveryState::as_str),
                ],
            )
            .map_err(AppError::database)?;

        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Message>> {
        self.conn()?
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                [id],
                Self::row_to_message,
            )
            .optional()
            .map_err(AppError::database)
    }

    fn list_all(&self) -> Result<Vec<Message>> {
        self.query_messages(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages ORDER BY created_at ASC"
        ))
    }

    fn list_unsynced(&self) -> Result<Vec<Message>> {
        self.query_messages(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE synced = 0 ORDER BY created_at ASC"
        ))
    }

    fn count_unsynced(&self) -> Result<usize> {
        self.conn()?
            .query_row("SELECT COUNT(*) FROM messages WHERE synced = 0", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|c| usize::try_from(c).unwrap_or(0))
            .map_err(AppError::database)
    }

    fn mark_synced(&self, id: &str) -> Result<bool> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE messages SET synced = 1, last_sync_error = NULL, updated_at = datetime('now')
                 WHERE id = ?1 AND synced = 0",
                [id],
            )
            .map_err(AppError::database)?;

        Ok(changed > 0)
    }

    fn mark_all_synced(&self, ids: &[String]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(AppError::database)?;

        let mut changed = 0;
        {
            let mut stmt = tx
                .prepare(
                    "UPDATE messages SET synced = 1, last_sync_error = NULL, updated_at = datetime('now')
                     WHERE id = ?1 AND synced = 0",
                )
                .map_err(AppError::database)?;
            for id in ids {
                changed += stmt.execute([id]).map_err(AppError::database)?;
            }
        }

        tx.commit().map_err(AppError::database)?;
        Ok(changed)
    }

    fn update_delivery_state(&self, id: &str, state: DeliveryState) -> Result<bool> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE messages SET delivery_state = ?2, updated_at = datetime('now')
                 WHERE id = ?1 AND recipient <> ?3",
                params![id, state.as_str(), BROADCAST_MARKER],
            )
            .map_err(AppError::database)?;

        Ok(changed > 0)
    }

    fn record_sync_failure(&self, ids: &[String], error: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(AppError::database)?;
        {
            let mut stmt = tx
                .prepare(
                    "UPDATE messages SET sync_attempts = sync_attempts + 1, last_sync_error = ?2
                     WHERE id = ?1 AND synced = 0",
                )
                .map_err(AppError::database)?;
            for id in ids {
                stmt.execute(params![id, error])
                    .map_err(AppError::database)?;
            }
        }
        tx.commit().map_err(AppError::database)
    }

    fn list_stuck(&self, attempts: u32) -> Result<Vec<(String, u32)>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, sync_attempts FROM messages
                 WHERE synced = 0 AND sync_attempts >= ?1
                 ORDER BY sync_attempts DESC",
            )
            .map_err(AppError::database)?;

        let rows = stmt
            .query_map([attempts], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(AppError::database)?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(AppError::database)
    }
}
