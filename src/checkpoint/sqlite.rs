//! SQLite 检查点存储
//!
//! threads / checkpoints 两张表；(thread_id, step) 唯一约束保证线程内全序，
//! step 的计算与插入在同一事务内完成。

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use crate::checkpoint::store::CheckpointStore;
use crate::checkpoint::types::{new_checkpoint_id, new_thread_id, Checkpoint, CheckpointMeta, ThreadInfo};
use crate::core::SessionState;
use crate::storage::{SqliteDb, StorageError};

const CHECKPOINT_COLUMNS: &str =
    "thread_id, checkpoint_id, parent_checkpoint_id, step, created_at, message_preview, is_user_message";

pub struct SqliteCheckpointStore {
    db: SqliteDb,
}

impl SqliteCheckpointStore {
    pub fn new(db: SqliteDb) -> Self {
        Self { db }
    }
}

fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Invalid(format!("bad timestamp {}: {}", s, e)))
}

struct RawCheckpoint {
    thread_id: String,
    checkpoint_id: String,
    parent_checkpoint_id: Option<String>,
    step: i64,
    created_at: String,
    message_preview: String,
    is_user_message: bool,
}

impl RawCheckpoint {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            thread_id: row.get(0)?,
            checkpoint_id: row.get(1)?,
            parent_checkpoint_id: row.get(2)?,
            step: row.get(3)?,
            created_at: row.get(4)?,
            message_preview: row.get(5)?,
            is_user_message: row.get(6)?,
        })
    }

    fn into_checkpoint(self) -> Result<Checkpoint, StorageError> {
        Ok(Checkpoint {
            thread_id: self.thread_id,
            checkpoint_id: self.checkpoint_id,
            parent_checkpoint_id: self.parent_checkpoint_id,
            step: self.step.max(0) as u64,
            created_at: parse_ts(&self.created_at)?,
            message_preview: self.message_preview,
            is_user_message: self.is_user_message,
        })
    }
}

fn thread_from_row(row: &Row<'_>) -> rusqlite::Result<(String, Option<String>, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_thread(raw: (String, Option<String>, String, String)) -> Result<ThreadInfo, StorageError> {
    let (thread_id, title, created_at, updated_at) = raw;
    Ok(ThreadInfo {
        thread_id,
        title,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

fn select_thread(conn: &Connection, thread_id: &str) -> Result<Option<ThreadInfo>, StorageError> {
    conn.query_row(
        "SELECT thread_id, title, created_at, updated_at FROM threads WHERE thread_id = ?1",
        params![thread_id],
        thread_from_row,
    )
    .optional()?
    .map(into_thread)
    .transpose()
}

fn ensure_thread(conn: &Connection, thread_id: &str, title: Option<&str>) -> Result<(), StorageError> {
    let now = ts(&Utc::now());
    conn.execute(
        "INSERT OR IGNORE INTO threads (thread_id, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
        params![thread_id, title, now],
    )?;
    Ok(())
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn create_thread(&self, thread_id: Option<&str>, title: Option<&str>) -> Result<ThreadInfo, StorageError> {
        let id = thread_id.map(str::to_string).unwrap_or_else(new_thread_id);
        let title = title.map(str::to_string);
        self.db
            .call(move |conn| {
                ensure_thread(conn, &id, title.as_deref())?;
                select_thread(conn, &id)?.ok_or_else(|| StorageError::NotFound(format!("thread {}", id)))
            })
            .await
    }

    async fn list_threads(&self) -> Result<Vec<ThreadInfo>, StorageError> {
        self.db
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT thread_id, title, created_at, updated_at FROM threads ORDER BY updated_at DESC",
                )?;
                let raws = stmt
                    .query_map([], thread_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                raws.into_iter().map(into_thread).collect()
            })
            .await
    }

    async fn append_checkpoint(
        &self,
        thread_id: &str,
        state: &SessionState,
        meta: CheckpointMeta,
    ) -> Result<Checkpoint, StorageError> {
        let blob = serde_json::to_string(state)?;
        let thread_id = thread_id.to_string();
        self.db
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                ensure_thread(&tx, &thread_id, None)?;
                let max_step: Option<i64> = tx.query_row(
                    "SELECT MAX(step) FROM checkpoints WHERE thread_id = ?1",
                    params![thread_id],
                    |row| row.get(0),
                )?;
                let checkpoint = Checkpoint {
                    thread_id: thread_id.clone(),
                    checkpoint_id: new_checkpoint_id(),
                    parent_checkpoint_id: meta.parent_checkpoint_id,
                    step: max_step.map(|s| s + 1).unwrap_or(0).max(0) as u64,
                    created_at: Utc::now(),
                    message_preview: meta.message_preview,
                    is_user_message: meta.is_user_message,
                };
                let created = ts(&checkpoint.created_at);
                tx.execute(
                    "INSERT INTO checkpoints (thread_id, checkpoint_id, parent_checkpoint_id, step,
                         created_at, message_preview, is_user_message, state)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        checkpoint.thread_id,
                        checkpoint.checkpoint_id,
                        checkpoint.parent_checkpoint_id,
                        checkpoint.step as i64,
                        created,
                        checkpoint.message_preview,
                        checkpoint.is_user_message,
                        blob,
                    ],
                )?;
                tx.execute(
                    "UPDATE threads SET updated_at = ?2 WHERE thread_id = ?1",
                    params![checkpoint.thread_id, created],
                )?;
                tx.commit()?;
                Ok(checkpoint)
            })
            .await
    }

    async fn get_history(&self, thread_id: &str) -> Result<Vec<Checkpoint>, StorageError> {
        let thread_id = thread_id.to_string();
        self.db
            .call(move |conn| {
                let sql = format!(
                    "SELECT {} FROM checkpoints WHERE thread_id = ?1 ORDER BY step DESC",
                    CHECKPOINT_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let raws = stmt
                    .query_map(params![thread_id], RawCheckpoint::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                raws.into_iter().map(RawCheckpoint::into_checkpoint).collect()
            })
            .await
    }

    async fn get_state_at(&self, thread_id: &str, checkpoint_id: &str) -> Result<SessionState, StorageError> {
        let thread_id = thread_id.to_string();
        let checkpoint_id = checkpoint_id.to_string();
        self.db
            .call(move |conn| {
                let blob: Option<String> = conn
                    .query_row(
                        "SELECT state FROM checkpoints WHERE thread_id = ?1 AND checkpoint_id = ?2",
                        params![thread_id, checkpoint_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                let blob = blob.ok_or_else(|| {
                    StorageError::NotFound(format!("checkpoint {}/{}", thread_id, checkpoint_id))
                })?;
                Ok(serde_json::from_str(&blob)?)
            })
            .await
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<(Checkpoint, SessionState)>, StorageError> {
        let thread_id = thread_id.to_string();
        self.db
            .call(move |conn| {
                let sql = format!(
                    "SELECT {}, state FROM checkpoints WHERE thread_id = ?1 ORDER BY step DESC LIMIT 1",
                    CHECKPOINT_COLUMNS
                );
                let raw = conn
                    .query_row(&sql, params![thread_id], |row| {
                        Ok((RawCheckpoint::from_row(row)?, row.get::<_, String>(7)?))
                    })
                    .optional()?;
                match raw {
                    Some((c, blob)) => Ok(Some((c.into_checkpoint()?, serde_json::from_str(&blob)?))),
                    None => Ok(None),
                }
            })
            .await
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<bool, StorageError> {
        let thread_id = thread_id.to_string();
        self.db
            .call(move |conn| {
                conn.execute("DELETE FROM checkpoints WHERE thread_id = ?1", params![thread_id])?;
                let n = conn.execute("DELETE FROM threads WHERE thread_id = ?1", params![thread_id])?;
                Ok(n > 0)
            })
            .await
    }
}
