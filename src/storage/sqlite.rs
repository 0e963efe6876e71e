//! SQLite 连接封装
//!
//! rusqlite 是同步库：连接放在 Arc<Mutex<_>> 中，每次调用在 spawn_blocking 里执行，避免阻塞 async 运行时。
//! 互斥锁同时保证写入串行化。

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::storage::StorageError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    namespace TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    importance REAL NOT NULL,
    importance_level TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    last_accessed_at INTEGER NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0,
    tags TEXT NOT NULL DEFAULT '[]',
    expires_at INTEGER,
    UNIQUE (namespace, key)
);
CREATE INDEX IF NOT EXISTS idx_memories_namespace ON memories(namespace);
CREATE INDEX IF NOT EXISTS idx_memories_importance ON memories(importance);

CREATE TABLE IF NOT EXISTS threads (
    thread_id TEXT PRIMARY KEY,
    title TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS checkpoints (
    thread_id TEXT NOT NULL,
    checkpoint_id TEXT NOT NULL,
    parent_checkpoint_id TEXT,
    step INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    message_preview TEXT NOT NULL,
    is_user_message INTEGER NOT NULL,
    state TEXT NOT NULL,
    PRIMARY KEY (thread_id, checkpoint_id),
    UNIQUE (thread_id, step),
    FOREIGN KEY (thread_id) REFERENCES threads(thread_id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_checkpoints_thread ON checkpoints(thread_id, step);
";

/// 共享的 SQLite 句柄（记忆库与检查点各持一个 clone，共用同一文件）
#[derive(Clone)]
pub struct SqliteDb {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDb {
    /// 打开（或创建）数据库文件并初始化表；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::Invalid(format!("create {:?}: {}", parent, e)))?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// 内存数据库（测试用）
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 在阻塞线程池上持锁执行一段数据库操作
    pub async fn call<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StorageError::Poisoned)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::Join(e.to_string()))?
    }
}
