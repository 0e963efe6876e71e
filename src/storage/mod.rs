//! 存储层：错误类型、SQLite 封装，以及按配置选择持久化 / 内存实现
//!
//! 存储后端在构造时确定；数据库打不开时直接返回错误，不在运行时静默降级。

pub mod sqlite;

use std::sync::Arc;

use thiserror::Error;

use crate::checkpoint::{CheckpointStore, InMemoryCheckpointStore, SqliteCheckpointStore};
use crate::config::{StorageBackend, StorageSection};
use crate::memory::{InMemoryMemoryStore, MemoryStore, SqliteMemoryStore};

pub use sqlite::SqliteDb;

/// 记忆库 / 检查点存储错误
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid record: {0}")]
    Invalid(String),

    #[error("Storage lock poisoned")]
    Poisoned,

    #[error("Blocking task failed: {0}")]
    Join(String),
}

/// 按 [storage] 配置打开记忆库与检查点存储
pub fn open_stores(
    section: &StorageSection,
) -> Result<(Arc<dyn MemoryStore>, Arc<dyn CheckpointStore>), StorageError> {
    match section.backend {
        StorageBackend::Sqlite => {
            let db = SqliteDb::open(&section.db_path)?;
            tracing::info!("Using SQLite storage: {:?}", section.db_path);
            Ok((
                Arc::new(SqliteMemoryStore::new(db.clone())),
                Arc::new(SqliteCheckpointStore::new(db)),
            ))
        }
        StorageBackend::Memory => {
            tracing::info!("Using in-memory storage");
            Ok((
                Arc::new(InMemoryMemoryStore::new()),
                Arc::new(InMemoryCheckpointStore::new()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_stores_memory_backend() {
        let section = StorageSection {
            backend: StorageBackend::Memory,
            db_path: "unused.db".into(),
        };
        let (_memory, checkpoints) = open_stores(&section).unwrap();
        assert!(checkpoints.list_threads().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_stores_sqlite_backend() {
        let dir = tempfile::TempDir::new().unwrap();
        let section = StorageSection {
            backend: StorageBackend::Sqlite,
            db_path: dir.path().join("pilot.db"),
        };
        let (_memory, checkpoints) = open_stores(&section).unwrap();
        checkpoints.create_thread(Some("t1"), Some("demo")).await.unwrap();
        assert_eq!(checkpoints.list_threads().await.unwrap().len(), 1);
        assert!(dir.path().join("pilot.db").exists());
    }
}
