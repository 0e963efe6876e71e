//! 进程内检查点存储
//!
//! 状态同样以 JSON 文本保存，与 SQLite 实现的快照语义一致（写入后不受调用方后续修改影响）。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::checkpoint::store::CheckpointStore;
use crate::checkpoint::types::{new_checkpoint_id, new_thread_id, Checkpoint, CheckpointMeta, ThreadInfo};
use crate::core::SessionState;
use crate::storage::StorageError;

struct ThreadEntry {
    info: ThreadInfo,
    /// 按 step 升序
    checkpoints: Vec<(Checkpoint, String)>,
}

impl ThreadEntry {
    fn new(thread_id: String, title: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            info: ThreadInfo {
                thread_id,
                title,
                created_at: now,
                updated_at: now,
            },
            checkpoints: Vec::new(),
        }
    }
}

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    threads: RwLock<HashMap<String, ThreadEntry>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn create_thread(&self, thread_id: Option<&str>, title: Option<&str>) -> Result<ThreadInfo, StorageError> {
        let id = thread_id.map(str::to_string).unwrap_or_else(new_thread_id);
        let mut threads = self.threads.write().await;
        let entry = threads
            .entry(id.clone())
            .or_insert_with(|| ThreadEntry::new(id, title.map(str::to_string)));
        Ok(entry.info.clone())
    }

    async fn list_threads(&self) -> Result<Vec<ThreadInfo>, StorageError> {
        let threads = self.threads.read().await;
        let mut out: Vec<ThreadInfo> = threads.values().map(|e| e.info.clone()).collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    async fn append_checkpoint(
        &self,
        thread_id: &str,
        state: &SessionState,
        meta: CheckpointMeta,
    ) -> Result<Checkpoint, StorageError> {
        let blob = serde_json::to_string(state)?;
        let mut threads = self.threads.write().await;
        let entry = threads
            .entry(thread_id.to_string())
            .or_insert_with(|| ThreadEntry::new(thread_id.to_string(), None));
        let step = entry.checkpoints.last().map(|(c, _)| c.step + 1).unwrap_or(0);
        let checkpoint = Checkpoint {
            thread_id: thread_id.to_string(),
            checkpoint_id: new_checkpoint_id(),
            parent_checkpoint_id: meta.parent_checkpoint_id,
            step,
            created_at: Utc::now(),
            message_preview: meta.message_preview,
            is_user_message: meta.is_user_message,
        };
        entry.info.updated_at = checkpoint.created_at;
        entry.checkpoints.push((checkpoint.clone(), blob));
        Ok(checkpoint)
    }

    async fn get_history(&self, thread_id: &str) -> Result<Vec<Checkpoint>, StorageError> {
        let threads = self.threads.read().await;
        Ok(threads
            .get(thread_id)
            .map(|e| e.checkpoints.iter().rev().map(|(c, _)| c.clone()).collect())
            .unwrap_or_default())
    }

    async fn get_state_at(&self, thread_id: &str, checkpoint_id: &str) -> Result<SessionState, StorageError> {
        let threads = self.threads.read().await;
        let blob = threads
            .get(thread_id)
            .and_then(|e| e.checkpoints.iter().find(|(c, _)| c.checkpoint_id == checkpoint_id))
            .map(|(_, s)| s)
            .ok_or_else(|| StorageError::NotFound(format!("checkpoint {}/{}", thread_id, checkpoint_id)))?;
        Ok(serde_json::from_str(blob)?)
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<(Checkpoint, SessionState)>, StorageError> {
        let threads = self.threads.read().await;
        match threads.get(thread_id).and_then(|e| e.checkpoints.last()) {
            Some((c, blob)) => Ok(Some((c.clone(), serde_json::from_str(blob)?))),
            None => Ok(None),
        }
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<bool, StorageError> {
        Ok(self.threads.write().await.remove(thread_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_steps_are_totally_ordered() {
        let store = InMemoryCheckpointStore::new();
        let mut state = SessionState::new("goal");
        let c0 = store
            .append_checkpoint("t", &state, CheckpointMeta::new("goal").user())
            .await
            .unwrap();
        state.iteration_count = 1;
        let c1 = store
            .append_checkpoint("t", &state, CheckpointMeta::new("step").parent(Some(c0.checkpoint_id.clone())))
            .await
            .unwrap();
        assert_eq!((c0.step, c1.step), (0, 1));
        assert_eq!(c1.parent_checkpoint_id.as_deref(), Some(c0.checkpoint_id.as_str()));

        let history = store.get_history("t").await.unwrap();
        assert_eq!(history[0].checkpoint_id, c1.checkpoint_id);
        assert_eq!(store.get_state_at("t", &c0.checkpoint_id).await.unwrap().iteration_count, 0);
        assert_eq!(store.latest("t").await.unwrap().unwrap().1, state);
    }

    #[tokio::test]
    async fn test_create_thread_is_idempotent() {
        let store = InMemoryCheckpointStore::new();
        let a = store.create_thread(Some("t1"), Some("first")).await.unwrap();
        let b = store.create_thread(Some("t1"), Some("second")).await.unwrap();
        assert_eq!(a, b);
        let generated = store.create_thread(None, None).await.unwrap();
        assert!(generated.thread_id.starts_with("thread_"));
        assert_eq!(store.list_threads().await.unwrap().len(), 2);
        assert!(store.delete_thread("t1").await.unwrap());
        assert!(store.get_history("t1").await.unwrap().is_empty());
        assert!(store.get_state_at("t1", "nope").await.is_err());
    }
}
