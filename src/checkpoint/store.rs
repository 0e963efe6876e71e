//! 检查点存储 trait

use async_trait::async_trait;

use crate::checkpoint::types::{Checkpoint, CheckpointMeta, ThreadInfo};
use crate::core::SessionState;
use crate::storage::StorageError;

/// 检查点存储：每个线程内只追加，按 step 全序
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// 创建线程；id 为空时生成新 id，已存在时返回现有线程
    async fn create_thread(&self, thread_id: Option<&str>, title: Option<&str>) -> Result<ThreadInfo, StorageError>;

    /// 按最近更新排序
    async fn list_threads(&self) -> Result<Vec<ThreadInfo>, StorageError>;

    /// 追加一个检查点（线程不存在时自动创建），step 取当前最大值 + 1，首个为 0
    async fn append_checkpoint(
        &self,
        thread_id: &str,
        state: &SessionState,
        meta: CheckpointMeta,
    ) -> Result<Checkpoint, StorageError>;

    /// 线程历史，最近的在前
    async fn get_history(&self, thread_id: &str) -> Result<Vec<Checkpoint>, StorageError>;

    async fn get_state_at(&self, thread_id: &str, checkpoint_id: &str) -> Result<SessionState, StorageError>;

    /// 最新检查点及其状态
    async fn latest(&self, thread_id: &str) -> Result<Option<(Checkpoint, SessionState)>, StorageError>;

    async fn delete_thread(&self, thread_id: &str) -> Result<bool, StorageError>;
}
