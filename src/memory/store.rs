//! 记忆存储 trait
//!
//! 两个实现：SqliteMemoryStore（持久化）与 InMemoryMemoryStore（进程内），在构造时选定。

use async_trait::async_trait;

use crate::memory::types::{MemoryQuery, MemoryRecord, Namespace};
use crate::storage::StorageError;

/// 长期记忆存储
///
/// 同一 (namespace, key) 的写入为 upsert：以 updated_at 为序，后写者胜出，created_at 保持不变。
/// 读取时已过期（expires_at 已到）的记录不可见。
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// 写入或更新，返回存储后的记录
    async fn upsert(&self, record: MemoryRecord) -> Result<MemoryRecord, StorageError>;

    /// 读取单条并记一次访问
    async fn get(&self, namespace: &Namespace, key: &str) -> Result<Option<MemoryRecord>, StorageError>;

    /// 记一次访问（access_count + 1，刷新 last_accessed_at）
    async fn touch(&self, namespace: &Namespace, key: &str) -> Result<(), StorageError>;

    async fn query(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>, StorageError>;

    /// 对序列化后的 value 做不区分大小写的子串匹配；按重要性、更新时间降序
    async fn search(
        &self,
        text: &str,
        namespace: Option<&Namespace>,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, StorageError>;

    async fn delete(&self, namespace: &Namespace, key: &str) -> Result<bool, StorageError>;

    async fn clear_namespace(&self, namespace: &Namespace) -> Result<usize, StorageError>;

    /// 删除「超过 max_age 未访问且重要性低于 min_importance」的记录，以及所有已过期记录
    async fn cleanup(&self, max_age: chrono::Duration, min_importance: f32) -> Result<usize, StorageError>;

    async fn count(&self) -> Result<usize, StorageError>;
}

/// 序列化后的 value 是否包含 needle（needle 已转小写）
pub(crate) fn value_contains(record: &MemoryRecord, needle_lower: &str) -> bool {
    record.value.to_string().to_lowercase().contains(needle_lower)
}

/// 检索结果排序：重要性降序，其次更新时间降序
pub(crate) fn search_order(a: &MemoryRecord, b: &MemoryRecord) -> std::cmp::Ordering {
    b.importance
        .total_cmp(&a.importance)
        .then_with(|| b.updated_at.cmp(&a.updated_at))
}
