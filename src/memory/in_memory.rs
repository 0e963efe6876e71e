//! 进程内记忆存储（无持久化，适合测试与 storage.backend = "memory"）

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::memory::store::{search_order, value_contains, MemoryStore};
use crate::memory::types::{now_micros, MemoryQuery, MemoryRecord, Namespace};
use crate::storage::StorageError;

type Key = (Namespace, String);

#[derive(Default)]
pub struct InMemoryMemoryStore {
    records: RwLock<HashMap<Key, MemoryRecord>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn upsert(&self, record: MemoryRecord) -> Result<MemoryRecord, StorageError> {
        let record = record.normalized()?;
        let mut records = self.records.write().await;
        let key = (record.namespace.clone(), record.key.clone());
        let stored = match records.get_mut(&key) {
            Some(existing) => {
                if record.updated_at >= existing.updated_at {
                    existing.value = record.value;
                    existing.importance = record.importance;
                    existing.importance_level = record.importance_level;
                    existing.updated_at = record.updated_at;
                    existing.tags = record.tags;
                    existing.expires_at = record.expires_at;
                } else {
                    tracing::debug!(namespace = %key.0, key = %key.1, "stale memory write ignored");
                }
                existing.clone()
            }
            None => {
                records.insert(key, record.clone());
                record
            }
        };
        Ok(stored)
    }

    async fn get(&self, namespace: &Namespace, key: &str) -> Result<Option<MemoryRecord>, StorageError> {
        let now = now_micros();
        let mut records = self.records.write().await;
        match records.get_mut(&(namespace.clone(), key.to_string())) {
            Some(r) if !r.is_expired(now) => {
                r.access_count += 1;
                r.last_accessed_at = now;
                Ok(Some(r.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn touch(&self, namespace: &Namespace, key: &str) -> Result<(), StorageError> {
        let mut records = self.records.write().await;
        if let Some(r) = records.get_mut(&(namespace.clone(), key.to_string())) {
            r.access_count += 1;
            r.last_accessed_at = now_micros();
        }
        Ok(())
    }

    async fn query(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>, StorageError> {
        let now = now_micros();
        let records = self.records.read().await;
        let mut out: Vec<MemoryRecord> = records
            .values()
            .filter(|r| !r.is_expired(now) && query.matches(r))
            .cloned()
            .collect();
        out.sort_by(|a, b| query.compare(a, b));
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn search(
        &self,
        text: &str,
        namespace: Option<&Namespace>,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, StorageError> {
        let needle = text.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let now = now_micros();
        let records = self.records.read().await;
        let mut out: Vec<MemoryRecord> = records
            .values()
            .filter(|r| !r.is_expired(now))
            .filter(|r| namespace.map(|ns| &r.namespace == ns).unwrap_or(true))
            .filter(|r| value_contains(r, &needle))
            .cloned()
            .collect();
        out.sort_by(search_order);
        out.truncate(limit);
        Ok(out)
    }

    async fn delete(&self, namespace: &Namespace, key: &str) -> Result<bool, StorageError> {
        let mut records = self.records.write().await;
        Ok(records.remove(&(namespace.clone(), key.to_string())).is_some())
    }

    async fn clear_namespace(&self, namespace: &Namespace) -> Result<usize, StorageError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|(ns, _), _| ns != namespace);
        Ok(before - records.len())
    }

    async fn cleanup(&self, max_age: chrono::Duration, min_importance: f32) -> Result<usize, StorageError> {
        let now = now_micros();
        let cutoff = now - max_age;
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| {
            let stale = r.last_accessed_at < cutoff && r.importance < min_importance;
            !(stale || r.is_expired(now))
        });
        Ok(before - records.len())
    }

    async fn count(&self) -> Result<usize, StorageError> {
        Ok(self.records.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::memory::types::ImportanceLevel;

    #[tokio::test]
    async fn test_upsert_keeps_created_at() {
        let store = InMemoryMemoryStore::new();
        let first = store
            .upsert(MemoryRecord::new(Namespace::Facts, "site", serde_json::json!("example.com")).with_importance(0.4))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = store
            .upsert(MemoryRecord::new(Namespace::Facts, "site", serde_json::json!("example.org")).with_importance(0.9))
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.id, first.id);
        assert_eq!(second.value, serde_json::json!("example.org"));
        assert_eq!(second.importance_level, ImportanceLevel::High);
    }

    #[tokio::test]
    async fn test_older_write_loses() {
        let store = InMemoryMemoryStore::new();
        let mut old = MemoryRecord::new(Namespace::Facts, "k", serde_json::json!("old"));
        old.updated_at = old.updated_at - Duration::seconds(10);
        store
            .upsert(MemoryRecord::new(Namespace::Facts, "k", serde_json::json!("new")))
            .await
            .unwrap();
        let stored = store.upsert(old).await.unwrap();
        assert_eq!(stored.value, serde_json::json!("new"));
    }

    #[tokio::test]
    async fn test_cleanup_is_conjunction_plus_expiry() {
        let store = InMemoryMemoryStore::new();
        let old = now_micros() - Duration::days(40);
        let aged = |key: &str, importance: f32| {
            let mut r = MemoryRecord::new(Namespace::Facts, key, serde_json::json!(key)).with_importance(importance);
            r.created_at = old;
            r.updated_at = old;
            r.last_accessed_at = old;
            r
        };
        store.upsert(aged("old-low", 0.1)).await.unwrap();
        store.upsert(aged("old-high", 0.9)).await.unwrap();
        store
            .upsert(MemoryRecord::new(Namespace::Facts, "new-low", serde_json::json!(1)).with_importance(0.1))
            .await
            .unwrap();
        store
            .upsert(
                MemoryRecord::new(Namespace::Facts, "expired-critical", serde_json::json!(2))
                    .with_level(ImportanceLevel::Critical)
                    .expires_at(now_micros() - Duration::seconds(1)),
            )
            .await
            .unwrap();

        let deleted = store.cleanup(Duration::days(30), 0.3).await.unwrap();
        assert_eq!(deleted, 2);
        assert!(store.get(&Namespace::Facts, "old-high").await.unwrap().is_some());
        assert!(store.get(&Namespace::Facts, "new-low").await.unwrap().is_some());
        assert!(store.get(&Namespace::Facts, "old-low").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_case_insensitive() {
        let store = InMemoryMemoryStore::new();
        store
            .upsert(MemoryRecord::new(
                Namespace::Facts,
                "login",
                serde_json::json!("The Login button is #btn-login"),
            ))
            .await
            .unwrap();
        let hits = store.search("LOGIN BUTTON", None, 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(store.search("logout", None, 5).await.unwrap().is_empty());
        assert!(store
            .search("login", Some(&Namespace::Preferences), 5)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_get_tracks_access() {
        let store = InMemoryMemoryStore::new();
        store
            .upsert(MemoryRecord::new(Namespace::Preferences, "lang", serde_json::json!("zh")))
            .await
            .unwrap();
        store.get(&Namespace::Preferences, "lang").await.unwrap();
        let r = store.get(&Namespace::Preferences, "lang").await.unwrap().unwrap();
        assert_eq!(r.access_count, 2);
    }
}
