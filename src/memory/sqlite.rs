//! SQLite 记忆存储
//!
//! 时间戳以微秒整数存储；tags 为 JSON 数组文本，标签过滤用 json_each。
//! upsert 使用 ON CONFLICT(namespace, key) … WHERE excluded.updated_at >= memories.updated_at 实现后写者胜出。

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::memory::store::{search_order, value_contains, MemoryStore};
use crate::memory::types::{
    from_micros, now_micros, to_micros, ImportanceLevel, MemoryQuery, MemoryRecord, Namespace,
};
use crate::storage::{SqliteDb, StorageError};

const COLUMNS: &str = "id, namespace, key, value, importance, created_at, updated_at, \
                       last_accessed_at, access_count, tags, expires_at";

pub struct SqliteMemoryStore {
    db: SqliteDb,
}

impl SqliteMemoryStore {
    pub fn new(db: SqliteDb) -> Self {
        Self { db }
    }
}

/// 一行原始列值，转换为 MemoryRecord 时再做校验
struct RawRow {
    id: String,
    namespace: String,
    key: String,
    value: String,
    importance: f64,
    created_at: i64,
    updated_at: i64,
    last_accessed_at: i64,
    access_count: i64,
    tags: String,
    expires_at: Option<i64>,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            namespace: row.get(1)?,
            key: row.get(2)?,
            value: row.get(3)?,
            importance: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            last_accessed_at: row.get(7)?,
            access_count: row.get(8)?,
            tags: row.get(9)?,
            expires_at: row.get(10)?,
        })
    }

    fn into_record(self) -> Result<MemoryRecord, StorageError> {
        let importance = self.importance as f32;
        Ok(MemoryRecord {
            id: self.id,
            namespace: self.namespace.parse()?,
            key: self.key,
            value: serde_json::from_str(&self.value)?,
            importance,
            importance_level: ImportanceLevel::from_score(importance),
            created_at: from_micros(self.created_at)?,
            updated_at: from_micros(self.updated_at)?,
            last_accessed_at: from_micros(self.last_accessed_at)?,
            access_count: self.access_count.max(0) as u64,
            tags: serde_json::from_str(&self.tags)?,
            expires_at: self.expires_at.map(from_micros).transpose()?,
        })
    }
}

fn select_one(conn: &Connection, namespace: &str, key: &str) -> Result<Option<MemoryRecord>, StorageError> {
    let sql = format!("SELECT {} FROM memories WHERE namespace = ?1 AND key = ?2", COLUMNS);
    let raw = conn
        .query_row(&sql, params![namespace, key], RawRow::from_row)
        .optional()?;
    raw.map(RawRow::into_record).transpose()
}

fn collect_rows(
    conn: &Connection,
    sql: &str,
    values: Vec<SqlValue>,
) -> Result<Vec<MemoryRecord>, StorageError> {
    let mut stmt = conn.prepare(sql)?;
    let raws = stmt
        .query_map(params_from_iter(values), RawRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    raws.into_iter().map(RawRow::into_record).collect()
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn upsert(&self, record: MemoryRecord) -> Result<MemoryRecord, StorageError> {
        let r = record.normalized()?;
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO memories (id, namespace, key, value, importance, importance_level,
                         created_at, updated_at, last_accessed_at, access_count, tags, expires_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                     ON CONFLICT(namespace, key) DO UPDATE SET
                         value = excluded.value,
                         importance = excluded.importance,
                         importance_level = excluded.importance_level,
                         updated_at = excluded.updated_at,
                         tags = excluded.tags,
                         expires_at = excluded.expires_at
                     WHERE excluded.updated_at >= memories.updated_at",
                    params![
                        r.id,
                        r.namespace.as_str(),
                        r.key,
                        serde_json::to_string(&r.value)?,
                        r.importance as f64,
                        serde_json::to_string(&r.importance_level)?,
                        to_micros(&r.created_at),
                        to_micros(&r.updated_at),
                        to_micros(&r.last_accessed_at),
                        r.access_count as i64,
                        serde_json::to_string(&r.tags)?,
                        r.expires_at.as_ref().map(to_micros),
                    ],
                )?;
                select_one(conn, r.namespace.as_str(), &r.key)?
                    .ok_or_else(|| StorageError::NotFound(format!("{}/{}", r.namespace, r.key)))
            })
            .await
    }

    async fn get(&self, namespace: &Namespace, key: &str) -> Result<Option<MemoryRecord>, StorageError> {
        let ns = namespace.as_str();
        let key = key.to_string();
        let now = now_micros();
        self.db
            .call(move |conn| {
                let now_us = to_micros(&now);
                conn.execute(
                    "UPDATE memories SET access_count = access_count + 1, last_accessed_at = ?3
                     WHERE namespace = ?1 AND key = ?2
                       AND (expires_at IS NULL OR expires_at > ?3)",
                    params![ns, key, now_us],
                )?;
                Ok(select_one(conn, ns, &key)?.filter(|r| !r.is_expired(now)))
            })
            .await
    }

    async fn touch(&self, namespace: &Namespace, key: &str) -> Result<(), StorageError> {
        let ns = namespace.as_str();
        let key = key.to_string();
        let now_us = to_micros(&now_micros());
        self.db
            .call(move |conn| {
                conn.execute(
                    "UPDATE memories SET access_count = access_count + 1, last_accessed_at = ?3
                     WHERE namespace = ?1 AND key = ?2",
                    params![ns, key, now_us],
                )?;
                Ok(())
            })
            .await
    }

    async fn query(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>, StorageError> {
        let mut clauses = vec!["(expires_at IS NULL OR expires_at > ?)".to_string()];
        let mut values: Vec<SqlValue> = vec![SqlValue::Integer(to_micros(&now_micros()))];

        if let Some(ns) = &query.namespace {
            clauses.push("namespace = ?".to_string());
            values.push(SqlValue::Text(ns.as_str().to_string()));
        }
        if !query.tags_any.is_empty() {
            let marks = vec!["?"; query.tags_any.len()].join(", ");
            clauses.push(format!(
                "EXISTS (SELECT 1 FROM json_each(memories.tags) WHERE json_each.value IN ({}))",
                marks
            ));
            values.extend(query.tags_any.iter().cloned().map(SqlValue::Text));
        }
        if let Some(min) = query.min_importance {
            clauses.push("importance >= ?".to_string());
            values.push(SqlValue::Real(min as f64));
        }

        let mut sql = format!(
            "SELECT {} FROM memories WHERE {} ORDER BY {} {}, id ASC",
            COLUMNS,
            clauses.join(" AND "),
            query.order_by.column(),
            if query.descending { "DESC" } else { "ASC" }
        );
        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            values.push(SqlValue::Integer(limit as i64));
        }

        self.db.call(move |conn| collect_rows(conn, &sql, values)).await
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
        let query = MemoryQuery {
            namespace: namespace.cloned(),
            ..Default::default()
        };
        // SQLite 的 lower() 只处理 ASCII，匹配放在 Rust 侧保证与内存实现一致
        let mut hits: Vec<MemoryRecord> = self
            .query(&query)
            .await?
            .into_iter()
            .filter(|r| value_contains(r, &needle))
            .collect();
        hits.sort_by(search_order);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete(&self, namespace: &Namespace, key: &str) -> Result<bool, StorageError> {
        let ns = namespace.as_str();
        let key = key.to_string();
        self.db
            .call(move |conn| {
                let n = conn.execute(
                    "DELETE FROM memories WHERE namespace = ?1 AND key = ?2",
                    params![ns, key],
                )?;
                Ok(n > 0)
            })
            .await
    }

    async fn clear_namespace(&self, namespace: &Namespace) -> Result<usize, StorageError> {
        let ns = namespace.as_str();
        self.db
            .call(move |conn| Ok(conn.execute("DELETE FROM memories WHERE namespace = ?1", params![ns])?))
            .await
    }

    async fn cleanup(&self, max_age: chrono::Duration, min_importance: f32) -> Result<usize, StorageError> {
        let now = now_micros();
        let now_us = to_micros(&now);
        let cutoff_us = to_micros(&(now - max_age));
        self.db
            .call(move |conn| {
                let n = conn.execute(
                    "DELETE FROM memories
                     WHERE (last_accessed_at < ?1 AND importance < ?2)
                        OR (expires_at IS NOT NULL AND expires_at <= ?3)",
                    params![cutoff_us, min_importance as f64, now_us],
                )?;
                Ok(n)
            })
            .await
    }

    async fn count(&self) -> Result<usize, StorageError> {
        self.db
            .call(|conn| {
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
                Ok(n.max(0) as usize)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn store() -> SqliteMemoryStore {
        SqliteMemoryStore::new(SqliteDb::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn test_sqlite_upsert_keeps_created_at() {
        let store = store();
        let first = store
            .upsert(MemoryRecord::new(Namespace::Facts, "site", serde_json::json!({"url": "a"})))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = store
            .upsert(
                MemoryRecord::new(Namespace::Facts, "site", serde_json::json!({"url": "b"})).with_importance(0.8),
            )
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.value, serde_json::json!({"url": "b"}));
        assert_eq!(second.importance, 0.8);
    }

    #[tokio::test]
    async fn test_sqlite_round_trip_fields() {
        let store = store();
        let record = MemoryRecord::new(Namespace::Custom, "k", serde_json::json!([1, 2, 3]))
            .with_importance(0.65)
            .with_tags(["ui", "login"])
            .expires_at(now_micros() + Duration::days(1));
        let stored = store.upsert(record.clone()).await.unwrap();
        let normalized = record.normalized().unwrap();
        assert_eq!(stored, normalized);
    }

    #[tokio::test]
    async fn test_sqlite_query_filters_and_order() {
        let store = store();
        for (key, imp, tags) in [
            ("a", 0.2_f32, vec!["x"]),
            ("b", 0.9, vec!["y"]),
            ("c", 0.6, vec!["x", "z"]),
        ] {
            store
                .upsert(
                    MemoryRecord::new(Namespace::Facts, key, serde_json::json!(key))
                        .with_importance(imp)
                        .with_tags(tags),
                )
                .await
                .unwrap();
        }
        store
            .upsert(MemoryRecord::new(Namespace::Preferences, "p", serde_json::json!("p")))
            .await
            .unwrap();

        let by_importance = store
            .query(&MemoryQuery::namespace(Namespace::Facts).order_by(crate::memory::OrderBy::Importance, true))
            .await
            .unwrap();
        let keys: Vec<&str> = by_importance.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "c", "a"]);

        let tagged = store
            .query(&MemoryQuery::namespace(Namespace::Facts).tags_any(["x"]).min_importance(0.5))
            .await
            .unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].key, "c");

        let limited = store.query(&MemoryQuery::default().limit(2)).await.unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_sqlite_cleanup_and_search() {
        let store = store();
        let old = now_micros() - Duration::days(60);
        let mut stale = MemoryRecord::new(Namespace::Facts, "stale", serde_json::json!("Old Fact")).with_importance(0.1);
        stale.created_at = old;
        stale.updated_at = old;
        stale.last_accessed_at = old;
        store.upsert(stale).await.unwrap();
        store
            .upsert(MemoryRecord::new(Namespace::Facts, "fresh", serde_json::json!("Fresh FACT")).with_importance(0.1))
            .await
            .unwrap();

        assert_eq!(store.search("fact", None, 10).await.unwrap().len(), 2);
        assert_eq!(store.cleanup(Duration::days(30), 0.3).await.unwrap(), 1);
        let left = store.search("fact", Some(&Namespace::Facts), 10).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].key, "fresh");
    }

    #[tokio::test]
    async fn test_sqlite_delete_and_clear() {
        let store = store();
        store
            .upsert(MemoryRecord::new(Namespace::Custom, "a", serde_json::json!(1)))
            .await
            .unwrap();
        store
            .upsert(MemoryRecord::new(Namespace::Custom, "b", serde_json::json!(2)))
            .await
            .unwrap();
        assert!(store.delete(&Namespace::Custom, "a").await.unwrap());
        assert!(!store.delete(&Namespace::Custom, "a").await.unwrap());
        assert_eq!(store.clear_namespace(&Namespace::Custom).await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
