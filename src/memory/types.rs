//! 长期记忆记录类型
//!
//! 记录以 (namespace, key) 唯一；importance 与 importance_level 始终一致（等级由分数推导）。
//! 时间戳统一截断到微秒，保证内存实现与 SQLite 实现读回一致。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, DurationRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::StorageError;

/// 记忆命名空间
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    Preferences,
    Facts,
    TaskSummary,
    LearnedPaths,
    Custom,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Preferences => "preferences",
            Namespace::Facts => "facts",
            Namespace::TaskSummary => "task_summary",
            Namespace::LearnedPaths => "learned_paths",
            Namespace::Custom => "custom",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preferences" => Ok(Namespace::Preferences),
            "facts" => Ok(Namespace::Facts),
            "task_summary" => Ok(Namespace::TaskSummary),
            "learned_paths" => Ok(Namespace::LearnedPaths),
            "custom" => Ok(Namespace::Custom),
            other => Err(StorageError::Invalid(format!("unknown namespace {}", other))),
        }
    }
}

/// 粗粒度重要性等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportanceLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl ImportanceLevel {
    pub fn score(&self) -> f32 {
        match self {
            ImportanceLevel::Low => 0.2,
            ImportanceLevel::Medium => 0.5,
            ImportanceLevel::High => 0.8,
            ImportanceLevel::Critical => 1.0,
        }
    }

    /// 由分数推导等级：取不超过分数的最高档，低于 0.5 一律为 Low
    pub fn from_score(score: f32) -> Self {
        if score >= 1.0 {
            ImportanceLevel::Critical
        } else if score >= 0.8 {
            ImportanceLevel::High
        } else if score >= 0.5 {
            ImportanceLevel::Medium
        } else {
            ImportanceLevel::Low
        }
    }
}

/// 校验分数范围 [0, 1]
pub fn validate_importance(score: f32) -> Result<f32, StorageError> {
    if score.is_finite() && (0.0..=1.0).contains(&score) {
        Ok(score)
    } else {
        Err(StorageError::Invalid(format!("importance {} outside [0, 1]", score)))
    }
}

/// 当前时间（微秒精度）
pub fn now_micros() -> DateTime<Utc> {
    truncate_micros(Utc::now())
}

pub fn truncate_micros(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(Duration::microseconds(1)).unwrap_or(t)
}

pub fn to_micros(t: &DateTime<Utc>) -> i64 {
    t.timestamp_micros()
}

pub fn from_micros(v: i64) -> Result<DateTime<Utc>, StorageError> {
    Utc.timestamp_micros(v)
        .single()
        .ok_or_else(|| StorageError::Invalid(format!("bad timestamp {}", v)))
}

/// 一条长期记忆
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub namespace: Namespace,
    pub key: String,
    pub value: serde_json::Value,
    pub importance: f32,
    pub importance_level: ImportanceLevel,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    pub tags: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl MemoryRecord {
    pub fn new(namespace: Namespace, key: impl Into<String>, value: serde_json::Value) -> Self {
        let now = now_micros();
        Self {
            id: format!("mem_{}", uuid::Uuid::new_v4().simple()),
            namespace,
            key: key.into(),
            value,
            importance: ImportanceLevel::Medium.score(),
            importance_level: ImportanceLevel::Medium,
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
            access_count: 0,
            tags: Vec::new(),
            expires_at: None,
        }
    }

    /// 设置分数（越界截断到 [0, 1]），同步等级
    pub fn with_importance(mut self, score: f32) -> Self {
        let score = if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.5 };
        self.importance = score;
        self.importance_level = ImportanceLevel::from_score(score);
        self
    }

    /// 按等级设置，分数取该等级的标准值
    pub fn with_level(mut self, level: ImportanceLevel) -> Self {
        self.importance = level.score();
        self.importance_level = level;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(truncate_micros(at));
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|t| t <= now).unwrap_or(false)
    }

    /// 写入前规整：校验分数、重新推导等级、时间戳截断到微秒
    pub fn normalized(mut self) -> Result<Self, StorageError> {
        if self.key.trim().is_empty() {
            return Err(StorageError::Invalid("memory key must not be empty".to_string()));
        }
        self.importance = validate_importance(self.importance)?;
        self.importance_level = ImportanceLevel::from_score(self.importance);
        self.created_at = truncate_micros(self.created_at);
        self.updated_at = truncate_micros(self.updated_at);
        self.last_accessed_at = truncate_micros(self.last_accessed_at);
        self.expires_at = self.expires_at.map(truncate_micros);
        Ok(self)
    }

    /// 值的文本形式（字符串不带引号），用于检索与上下文渲染
    pub fn value_text(&self) -> String {
        match &self.value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// 排序字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderBy {
    CreatedAt,
    #[default]
    UpdatedAt,
    LastAccessedAt,
    AccessCount,
    Importance,
}

impl OrderBy {
    pub fn column(&self) -> &'static str {
        match self {
            OrderBy::CreatedAt => "created_at",
            OrderBy::UpdatedAt => "updated_at",
            OrderBy::LastAccessedAt => "last_accessed_at",
            OrderBy::AccessCount => "access_count",
            OrderBy::Importance => "importance",
        }
    }
}

/// 查询条件
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    pub namespace: Option<Namespace>,
    /// 任一标签命中即可
    pub tags_any: Vec<String>,
    pub min_importance: Option<f32>,
    pub order_by: OrderBy,
    pub descending: bool,
    pub limit: Option<usize>,
}

impl MemoryQuery {
    pub fn namespace(ns: Namespace) -> Self {
        Self {
            namespace: Some(ns),
            descending: true,
            ..Default::default()
        }
    }

    pub fn tags_any<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags_any = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn min_importance(mut self, min: f32) -> Self {
        self.min_importance = Some(min);
        self
    }

    pub fn order_by(mut self, order: OrderBy, descending: bool) -> Self {
        self.order_by = order;
        self.descending = descending;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// 内存实现使用的过滤
    pub fn matches(&self, r: &MemoryRecord) -> bool {
        if let Some(ns) = &self.namespace {
            if &r.namespace != ns {
                return false;
            }
        }
        if !self.tags_any.is_empty() && !r.tags.iter().any(|t| self.tags_any.contains(t)) {
            return false;
        }
        if let Some(min) = self.min_importance {
            if r.importance < min {
                return false;
            }
        }
        true
    }

    /// 内存实现使用的排序比较
    pub fn compare(&self, a: &MemoryRecord, b: &MemoryRecord) -> std::cmp::Ordering {
        let ord = match self.order_by {
            OrderBy::CreatedAt => a.created_at.cmp(&b.created_at),
            OrderBy::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            OrderBy::LastAccessedAt => a.last_accessed_at.cmp(&b.last_accessed_at),
            OrderBy::AccessCount => a.access_count.cmp(&b.access_count),
            OrderBy::Importance => a.importance.total_cmp(&b.importance),
        };
        if self.descending {
            ord.reverse()
        } else {
            ord
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_derived_from_score() {
        assert_eq!(ImportanceLevel::from_score(0.2), ImportanceLevel::Low);
        assert_eq!(ImportanceLevel::from_score(0.49), ImportanceLevel::Low);
        assert_eq!(ImportanceLevel::from_score(0.5), ImportanceLevel::Medium);
        assert_eq!(ImportanceLevel::from_score(0.8), ImportanceLevel::High);
        assert_eq!(ImportanceLevel::from_score(1.0), ImportanceLevel::Critical);
        for level in [
            ImportanceLevel::Low,
            ImportanceLevel::Medium,
            ImportanceLevel::High,
            ImportanceLevel::Critical,
        ] {
            assert_eq!(ImportanceLevel::from_score(level.score()), level);
        }
    }

    #[test]
    fn test_normalized_rejects_out_of_range_and_fixes_level() {
        let mut r = MemoryRecord::new(Namespace::Facts, "k", serde_json::json!("v"));
        r.importance = 0.9;
        r.importance_level = ImportanceLevel::Low;
        let r = r.normalized().unwrap();
        assert_eq!(r.importance_level, ImportanceLevel::High);

        let mut bad = MemoryRecord::new(Namespace::Facts, "k", serde_json::json!("v"));
        bad.importance = 1.5;
        assert!(bad.normalized().is_err());
    }

    #[test]
    fn test_namespace_round_trip() {
        for ns in ["preferences", "facts", "task_summary", "learned_paths", "custom"] {
            assert_eq!(ns.parse::<Namespace>().unwrap().as_str(), ns);
        }
        assert!("nope".parse::<Namespace>().is_err());
    }
}
