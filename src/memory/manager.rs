//! 记忆管理器
//!
//! 在 MemoryStore 之上提供按用途划分的接口：事实、偏好、任务摘要、习得路径；
//! 为上下文组装构建 MemoryContext，并在每次运行结束后写回任务摘要与成功路径。

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::MemorySection;
use crate::core::{truncate_chars, SessionState, SessionStatus};
use crate::memory::store::MemoryStore;
use crate::memory::types::{ImportanceLevel, MemoryQuery, MemoryRecord, Namespace, OrderBy};
use crate::storage::StorageError;

/// 供上下文 L1 层使用的记忆快照
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryContext {
    pub preferences: BTreeMap<String, serde_json::Value>,
    pub relevant_facts: Vec<MemoryRecord>,
    pub recent_tasks: Vec<MemoryRecord>,
    /// 渲染好的文本（为空表示无可用记忆）
    pub summary_text: String,
}

impl MemoryContext {
    pub fn is_empty(&self) -> bool {
        self.preferences.is_empty() && self.relevant_facts.is_empty() && self.recent_tasks.is_empty()
    }
}

/// 记忆管理器（记忆库的唯一写入者）
pub struct MemoryManager {
    store: Arc<dyn MemoryStore>,
    config: MemorySection,
}

impl MemoryManager {
    pub fn new(store: Arc<dyn MemoryStore>, config: MemorySection) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    pub async fn save_fact(
        &self,
        key: &str,
        value: serde_json::Value,
        importance: f32,
        tags: &[&str],
    ) -> Result<MemoryRecord, StorageError> {
        let record = MemoryRecord::new(Namespace::Facts, key, value)
            .with_importance(importance)
            .with_tags(tags.iter().copied());
        self.store.upsert(record).await
    }

    pub async fn save_task_summary(
        &self,
        task_id: &str,
        summary: serde_json::Value,
        level: ImportanceLevel,
    ) -> Result<MemoryRecord, StorageError> {
        let record = MemoryRecord::new(Namespace::TaskSummary, task_id, summary).with_level(level);
        self.store.upsert(record).await
    }

    /// 任意命名空间的显式写入
    pub async fn save_custom(&self, record: MemoryRecord) -> Result<MemoryRecord, StorageError> {
        self.store.upsert(record).await
    }

    pub async fn get_user_preferences(&self) -> Result<BTreeMap<String, serde_json::Value>, StorageError> {
        let records = self.store.query(&MemoryQuery::namespace(Namespace::Preferences)).await?;
        Ok(records.into_iter().map(|r| (r.key, r.value)).collect())
    }

    /// 合并更新偏好：逐键 upsert，偏好默认高重要性
    pub async fn update_user_preferences(
        &self,
        prefs: BTreeMap<String, serde_json::Value>,
    ) -> Result<usize, StorageError> {
        let mut n = 0;
        for (key, value) in prefs {
            let record = MemoryRecord::new(Namespace::Preferences, key, value).with_level(ImportanceLevel::High);
            self.store.upsert(record).await?;
            n += 1;
        }
        Ok(n)
    }

    /// 检索事实：整个查询（去首尾空白、忽略大小写）作为子串匹配序列化后的值，按重要性排序
    pub async fn search_facts(&self, query: &str, limit: usize) -> Result<Vec<MemoryRecord>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.store.search(query, Some(&Namespace::Facts), limit).await
    }

    /// 为目标构建记忆上下文；用到的事实记一次访问
    pub async fn build_context_for_task(&self, goal: &str) -> Result<MemoryContext, StorageError> {
        let preferences = self.get_user_preferences().await?;
        let relevant_facts = self.search_facts(goal, self.config.relevant_facts_limit).await?;
        for fact in &relevant_facts {
            self.store.touch(&fact.namespace, &fact.key).await?;
        }
        let recent_tasks = self
            .store
            .query(
                &MemoryQuery::namespace(Namespace::TaskSummary)
                    .order_by(OrderBy::UpdatedAt, true)
                    .limit(self.config.recent_tasks_limit),
            )
            .await?;

        let mut ctx = MemoryContext {
            preferences,
            relevant_facts,
            recent_tasks,
            summary_text: String::new(),
        };
        ctx.summary_text = render_memory_context(&ctx);
        Ok(ctx)
    }

    /// 按配置的默认阈值清理
    pub async fn cleanup(&self) -> Result<usize, StorageError> {
        self.cleanup_with(
            chrono::Duration::days(self.config.cleanup_max_age_days),
            self.config.cleanup_min_importance,
        )
        .await
    }

    pub async fn cleanup_with(&self, max_age: chrono::Duration, min_importance: f32) -> Result<usize, StorageError> {
        let n = self.store.cleanup(max_age, min_importance).await?;
        if n > 0 {
            tracing::info!(deleted = n, "memory cleanup");
        }
        Ok(n)
    }

    pub async fn forget(&self, namespace: &Namespace, key: &str) -> Result<bool, StorageError> {
        self.store.delete(namespace, key).await
    }

    pub async fn clear_namespace(&self, namespace: &Namespace) -> Result<usize, StorageError> {
        self.store.clear_namespace(namespace).await
    }

    /// 运行结束后写回：任务摘要；成功时额外记录目标 → 工具序列
    pub async fn record_session(&self, thread_id: &str, state: &SessionState) -> Result<(), StorageError> {
        let succeeded = state.status == SessionStatus::Complete;
        let summary = serde_json::json!({
            "goal": state.goal,
            "status": state.status,
            "iterations": state.iteration_count,
            "steps": state.action_history.len(),
            "result": state.result.as_deref().map(|r| truncate_chars(r, 500)),
        });
        let level = if succeeded {
            ImportanceLevel::Medium
        } else {
            ImportanceLevel::Low
        };
        self.save_task_summary(thread_id, summary, level).await?;

        if succeeded {
            let tools: Vec<String> = state
                .action_history
                .iter()
                .filter(|a| a.succeeded())
                .map(|a| a.tool.clone())
                .collect();
            if !tools.is_empty() {
                let key = state.goal.trim().to_lowercase();
                let record = MemoryRecord::new(
                    Namespace::LearnedPaths,
                    key,
                    serde_json::json!({ "goal": state.goal, "tools": tools }),
                )
                .with_level(ImportanceLevel::High)
                .with_tags(["path"]);
                self.store.upsert(record).await?;
            }
        }
        tracing::debug!(thread_id, succeeded, "session recorded to memory");
        Ok(())
    }
}

fn render_memory_context(ctx: &MemoryContext) -> String {
    let mut sections = Vec::new();
    if !ctx.preferences.is_empty() {
        let lines: Vec<String> = ctx
            .preferences
            .iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => format!("- {}: {}", k, s),
                other => format!("- {}: {}", k, other),
            })
            .collect();
        sections.push(format!("User preferences:\n{}", lines.join("\n")));
    }
    if !ctx.relevant_facts.is_empty() {
        let lines: Vec<String> = ctx
            .relevant_facts
            .iter()
            .map(|r| format!("- {}: {}", r.key, truncate_chars(&r.value_text(), 200)))
            .collect();
        sections.push(format!("Known facts:\n{}", lines.join("\n")));
    }
    if !ctx.recent_tasks.is_empty() {
        let lines: Vec<String> = ctx
            .recent_tasks
            .iter()
            .map(|r| {
                let goal = r.value.get("goal").and_then(|g| g.as_str()).unwrap_or(&r.key);
                let status = r.value.get("status").and_then(|s| s.as_str()).unwrap_or("unknown");
                format!("- {} ({})", truncate_chars(goal, 120), status)
            })
            .collect();
        sections.push(format!("Recent tasks:\n{}", lines.join("\n")));
    }
    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Action, ActionResult};
    use crate::memory::InMemoryMemoryStore;

    fn manager() -> MemoryManager {
        MemoryManager::new(Arc::new(InMemoryMemoryStore::new()), MemorySection::default())
    }

    #[tokio::test]
    async fn test_preferences_merge() {
        let m = manager();
        let mut prefs = BTreeMap::new();
        prefs.insert("language".to_string(), serde_json::json!("zh"));
        prefs.insert("browser".to_string(), serde_json::json!("chrome"));
        assert_eq!(m.update_user_preferences(prefs).await.unwrap(), 2);

        let mut update = BTreeMap::new();
        update.insert("language".to_string(), serde_json::json!("en"));
        m.update_user_preferences(update).await.unwrap();

        let prefs = m.get_user_preferences().await.unwrap();
        assert_eq!(prefs.len(), 2);
        assert_eq!(prefs["language"], serde_json::json!("en"));
    }

    #[tokio::test]
    async fn test_build_context_for_task() {
        let m = manager();
        m.save_fact("login-button", serde_json::json!("Login button selector is #btn-login"), 0.8, &["ui"])
            .await
            .unwrap();
        m.save_fact("weather", serde_json::json!("It rains on tuesdays"), 0.9, &[])
            .await
            .unwrap();

        let ctx = m.build_context_for_task("login button").await.unwrap();
        assert_eq!(ctx.relevant_facts.len(), 1);
        assert_eq!(ctx.relevant_facts[0].key, "login-button");
        assert!(ctx.summary_text.contains("#btn-login"));
        assert!(!ctx.summary_text.contains("tuesdays"));

        let touched = m.store().get(&Namespace::Facts, "login-button").await.unwrap().unwrap();
        assert_eq!(touched.access_count, 2);
    }

    #[tokio::test]
    async fn test_record_session_writes_summary_and_path() {
        let m = manager();
        let mut state = SessionState::new("click the login button");
        let mut action = Action::new("click", serde_json::json!({"selector": "#login"}), "");
        action.result = Some(ActionResult {
            success: true,
            error: None,
            duration: 12,
        });
        state.record_action(action);
        state.finish_complete("clicked");

        m.record_session("thread-1", &state).await.unwrap();

        let ctx = m.build_context_for_task("anything").await.unwrap();
        assert_eq!(ctx.recent_tasks.len(), 1);
        assert!(ctx.summary_text.contains("click the login button (complete)"));
        let path = m
            .store()
            .get(&Namespace::LearnedPaths, "click the login button")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(path.value["tools"], serde_json::json!(["click"]));
    }

    #[tokio::test]
    async fn test_search_facts_matches_whole_query() {
        let m = manager();
        m.save_fact("theme", serde_json::json!("Other users prefer the dark theme"), 0.9, &[])
            .await
            .unwrap();
        m.save_fact("login", serde_json::json!("Login button is #btn"), 0.5, &[])
            .await
            .unwrap();

        let hits = m.search_facts("  LOGIN button ", 5).await.unwrap();
        let keys: Vec<&str> = hits.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["login"]);

        assert!(m.search_facts("the login button", 5).await.unwrap().is_empty());
        assert!(m.search_facts("login", 0).await.unwrap().is_empty());
    }
}
