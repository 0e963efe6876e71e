//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TASKPILOT__*` 覆盖（双下划线表示嵌套，如 `TASKPILOT__SESSION__MAX_ITERATIONS=30`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub context: ContextSection,
    #[serde(default)]
    pub router: RouterSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub memory: MemorySection,
}

/// [session] 段：循环上限、失败阈值、重复动作阈值与超时
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_max_repeated_actions")]
    pub max_repeated_actions: u32,
    /// 单次执行器调用超时（秒）
    #[serde(default = "default_action_timeout_secs")]
    pub action_timeout_secs: u64,
    /// 单次决策调用超时（秒）
    #[serde(default = "default_oracle_timeout_secs")]
    pub oracle_timeout_secs: u64,
}

fn default_max_iterations() -> u32 {
    20
}

fn default_max_consecutive_failures() -> u32 {
    3
}

fn default_max_repeated_actions() -> u32 {
    3
}

fn default_action_timeout_secs() -> u64 {
    300
}

fn default_oracle_timeout_secs() -> u64 {
    120
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_consecutive_failures: default_max_consecutive_failures(),
            max_repeated_actions: default_max_repeated_actions(),
            action_timeout_secs: default_action_timeout_secs(),
            oracle_timeout_secs: default_oracle_timeout_secs(),
        }
    }
}

/// [context] 段：L3 窗口、摘要触发阈值与摘要长度上限
#[derive(Debug, Clone, Deserialize)]
pub struct ContextSection {
    #[serde(default = "default_max_recent_messages")]
    pub max_recent_messages: usize,
    #[serde(default = "default_summary_threshold")]
    pub summary_threshold: usize,
    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,
    /// L0 固定策略文本；未设置时用内置默认
    pub policy_prompt: Option<String>,
}

fn default_max_recent_messages() -> usize {
    8
}

fn default_summary_threshold() -> usize {
    12
}

fn default_summary_max_chars() -> usize {
    2000
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            max_recent_messages: default_max_recent_messages(),
            summary_threshold: default_summary_threshold(),
            summary_max_chars: default_summary_max_chars(),
            policy_prompt: None,
        }
    }
}

/// 部分失败批次中失败任务的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PartialFailurePolicy {
    /// 保持未关闭，下一轮可重试
    #[default]
    LeaveOpen,
    /// 以失败状态强制关闭
    ForceClose,
}

/// [router] 段：合并上限与部分失败策略
#[derive(Debug, Clone, Deserialize)]
pub struct RouterSection {
    #[serde(default = "default_max_merge_size")]
    pub max_merge_size: usize,
    #[serde(default)]
    pub partial_failure_policy: PartialFailurePolicy,
}

fn default_max_merge_size() -> usize {
    5
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            max_merge_size: default_max_merge_size(),
            partial_failure_policy: PartialFailurePolicy::default(),
        }
    }
}

/// 存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

/// [storage] 段：后端选择与数据库文件路径
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/taskpilot.db")
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            db_path: default_db_path(),
        }
    }
}

/// [memory] 段：清理策略与上下文检索条数
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    #[serde(default = "default_cleanup_max_age_days")]
    pub cleanup_max_age_days: i64,
    #[serde(default = "default_cleanup_min_importance")]
    pub cleanup_min_importance: f32,
    #[serde(default = "default_relevant_facts_limit")]
    pub relevant_facts_limit: usize,
    #[serde(default = "default_recent_tasks_limit")]
    pub recent_tasks_limit: usize,
}

fn default_cleanup_max_age_days() -> i64 {
    30
}

fn default_cleanup_min_importance() -> f32 {
    0.3
}

fn default_relevant_facts_limit() -> usize {
    5
}

fn default_recent_tasks_limit() -> usize {
    3
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            cleanup_max_age_days: default_cleanup_max_age_days(),
            cleanup_min_importance: default_cleanup_min_importance(),
            relevant_facts_limit: default_relevant_facts_limit(),
            recent_tasks_limit: default_recent_tasks_limit(),
        }
    }
}

/// 循环控制器运行参数
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_iterations: u32,
    pub max_consecutive_failures: u32,
    pub max_repeated_actions: u32,
    pub action_timeout: Duration,
    pub oracle_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&SessionSection::default())
    }
}

impl From<&SessionSection> for SessionConfig {
    fn from(s: &SessionSection) -> Self {
        Self {
            max_iterations: s.max_iterations.max(1),
            max_consecutive_failures: s.max_consecutive_failures.max(1),
            max_repeated_actions: s.max_repeated_actions.max(1),
            action_timeout: Duration::from_secs(s.action_timeout_secs),
            oracle_timeout: Duration::from_secs(s.oracle_timeout_secs),
        }
    }
}

/// 上下文组装参数
#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub max_recent_messages: usize,
    pub summary_threshold: usize,
    pub summary_max_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self::from(&ContextSection::default())
    }
}

impl From<&ContextSection> for ContextConfig {
    fn from(s: &ContextSection) -> Self {
        Self {
            max_recent_messages: s.max_recent_messages.max(1),
            summary_threshold: s.summary_threshold,
            summary_max_chars: s.summary_max_chars.max(80),
        }
    }
}

/// 路由参数
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub max_merge_size: usize,
    pub partial_failure_policy: PartialFailurePolicy,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::from(&RouterSection::default())
    }
}

impl From<&RouterSection> for RouterConfig {
    fn from(s: &RouterSection) -> Self {
        Self {
            max_merge_size: s.max_merge_size.max(1),
            partial_failure_policy: s.partial_failure_policy,
        }
    }
}

/// 从 config 目录加载配置，环境变量 TASKPILOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TASKPILOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TASKPILOT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.session.max_iterations, 20);
        assert_eq!(cfg.session.max_consecutive_failures, 3);
        assert_eq!(cfg.session.max_repeated_actions, 3);
        assert_eq!(cfg.session.action_timeout_secs, 300);
        assert_eq!(cfg.router.max_merge_size, 5);
        assert_eq!(cfg.router.partial_failure_policy, PartialFailurePolicy::LeaveOpen);
        assert_eq!(cfg.storage.backend, StorageBackend::Sqlite);
    }

    #[test]
    fn test_load_from_file_overrides() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pilot.toml");
        std::fs::write(
            &path,
            r#"
[session]
max_iterations = 7

[router]
partial_failure_policy = "force_close"

[storage]
backend = "memory"
"#,
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.session.max_iterations, 7);
        assert_eq!(cfg.session.max_consecutive_failures, 3);
        assert_eq!(cfg.router.partial_failure_policy, PartialFailurePolicy::ForceClose);
        assert_eq!(cfg.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn test_runtime_config_from_section() {
        let section = SessionSection {
            action_timeout_secs: 5,
            ..SessionSection::default()
        };
        let rc = SessionConfig::from(&section);
        assert_eq!(rc.action_timeout, Duration::from_secs(5));
        assert_eq!(rc.max_iterations, 20);
    }
}
