//! 任务图类型定义
//!
//! 定义任务、状态、任务类型（封闭枚举）与可合并标记等核心数据类型

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

pub type TaskId = String;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// 已创建，尚未评估依赖
    Open,
    /// 依赖全部关闭，可派发
    Ready,
    /// 仍有未关闭的依赖
    Blocked,
    /// 已关闭（保留用于审计，不删除）
    Closed,
}

/// 任务类型：决定由哪个执行器处理
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// 页面跳转、前进后退、刷新
    Navigate,
    /// 点击、输入、选择、滚动等交互
    Interact,
    /// 读取文本、截图、抽取数据
    Extract,
    /// 断言、等待条件
    Verify,
    General,
}

impl TaskType {
    /// 按工具名推断任务类型
    pub fn from_tool(tool: &str) -> Self {
        let t = tool.to_ascii_lowercase();
        let t = t.rsplit('.').next().unwrap_or(&t);
        match t {
            "navigate" | "goto" | "open_url" | "back" | "forward" | "reload" | "new_tab"
            | "switch_tab" | "close_tab" => TaskType::Navigate,
            "click" | "double_click" | "type" | "fill" | "select" | "press" | "hover"
            | "scroll" | "check" | "upload" => TaskType::Interact,
            "extract" | "read" | "get_text" | "screenshot" | "snapshot" | "query" => {
                TaskType::Extract
            }
            "assert" | "verify" | "wait_for" | "expect" => TaskType::Verify,
            _ => TaskType::General,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskType::Navigate => "navigate",
            TaskType::Interact => "interact",
            TaskType::Extract => "extract",
            TaskType::Verify => "verify",
            TaskType::General => "general",
        };
        f.write_str(s)
    }
}

/// 任务来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskOrigin {
    /// 预先规划的任务
    #[default]
    Planned,
    /// 由决策器提出的单步动作
    Action,
}

/// 任务元数据：类型为封闭枚举，可合并为严格布尔
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub task_type: TaskType,
    pub mergeable: bool,
    #[serde(default)]
    pub origin: TaskOrigin,
    /// 执行器所需的附加参数（如动作的 tool / args）
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

/// 任务关闭时的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed,
    Failed,
}

/// 原子工作单元
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub status: TaskStatus,
    pub metadata: TaskMetadata,
    pub dependencies: BTreeSet<TaskId>,
    /// 关闭时执行器给出的摘要
    pub close_summary: Option<String>,
    pub outcome: Option<TaskOutcome>,
    /// 派发次数
    pub attempts: u32,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, title: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: TaskStatus::Open,
            metadata: TaskMetadata {
                task_type,
                mergeable: false,
                origin: TaskOrigin::Planned,
                payload: None,
            },
            dependencies: BTreeSet::new(),
            close_summary: None,
            outcome: None,
            attempts: 0,
        }
    }

    pub fn mergeable(mut self, mergeable: bool) -> Self {
        self.metadata.mergeable = mergeable;
        self
    }

    pub fn depends_on(mut self, dep: impl Into<TaskId>) -> Self {
        self.dependencies.insert(dep.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.metadata.payload = Some(payload);
        self
    }

    pub fn is_closed(&self) -> bool {
        self.status == TaskStatus::Closed
    }

    pub fn task_type(&self) -> TaskType {
        self.metadata.task_type
    }
}
