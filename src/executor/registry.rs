//! 执行器注册表
//!
//! 所有能力执行器实现 TaskExecutor（name / can_handle / execute），由 ExecutorRegistry 按注册顺序保存；
//! 选择时先匹配者胜出，没有匹配即报错，不静默丢弃。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::Variables;
use crate::workflow::{Task, TaskId, TaskType};

/// 一次派发的批次指令：由一个或多个合并后的任务组成
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchInstruction {
    pub task_ids: Vec<TaskId>,
    pub task_type: TaskType,
    /// 合并后的粗粒度指令文本（多任务时按序编号）
    pub instruction: String,
    pub tasks: Vec<Task>,
}

impl BatchInstruction {
    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        let task_type = tasks.first().map(|t| t.task_type()).unwrap_or(TaskType::General);
        let instruction = if tasks.len() == 1 {
            tasks[0].title.clone()
        } else {
            tasks
                .iter()
                .enumerate()
                .map(|(i, t)| format!("{}. {}", i + 1, t.title))
                .collect::<Vec<_>>()
                .join("\n")
        };
        Self {
            task_ids: tasks.iter().map(|t| t.id.clone()).collect(),
            task_type,
            instruction,
            tasks,
        }
    }

    pub fn len(&self) -> usize {
        self.task_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.task_ids.is_empty()
    }
}

/// 执行器返回
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BatchResult {
    pub success: bool,
    pub completed_ids: Vec<TaskId>,
    pub failed_ids: Vec<TaskId>,
    pub summary: String,
    pub error: Option<String>,
    pub updated_variables: Option<Variables>,
}

impl BatchResult {
    /// 整批成功
    pub fn completed(batch: &BatchInstruction, summary: impl Into<String>) -> Self {
        Self {
            success: true,
            completed_ids: batch.task_ids.clone(),
            failed_ids: Vec::new(),
            summary: summary.into(),
            error: None,
            updated_variables: None,
        }
    }

    /// 整批失败
    pub fn failed(batch: &BatchInstruction, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            completed_ids: Vec::new(),
            failed_ids: batch.task_ids.clone(),
            summary: String::new(),
            error: Some(error),
            updated_variables: None,
        }
    }

    pub fn with_variables(mut self, vars: Variables) -> Self {
        self.updated_variables = Some(vars);
        self
    }
}

/// 能力执行器 trait
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// 执行器名称（用于日志与动作记录）
    fn name(&self) -> &str;

    /// 是否能处理该任务
    fn can_handle(&self, task: &Task) -> bool;

    /// 执行批次；Err 视为整批失败
    async fn execute(&self, batch: &BatchInstruction, variables: &Variables) -> Result<BatchResult, String>;
}

/// 执行器注册表：按注册顺序保存，先匹配者胜出
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: Vec<Arc<dyn TaskExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, executor: impl TaskExecutor + 'static) {
        self.executors.push(Arc::new(executor));
    }

    pub fn register_arc(&mut self, executor: Arc<dyn TaskExecutor>) {
        self.executors.push(executor);
    }

    /// 选择第一个能处理批次内全部任务的执行器
    pub fn select(&self, batch: &BatchInstruction) -> Option<Arc<dyn TaskExecutor>> {
        self.executors
            .iter()
            .find(|e| batch.tasks.iter().all(|t| e.can_handle(t)))
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.executors.iter().map(|e| e.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

/// 按任务类型声明能力的执行器包装：把闭包风格的处理函数接入注册表（演示与测试常用）
pub struct CapabilityExecutor<F> {
    name: String,
    capabilities: Vec<TaskType>,
    handler: F,
}

impl<F> CapabilityExecutor<F>
where
    F: Fn(&BatchInstruction, &Variables) -> Result<BatchResult, String> + Send + Sync,
{
    pub fn new(name: impl Into<String>, capabilities: Vec<TaskType>, handler: F) -> Self {
        Self {
            name: name.into(),
            capabilities,
            handler,
        }
    }
}

#[async_trait]
impl<F> TaskExecutor for CapabilityExecutor<F>
where
    F: Fn(&BatchInstruction, &Variables) -> Result<BatchResult, String> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn can_handle(&self, task: &Task) -> bool {
        self.capabilities.contains(&task.task_type())
    }

    async fn execute(&self, batch: &BatchInstruction, variables: &Variables) -> Result<BatchResult, String> {
        (self.handler)(batch, variables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_handler(b: &BatchInstruction, _: &Variables) -> Result<BatchResult, String> {
        Ok(BatchResult::completed(b, "ok"))
    }

    #[test]
    fn test_first_match_wins() {
        let mut reg = ExecutorRegistry::new();
        reg.register(CapabilityExecutor::new("nav", vec![TaskType::Navigate], ok_handler));
        reg.register(CapabilityExecutor::new(
            "any",
            vec![TaskType::Navigate, TaskType::Interact],
            ok_handler,
        ));

        let nav = BatchInstruction::from_tasks(vec![Task::new("a", "open", TaskType::Navigate)]);
        assert_eq!(reg.select(&nav).unwrap().name(), "nav");

        let click = BatchInstruction::from_tasks(vec![Task::new("b", "click", TaskType::Interact)]);
        assert_eq!(reg.select(&click).unwrap().name(), "any");
    }

    #[test]
    fn test_no_capable_executor() {
        let mut reg = ExecutorRegistry::new();
        reg.register(CapabilityExecutor::new("nav", vec![TaskType::Navigate], ok_handler));
        let batch = BatchInstruction::from_tasks(vec![Task::new("c", "read", TaskType::Extract)]);
        assert!(reg.select(&batch).is_none());
    }

    #[test]
    fn test_merged_instruction_is_numbered() {
        let batch = BatchInstruction::from_tasks(vec![
            Task::new("a", "Type username", TaskType::Interact),
            Task::new("b", "Type password", TaskType::Interact),
        ]);
        assert_eq!(batch.instruction, "1. Type username\n2. Type password");
        assert_eq!(batch.task_ids, vec!["a".to_string(), "b".to_string()]);
    }
}
