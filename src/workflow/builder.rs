//! 任务图构建器
//!
//! 提供流畅的API来构建预先规划的任务图

use crate::core::AgentError;
use crate::workflow::graph::TaskGraphStore;
use crate::workflow::types::*;

/// 任务图构建器
#[derive(Debug, Default)]
pub struct TaskGraphBuilder {
    tasks: Vec<Task>,
}

impl TaskGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加任务
    pub fn task(mut self, id: impl Into<TaskId>, title: impl Into<String>, task_type: TaskType) -> Self {
        self.tasks.push(Task::new(id, title, task_type));
        self
    }

    /// 添加可合并任务
    pub fn mergeable_task(
        mut self,
        id: impl Into<TaskId>,
        title: impl Into<String>,
        task_type: TaskType,
    ) -> Self {
        self.tasks.push(Task::new(id, title, task_type).mergeable(true));
        self
    }

    /// 设置依赖：task_id 等待 deps 全部关闭
    pub fn depends_on(mut self, task_id: &str, deps: &[&str]) -> Self {
        if let Some(task) = self.tasks.iter_mut().find(|t| t.id == task_id) {
            for d in deps {
                task.dependencies.insert(d.to_string());
            }
        }
        self
    }

    /// 顺序依赖：to 在 from 之后
    pub fn sequential(self, from: &str, to: &str) -> Self {
        self.depends_on(to, &[from])
    }

    /// 为任务附加执行参数
    pub fn payload(mut self, task_id: &str, payload: serde_json::Value) -> Self {
        if let Some(task) = self.tasks.iter_mut().find(|t| t.id == task_id) {
            task.metadata.payload = Some(payload);
        }
        self
    }

    pub fn into_tasks(self) -> Vec<Task> {
        self.tasks
    }

    /// 构建任务图（写入时校验）
    pub fn build(self) -> Result<TaskGraphStore, AgentError> {
        let mut store = TaskGraphStore::new();
        store.insert_all(self.tasks)?;
        Ok(store)
    }
}
