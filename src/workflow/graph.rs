//! 任务图存储
//!
//! 保存任务及其阻塞关系，写入时校验（重复 ID、未知依赖、自依赖、环）；
//! 每次变更后重算 Ready / Blocked。就绪集合按插入顺序返回。

use std::collections::{HashMap, HashSet};

use crate::core::AgentError;
use crate::workflow::types::*;

/// 任务图存储（仅由路由器写入）
#[derive(Debug, Clone, Default)]
pub struct TaskGraphStore {
    /// 插入顺序
    order: Vec<TaskId>,
    tasks: HashMap<TaskId, Task>,
}

impl TaskGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入一个任务；依赖必须已存在
    pub fn insert(&mut self, task: Task) -> Result<(), AgentError> {
        self.insert_all(vec![task])
    }

    /// 批量插入：同一批内的任务可以相互依赖；任一校验失败则整批不写入
    pub fn insert_all(&mut self, tasks: Vec<Task>) -> Result<(), AgentError> {
        let mut incoming: HashSet<&str> = HashSet::new();
        for task in &tasks {
            if task.id.trim().is_empty() {
                return Err(AgentError::InvalidTask("task id must not be empty".to_string()));
            }
            if self.tasks.contains_key(&task.id) || !incoming.insert(task.id.as_str()) {
                return Err(AgentError::InvalidTask(format!("duplicate task id {}", task.id)));
            }
        }
        for task in &tasks {
            for dep in &task.dependencies {
                if dep == &task.id {
                    return Err(AgentError::InvalidTask(format!("task {} depends on itself", task.id)));
                }
                if !self.tasks.contains_key(dep) && !incoming.contains(dep.as_str()) {
                    return Err(AgentError::InvalidTask(format!(
                        "task {} depends on unknown task {}",
                        task.id, dep
                    )));
                }
            }
        }
        if has_cycle(&tasks) {
            return Err(AgentError::InvalidTask("cyclic dependency detected".to_string()));
        }

        for mut task in tasks {
            task.status = if task.is_closed() { TaskStatus::Closed } else { TaskStatus::Open };
            self.order.push(task.id.clone());
            self.tasks.insert(task.id.clone(), task);
        }
        self.refresh();
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// 按插入顺序的全部任务
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// 当前就绪任务（无未关闭依赖），按插入顺序
    pub fn ready(&self) -> Vec<&Task> {
        self.tasks().filter(|t| t.status == TaskStatus::Ready).collect()
    }

    pub fn ready_ids(&self) -> Vec<TaskId> {
        self.ready().into_iter().map(|t| t.id.clone()).collect()
    }

    /// 未关闭任务数
    pub fn open_count(&self) -> usize {
        self.tasks().filter(|t| !t.is_closed()).count()
    }

    pub fn has_open(&self) -> bool {
        self.open_count() > 0
    }

    /// 记录一次派发
    pub fn mark_dispatched(&mut self, id: &str) {
        if let Some(t) = self.tasks.get_mut(id) {
            t.attempts += 1;
        }
    }

    /// 关闭任务并重算就绪集合；返回是否发生了关闭
    pub fn close(&mut self, id: &str, summary: Option<String>, outcome: TaskOutcome) -> bool {
        let closed = match self.tasks.get_mut(id) {
            Some(t) if !t.is_closed() => {
                t.status = TaskStatus::Closed;
                t.close_summary = summary;
                t.outcome = Some(outcome);
                true
            }
            _ => false,
        };
        if closed {
            self.refresh();
        }
        closed
    }

    /// 重算所有未关闭任务的 Ready / Blocked
    fn refresh(&mut self) {
        let closed: HashSet<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.is_closed())
            .map(|t| t.id.clone())
            .collect();
        for task in self.tasks.values_mut() {
            if task.is_closed() {
                continue;
            }
            task.status = if task.dependencies.iter().all(|d| closed.contains(d)) {
                TaskStatus::Ready
            } else {
                TaskStatus::Blocked
            };
        }
    }
}

/// 新任务之间是否成环（已存在任务不可能依赖新任务，只需检查本批）
fn has_cycle(tasks: &[Task]) -> bool {
    let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for task in tasks {
        in_degree.entry(task.id.as_str()).or_insert(0);
        for dep in &task.dependencies {
            if ids.contains(dep.as_str()) {
                adjacency.entry(dep.as_str()).or_default().push(task.id.as_str());
                *in_degree.entry(task.id.as_str()).or_insert(0) += 1;
            }
        }
    }
    let mut queue: Vec<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut visited = 0;
    while let Some(id) = queue.pop() {
        visited += 1;
        if let Some(next) = adjacency.get(id) {
            for &n in next {
                if let Some(d) = in_degree.get_mut(n) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push(n);
                    }
                }
            }
        }
    }
    visited != tasks.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str) -> Task {
        Task::new(id, format!("Task {}", id), TaskType::Interact)
    }

    #[test]
    fn test_ready_and_blocked() {
        let mut store = TaskGraphStore::new();
        store
            .insert_all(vec![task("a"), task("b").depends_on("a")])
            .unwrap();
        assert_eq!(store.ready_ids(), vec!["a".to_string()]);
        assert_eq!(store.get("b").unwrap().status, TaskStatus::Blocked);
    }

    #[test]
    fn test_close_unblocks_dependents() {
        let mut store = TaskGraphStore::new();
        store
            .insert_all(vec![
                task("x"),
                task("y"),
                task("z").depends_on("x").depends_on("y"),
            ])
            .unwrap();
        assert!(store.close("x", Some("done".into()), TaskOutcome::Completed));
        assert_eq!(store.get("z").unwrap().status, TaskStatus::Blocked);
        assert!(store.close("y", None, TaskOutcome::Completed));
        assert_eq!(store.ready_ids(), vec!["z".to_string()]);
        // 关闭的任务保留
        assert_eq!(store.len(), 3);
        assert_eq!(store.get("x").unwrap().close_summary.as_deref(), Some("done"));
    }

    #[test]
    fn test_rejects_unknown_dependency() {
        let mut store = TaskGraphStore::new();
        let err = store.insert(task("a").depends_on("ghost")).unwrap_err();
        assert!(matches!(err, AgentError::InvalidTask(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_rejects_duplicate_and_self_dependency() {
        let mut store = TaskGraphStore::new();
        store.insert(task("a")).unwrap();
        assert!(store.insert(task("a")).is_err());
        assert!(store.insert(task("b").depends_on("b")).is_err());
    }

    #[test]
    fn test_rejects_cycle() {
        let mut store = TaskGraphStore::new();
        let err = store
            .insert_all(vec![task("a").depends_on("b"), task("b").depends_on("a")])
            .unwrap_err();
        assert!(err.to_string().contains("cyclic"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_close_twice_is_noop() {
        let mut store = TaskGraphStore::new();
        store.insert(task("a")).unwrap();
        assert!(store.close("a", None, TaskOutcome::Completed));
        assert!(!store.close("a", None, TaskOutcome::Failed));
        assert_eq!(store.get("a").unwrap().outcome, Some(TaskOutcome::Completed));
        assert!(!store.has_open());
    }
}
