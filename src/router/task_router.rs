//! 任务路由器
//!
//! 每次 route_once：取就绪集合 → 合并成批 → 选择执行器 → 带超时派发 →
//! 先关闭执行器报告完成的任务，再重算就绪集合。任务图只由路由器写入。

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{PartialFailurePolicy, RouterConfig};
use crate::core::{Action, AgentError, Variables};
use crate::executor::{BatchInstruction, DispatchOutcome, Dispatcher, ExecutorRegistry};
use crate::observability::TraceContext;
use crate::router::merge::merge_ready_batch;
use crate::workflow::{Task, TaskGraphStore, TaskId, TaskOrigin, TaskOutcome, TaskType};

/// 一次成功派发（执行器已返回或已失败）后的报告
#[derive(Debug, Clone)]
pub struct RouteReport {
    pub batch: BatchInstruction,
    /// 执行器名；未找到执行器时为 None
    pub executor: Option<String>,
    pub success: bool,
    pub summary: String,
    pub error: Option<String>,
    pub duration: Duration,
    pub closed_ids: Vec<TaskId>,
    pub left_open_ids: Vec<TaskId>,
    /// 关闭之后重算得到的就绪集合
    pub next_ready: Vec<TaskId>,
    pub updated_variables: Option<Variables>,
}

/// route_once 的结果
#[derive(Debug, Clone)]
pub enum RouteOutcome {
    /// 没有任何未关闭任务
    Drained,
    /// 仍有未关闭任务但没有就绪任务（死锁）
    Blocked { open: usize },
    Dispatched(RouteReport),
    /// 调用方取消；在途结果被丢弃，任务图不变
    Cancelled,
}

/// 任务路由器：任务图的唯一写入者
pub struct TaskRouter {
    graph: TaskGraphStore,
    registry: ExecutorRegistry,
    dispatcher: Dispatcher,
    config: RouterConfig,
}

impl TaskRouter {
    pub fn new(registry: ExecutorRegistry, action_timeout: Duration, config: RouterConfig) -> Self {
        Self {
            graph: TaskGraphStore::new(),
            registry,
            dispatcher: Dispatcher::new(action_timeout),
            config,
        }
    }

    /// 以预先规划好的任务图初始化
    pub fn with_graph(mut self, graph: TaskGraphStore) -> Self {
        self.graph = graph;
        self
    }

    pub fn graph(&self) -> &TaskGraphStore {
        &self.graph
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    /// 写入规划任务（写入时校验）
    pub fn plan(&mut self, tasks: Vec<Task>) -> Result<(), AgentError> {
        self.graph.insert_all(tasks)
    }

    /// 是否仍有未关闭的规划任务
    pub fn has_open_planned(&self) -> bool {
        self.graph
            .tasks()
            .any(|t| !t.is_closed() && t.metadata.origin == TaskOrigin::Planned)
    }

    /// 将决策器提出的动作登记为单个不可合并任务
    pub fn enqueue_action(&mut self, action: &Action) -> Result<TaskId, AgentError> {
        let mut task = Task::new(action.id.clone(), action.describe(), TaskType::from_tool(&action.tool))
            .with_payload(serde_json::json!({ "tool": action.tool, "args": action.args }));
        task.metadata.origin = TaskOrigin::Action;
        let id = task.id.clone();
        self.graph.insert(task)?;
        Ok(id)
    }

    /// 路由一批就绪任务
    pub async fn route_once(
        &mut self,
        variables: &Variables,
        cancel: &CancellationToken,
        trace: &TraceContext,
    ) -> RouteOutcome {
        let ready = self.graph.ready();
        if ready.is_empty() {
            let open = self.graph.open_count();
            if open == 0 {
                return RouteOutcome::Drained;
            }
            tracing::warn!(trace_id = %trace.trace_id, open, "no ready task while tasks remain open");
            return RouteOutcome::Blocked { open };
        }

        let batch = BatchInstruction::from_tasks(merge_ready_batch(&ready, self.config.max_merge_size));
        for id in &batch.task_ids {
            self.graph.mark_dispatched(id);
        }

        let Some(executor) = self.registry.select(&batch) else {
            let error = AgentError::NoCapableExecutor(batch.task_type).to_string();
            tracing::warn!(trace_id = %trace.trace_id, task_type = %batch.task_type, "no capable executor");
            return RouteOutcome::Dispatched(self.apply_failure(batch, None, error, Duration::ZERO));
        };
        let executor_name = executor.name().to_string();
        tracing::debug!(
            trace_id = %trace.trace_id,
            executor = %executor_name,
            tasks = ?batch.task_ids,
            "dispatching batch"
        );

        match self
            .dispatcher
            .dispatch(executor, batch.clone(), variables.clone(), cancel, trace)
            .await
        {
            DispatchOutcome::Cancelled => RouteOutcome::Cancelled,
            DispatchOutcome::Failed { error, duration } => RouteOutcome::Dispatched(self.apply_failure(
                batch,
                Some(executor_name),
                error.to_string(),
                duration,
            )),
            DispatchOutcome::Finished { result, duration } => {
                let mut completed: Vec<TaskId> = Vec::new();
                let mut failed: Vec<TaskId> = Vec::new();
                for id in &batch.task_ids {
                    if result.completed_ids.contains(id) {
                        completed.push(id.clone());
                    } else if result.failed_ids.contains(id) || !result.success {
                        failed.push(id.clone());
                    } else {
                        // 成功批次中未被单独报告的任务视为完成
                        completed.push(id.clone());
                    }
                }
                let error = if failed.is_empty() {
                    None
                } else {
                    Some(
                        result
                            .error
                            .clone()
                            .unwrap_or_else(|| format!("{} task(s) failed", failed.len())),
                    )
                };

                let mut closed_ids = Vec::new();
                for id in &completed {
                    if self
                        .graph
                        .close(id, Some(result.summary.clone()), TaskOutcome::Completed)
                    {
                        closed_ids.push(id.clone());
                    }
                }
                let (forced, left_open_ids) = self.close_failed(&failed, error.as_deref());
                closed_ids.extend(forced);

                RouteOutcome::Dispatched(RouteReport {
                    next_ready: self.graph.ready_ids(),
                    success: result.success && failed.is_empty(),
                    executor: Some(executor_name),
                    summary: result.summary,
                    error,
                    duration,
                    closed_ids,
                    left_open_ids,
                    updated_variables: result.updated_variables,
                    batch,
                })
            }
        }
    }

    fn apply_failure(
        &mut self,
        batch: BatchInstruction,
        executor: Option<String>,
        error: String,
        duration: Duration,
    ) -> RouteReport {
        let (closed_ids, left_open_ids) = self.close_failed(&batch.task_ids, Some(error.as_str()));
        RouteReport {
            next_ready: self.graph.ready_ids(),
            executor,
            success: false,
            summary: String::new(),
            error: Some(error),
            duration,
            closed_ids,
            left_open_ids,
            updated_variables: None,
            batch,
        }
    }

    /// 失败任务：动作任务总是关闭；规划任务按部分失败策略处理
    fn close_failed(&mut self, ids: &[TaskId], error: Option<&str>) -> (Vec<TaskId>, Vec<TaskId>) {
        let mut closed = Vec::new();
        let mut left_open = Vec::new();
        for id in ids {
            let force = match self.graph.get(id) {
                Some(t) => {
                    t.metadata.origin == TaskOrigin::Action
                        || self.config.partial_failure_policy == PartialFailurePolicy::ForceClose
                }
                None => continue,
            };
            if force {
                if self
                    .graph
                    .close(id, error.map(str::to_string), TaskOutcome::Failed)
                {
                    closed.push(id.clone());
                }
            } else {
                left_open.push(id.clone());
            }
        }
        (closed, left_open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{BatchResult, CapabilityExecutor};
    use crate::workflow::TaskGraphBuilder;

    fn registry_ok() -> ExecutorRegistry {
        let mut reg = ExecutorRegistry::new();
        reg.register(CapabilityExecutor::new(
            "browser",
            vec![TaskType::Navigate, TaskType::Interact, TaskType::Extract],
            |b: &BatchInstruction, _: &Variables| Ok(BatchResult::completed(b, "done")),
        ));
        reg
    }

    fn router(reg: ExecutorRegistry, policy: PartialFailurePolicy) -> TaskRouter {
        TaskRouter::new(
            reg,
            Duration::from_secs(5),
            RouterConfig {
                max_merge_size: 5,
                partial_failure_policy: policy,
            },
        )
    }

    async fn route(r: &mut TaskRouter) -> RouteOutcome {
        r.route_once(&Variables::new(), &CancellationToken::new(), &TraceContext::new("t"))
            .await
    }

    #[tokio::test]
    async fn test_closed_tasks_unblock_dependents_in_same_call() {
        let graph = TaskGraphBuilder::new()
            .mergeable_task("x", "Type user", TaskType::Interact)
            .mergeable_task("y", "Type password", TaskType::Interact)
            .task("z", "Submit", TaskType::Interact)
            .depends_on("z", &["x", "y"])
            .build()
            .unwrap();
        let mut r = router(registry_ok(), PartialFailurePolicy::LeaveOpen).with_graph(graph);

        match route(&mut r).await {
            RouteOutcome::Dispatched(report) => {
                assert_eq!(report.batch.task_ids, vec!["x".to_string(), "y".to_string()]);
                assert!(report.success);
                assert_eq!(report.next_ready, vec!["z".to_string()]);
            }
            other => panic!("Expected Dispatched, got {:?}", other),
        }
        assert!(matches!(route(&mut r).await, RouteOutcome::Dispatched(_)));
        assert!(matches!(route(&mut r).await, RouteOutcome::Drained));
    }

    #[tokio::test]
    async fn test_no_capable_executor_is_reported() {
        let mut r = router(registry_ok(), PartialFailurePolicy::LeaveOpen);
        r.plan(vec![Task::new("v", "Assert title", TaskType::Verify)]).unwrap();
        match route(&mut r).await {
            RouteOutcome::Dispatched(report) => {
                assert!(!report.success);
                assert!(report.executor.is_none());
                assert!(report.error.unwrap().contains("verify"));
                assert_eq!(report.left_open_ids, vec!["v".to_string()]);
            }
            other => panic!("Expected Dispatched, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_partial_failure_policies() {
        let mut reg = ExecutorRegistry::new();
        reg.register(CapabilityExecutor::new(
            "half",
            vec![TaskType::Interact],
            |b: &BatchInstruction, _: &Variables| {
                Ok(BatchResult {
                    success: false,
                    completed_ids: vec![b.task_ids[0].clone()],
                    failed_ids: b.task_ids[1..].to_vec(),
                    summary: "first only".into(),
                    error: Some("second field not found".into()),
                    updated_variables: None,
                })
            },
        ));
        let tasks = || {
            TaskGraphBuilder::new()
                .mergeable_task("a", "A", TaskType::Interact)
                .mergeable_task("b", "B", TaskType::Interact)
                .into_tasks()
        };

        let mut leave = router(reg.clone(), PartialFailurePolicy::LeaveOpen);
        leave.plan(tasks()).unwrap();
        let RouteOutcome::Dispatched(report) = route(&mut leave).await else {
            panic!("Expected Dispatched");
        };
        assert_eq!(report.closed_ids, vec!["a".to_string()]);
        assert_eq!(report.next_ready, vec!["b".to_string()]);

        let mut force = router(reg, PartialFailurePolicy::ForceClose);
        force.plan(tasks()).unwrap();
        let RouteOutcome::Dispatched(report) = route(&mut force).await else {
            panic!("Expected Dispatched");
        };
        assert_eq!(report.closed_ids.len(), 2);
        assert!(report.next_ready.is_empty());
        assert_eq!(force.graph().get("b").unwrap().outcome, Some(TaskOutcome::Failed));
    }

    #[tokio::test]
    async fn test_empty_graph_is_drained() {
        let mut r = router(registry_ok(), PartialFailurePolicy::LeaveOpen);
        assert!(matches!(route(&mut r).await, RouteOutcome::Drained));
        assert!(!r.has_open_planned());
    }

    #[tokio::test]
    async fn test_force_closed_failure_unblocks_dependents() {
        let mut reg = ExecutorRegistry::new();
        reg.register(CapabilityExecutor::new(
            "broken",
            vec![TaskType::Navigate],
            |b: &BatchInstruction, _: &Variables| Ok(BatchResult::failed(b, "timeout loading page")),
        ));
        let graph = TaskGraphBuilder::new()
            .task("open", "Open site", TaskType::Navigate)
            .task("read", "Read title", TaskType::Extract)
            .sequential("open", "read")
            .build()
            .unwrap();
        let mut r = router(reg, PartialFailurePolicy::ForceClose).with_graph(graph);
        let RouteOutcome::Dispatched(report) = route(&mut r).await else {
            panic!("Expected Dispatched");
        };
        assert_eq!(report.error.as_deref(), Some("timeout loading page"));
        assert_eq!(report.next_ready, vec!["read".to_string()]);
    }

    #[tokio::test]
    async fn test_action_task_always_closed() {
        let mut reg = ExecutorRegistry::new();
        reg.register(CapabilityExecutor::new(
            "broken",
            vec![TaskType::Interact],
            |_: &BatchInstruction, _: &Variables| Err("element #missing not found".to_string()),
        ));
        let mut r = router(reg, PartialFailurePolicy::LeaveOpen);
        let action = Action::new("click", serde_json::json!({"selector": "#missing"}), "try");
        let id = r.enqueue_action(&action).unwrap();
        let RouteOutcome::Dispatched(report) = route(&mut r).await else {
            panic!("Expected Dispatched");
        };
        assert!(!report.success);
        assert!(report.error.unwrap().contains("#missing"));
        assert!(r.graph().get(&id).unwrap().is_closed());
        assert!(!r.graph().has_open());
    }
}
