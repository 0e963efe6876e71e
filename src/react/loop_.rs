//! 循环控制器：Observe → Orchestrate → Execute → Finalize
//!
//! 每轮迭代：
//! 1. 组装分层上下文（必要时折叠历史进摘要）
//! 2. 任务图中仍有规划任务时直接路由下一批；否则询问决策器（带超时，可被取消打断）
//! 3. 循环检测：同一 (tool, 规范化 args) 签名已出现 max_repeated_actions 次则强制终止
//! 4. 动作登记为单个不可合并任务，经 TaskRouter 派发并写入 action_history
//! 5. 终止判定：先连续失败，再最大迭代数
//! 6. 每轮结束写一个检查点
//!
//! 状态只在本模块内推进；检查点写失败只记日志，不影响内存中的状态。

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::checkpoint::{CheckpointMeta, CheckpointStore};
use crate::config::SessionConfig;
use crate::core::{
    retry_storage_once, Action, ActionResult, AgentError, RecoveryAction, RecoveryEngine, SessionState,
    SessionStatus,
};
use crate::memory::MemoryContext;
use crate::observability::TraceContext;
use crate::react::context::{ContextAssembler, ContextInput, LayeredContext};
use crate::react::events::{LoopEvent, LoopNode, StateDelta};
use crate::react::oracle::{Decision, DecisionOracle};
use crate::react::report::{execution_report, failure_report};
use crate::router::{RouteOutcome, TaskRouter};

/// 决策器出错时记入历史的工具名
pub const ORACLE_TOOL: &str = "oracle.decide";
/// 规划批次记入历史的工具名
pub const ROUTE_TOOL: &str = "route";

/// 一次运行的入口参数
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub thread_id: String,
    pub goal: String,
    /// 从该线程最新检查点恢复
    pub resume: bool,
    /// 从指定检查点恢复（优先于 resume）
    pub from_checkpoint: Option<String>,
}

impl RunRequest {
    pub fn new(thread_id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            goal: goal.into(),
            resume: false,
            from_checkpoint: None,
        }
    }

    pub fn resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn from_checkpoint(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.from_checkpoint = Some(checkpoint_id.into());
        self
    }
}

/// 动作签名：`tool:` + 规范化参数（对象键排序，字符串去首尾空白并合并内部空白）
pub fn action_signature(tool: &str, args: &serde_json::Value) -> String {
    let mut out = String::with_capacity(64);
    out.push_str(tool.trim());
    out.push(':');
    write_canonical(args, &mut out);
    out
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(v, out);
            }
            out.push(']');
        }
        Value::String(s) => {
            let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
            out.push_str(&Value::String(collapsed).to_string());
        }
        other => out.push_str(&other.to_string()),
    }
}

/// 单轮结束后的走向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
    Cancelled,
}

/// 恢复结果
enum Restored {
    /// 同一目标的终态：原样返回
    Finished(SessionState),
    /// 未结束的状态：继续循环
    Continue { state: SessionState, parent: String },
    /// 新会话或终态上的后续目标
    Fresh { state: SessionState, parent: Option<String> },
}

/// 本轮待执行的工作
enum Pending {
    Planned,
    Action(Action),
}

/// 循环控制器：独占 SessionState 与任务图，顺序推进
pub struct LoopController {
    oracle: Arc<dyn DecisionOracle>,
    assembler: ContextAssembler,
    router: TaskRouter,
    checkpoints: Arc<dyn CheckpointStore>,
    config: SessionConfig,
    recovery: RecoveryEngine,
    memory: Option<MemoryContext>,
    events: Option<mpsc::Sender<LoopEvent>>,
}

impl LoopController {
    pub fn new(
        oracle: Arc<dyn DecisionOracle>,
        assembler: ContextAssembler,
        router: TaskRouter,
        checkpoints: Arc<dyn CheckpointStore>,
        config: SessionConfig,
    ) -> Self {
        Self {
            oracle,
            assembler,
            router,
            checkpoints,
            config,
            recovery: RecoveryEngine::new(),
            memory: None,
            events: None,
        }
    }

    /// 本次运行使用的长期记忆上下文（L1）
    pub fn with_memory_context(mut self, memory: Option<MemoryContext>) -> Self {
        self.memory = memory.filter(|m| !m.is_empty());
        self
    }

    /// 事件通道；接收端被丢弃时取消运行
    pub fn with_events(mut self, tx: mpsc::Sender<LoopEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn router(&self) -> &TaskRouter {
        &self.router
    }

    /// 运行至终态并返回最终状态
    pub async fn run(&mut self, request: RunRequest, cancel: &CancellationToken, trace: &TraceContext) -> SessionState {
        let span = trace.span();
        self.run_inner(request, cancel, trace).instrument(span).await
    }

    async fn run_inner(&mut self, request: RunRequest, cancel: &CancellationToken, trace: &TraceContext) -> SessionState {
        let thread_id = request.thread_id.as_str();
        let (mut state, mut parent) = match self.restore(&request).await {
            Restored::Finished(state) => {
                tracing::info!(thread_id, "goal already finished on this thread, returning stored state");
                self.emit(cancel, LoopEvent::Finished { state: Box::new(state.clone()) })
                    .await;
                return state;
            }
            Restored::Continue { state, parent } => {
                tracing::info!(
                    thread_id,
                    iteration = state.iteration_count,
                    checkpoint = %parent,
                    "resuming unfinished session"
                );
                (state, Some(parent))
            }
            Restored::Fresh { state, parent } => {
                tracing::info!(thread_id, goal = %state.goal, "starting session");
                let meta = CheckpointMeta::new(&state.goal).user().parent(parent.clone());
                let id = self.checkpoint(thread_id, &state, meta).await;
                (state, id.or(parent))
            }
        };

        loop {
            if cancel.is_cancelled() {
                finish_cancelled(&mut state);
            } else {
                state.iteration_count += 1;
                let span = trace.iteration_span(state.iteration_count);
                let flow = self.iterate(&mut state, cancel, trace).instrument(span).await;
                if flow == Flow::Cancelled {
                    finish_cancelled(&mut state);
                }
            }

            let meta = CheckpointMeta::new(&checkpoint_preview(&state)).parent(parent.clone());
            if let Some(id) = self.checkpoint(thread_id, &state, meta).await {
                parent = Some(id);
            }

            if state.status.is_terminal() {
                tracing::info!(
                    thread_id,
                    status = ?state.status,
                    iterations = state.iteration_count,
                    actions = state.action_history.len(),
                    loop_detected = state.loop_detected,
                    "session finished"
                );
                self.emit(cancel, LoopEvent::step(LoopNode::Finalize, StateDelta::terminal(&state)))
                    .await;
                break;
            }
        }

        self.emit(cancel, LoopEvent::Finished { state: Box::new(state.clone()) })
            .await;
        state
    }

    async fn restore(&self, request: &RunRequest) -> Restored {
        let store = self.checkpoints.as_ref();
        let thread_id = request.thread_id.as_str();
        let restored = if let Some(checkpoint_id) = request.from_checkpoint.as_deref() {
            retry_storage_once("checkpoint.get_state_at", move || store.get_state_at(thread_id, checkpoint_id))
                .await
                .map(|s| (checkpoint_id.to_string(), s))
        } else if request.resume {
            retry_storage_once("checkpoint.latest", move || store.latest(thread_id))
                .await
                .flatten()
                .map(|(cp, s)| (cp.checkpoint_id, s))
        } else {
            None
        };

        match restored {
            None => Restored::Fresh {
                state: SessionState::new(request.goal.clone()),
                parent: None,
            },
            Some((_, state)) if state.status.is_terminal() && state.goal == request.goal => Restored::Finished(state),
            Some((id, state)) if state.status.is_terminal() => Restored::Fresh {
                state: SessionState::follow_up(&state, request.goal.clone()),
                parent: Some(id),
            },
            Some((id, state)) => {
                if state.goal != request.goal {
                    tracing::warn!(
                        stored = %state.goal,
                        requested = %request.goal,
                        "unfinished session has a different goal, continuing the stored one"
                    );
                }
                Restored::Continue { state, parent: id }
            }
        }
    }

    async fn iterate(&mut self, state: &mut SessionState, cancel: &CancellationToken, trace: &TraceContext) -> Flow {
        // Observe
        state.status = SessionStatus::Observing;
        let built = self
            .assembler
            .build(ContextInput {
                goal: &state.goal,
                history: &state.action_history,
                existing_summary: state.conversation_summary.as_deref(),
                summarized_count: state.summarized_message_count,
                memory: self.memory.as_ref(),
            })
            .await;
        let mut observed = StateDelta {
            iteration: Some(state.iteration_count),
            status: Some(SessionStatus::Observing),
            ..Default::default()
        };
        if let Some(summary) = built.new_summary {
            state.conversation_summary = Some(summary.clone());
            observed.summary = Some(summary);
        }
        if let Some(count) = built.summarized_count {
            state.summarized_message_count = count;
        }
        self.emit(cancel, LoopEvent::step(LoopNode::Observe, observed)).await;

        // Orchestrate
        state.status = SessionStatus::Orchestrating;
        self.emit(
            cancel,
            LoopEvent::step(LoopNode::Orchestrate, StateDelta::status(SessionStatus::Orchestrating)),
        )
        .await;

        let pending = if self.router.has_open_planned() {
            tracing::debug!(open = self.router.graph().open_count(), "planned tasks open, routing without oracle");
            Pending::Planned
        } else {
            let decision = match self.decide(&built.context, cancel).await {
                Ok(d) => d,
                Err(e) => return self.handle_oracle_error(state, e),
            };
            match decision {
                Decision::Complete { summary } => {
                    let summary = if summary.trim().is_empty() {
                        execution_report(&state.action_history)
                    } else {
                        summary
                    };
                    tracing::info!("oracle signalled completion");
                    state.finish_complete(summary);
                    return Flow::Stop;
                }
                Decision::Act { tool, args, reasoning } => {
                    let signature = action_signature(&tool, &args);
                    let seen = {
                        let count = state.action_signatures.entry(signature.clone()).or_insert(0);
                        *count += 1;
                        *count
                    };
                    // 登记后计数达到阈值即终止，本次提议不再执行
                    if seen >= self.config.max_repeated_actions {
                        let err = AgentError::LoopDetected(format!("{} proposed {} times", signature, seen));
                        tracing::warn!(signature = %signature, seen, "loop detected");
                        state.loop_detected = true;
                        let reason = err.to_string();
                        let report = failure_report(&reason, &state.action_history);
                        state.finish_error(reason, report);
                        return Flow::Stop;
                    }

                    let action = Action::new(tool, args, reasoning);
                    tracing::info!(action = %action.describe(), "oracle proposed action");
                    if let Err(e) = self.router.enqueue_action(&action) {
                        return self.record_failure(state, action, e.to_string(), 0);
                    }
                    Pending::Action(action)
                }
            }
        };

        // Execute
        state.status = SessionStatus::Executing;
        self.emit(
            cancel,
            LoopEvent::step(LoopNode::Execute, StateDelta::status(SessionStatus::Executing)),
        )
        .await;

        let report = match self.router.route_once(&state.execution_variables, cancel, trace).await {
            RouteOutcome::Cancelled => return Flow::Cancelled,
            RouteOutcome::Drained => {
                tracing::info!("task graph drained");
                state.finish_complete(execution_report(&state.action_history));
                return Flow::Stop;
            }
            RouteOutcome::Blocked { open } => {
                let reason = AgentError::Deadlock(open).to_string();
                tracing::error!(open, "deadlock in task graph");
                let report = failure_report(&reason, &state.action_history);
                state.finish_error(reason, report);
                return Flow::Stop;
            }
            RouteOutcome::Dispatched(report) => report,
        };

        let mut action = match pending {
            Pending::Action(action) => action,
            Pending::Planned => Action::new(
                ROUTE_TOOL,
                serde_json::json!({
                    "tasks": report.batch.task_ids,
                    "instruction": report.batch.instruction,
                }),
                format!(
                    "planned batch of {} task(s) via {}",
                    report.batch.len(),
                    report.executor.as_deref().unwrap_or("no executor")
                ),
            ),
        };
        action.result = Some(ActionResult {
            success: report.success,
            error: report.error.clone(),
            duration: report.duration.as_millis() as u64,
        });
        if let Some(vars) = report.updated_variables {
            state.execution_variables.extend(vars);
        }
        if report.success {
            tracing::info!(action = %action.describe(), next_ready = report.next_ready.len(), "action succeeded");
        } else {
            tracing::warn!(
                action = %action.describe(),
                error = report.error.as_deref().unwrap_or(""),
                "action failed"
            );
        }
        state.record_action(action.clone());
        self.emit(
            cancel,
            LoopEvent::step(
                LoopNode::Execute,
                StateDelta {
                    action: Some(action),
                    consecutive_failures: Some(state.consecutive_failures),
                    ..Default::default()
                },
            ),
        )
        .await;

        self.check_termination(state)
    }

    /// 调用决策器：超时计为失败，取消立即返回
    async fn decide(&self, context: &LayeredContext, cancel: &CancellationToken) -> Result<Decision, AgentError> {
        let limit = self.config.oracle_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            res = tokio::time::timeout(limit, self.oracle.decide(context)) => match res {
                Ok(decision) => decision,
                Err(_) => Err(AgentError::OracleTimeout(limit)),
            },
        }
    }

    fn handle_oracle_error(&self, state: &mut SessionState, err: AgentError) -> Flow {
        let msg = match self.recovery.handle(&err) {
            RecoveryAction::Abort => return Flow::Cancelled,
            RecoveryAction::Terminate(reason) => {
                let report = failure_report(&reason, &state.action_history);
                state.finish_error(reason, report);
                return Flow::Stop;
            }
            RecoveryAction::RecordFailure(msg) => msg,
            RecoveryAction::RetryOnce => err.to_string(),
        };
        tracing::warn!(error = %msg, "oracle call failed");
        let action = Action::new(ORACLE_TOOL, serde_json::json!({}), "");
        self.record_failure(state, action, msg, 0)
    }

    fn record_failure(&self, state: &mut SessionState, mut action: Action, error: String, duration: u64) -> Flow {
        action.result = Some(ActionResult {
            success: false,
            error: Some(error),
            duration,
        });
        state.record_action(action);
        self.check_termination(state)
    }

    /// 终止判定：连续失败优先于最大迭代数
    fn check_termination(&self, state: &mut SessionState) -> Flow {
        if state.consecutive_failures >= self.config.max_consecutive_failures {
            let reason = format!("{} consecutive failures", state.consecutive_failures);
            tracing::warn!(failures = state.consecutive_failures, "failure threshold reached");
            let report = failure_report(&reason, &state.action_history);
            state.finish_error(reason, report);
            return Flow::Stop;
        }
        if state.iteration_count >= self.config.max_iterations {
            let reason = format!("timeout: max iterations ({}) reached", self.config.max_iterations);
            tracing::warn!(iterations = state.iteration_count, "iteration limit reached");
            let report = failure_report(&reason, &state.action_history);
            state.finish_error(reason, report);
            return Flow::Stop;
        }
        Flow::Continue
    }

    async fn checkpoint(&self, thread_id: &str, state: &SessionState, meta: CheckpointMeta) -> Option<String> {
        let store = self.checkpoints.as_ref();
        retry_storage_once("checkpoint.append", move || {
            store.append_checkpoint(thread_id, state, meta.clone())
        })
        .await
        .map(|cp| cp.checkpoint_id)
    }

    async fn emit(&self, cancel: &CancellationToken, event: LoopEvent) {
        if let Some(tx) = &self.events {
            if tx.send(event).await.is_err() && !cancel.is_cancelled() {
                tracing::debug!("event receiver dropped, cancelling run");
                cancel.cancel();
            }
        }
    }
}

fn finish_cancelled(state: &mut SessionState) {
    let reason = AgentError::Cancelled.to_string();
    tracing::info!("session stopped by caller");
    let report = failure_report(&reason, &state.action_history);
    state.finish_error(reason, report);
}

fn checkpoint_preview(state: &SessionState) -> String {
    if state.status.is_terminal() {
        if let Some(e) = &state.error {
            return e.clone();
        }
        if let Some(r) = &state.result {
            return r.clone();
        }
    }
    state
        .last_action()
        .map(Action::describe)
        .unwrap_or_else(|| state.goal.clone())
}
