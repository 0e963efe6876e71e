//! Agent 会话门面
//!
//! AgentComponents 是可在多个会话间共享的部件（决策器、执行器注册表、摘要器、记忆与检查点存储）；
//! AgentSession 组合它们，对外提供 execute_task / stream_task / stop / is_running。
//! 同一 AgentSession 同一时刻只允许一个任务在跑；不同 thread_id 的会话可以并发，只共享两个存储。

use std::sync::{Arc, Mutex};

use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;

use crate::checkpoint::{new_thread_id, preview_text, Checkpoint, CheckpointStore, ThreadInfo};
use crate::config::{AppConfig, ContextConfig, RouterConfig, SessionConfig};
use crate::core::{retry_storage_once, AgentError, SessionState, SessionSupervisor};
use crate::executor::ExecutorRegistry;
use crate::memory::{MemoryContext, MemoryManager};
use crate::observability::TraceContext;
use crate::react::{
    ContextAssembler, DecisionOracle, LoopController, LoopEvent, RuleBasedSummarizer, RunRequest, Summarizer,
};
use crate::router::TaskRouter;
use crate::storage::open_stores;
use crate::workflow::Task;

/// 流式事件通道容量
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// 预构建的 Agent 部件，可多会话共享
#[derive(Clone)]
pub struct AgentComponents {
    pub oracle: Arc<dyn DecisionOracle>,
    pub registry: ExecutorRegistry,
    pub summarizer: Arc<dyn Summarizer>,
    pub memory: Arc<MemoryManager>,
    pub checkpoints: Arc<dyn CheckpointStore>,
}

/// 按配置打开存储并组装部件；摘要器默认用规则摘要
pub fn create_agent_components(
    cfg: &AppConfig,
    oracle: Arc<dyn DecisionOracle>,
    registry: ExecutorRegistry,
) -> Result<AgentComponents, AgentError> {
    let (memory_store, checkpoints) = open_stores(&cfg.storage)?;
    Ok(AgentComponents {
        oracle,
        registry,
        summarizer: Arc::new(RuleBasedSummarizer::new()),
        memory: Arc::new(MemoryManager::new(memory_store, cfg.memory.clone())),
        checkpoints,
    })
}

impl AgentComponents {
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }
}

/// Agent 会话
pub struct AgentSession {
    components: AgentComponents,
    session: SessionConfig,
    context: ContextConfig,
    router: RouterConfig,
    policy: Option<String>,
    /// 下一次运行要写入任务图的规划任务
    plan: Mutex<Vec<Task>>,
    supervisor: SessionSupervisor,
}

impl AgentSession {
    pub fn new(components: AgentComponents, cfg: &AppConfig) -> Self {
        Self {
            components,
            session: SessionConfig::from(&cfg.session),
            context: ContextConfig::from(&cfg.context),
            router: RouterConfig::from(&cfg.router),
            policy: cfg.context.policy_prompt.clone(),
            plan: Mutex::new(Vec::new()),
            supervisor: SessionSupervisor::new(),
        }
    }

    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.session = config;
        self
    }

    pub fn with_context_config(mut self, config: ContextConfig) -> Self {
        self.context = config;
        self
    }

    pub fn with_router_config(mut self, config: RouterConfig) -> Self {
        self.router = config;
        self
    }

    /// L0 策略提示词
    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    /// 为下一次运行预置规划任务
    pub fn with_plan(self, tasks: Vec<Task>) -> Self {
        self.set_plan(tasks);
        self
    }

    pub fn set_plan(&self, tasks: Vec<Task>) {
        if let Ok(mut plan) = self.plan.lock() {
            *plan = tasks;
        }
    }

    pub fn components(&self) -> &AgentComponents {
        &self.components
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.components.memory
    }

    /// 执行一个目标直到终态；thread_id 为空时新建线程
    pub async fn execute_task(&self, goal: &str, thread_id: Option<&str>) -> Result<SessionState, AgentError> {
        self.start(goal, thread_id, false).await
    }

    /// 启动一次运行；resume=true 时从该线程最新检查点恢复
    pub async fn start(&self, goal: &str, thread_id: Option<&str>, resume: bool) -> Result<SessionState, AgentError> {
        let thread_id = thread_id.map(str::to_string).unwrap_or_else(new_thread_id);
        self.run(RunRequest::new(thread_id, goal).resume(resume)).await
    }

    /// 从指定检查点重新开始（分支历史）
    pub async fn resume_from(&self, thread_id: &str, checkpoint_id: &str) -> Result<SessionState, AgentError> {
        let stored = self
            .components
            .checkpoints
            .get_state_at(thread_id, checkpoint_id)
            .await?;
        self.run(RunRequest::new(thread_id, stored.goal).from_checkpoint(checkpoint_id))
            .await
    }

    async fn run(&self, request: RunRequest) -> Result<SessionState, AgentError> {
        let guard = self.supervisor.begin().ok_or(AgentError::SessionBusy)?;
        let cancel = guard.token();
        let trace = TraceContext::new(request.thread_id.clone());
        let mut controller = self.prepare(&request).await?;
        let state = controller.run(request.clone(), &cancel, &trace).await;
        record_session(&self.components.memory, &request.thread_id, &state).await;
        drop(guard);
        Ok(state)
    }

    /// 流式执行：按顺序产出 {节点, 状态增量}，最后一个事件是最终状态。丢弃流即取消运行。
    pub async fn stream_task(
        &self,
        goal: &str,
        thread_id: Option<&str>,
    ) -> Result<BoxStream<'static, LoopEvent>, AgentError> {
        let guard = self.supervisor.begin().ok_or(AgentError::SessionBusy)?;
        let thread_id = thread_id.map(str::to_string).unwrap_or_else(new_thread_id);
        let request = RunRequest::new(thread_id, goal);
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut controller = self.prepare(&request).await?.with_events(tx);
        let memory = Arc::clone(&self.components.memory);
        let cancel = guard.token();
        // 流被丢弃时取消运行
        let on_drop = cancel.clone().drop_guard();

        tokio::spawn(async move {
            let trace = TraceContext::new(request.thread_id.clone());
            let state = controller.run(request.clone(), &cancel, &trace).await;
            record_session(&memory, &request.thread_id, &state).await;
            drop(guard);
        });

        Ok(stream::unfold((rx, on_drop), |(mut rx, on_drop)| async move {
            rx.recv().await.map(|ev| (ev, (rx, on_drop)))
        })
        .boxed())
    }

    /// 请求取消当前任务
    pub fn stop(&self) {
        self.supervisor.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    pub async fn list_threads(&self) -> Result<Vec<ThreadInfo>, AgentError> {
        Ok(self.components.checkpoints.list_threads().await?)
    }

    pub async fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>, AgentError> {
        Ok(self.components.checkpoints.get_history(thread_id).await?)
    }

    async fn prepare(&self, request: &RunRequest) -> Result<LoopController, AgentError> {
        let store = self.components.checkpoints.as_ref();
        let thread_id = request.thread_id.as_str();
        let title = preview_text(&request.goal);
        let title = title.as_str();
        retry_storage_once("checkpoint.create_thread", move || {
            store.create_thread(Some(thread_id), Some(title))
        })
        .await;

        let memory = match self.components.memory.build_context_for_task(&request.goal).await {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                tracing::warn!(error = %e, "failed to load memory context, continuing without it");
                None::<MemoryContext>
            }
        };

        let mut router = TaskRouter::new(
            self.components.registry.clone(),
            self.session.action_timeout,
            self.router.clone(),
        );
        let plan = self.plan.lock().map(|mut p| std::mem::take(&mut *p)).unwrap_or_default();
        if !plan.is_empty() {
            tracing::info!(tasks = plan.len(), "seeding task graph with planned tasks");
            router.plan(plan)?;
        }

        let mut assembler = ContextAssembler::new(self.context.clone(), Arc::clone(&self.components.summarizer));
        if let Some(policy) = &self.policy {
            assembler = assembler.with_policy(policy.clone());
        }

        Ok(LoopController::new(
            Arc::clone(&self.components.oracle),
            assembler,
            router,
            Arc::clone(&self.components.checkpoints),
            self.session.clone(),
        )
        .with_memory_context(memory))
    }
}

/// 运行结束后写回长期记忆；失败只记日志
async fn record_session(memory: &MemoryManager, thread_id: &str, state: &SessionState) {
    if let Err(e) = memory.record_session(thread_id, state).await {
        tracing::warn!(thread_id, error = %e, "failed to record session in memory");
    }
}
