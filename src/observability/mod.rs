//! 可观测性：日志初始化与显式传递的追踪上下文
//!
//! TraceContext 随每次运行创建并作为参数向下传递（循环 → 路由 → 执行器），不使用进程级全局状态。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 安装 tracing 订阅器：默认 info，可通过 RUST_LOG 覆盖
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

/// 单次运行的追踪上下文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub thread_id: String,
}

impl TraceContext {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().simple().to_string(),
            thread_id: thread_id.into(),
        }
    }

    /// 会话级 span
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!("session", trace_id = %self.trace_id, thread_id = %self.thread_id)
    }

    /// 单轮迭代 span
    pub fn iteration_span(&self, iteration: u32) -> tracing::Span {
        tracing::info_span!(
            "iteration",
            trace_id = %self.trace_id,
            thread_id = %self.thread_id,
            iteration
        )
    }
}
