//! 执行器派发
//!
//! 对每次调用施加超时，执行器调用放入独立 task：取消时只停止等待，不强行中断外部系统，结果被丢弃。
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::core::{AgentError, Variables};
use crate::executor::{BatchInstruction, BatchResult, TaskExecutor};
use crate::observability::TraceContext;

/// 单次派发的结局
#[derive(Debug)]
pub enum DispatchOutcome {
    /// 执行器正常返回（结果内部仍可能是失败）
    Finished { result: BatchResult, duration: Duration },
    /// 执行器返回 Err 或超时
    Failed { error: AgentError, duration: Duration },
    /// 调用方取消；在途调用的结果被丢弃
    Cancelled,
}

/// 带超时的执行器派发器
#[derive(Debug, Clone)]
pub struct Dispatcher {
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn dispatch(
        &self,
        executor: Arc<dyn TaskExecutor>,
        batch: BatchInstruction,
        variables: Variables,
        cancel: &CancellationToken,
        trace: &TraceContext,
    ) -> DispatchOutcome {
        let start = Instant::now();
        let name = executor.name().to_string();
        let task_ids = batch.task_ids.clone();
        let limit = self.timeout;

        let call = tokio::spawn(
            async move { tokio::time::timeout(limit, executor.execute(&batch, &variables)).await }
                .instrument(trace.span()),
        );

        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(executor = %name, "dispatch cancelled, in-flight result will be discarded");
                return DispatchOutcome::Cancelled;
            }
            joined = call => joined,
        };
        let duration = start.elapsed();

        let outcome = match joined {
            Ok(Ok(Ok(result))) => DispatchOutcome::Finished { result, duration },
            Ok(Ok(Err(e))) => DispatchOutcome::Failed {
                error: AgentError::ExecutorFailed(e),
                duration,
            },
            Ok(Err(_)) => DispatchOutcome::Failed {
                error: AgentError::ExecutorTimeout(limit),
                duration,
            },
            Err(join_err) => DispatchOutcome::Failed {
                error: AgentError::ExecutorFailed(format!("executor task panicked: {}", join_err)),
                duration,
            },
        };

        let (ok, label) = match &outcome {
            DispatchOutcome::Finished { result, .. } if result.success => (true, "ok"),
            DispatchOutcome::Finished { .. } => (false, "error"),
            DispatchOutcome::Failed { error: AgentError::ExecutorTimeout(_), .. } => (false, "timeout"),
            DispatchOutcome::Failed { .. } => (false, "error"),
            DispatchOutcome::Cancelled => (false, "cancelled"),
        };
        let audit = serde_json::json!({
            "event": "executor_audit",
            "trace_id": trace.trace_id,
            "executor": name,
            "task_ids": task_ids,
            "ok": ok,
            "outcome": label,
            "duration_ms": duration.as_millis() as u64,
        });
        tracing::info!(audit = %audit.to_string(), "executor");

        outcome
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::workflow::{Task, TaskType};

    struct SlowExecutor(Duration);

    #[async_trait]
    impl TaskExecutor for SlowExecutor {
        fn name(&self) -> &str {
            "slow"
        }

        fn can_handle(&self, _task: &Task) -> bool {
            true
        }

        async fn execute(&self, batch: &BatchInstruction, _v: &Variables) -> Result<BatchResult, String> {
            tokio::time::sleep(self.0).await;
            Ok(BatchResult::completed(batch, "done"))
        }
    }

    struct BrokenExecutor;

    #[async_trait]
    impl TaskExecutor for BrokenExecutor {
        fn name(&self) -> &str {
            "broken"
        }

        fn can_handle(&self, _task: &Task) -> bool {
            true
        }

        async fn execute(&self, _batch: &BatchInstruction, _v: &Variables) -> Result<BatchResult, String> {
            Err("element #missing not found".to_string())
        }
    }

    fn batch() -> BatchInstruction {
        BatchInstruction::from_tasks(vec![Task::new("t1", "click", TaskType::Interact)])
    }

    #[tokio::test]
    async fn test_dispatch_ok() {
        let d = Dispatcher::new(Duration::from_secs(5));
        let out = d
            .dispatch(
                Arc::new(SlowExecutor(Duration::from_millis(1))),
                batch(),
                Variables::new(),
                &CancellationToken::new(),
                &TraceContext::new("t"),
            )
            .await;
        assert!(matches!(out, DispatchOutcome::Finished { ref result, .. } if result.success));
    }

    #[tokio::test]
    async fn test_dispatch_timeout_is_failure() {
        let d = Dispatcher::new(Duration::from_millis(20));
        let out = d
            .dispatch(
                Arc::new(SlowExecutor(Duration::from_secs(5))),
                batch(),
                Variables::new(),
                &CancellationToken::new(),
                &TraceContext::new("t"),
            )
            .await;
        assert!(matches!(
            out,
            DispatchOutcome::Failed { error: AgentError::ExecutorTimeout(_), .. }
        ));
    }

    #[tokio::test]
    async fn test_dispatch_error_is_verbatim() {
        let d = Dispatcher::new(Duration::from_secs(1));
        let out = d
            .dispatch(
                Arc::new(BrokenExecutor),
                batch(),
                Variables::new(),
                &CancellationToken::new(),
                &TraceContext::new("t"),
            )
            .await;
        match out {
            DispatchOutcome::Failed { error, .. } => assert!(error.to_string().contains("#missing")),
            other => panic!("Expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispatch_cancel_returns_early() {
        let d = Dispatcher::new(Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let c2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            c2.cancel();
        });
        let start = Instant::now();
        let out = d
            .dispatch(
                Arc::new(SlowExecutor(Duration::from_secs(30))),
                batch(),
                Variables::new(),
                &cancel,
                &TraceContext::new("t"),
            )
            .await;
        assert!(matches!(out, DispatchOutcome::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
