//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供循环控制器决定是计一次失败、直接终止、重试存储还是中止。

use std::future::Future;

use crate::core::{AgentError, RecoveryAction};
use crate::storage::StorageError;

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default, Clone)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// 根据错误类型返回建议的恢复动作
    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::OracleTimeout(_)
            | AgentError::OracleFailed(_)
            | AgentError::MalformedDecision(_)
            | AgentError::ExecutorFailed(_)
            | AgentError::ExecutorTimeout(_)
            | AgentError::NoCapableExecutor(_) => RecoveryAction::RecordFailure(err.to_string()),
            AgentError::Deadlock(_) | AgentError::LoopDetected(_) | AgentError::InvalidTask(_) => {
                RecoveryAction::Terminate(err.to_string())
            }
            AgentError::Storage(_) => RecoveryAction::RetryOnce,
            AgentError::Cancelled => RecoveryAction::Abort,
            AgentError::SessionBusy | AgentError::ConfigError(_) => {
                RecoveryAction::Terminate(err.to_string())
            }
        }
    }
}

/// 存储写入：失败重试一次；第二次仍失败则记录日志并返回 None，绝不向上中断任务循环
pub async fn retry_storage_once<T, F, Fut>(label: &str, mut op: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    match op().await {
        Ok(v) => Some(v),
        Err(first) => {
            tracing::warn!(op = label, error = %first, "storage operation failed, retrying once");
            match op().await {
                Ok(v) => Some(v),
                Err(second) => {
                    tracing::error!(op = label, error = %second, "storage operation failed twice, ignoring");
                    None
                }
            }
        }
    }
}
