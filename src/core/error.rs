//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 RecordFailure / Terminate / RetryOnce / Abort。

use std::time::Duration;

use thiserror::Error;

use crate::storage::StorageError;
use crate::workflow::TaskType;

/// 编排过程中可能出现的错误（决策、执行、死锁、存储等）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Decision oracle timed out after {0:?}")]
    OracleTimeout(Duration),

    #[error("Decision oracle failed: {0}")]
    OracleFailed(String),

    #[error("Malformed decision: {0}")]
    MalformedDecision(String),

    #[error("Executor failed: {0}")]
    ExecutorFailed(String),

    #[error("Executor timed out after {0:?}")]
    ExecutorTimeout(Duration),

    #[error("No executor can handle task type {0}")]
    NoCapableExecutor(TaskType),

    /// 仍有未关闭任务但没有任何就绪任务
    #[error("Deadlock: {0} open task(s) but none ready")]
    Deadlock(usize),

    #[error("Loop detected: {0}")]
    LoopDetected(String),

    #[error("Invalid task graph: {0}")]
    InvalidTask(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Session is already running a task")]
    SessionBusy,

    #[error("stopped by caller")]
    Cancelled,

    #[error("Config error: {0}")]
    ConfigError(String),
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 记为一次失败动作（consecutive_failures + 1），下一轮继续
    RecordFailure(String),
    /// 致命：立即以 error 结束会话，不重试
    Terminate(String),
    /// 存储类错误：重试一次，仍失败则记录日志并忽略
    RetryOnce,
    /// 调用方取消
    Abort,
}
