//! 循环过程事件：每个节点产出一个状态增量，最后以完整状态结束

use serde::Serialize;

use crate::core::{Action, SessionState, SessionStatus};

/// 循环节点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopNode {
    /// 组装上下文
    Observe,
    /// 调用决策器或取出计划任务
    Orchestrate,
    /// 派发执行
    Execute,
    /// 终止判定与收尾
    Finalize,
}

/// 状态增量：只包含本节点改变的字段
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StateDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consecutive_failures: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_detected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl StateDelta {
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// 终态增量
    pub fn terminal(state: &SessionState) -> Self {
        Self {
            iteration: Some(state.iteration_count),
            status: Some(state.status),
            loop_detected: Some(state.loop_detected),
            error: state.error.clone(),
            result: state.result.clone(),
            ..Default::default()
        }
    }
}

/// 流式事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    Step { node: LoopNode, delta: StateDelta },
    /// 最终状态（流中最后一个事件）
    Finished { state: Box<SessionState> },
}

impl LoopEvent {
    pub fn step(node: LoopNode, delta: StateDelta) -> Self {
        LoopEvent::Step { node, delta }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, LoopEvent::Finished { .. })
    }
}
