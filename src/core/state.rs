//! 会话状态：SessionState 与 Action 日志
//!
//! SessionState 由循环控制器独占并每轮推进一次；检查点只读写它的序列化快照。
//! actionHistory 只追加，写入结果后不再修改。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 执行变量（执行器可读写，按 key 有序以保证快照稳定）
pub type Variables = BTreeMap<String, serde_json::Value>;

/// 会话阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Observing,
    Orchestrating,
    Executing,
    Complete,
    Error,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Complete | SessionStatus::Error)
    }
}

/// 单次动作的执行结果
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub error: Option<String>,
    /// 毫秒
    pub duration: u64,
}

/// 一次动作（工具 + 参数 + 推理），记录结果后只读
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub tool: String,
    pub args: serde_json::Value,
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
    pub result: Option<ActionResult>,
}

impl Action {
    pub fn new(tool: impl Into<String>, args: serde_json::Value, reasoning: impl Into<String>) -> Self {
        Self {
            id: format!("act_{}", uuid::Uuid::new_v4()),
            tool: tool.into(),
            args,
            reasoning: reasoning.into(),
            timestamp: Utc::now(),
            result: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.result.as_ref().map(|r| r.success).unwrap_or(false)
    }

    pub fn failed(&self) -> bool {
        self.result.as_ref().map(|r| !r.success).unwrap_or(false)
    }

    /// 一行参数摘要：`key=value, ...`，字符串值不带引号，超长截断
    pub fn args_summary(&self) -> String {
        let s = match &self.args {
            serde_json::Value::Object(map) => map
                .iter()
                .map(|(k, v)| match v {
                    serde_json::Value::String(s) => format!("{}={}", k, s),
                    other => format!("{}={}", k, other),
                })
                .collect::<Vec<_>>()
                .join(", "),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        };
        truncate_chars(&s, 80)
    }

    /// `tool(args)` 形式
    pub fn describe(&self) -> String {
        format!("{}({})", self.tool, self.args_summary())
    }
}

/// 循环控制器每轮推进的唯一可变记录
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub goal: String,
    pub original_goal: String,
    pub iteration_count: u32,
    pub consecutive_failures: u32,
    pub action_history: Vec<Action>,
    pub action_signatures: BTreeMap<String, u32>,
    pub status: SessionStatus,
    pub is_complete: bool,
    pub loop_detected: bool,
    pub error: Option<String>,
    pub result: Option<String>,
    pub conversation_summary: Option<String>,
    pub summarized_message_count: usize,
    pub execution_variables: Variables,
}

impl SessionState {
    pub fn new(goal: impl Into<String>) -> Self {
        let goal = goal.into();
        Self {
            original_goal: goal.clone(),
            goal,
            iteration_count: 0,
            consecutive_failures: 0,
            action_history: Vec::new(),
            action_signatures: BTreeMap::new(),
            status: SessionStatus::Idle,
            is_complete: false,
            loop_detected: false,
            error: None,
            result: None,
            conversation_summary: None,
            summarized_message_count: 0,
            execution_variables: Variables::new(),
        }
    }

    /// 已完成会话上的后续目标：沿用摘要、变量与最初目标，其余归零
    pub fn follow_up(previous: &SessionState, goal: impl Into<String>) -> Self {
        let mut next = SessionState::new(goal);
        next.original_goal = previous.original_goal.clone();
        next.conversation_summary = previous.conversation_summary.clone();
        next.execution_variables = previous.execution_variables.clone();
        next
    }

    pub fn last_action(&self) -> Option<&Action> {
        self.action_history.last()
    }

    /// 追加一条已带结果的动作，并按结果更新连续失败计数
    pub fn record_action(&mut self, action: Action) {
        if action.succeeded() {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
        }
        self.action_history.push(action);
    }

    pub fn finish_complete(&mut self, summary: impl Into<String>) {
        self.status = SessionStatus::Complete;
        self.is_complete = true;
        self.error = None;
        self.result = Some(summary.into());
    }

    pub fn finish_error(&mut self, error: impl Into<String>, report: impl Into<String>) {
        self.status = SessionStatus::Error;
        self.is_complete = false;
        self.error = Some(error.into());
        self.result = Some(report.into());
    }
}

/// 按字符截断（不切断多字节字符），超出时追加 "..."
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn done(tool: &str, ok: bool) -> Action {
        let mut a = Action::new(tool, serde_json::json!({"selector": "#login"}), "");
        a.result = Some(ActionResult {
            success: ok,
            error: if ok { None } else { Some("boom".to_string()) },
            duration: 3,
        });
        a
    }

    #[test]
    fn test_consecutive_failures_reset_on_success() {
        let mut state = SessionState::new("log in");
        state.record_action(done("click", false));
        state.record_action(done("click", false));
        assert_eq!(state.consecutive_failures, 2);
        state.record_action(done("click", true));
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.action_history.len(), 3);
    }

    #[test]
    fn test_args_summary() {
        let a = Action::new("type", serde_json::json!({"selector": "#user", "text": "bob"}), "");
        assert_eq!(a.args_summary(), "selector=#user, text=bob");
        assert_eq!(a.describe(), "type(selector=#user, text=bob)");
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        let s = "点击登录按钮然后等待页面加载";
        let t = truncate_chars(s, 8);
        assert_eq!(t.chars().count(), 8);
        assert!(t.ends_with("..."));
        assert_eq!(truncate_chars("short", 80), "short");
    }

    #[test]
    fn test_follow_up_keeps_summary_and_original_goal() {
        let mut prev = SessionState::new("open the site");
        prev.conversation_summary = Some("[✓] navigate(url=https://example.com)".to_string());
        prev.execution_variables.insert("user".into(), serde_json::json!("bob"));
        prev.finish_complete("done");

        let next = SessionState::follow_up(&prev, "now log in");
        assert_eq!(next.goal, "now log in");
        assert_eq!(next.original_goal, "open the site");
        assert_eq!(next.conversation_summary, prev.conversation_summary);
        assert_eq!(next.execution_variables.len(), 1);
        assert_eq!(next.status, SessionStatus::Idle);
        assert!(next.action_history.is_empty());
    }
}
