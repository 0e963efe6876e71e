//! 分层上下文组装
//!
//! 每轮迭代构建四层上下文：
//! - L0 策略：调用方提供的固定提示词
//! - L1 记忆：长期记忆（偏好/事实/近期任务）+ 滚动会话摘要
//! - L2 当前任务：只含目标与上一步结果的一段话，不含完整历史
//! - L3 最近历史：最近 max_recent_messages 条动作（滑动窗口）
//!
//! 历史长度超过 summary_threshold 时，把窗口之前尚未摘要的动作折叠进摘要，summarized_message_count 随之前移。

use std::sync::Arc;

use crate::config::ContextConfig;
use crate::core::{truncate_chars, Action};
use crate::llm::Message;
use crate::memory::MemoryContext;
use crate::react::summarizer::{marker_line, Summarizer};

/// 默认 L0 策略提示词
pub const DEFAULT_POLICY: &str = "You are a browser automation agent. Work towards the user's goal one action at a time.\n\
Reply with JSON only:\n\
- to act: {\"tool\": \"<tool name>\", \"args\": {...}, \"reasoning\": \"<why>\"}\n\
- when the goal is achieved: {\"complete\": true, \"summary\": \"<what was done>\"}\n\
Do not repeat an action that already failed with the same arguments.";

/// 四层上下文
#[derive(Debug, Clone, PartialEq)]
pub struct LayeredContext {
    /// L0
    pub policy: String,
    /// L1
    pub memory: String,
    /// L2
    pub current_task: String,
    /// L3
    pub recent: Vec<Message>,
}

impl LayeredContext {
    /// 渲染为 LLM 消息：system(L0 + L1)，L3 各条，最后 user(L2)
    pub fn to_messages(&self) -> Vec<Message> {
        let system = if self.memory.is_empty() {
            self.policy.clone()
        } else {
            format!("{}\n\n{}", self.policy, self.memory)
        };
        let mut messages = Vec::with_capacity(self.recent.len() + 2);
        messages.push(Message::system(system));
        messages.extend(self.recent.iter().cloned());
        messages.push(Message::user(self.current_task.clone()));
        messages
    }

    /// 总字符数
    pub fn char_len(&self) -> usize {
        self.policy.chars().count()
            + self.memory.chars().count()
            + self.current_task.chars().count()
            + self.recent.iter().map(Message::char_len).sum::<usize>()
    }
}

/// build 的结果：上下文，以及本轮触发摘要时的新摘要与新的已摘要条数
#[derive(Debug, Clone)]
pub struct ContextBuild {
    pub context: LayeredContext,
    pub new_summary: Option<String>,
    pub summarized_count: Option<usize>,
}

/// 构建上下文的输入
#[derive(Debug, Clone, Copy)]
pub struct ContextInput<'a> {
    pub goal: &'a str,
    pub history: &'a [Action],
    pub existing_summary: Option<&'a str>,
    pub summarized_count: usize,
    pub memory: Option<&'a MemoryContext>,
}

/// 上下文组装器
pub struct ContextAssembler {
    config: ContextConfig,
    policy: String,
    summarizer: Arc<dyn Summarizer>,
}

impl ContextAssembler {
    pub fn new(config: ContextConfig, summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            config,
            policy: DEFAULT_POLICY.to_string(),
            summarizer,
        }
    }

    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = policy.into();
        self
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub async fn build(&self, input: ContextInput<'_>) -> ContextBuild {
        let history = input.history;
        let window_start = history.len().saturating_sub(self.config.max_recent_messages);

        let mut summary = input.existing_summary.map(str::to_string);
        let mut new_summary = None;
        let mut summarized_count = None;
        if history.len() > self.config.summary_threshold && input.summarized_count < window_start {
            let prefix = &history[input.summarized_count..window_start];
            let merged = self
                .summarizer
                .summarize(input.existing_summary, prefix, self.config.summary_max_chars)
                .await;
            tracing::debug!(
                folded = prefix.len(),
                summarized_count = window_start,
                chars = merged.chars().count(),
                "history folded into summary"
            );
            summary = Some(merged.clone());
            new_summary = Some(merged);
            summarized_count = Some(window_start);
        }

        let context = LayeredContext {
            policy: self.policy.clone(),
            memory: memory_layer(input.memory, summary.as_deref()),
            current_task: current_task_layer(input.goal, history.last()),
            recent: history[window_start..]
                .iter()
                .map(|a| Message::assistant(marker_line(a)))
                .collect(),
        };
        ContextBuild {
            context,
            new_summary,
            summarized_count,
        }
    }
}

fn memory_layer(memory: Option<&MemoryContext>, summary: Option<&str>) -> String {
    let mut parts = Vec::new();
    if let Some(m) = memory {
        if !m.summary_text.is_empty() {
            parts.push(m.summary_text.clone());
        }
    }
    if let Some(s) = summary {
        if !s.trim().is_empty() {
            parts.push(format!("Progress so far:\n{}", s));
        }
    }
    parts.join("\n\n")
}

/// L2：目标 + 上一步结果，一段话
fn current_task_layer(goal: &str, last: Option<&Action>) -> String {
    let outcome = match last {
        None => "No action taken yet.".to_string(),
        Some(a) => match &a.result {
            Some(r) if r.success => format!("Last action {} succeeded.", a.describe()),
            Some(r) => format!(
                "Last action {} failed: {}",
                a.describe(),
                truncate_chars(
                    &r.error.as_deref().unwrap_or("unknown error").replace('\n', " "),
                    200
                )
            ),
            None => format!("Last action {} has no result.", a.describe()),
        },
    };
    format!("Goal: {} {}", goal.trim(), outcome)
}
