//! 决策器（Decision Oracle）
//!
//! 把分层上下文映射为下一步动作或完成信号。LlmOracle 调用 LLM 并解析 JSON 回复；
//! ScriptedOracle 按预设序列返回决策，用于测试与演示。每次调用都是独立的新决策。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::react::context::LayeredContext;

/// 决策结果
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Act {
        tool: String,
        args: serde_json::Value,
        reasoning: String,
    },
    Complete {
        summary: String,
    },
}

impl Decision {
    pub fn act(tool: impl Into<String>, args: serde_json::Value, reasoning: impl Into<String>) -> Self {
        Decision::Act {
            tool: tool.into(),
            args,
            reasoning: reasoning.into(),
        }
    }

    pub fn complete(summary: impl Into<String>) -> Self {
        Decision::Complete {
            summary: summary.into(),
        }
    }
}

/// 决策器 trait
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn decide(&self, context: &LayeredContext) -> Result<Decision, AgentError>;
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    args: Option<serde_json::Value>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    complete: Option<bool>,
    #[serde(default)]
    summary: Option<String>,
}

/// 解析 LLM 输出：提取 ```json 块或首尾花括号之间的 JSON
pub fn parse_decision(output: &str) -> Result<Decision, AgentError> {
    let trimmed = output.trim();
    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim())
    } else if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start <= end {
            &trimmed[start..=end]
        } else {
            trimmed
        }
    } else {
        return Err(AgentError::MalformedDecision(format!(
            "no JSON object in reply: {}",
            truncate_for_error(trimmed)
        )));
    };

    let raw: RawDecision = serde_json::from_str(json_str)
        .map_err(|e| AgentError::MalformedDecision(format!("{}: {}", e, truncate_for_error(json_str))))?;

    if raw.complete.unwrap_or(false) {
        return Ok(Decision::Complete {
            summary: raw.summary.unwrap_or_default(),
        });
    }
    match raw.tool {
        Some(tool) if !tool.trim().is_empty() => {
            let args = match raw.args {
                None | Some(serde_json::Value::Null) => serde_json::json!({}),
                Some(v) => v,
            };
            Ok(Decision::Act {
                tool: tool.trim().to_string(),
                args,
                reasoning: raw.reasoning.unwrap_or_default(),
            })
        }
        _ => Err(AgentError::MalformedDecision(
            "reply has neither a tool nor complete=true".to_string(),
        )),
    }
}

fn truncate_for_error(s: &str) -> String {
    crate::core::truncate_chars(s, 200)
}

/// LLM 决策器
pub struct LlmOracle {
    llm: Arc<dyn LlmClient>,
}

impl LlmOracle {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl DecisionOracle for LlmOracle {
    async fn decide(&self, context: &LayeredContext) -> Result<Decision, AgentError> {
        let messages = context.to_messages();
        let reply = self
            .llm
            .complete(&messages)
            .await
            .map_err(AgentError::OracleFailed)?;
        parse_decision(&reply)
    }
}

/// 脚本化决策器：按序返回预设决策；用完后重复最后一条（没有则返回完成）
pub struct ScriptedOracle {
    script: Mutex<VecDeque<Result<Decision, String>>>,
    last: Mutex<Option<Decision>>,
    calls: Mutex<usize>,
}

impl ScriptedOracle {
    pub fn new<I>(decisions: I) -> Self
    where
        I: IntoIterator<Item = Decision>,
    {
        Self {
            script: Mutex::new(decisions.into_iter().map(Ok).collect()),
            last: Mutex::new(None),
            calls: Mutex::new(0),
        }
    }

    /// 追加一次失败（模拟决策器出错）
    pub fn then_error(self, error: impl Into<String>) -> Self {
        if let Ok(mut s) = self.script.lock() {
            s.push_back(Err(error.into()));
        }
        self
    }

    pub fn then(self, decision: Decision) -> Self {
        if let Ok(mut s) = self.script.lock() {
            s.push_back(Ok(decision));
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().map(|c| *c).unwrap_or(0)
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    async fn decide(&self, _context: &LayeredContext) -> Result<Decision, AgentError> {
        if let Ok(mut c) = self.calls.lock() {
            *c += 1;
        }
        let next = self
            .script
            .lock()
            .map_err(|_| AgentError::OracleFailed("script lock poisoned".to_string()))?
            .pop_front();
        let mut last = self
            .last
            .lock()
            .map_err(|_| AgentError::OracleFailed("script lock poisoned".to_string()))?;
        match next {
            Some(Ok(decision)) => {
                *last = Some(decision.clone());
                Ok(decision)
            }
            Some(Err(e)) => Err(AgentError::OracleFailed(e)),
            None => Ok(last
                .clone()
                .unwrap_or_else(|| Decision::complete("No further actions."))),
        }
    }
}
