//! Mock LLM 客户端（用于测试与演示，无需 API）
//!
//! 按顺序返回预设回复；预设用完后重复最后一条。记录每次收到的消息，便于断言提示词内容。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, Message};

#[derive(Debug, Default)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<Result<String, String>>>,
    last: Mutex<Option<Result<String, String>>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|s| Ok(s.into())).collect()),
            ..Default::default()
        }
    }

    /// 追加一次失败回复
    pub fn with_error(self, error: impl Into<String>) -> Self {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(Err(error.into()));
        }
        self
    }

    /// 已收到的调用（每次调用的完整消息列表）
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        let next = self
            .replies
            .lock()
            .map_err(|_| "mock lock poisoned".to_string())?
            .pop_front();
        let mut last = self.last.lock().map_err(|_| "mock lock poisoned".to_string())?;
        match next {
            Some(reply) => {
                *last = Some(reply.clone());
                reply
            }
            None => last.clone().unwrap_or_else(|| Err("no scripted reply".to_string())),
        }
    }
}
