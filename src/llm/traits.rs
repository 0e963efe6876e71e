//! LLM 客户端抽象
//!
//! 决策器与摘要器只依赖 LlmClient::complete；具体后端（HTTP API 等）由调用方接入。

use async_trait::async_trait;

use crate::llm::Message;

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;
}
