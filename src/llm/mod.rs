//! LLM 层：消息类型、客户端抽象与 Mock 实现

pub mod mock;
pub mod traits;
pub mod types;

pub use mock::MockLlmClient;
pub use traits::LlmClient;
pub use types::{Message, Role};
