//! TaskPilot - Rust 智能体任务编排引擎
//!
//! 模块划分：
//! - **agent**: 会话门面（execute_task / stream_task / stop / is_running）
//! - **checkpoint**: 每个迭代边界的会话快照与线程历史
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、会话状态、会话监管
//! - **executor**: 能力执行器注册表与带超时的派发
//! - **llm**: LLM 客户端抽象与 Mock
//! - **memory**: 带命名空间与重要性评分的长期记忆
//! - **observability**: tracing 初始化与显式传递的追踪上下文
//! - **react**: 分层上下文、摘要、决策器与循环控制器
//! - **router**: 就绪任务合并与派发
//! - **storage**: SQLite 封装与存储后端选择
//! - **workflow**: 任务类型、任务图与构建器

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod core;
pub mod executor;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod router;
pub mod storage;
pub mod workflow;

pub use agent::{create_agent_components, AgentComponents, AgentSession};
