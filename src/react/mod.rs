//! 认知层：分层上下文、历史摘要、决策器适配、循环控制器与执行报告

pub mod context;
pub mod events;
pub mod loop_;
pub mod oracle;
pub mod report;
pub mod summarizer;

pub use context::{ContextAssembler, ContextBuild, ContextInput, LayeredContext, DEFAULT_POLICY};
pub use events::{LoopEvent, LoopNode, StateDelta};
pub use loop_::{action_signature, LoopController, RunRequest};
pub use oracle::{parse_decision, Decision, DecisionOracle, LlmOracle, ScriptedOracle};
pub use report::{execution_report, failure_report};
pub use summarizer::{LlmSummarizer, RuleBasedSummarizer, Summarizer};
