//! 执行器层：能力执行器注册表与带超时的派发器

pub mod dispatcher;
pub mod registry;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use registry::{BatchInstruction, BatchResult, CapabilityExecutor, ExecutorRegistry, TaskExecutor};
