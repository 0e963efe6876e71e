//! 任务图：任务类型、依赖图存储与构建器

pub mod builder;
pub mod graph;
pub mod types;

pub use builder::TaskGraphBuilder;
pub use graph::TaskGraphStore;
pub use types::*;
