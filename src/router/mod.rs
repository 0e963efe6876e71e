//! 任务路由：就绪任务合并与按能力派发

pub mod merge;
pub mod task_router;

pub use merge::merge_ready_batch;
pub use task_router::{RouteOutcome, RouteReport, TaskRouter};
