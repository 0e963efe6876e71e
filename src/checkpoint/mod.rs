//! 检查点：每个迭代边界的会话快照，支持列出线程、回看历史与从任意检查点恢复

pub mod in_memory;
pub mod sqlite;
pub mod store;
pub mod types;

pub use in_memory::InMemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;
pub use store::CheckpointStore;
pub use types::{new_checkpoint_id, new_thread_id, preview_text, Checkpoint, CheckpointMeta, ThreadInfo};
