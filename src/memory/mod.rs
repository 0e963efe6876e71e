//! 长期记忆：带命名空间与重要性评分的键值记录，跨会话保留
//!
//! - types：记录、命名空间、重要性等级、查询条件
//! - store：MemoryStore trait；in_memory / sqlite 两个实现
//! - manager：按用途封装的 MemoryManager

pub mod in_memory;
pub mod manager;
pub mod sqlite;
pub mod store;
pub mod types;

pub use in_memory::InMemoryMemoryStore;
pub use manager::{MemoryContext, MemoryManager};
pub use sqlite::SqliteMemoryStore;
pub use store::MemoryStore;
pub use types::{ImportanceLevel, MemoryQuery, MemoryRecord, Namespace, OrderBy};
