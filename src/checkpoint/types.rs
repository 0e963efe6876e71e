//! 检查点与会话线程类型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::truncate_chars;

/// 预览文本上限（字符）
pub const PREVIEW_MAX_CHARS: usize = 80;

/// 某个迭代边界上的会话快照元数据；状态本体以 JSON 文本另存
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    pub checkpoint_id: String,
    pub parent_checkpoint_id: Option<String>,
    /// 线程内全序
    pub step: u64,
    pub created_at: DateTime<Utc>,
    pub message_preview: String,
    pub is_user_message: bool,
}

/// 会话线程
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub thread_id: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 追加检查点的请求
#[derive(Debug, Clone, Default)]
pub struct CheckpointMeta {
    pub message_preview: String,
    pub is_user_message: bool,
    pub parent_checkpoint_id: Option<String>,
}

impl CheckpointMeta {
    pub fn new(preview: &str) -> Self {
        Self {
            message_preview: preview_text(preview),
            ..Default::default()
        }
    }

    pub fn user(mut self) -> Self {
        self.is_user_message = true;
        self
    }

    pub fn parent(mut self, parent: Option<String>) -> Self {
        self.parent_checkpoint_id = parent;
        self
    }
}

/// 单行预览：合并空白后截断到 80 字符
pub fn preview_text(s: &str) -> String {
    let line = s.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&line, PREVIEW_MAX_CHARS)
}

pub fn new_checkpoint_id() -> String {
    format!("ckpt_{}", uuid::Uuid::new_v4().simple())
}

pub fn new_thread_id() -> String {
    format!("thread_{}", uuid::Uuid::new_v4().simple())
}
