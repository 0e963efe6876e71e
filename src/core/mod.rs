//! 核心层：错误与恢复、会话状态、会话监管

pub mod error;
pub mod recovery;
pub mod session_supervisor;
pub mod state;

pub use error::{AgentError, RecoveryAction};
pub use recovery::{retry_storage_once, RecoveryEngine};
pub use session_supervisor::{RunGuard, SessionSupervisor};
pub use state::{truncate_chars, Action, ActionResult, SessionState, SessionStatus, Variables};
