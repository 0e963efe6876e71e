//! 会话监管：生命周期、中断管理
//!
//! 持有 CancellationToken 与运行标记；保证同一会话同一时刻只有一个任务在执行。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

/// 会话级生命周期管理：取消令牌与运行状态
#[derive(Debug, Clone, Default)]
pub struct SessionSupervisor {
    /// 当前任务的取消令牌；每次 begin 换新
    cancel_token: Arc<Mutex<CancellationToken>>,
    running: Arc<AtomicBool>,
}

/// 运行期守卫：Drop 时清除运行标记
#[derive(Debug)]
pub struct RunGuard {
    running: Arc<AtomicBool>,
    token: CancellationToken,
}

impl RunGuard {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开始一个任务；已有任务在跑时返回 None
    ///
    /// 换令牌与置运行标记在同一把锁内完成，stop 要么落在旧任务上，要么落在新令牌上。
    pub fn begin(&self) -> Option<RunGuard> {
        let mut slot = self.cancel_token.lock().ok()?;
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }
        let token = CancellationToken::new();
        *slot = token.clone();
        Some(RunGuard {
            running: Arc::clone(&self.running),
            token,
        })
    }

    /// 触发取消（调用方 stop）
    pub fn cancel(&self) {
        if let Ok(slot) = self.cancel_token.lock() {
            slot.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
