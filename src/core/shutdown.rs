//! 进程关闭与会话取消
//!
//! 每个会话从 ShutdownManager 领取自己的取消 token（根 token 的子 token）：
//! 单独取消一个会话（如客户端断开）不影响其他会话；收到 Ctrl+C / SIGTERM 时根 token 取消，
//! 所有进行中的会话停止推进并释放各自的工具池。

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 进程级关闭信号，派生会话取消 token
#[derive(Clone, Default)]
pub struct ShutdownManager {
    root: CancellationToken,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新会话的取消 token
    pub fn session_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// 取消所有会话并通知等待方
    pub fn trigger(&self, cause: &str) {
        if !self.root.is_cancelled() {
            info!(cause, "shutting down, cancelling in-flight sessions");
            self.root.cancel();
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// 等待关闭（HTTP 服务的 graceful shutdown 使用）
    pub async fn wait(&self) {
        self.root.cancelled().await;
    }

    /// 后台监听 Ctrl+C 与 SIGTERM，收到即 trigger
    pub fn install_signal_handlers(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            let cause = next_signal().await;
            manager.trigger(cause);
        });
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn next_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => tokio::select! {
            _ = ctrl_c() => "ctrl_c",
            _ = term.recv() => "sigterm",
        },
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM");
            ctrl_c().await;
            "ctrl_c"
        }
    }
}

#[cfg(not(unix))]
async fn next_signal() -> &'static str {
    ctrl_c().await;
    "ctrl_c"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_tokens_are_independent() {
        let manager = ShutdownManager::new();
        let session_a = manager.session_token();
        let session_b = manager.session_token();
        session_a.cancel();
        assert!(!manager.is_shutting_down());
        assert!(!session_b.is_cancelled());
    }

    #[tokio::test]
    async fn test_trigger_cancels_every_session() {
        let manager = ShutdownManager::new();
        let session = manager.session_token();
        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.wait().await })
        };
        manager.trigger("test");
        manager.trigger("test");
        assert!(session.is_cancelled());
        assert!(manager.session_token().is_cancelled());
        waiter.await.unwrap();
    }
}
