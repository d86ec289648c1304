//! 优雅关闭
//!
//! Ctrl+C、SIGTERM 与 stdin 结束都汇到同一个 CancellationToken：主动问候循环与输入循环据此退出，
//! 之后按注册顺序执行清理步骤（等待后台画像更新、挂起延迟事件定时器），每步单独限时。
//! 延迟事件在关闭时保持 active，下次启动由 `DeferredScheduler::restore` 重新挂上定时器。

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::ResponseOrchestrator;
use crate::schedule::DeferredScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
    /// 输入流结束
    InputClosed,
}

/// 关闭信号：只记录第一次请求的原因
#[derive(Debug, Clone, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason: Arc<OnceLock<ShutdownReason>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 请求关闭；返回是否为第一次请求
    pub fn shutdown(&self, reason: ShutdownReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        if first {
            tracing::info!(?reason, "Shutdown requested");
            self.token.cancel();
        }
        first
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().copied()
    }

    /// 后台监听 Ctrl+C 与 SIGTERM
    pub fn install_signal_handlers(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            let reason = tokio::select! {
                _ = manager.token.cancelled() => return,
                Ok(()) = tokio::signal::ctrl_c() => ShutdownReason::UserInitiated,
                _ = terminate() => ShutdownReason::Signal,
            };
            manager.shutdown(reason);
        });
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

/// 关闭时执行的一个清理步骤
#[async_trait]
pub trait CleanupStep: Send + Sync {
    fn label(&self) -> &'static str;

    async fn run(&self) -> anyhow::Result<()>;
}

/// 依次执行清理步骤；单步失败或超时只记日志
pub struct ShutdownCoordinator {
    steps: Vec<Box<dyn CleanupStep>>,
    step_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(step_timeout: Duration) -> Self {
        Self {
            steps: Vec::new(),
            step_timeout,
        }
    }

    pub fn push(&mut self, step: impl CleanupStep + 'static) -> &mut Self {
        self.steps.push(Box::new(step));
        self
    }

    pub async fn run(&self) {
        for step in &self.steps {
            let label = step.label();
            match tokio::time::timeout(self.step_timeout, step.run()).await {
                Ok(Ok(())) => tracing::info!(step = label, "Cleanup step done"),
                Ok(Err(e)) => tracing::warn!(step = label, error = %e, "Cleanup step failed"),
                Err(_) => tracing::warn!(
                    step = label,
                    timeout_secs = self.step_timeout.as_secs(),
                    "Cleanup step timed out"
                ),
            }
        }
    }
}

/// 等待最后一次后台画像更新落盘
pub struct ProfileFlushCleanup(pub Arc<ResponseOrchestrator>);

#[async_trait]
impl CleanupStep for ProfileFlushCleanup {
    fn label(&self) -> &'static str {
        "profile-flush"
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.0.flush_profile_updates().await;
        Ok(())
    }
}

/// 停掉延迟事件定时器，事件本身保持 active
pub struct DeferredTimerCleanup(pub DeferredScheduler);

#[async_trait]
impl CleanupStep for DeferredTimerCleanup {
    fn label(&self) -> &'static str {
        "deferred-timers"
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.0.suspend().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_first_reason_wins() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        assert!(manager.reason().is_none());

        assert!(manager.shutdown(ShutdownReason::InputClosed));
        assert!(!manager.shutdown(ShutdownReason::Signal));
        assert!(token.is_cancelled());
        assert_eq!(manager.reason(), Some(ShutdownReason::InputClosed));
    }

    struct Count(Arc<AtomicUsize>);

    #[async_trait]
    impl CleanupStep for Count {
        fn label(&self) -> &'static str {
            "count"
        }
        async fn run(&self) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fails;

    #[async_trait]
    impl CleanupStep for Fails {
        fn label(&self) -> &'static str {
            "fails"
        }
        async fn run(&self) -> anyhow::Result<()> {
            anyhow::bail!("disk gone")
        }
    }

    struct Hangs;

    #[async_trait]
    impl CleanupStep for Hangs {
        fn label(&self) -> &'static str {
            "hangs"
        }
        async fn run(&self) -> anyhow::Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_or_stuck_step_does_not_stop_the_rest() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        coordinator
            .push(Fails)
            .push(Hangs)
            .push(Count(runs.clone()));
        coordinator.run().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
