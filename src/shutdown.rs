//! 优雅退出协调
//!
//! 信号（Ctrl+C / SIGTERM）或应用内部请求都会转成一次 `ShutdownReason`，
//! 只有第一次触发生效；之后订阅的等待者立即拿到同一个原因。

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// 退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// 用户中断信号 (Ctrl+C)
    Interrupt,
    /// 终止信号 (SIGTERM)
    Terminate,
    /// 应用请求退出
    Application,
}

#[derive(Debug, Clone)]
pub struct ShutdownManager {
    tx: Arc<watch::Sender<Option<ShutdownReason>>>,
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// 触发退出，重复触发被忽略
    pub fn trigger(&self, reason: ShutdownReason) {
        let first = self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(reason);
            true
        });
        if first {
            info!("触发优雅退出: {:?}", reason);
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// 等待退出信号
    pub async fn wait(&self) -> ShutdownReason {
        let mut rx = self.tx.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).unwrap_or(ShutdownReason::Application),
            Err(_) => ShutdownReason::Application,
        }
    }

    /// 在后台监听系统信号
    pub fn spawn_signal_listener(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            let reason = wait_for_os_signal().await;
            manager.trigger(reason);
        });
    }
}

#[cfg(unix)]
async fn wait_for_os_signal() -> ShutdownReason {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("注册 SIGTERM 失败，仅监听 Ctrl+C: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return ShutdownReason::Interrupt;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => ShutdownReason::Interrupt,
        _ = term.recv() => ShutdownReason::Terminate,
    }
}

#[cfg(not(unix))]
async fn wait_for_os_signal() -> ShutdownReason {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("监听 Ctrl+C 失败: {}", e);
    }
    ShutdownReason::Interrupt
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn first_trigger_wins() {
        let manager = ShutdownManager::new();
        assert!(!manager.is_shutting_down());

        let waiter = {
            let m = manager.clone();
            tokio::spawn(async move { m.wait().await })
        };
        manager.trigger(ShutdownReason::Terminate);
        manager.trigger(ShutdownReason::Interrupt);

        let reason = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, ShutdownReason::Terminate);
        assert!(manager.is_shutting_down());
    }

    #[tokio::test]
    async fn late_waiter_sees_existing_reason() {
        let manager = ShutdownManager::new();
        manager.trigger(ShutdownReason::Application);
        let reason = tokio::time::timeout(Duration::from_secs(1), manager.wait())
            .await
            .unwrap();
        assert_eq!(reason, ShutdownReason::Application);
    }
}
