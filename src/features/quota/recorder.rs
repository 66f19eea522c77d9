//! 用量写入后台通道。
//!
//! 图片请求放行后投递一条用量事件即返回，不等待写库；
//! 队列满时直接丢弃并告警，写库失败只记录日志。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::error::AppError;
use crate::storage::Storage;

/// 一次放行请求产生的用量事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageEvent {
    pub api_key_id: String,
    /// 用量标签（当前为主题名）
    pub label: Option<String>,
    pub endpoint: String,
    pub ts: i64,
}

/// 用量写入句柄：只暴露非阻塞投递与优雅关闭
#[derive(Clone)]
pub struct UsageRecorder {
    tx: mpsc::Sender<UsageEvent>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    done_rx: watch::Receiver<bool>,
}

impl UsageRecorder {
    /// 创建通道并启动写入任务
    pub fn spawn(storage: Arc<Storage>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<UsageEvent>(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);
        tokio::spawn(run_writer(storage, rx, shutdown_rx, done_tx));
        Self {
            tx,
            shutdown_tx: Arc::new(shutdown_tx),
            done_rx,
        }
    }

    /// 投递用量事件；队列满或已关闭时丢弃
    pub fn record(&self, event: UsageEvent) {
        if let Err(e) = self.tx.try_send(event) {
            match e {
                mpsc::error::TrySendError::Full(evt) => tracing::warn!(
                    target: "ogpix_backend::quota",
                    "用量队列已满，丢弃事件 key_id={}",
                    evt.api_key_id
                ),
                mpsc::error::TrySendError::Closed(evt) => tracing::warn!(
                    target: "ogpix_backend::quota",
                    "用量通道已关闭，丢弃事件 key_id={}",
                    evt.api_key_id
                ),
            }
        }
    }

    /// 通知写入任务排空队列并退出，等待其完成
    pub async fn graceful_shutdown(&self, timeout: Duration) -> Result<(), AppError> {
        tracing::info!("开始关闭用量写入任务，超时时间: {:?}", timeout);
        let _ = self.shutdown_tx.send(true);

        let mut rx = self.done_rx.clone();
        let wait = async {
            loop {
                if *rx.borrow() {
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(()) => {
                tracing::info!("用量写入任务已关闭");
                Ok(())
            }
            Err(_) => Err(AppError::Internal("用量写入任务关闭超时".into())),
        }
    }
}

async fn persist(storage: &Storage, evt: &UsageEvent) {
    if let Err(e) = storage
        .insert_usage_log(&evt.api_key_id, evt.label.as_deref(), &evt.endpoint, evt.ts)
        .await
    {
        tracing::warn!(target: "ogpix_backend::quota", "写入用量日志失败 key_id={}: {}", evt.api_key_id, e);
    }
    if let Err(e) = storage.touch_api_key_last_used(&evt.api_key_id, evt.ts).await {
        tracing::warn!(target: "ogpix_backend::quota", "更新 last_used_at 失败 key_id={}: {}", evt.api_key_id, e);
    }
}

async fn run_writer(
    storage: Arc<Storage>,
    mut rx: mpsc::Receiver<UsageEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
    done_tx: watch::Sender<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    rx.close();
                    while let Some(evt) = rx.recv().await {
                        persist(&storage, &evt).await;
                    }
                    break;
                }
            }
            next = rx.recv() => match next {
                Some(evt) => persist(&storage, &evt).await,
                None => break,
            },
        }
    }
    tracing::info!("用量事件处理完成");
    let _ = done_tx.send(true);
}
