//! 进程级共享状态：活跃度时间戳 + 延迟事件「当前槽位」
//!
//! 前台对话与后台调度会同时读写这两部分，统一放在同一把 tokio Mutex 之下，
//! 不允许在锁外单独修改其中任何一项。

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::AbortHandle;

/// 最近一次用户消息与最近一次主动消息的时间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityState {
    pub last_user_message_time: DateTime<Utc>,
    pub last_proactive_sent_time: DateTime<Utc>,
}

impl ActivityState {
    /// 启动时视为用户刚说过话，主动消息则视为一小时前发过
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            last_user_message_time: now,
            last_proactive_sent_time: now - Duration::hours(1),
        }
    }
}

/// 当前槽位：占用者的事件 id 与其一次性定时器
#[derive(Debug)]
pub struct DeferredSlot {
    pub event_id: String,
    pub timer: Option<AbortHandle>,
}

impl DeferredSlot {
    /// 取消定时器（若仍在等待）
    pub fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[derive(Debug)]
pub struct CoreState {
    pub activity: ActivityState,
    pub slot: Option<DeferredSlot>,
}

/// 共享状态句柄，可廉价 clone
#[derive(Debug, Clone)]
pub struct SharedState {
    inner: Arc<Mutex<CoreState>>,
}

impl SharedState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CoreState {
                activity: ActivityState::starting_at(now),
                slot: None,
            })),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, CoreState> {
        self.inner.lock().await
    }

    /// 记录一次用户消息
    pub async fn touch_user(&self, at: DateTime<Utc>) {
        self.lock().await.activity.last_user_message_time = at;
    }

    /// 记录一次主动消息已送达
    pub async fn mark_proactive_sent(&self, at: DateTime<Utc>) {
        self.lock().await.activity.last_proactive_sent_time = at;
    }

    pub async fn activity(&self) -> ActivityState {
        self.lock().await.activity
    }

    /// 当前槽位中的事件 id
    pub async fn current_event_id(&self) -> Option<String> {
        self.lock().await.slot.as_ref().map(|s| s.event_id.clone())
    }
}
