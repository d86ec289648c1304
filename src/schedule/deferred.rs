//! 延迟事件调度：单槽位 + 一次性定时器
//!
//! 任意时刻最多只有一个待触发事件（提醒或暂停）。register 是「后写覆盖」：先取消槽位中的旧事件
//! （停止其定时器并在存储中置为非激活），再写入新事件并挂上新定时器。
//!
//! 槽位与活跃度时间戳共用 SharedState 的同一把锁。触发与取消的竞争按事件 id 判定：
//! 定时器醒来后在锁内确认槽位仍是自己并完成 deactivate，才算触发成功；
//! 在此之后到达的取消只是一次幂等的 no-op。生成与投递等慢 I/O 都在锁外进行。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::AbortHandle;

use crate::channel::Channel;
use crate::core::{Clock, CompanionError, DeferredSlot, ResponseOrchestrator, SharedState};
use crate::schedule::TimeParseError;
use crate::store::{DeferredEvent, EventAction, Store};

/// 延迟事件调度器，可廉价 clone
#[derive(Clone)]
pub struct DeferredScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn Store>,
    state: SharedState,
    clock: Arc<dyn Clock>,
    orchestrator: Arc<ResponseOrchestrator>,
    channel: Arc<dyn Channel>,
}

/// 触发时发给生成后端的 prompt
pub fn fire_prompt(event: &DeferredEvent) -> String {
    match (event.action, event.message.as_deref()) {
        (EventAction::Reminder, Some(msg)) => format!(
            "Earlier, the user asked you to remind them about: \"{msg}\". That time has come. \
             Send them a short, friendly reminder about it in your usual personality."
        ),
        (EventAction::Reminder, None) => "A reminder the user scheduled earlier has just triggered. \
             Send them a short, friendly message letting them know it is time."
            .to_string(),
        (EventAction::Pause, Some(msg)) => format!(
            "The user asked not to be disturbed until now ({msg}). The pause is over. \
             Send a gentle, short message to check back in, referring to what they were doing."
        ),
        (EventAction::Pause, None) => "The user asked not to be disturbed until now, and that pause is over. \
             Send a gentle, short message to check back in."
            .to_string(),
    }
}

impl DeferredScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        state: SharedState,
        clock: Arc<dyn Clock>,
        orchestrator: Arc<ResponseOrchestrator>,
        channel: Arc<dyn Channel>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                state,
                clock,
                orchestrator,
                channel,
            }),
        }
    }

    /// 登记新事件，返回其 id；槽位中的旧事件先被取消
    pub async fn register(
        &self,
        action: EventAction,
        trigger_time: DateTime<Utc>,
        message: Option<String>,
    ) -> Result<String, CompanionError> {
        let inner = &self.inner;
        let now = inner.clock.now();
        if trigger_time <= now {
            return Err(TimeParseError::NotInFuture(trigger_time.to_rfc3339()).into());
        }
        let event = DeferredEvent::new(action, trigger_time, message, now);

        let mut guard = inner.state.lock().await;
        if let Some(mut previous) = guard.slot.take() {
            previous.disarm();
            inner.deactivate_logged(&previous.event_id, now, "replaced").await;
        }
        // 槽位为空但存储里仍有激活事件（例如恢复失败后）也一并清理
        match inner.store.get_active_event().await {
            Ok(Some(stale)) => inner.deactivate_logged(&stale.id, now, "stale").await,
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to check for stale active event"),
        }

        inner.store.put_event(&event).await?;
        let timer = arm(inner, event.clone());
        guard.slot = Some(DeferredSlot {
            event_id: event.id.clone(),
            timer: Some(timer),
        });
        drop(guard);

        tracing::info!(
            event_id = %event.id,
            action = event.action.as_str(),
            trigger_time = %event.trigger_time,
            "Deferred event registered"
        );
        Ok(event.id)
    }

    /// 仍在等待触发的激活事件
    pub async fn active_pending(&self) -> Result<Option<DeferredEvent>, CompanionError> {
        let now = self.inner.clock.now();
        let event = self.inner.store.get_active_event().await?;
        Ok(event.filter(|e| e.trigger_time > now))
    }

    /// 取消指定事件；已非激活或未知 id 时只记 warning
    pub async fn deactivate(&self, event_id: &str) -> Result<(), CompanionError> {
        let inner = &self.inner;
        let now = inner.clock.now();
        let mut guard = inner.state.lock().await;
        // 先落库；写入失败时槽位与定时器保持原样
        let changed = inner.store.deactivate_event(event_id, now).await?;
        if guard.slot.as_ref().is_some_and(|s| s.event_id == event_id) {
            if let Some(mut slot) = guard.slot.take() {
                slot.disarm();
            }
        }
        drop(guard);

        if changed {
            tracing::info!(event_id, "Deferred event cancelled");
        } else {
            tracing::warn!(event_id, "Deactivate ignored: event already inactive or unknown");
        }
        Ok(())
    }

    /// 取消槽位中的事件（如果有），返回其 id
    pub async fn cancel_current(&self) -> Result<Option<String>, CompanionError> {
        let current = self.inner.state.current_event_id().await;
        match current {
            Some(id) => {
                self.deactivate(&id).await?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// 启动时恢复：未来的激活事件重新挂定时器，已过期的置为非激活
    pub async fn restore(&self) -> Result<Option<DeferredEvent>, CompanionError> {
        let inner = &self.inner;
        let now = inner.clock.now();
        let mut guard = inner.state.lock().await;
        let Some(event) = inner.store.get_active_event().await? else {
            return Ok(None);
        };

        if event.trigger_time <= now {
            tracing::warn!(
                event_id = %event.id,
                trigger_time = %event.trigger_time,
                "Deferred event expired while offline, deactivating"
            );
            inner.store.deactivate_event(&event.id, now).await?;
            return Ok(None);
        }

        if let Some(mut previous) = guard.slot.take() {
            previous.disarm();
        }
        let timer = arm(inner, event.clone());
        guard.slot = Some(DeferredSlot {
            event_id: event.id.clone(),
            timer: Some(timer),
        });
        tracing::info!(event_id = %event.id, trigger_time = %event.trigger_time, "Deferred event restored");
        Ok(Some(event))
    }

    /// 关闭时调用：停止定时器但保留激活状态，留给下次启动恢复
    pub async fn suspend(&self) {
        let mut guard = self.inner.state.lock().await;
        if let Some(mut slot) = guard.slot.take() {
            slot.disarm();
            tracing::info!(event_id = %slot.event_id, "Deferred timer suspended for shutdown");
        }
    }
}

fn arm(inner: &Arc<Inner>, event: DeferredEvent) -> AbortHandle {
    let delay = (event.trigger_time - inner.clock.now())
        .to_std()
        .unwrap_or(Duration::ZERO);
    let inner = Arc::clone(inner);
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        inner.fire(event).await;
    });
    handle.abort_handle()
}

impl Inner {
    async fn deactivate_logged(&self, event_id: &str, at: DateTime<Utc>, why: &'static str) {
        match self.store.deactivate_event(event_id, at).await {
            Ok(true) => tracing::info!(event_id, reason = why, "Previous deferred event deactivated"),
            Ok(false) => tracing::debug!(event_id, reason = why, "Previous deferred event already inactive"),
            Err(e) => tracing::warn!(event_id, error = %e, "Failed to deactivate previous deferred event"),
        }
    }

    async fn fire(&self, event: DeferredEvent) {
        {
            let mut guard = self.state.lock().await;
            if !guard.slot.as_ref().is_some_and(|s| s.event_id == event.id) {
                tracing::debug!(event_id = %event.id, "Timer fired for an event no longer in the slot");
                return;
            }
            // 定时器就是当前任务，直接丢弃句柄，不能 abort
            guard.slot = None;
            match self.store.deactivate_event(&event.id, self.clock.now()).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(event_id = %event.id, "Event was already inactive at fire time, skipping");
                    return;
                }
                Err(e) => {
                    tracing::warn!(event_id = %event.id, error = %e, "Failed to deactivate fired event, delivering anyway");
                }
            }
        }

        tracing::info!(event_id = %event.id, action = event.action.as_str(), "Deferred event fired");
        let reply = match self.orchestrator.respond_raw(&fire_prompt(&event)).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(event_id = %event.id, error = %e, "Failed to generate deferred event message");
                return;
            }
        };
        match self.channel.deliver(&reply).await {
            Ok(()) => self.state.mark_proactive_sent(self.clock.now()).await,
            Err(e) => {
                let err = CompanionError::Delivery(e);
                tracing::warn!(event_id = %event.id, error = %err, "Deferred event message not delivered");
            }
        }
    }
}
