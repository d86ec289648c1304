//! 内存存储：Store 的进程内实现（测试与 `store.backend = "memory"`）

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{DeferredEvent, SessionSummary, Store, StoreError};
use crate::memory::ConversationTurn;

#[derive(Default)]
struct Inner {
    turns: Vec<ConversationTurn>,
    summaries: Vec<SessionSummary>,
    events: Vec<DeferredEvent>,
}

/// 内存存储；可通过 set_fail_writes 模拟写入失败
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
    fail_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后的写操作全部返回 StoreError::Unavailable
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }

    /// 全部事件（含非激活），用于检查生命周期
    pub fn all_events(&self) -> Vec<DeferredEvent> {
        self.read().events.clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn put_turn(&self, turn: &ConversationTurn) -> Result<(), StoreError> {
        self.check_writable()?;
        self.write().turns.push(turn.clone());
        Ok(())
    }

    async fn get_recent_turns(&self, limit: usize) -> Result<Vec<ConversationTurn>, StoreError> {
        let inner = self.read();
        let start = inner.turns.len().saturating_sub(limit);
        Ok(inner.turns[start..].to_vec())
    }

    async fn put_summary(
        &self,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Result<SessionSummary, StoreError> {
        self.check_writable()?;
        let mut inner = self.write();
        let id = inner.summaries.iter().map(|s| s.id).max().map_or(0, |m| m + 1);
        let summary = SessionSummary {
            id,
            text: text.to_string(),
            created_at,
        };
        inner.summaries.push(summary.clone());
        Ok(summary)
    }

    async fn get_summaries(&self) -> Result<Vec<SessionSummary>, StoreError> {
        Ok(self.read().summaries.clone())
    }

    async fn put_event(&self, event: &DeferredEvent) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut inner = self.write();
        match inner.events.iter_mut().find(|e| e.id == event.id) {
            Some(existing) => *existing = event.clone(),
            None => inner.events.push(event.clone()),
        }
        Ok(())
    }

    async fn get_event(&self, id: &str) -> Result<Option<DeferredEvent>, StoreError> {
        Ok(self.read().events.iter().find(|e| e.id == id).cloned())
    }

    async fn get_active_event(&self) -> Result<Option<DeferredEvent>, StoreError> {
        Ok(self
            .read()
            .events
            .iter()
            .filter(|e| e.active)
            .max_by_key(|e| e.created_at)
            .cloned())
    }

    async fn deactivate_event(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.check_writable()?;
        let mut inner = self.write();
        match inner.events.iter_mut().find(|e| e.id == id) {
            Some(event) if event.active => {
                event.active = false;
                event.deactivated_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Role;
    use crate::store::EventAction;
    use chrono::Duration;

    #[tokio::test]
    async fn test_recent_turns_window_oldest_first() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        for i in 0..5 {
            let turn = ConversationTurn::new(Role::User, format!("m{i}"), now + Duration::seconds(i));
            store.put_turn(&turn).await.unwrap();
        }
        let recent = store.get_recent_turns(3).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_summary_ids_monotonic() {
        let store = InMemoryStore::new();
        let a = store.put_summary("first", Utc::now()).await.unwrap();
        let b = store.put_summary("second", Utc::now()).await.unwrap();
        assert!(b.id > a.id);
    }

    #[tokio::test]
    async fn test_deactivate_transitions_once() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let event = DeferredEvent::new(EventAction::Reminder, now + Duration::hours(1), None, now);
        store.put_event(&event).await.unwrap();

        assert!(store.deactivate_event(&event.id, now).await.unwrap());
        assert!(!store.deactivate_event(&event.id, now).await.unwrap());
        assert!(!store.deactivate_event("missing", now).await.unwrap());
        assert!(store.get_active_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fail_writes() {
        let store = InMemoryStore::new();
        store.set_fail_writes(true);
        let turn = ConversationTurn::new(Role::User, "x", Utc::now());
        assert!(matches!(
            store.put_turn(&turn).await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
