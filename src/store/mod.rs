//! 持久化边界
//!
//! Store trait 是所有组件共享的存储接口：对话轮次、会话摘要、延迟事件。
//! 由调用方显式构造并注入（Arc<dyn Store>），测试使用 InMemoryStore，生产使用 SqliteStore。

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::ConversationTurn;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// 会话摘要：仅在「结束会话」时生成，写入后不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: i64,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// 延迟事件的动作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    Reminder,
    Pause,
}

impl EventAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventAction::Reminder => "reminder",
            EventAction::Pause => "pause",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reminder" => Some(EventAction::Reminder),
            "pause" => Some(EventAction::Pause),
            _ => None,
        }
    }
}

/// 延迟事件（提醒或免打扰暂停）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredEvent {
    pub id: String,
    pub action: EventAction,
    pub trigger_time: DateTime<Utc>,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub active: bool,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl DeferredEvent {
    /// 新建一个处于激活状态的事件，id 为随机 UUID
    pub fn new(
        action: EventAction,
        trigger_time: DateTime<Utc>,
        message: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action,
            trigger_time,
            message,
            created_at,
            active: true,
            deactivated_at: None,
        }
    }
}

/// 存储接口；所有实现都必须满足同一语义，InMemoryStore 即可跑通全部测试
#[async_trait]
pub trait Store: Send + Sync {
    async fn put_turn(&self, turn: &ConversationTurn) -> Result<(), StoreError>;

    /// 最近 limit 轮，按时间从旧到新
    async fn get_recent_turns(&self, limit: usize) -> Result<Vec<ConversationTurn>, StoreError>;

    /// 写入摘要并分配下一个单调递增 id
    async fn put_summary(
        &self,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Result<SessionSummary, StoreError>;

    /// 全部摘要，按 id 升序
    async fn get_summaries(&self) -> Result<Vec<SessionSummary>, StoreError>;

    async fn put_event(&self, event: &DeferredEvent) -> Result<(), StoreError>;

    async fn get_event(&self, id: &str) -> Result<Option<DeferredEvent>, StoreError>;

    /// 最近创建的激活事件（不论 trigger_time 是否已过）
    async fn get_active_event(&self) -> Result<Option<DeferredEvent>, StoreError>;

    /// 置为非激活；返回是否真的发生了 true→false 的转换
    async fn deactivate_event(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StoreError>;
}
