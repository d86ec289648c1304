//! SQLite 存储
//!
//! 单连接 + Mutex；所有同步的 rusqlite 调用都放进 spawn_blocking，避免阻塞调度器所在的 runtime 线程。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{DeferredEvent, EventAction, SessionSummary, Store, StoreError};
use crate::memory::{ConversationTurn, Role};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS turns (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        timestamp TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS summaries (
        id INTEGER PRIMARY KEY,
        text TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS events (
        id TEXT PRIMARY KEY,
        action TEXT NOT NULL,
        trigger_time TEXT NOT NULL,
        message TEXT,
        created_at TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        deactivated_at TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_events_active ON events(active, created_at);
";

/// SQLite 存储实现
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// 打开（或创建）数据库文件并建表；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("create {:?}: {}", parent, e)))?;
        }
        tracing::info!(path = ?path, "Opening sqlite store");
        let conn = Connection::open(path)?;
        if let Err(e) = conn.execute_batch("PRAGMA journal_mode=WAL;") {
            tracing::warn!(path = ?path, error = %e, "Failed to enable WAL, using default journal mode");
        }
        Self::init(conn)
    }

    /// 内存数据库（进程退出即丢失）
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&guard)
        })
        .await?
    }
}

fn turn_from_row(row: &Row<'_>) -> rusqlite::Result<(String, String, DateTime<Utc>)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

type EventRow = (
    String,
    String,
    DateTime<Utc>,
    Option<String>,
    DateTime<Utc>,
    bool,
    Option<DateTime<Utc>>,
);

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<EventRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn into_event(raw: EventRow) -> Result<DeferredEvent, StoreError> {
    let (id, action, trigger_time, message, created_at, active, deactivated_at) = raw;
    let action = EventAction::parse(&action)
        .ok_or_else(|| StoreError::Corrupt(format!("event {id}: unknown action '{action}'")))?;
    Ok(DeferredEvent {
        id,
        action,
        trigger_time,
        message,
        created_at,
        active,
        deactivated_at,
    })
}

const EVENT_COLUMNS: &str =
    "id, action, trigger_time, message, created_at, active, deactivated_at";

#[async_trait]
impl Store for SqliteStore {
    async fn put_turn(&self, turn: &ConversationTurn) -> Result<(), StoreError> {
        let turn = turn.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO turns (role, content, timestamp) VALUES (?1, ?2, ?3)",
                params![turn.role.as_str(), turn.content, turn.timestamp],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_recent_turns(&self, limit: usize) -> Result<Vec<ConversationTurn>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT role, content, timestamp FROM turns ORDER BY seq DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit], turn_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            let mut turns = rows
                .into_iter()
                .map(|(role, content, timestamp)| {
                    let role = Role::parse(&role)
                        .ok_or_else(|| StoreError::Corrupt(format!("unknown role '{role}'")))?;
                    Ok(ConversationTurn::new(role, content, timestamp))
                })
                .collect::<Result<Vec<_>, StoreError>>()?;
            turns.reverse();
            Ok(turns)
        })
        .await
    }

    async fn put_summary(
        &self,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Result<SessionSummary, StoreError> {
        let text = text.to_string();
        self.with_conn(move |conn| {
            let id: i64 = conn.query_row(
                "SELECT COALESCE(MAX(id) + 1, 0) FROM summaries",
                [],
                |row| row.get(0),
            )?;
            conn.execute(
                "INSERT INTO summaries (id, text, created_at) VALUES (?1, ?2, ?3)",
                params![id, text, created_at],
            )?;
            Ok(SessionSummary {
                id,
                text,
                created_at,
            })
        })
        .await
    }

    async fn get_summaries(&self) -> Result<Vec<SessionSummary>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, text, created_at FROM summaries ORDER BY id ASC")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(SessionSummary {
                        id: row.get(0)?,
                        text: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn put_event(&self, event: &DeferredEvent) -> Result<(), StoreError> {
        let event = event.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO events (id, action, trigger_time, message, created_at, active, deactivated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    event.id,
                    event.action.as_str(),
                    event.trigger_time,
                    event.message,
                    event.created_at,
                    event.active,
                    event.deactivated_at
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_event(&self, id: &str) -> Result<Option<DeferredEvent>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let raw = conn
                .query_row(
                    &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
                    params![id],
                    event_from_row,
                )
                .optional()?;
            raw.map(into_event).transpose()
        })
        .await
    }

    async fn get_active_event(&self) -> Result<Option<DeferredEvent>, StoreError> {
        self.with_conn(|conn| {
            let raw = conn
                .query_row(
                    &format!(
                        "SELECT {EVENT_COLUMNS} FROM events WHERE active = 1 ORDER BY created_at DESC LIMIT 1"
                    ),
                    [],
                    event_from_row,
                )
                .optional()?;
            raw.map(into_event).transpose()
        })
        .await
    }

    async fn deactivate_event(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE events SET active = 0, deactivated_at = ?2 WHERE id = ?1 AND active = 1",
                params![id, at],
            )?;
            Ok(changed > 0)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn open_temp() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("data").join("hearth.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_file_store_uses_wal() {
        let (_dir, store) = open_temp();
        let conn = store.conn.lock().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn test_turns_persist_in_order() {
        let (_dir, store) = open_temp();
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        store
            .put_turn(&ConversationTurn::new(Role::User, "hello", base))
            .await
            .unwrap();
        store
            .put_turn(&ConversationTurn::new(
                Role::Assistant,
                "hi there",
                base + Duration::seconds(1),
            ))
            .await
            .unwrap();

        let turns = store.get_recent_turns(10).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "hello");
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[0].timestamp, base);
    }

    #[tokio::test]
    async fn test_event_lifecycle() {
        let (_dir, store) = open_temp();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let event = DeferredEvent::new(
            EventAction::Pause,
            now + Duration::hours(2),
            Some("focus time".to_string()),
            now,
        );
        store.put_event(&event).await.unwrap();

        let active = store.get_active_event().await.unwrap().unwrap();
        assert_eq!(active, event);

        assert!(store.deactivate_event(&event.id, now).await.unwrap());
        assert!(!store.deactivate_event(&event.id, now).await.unwrap());

        let stored = store.get_event(&event.id).await.unwrap().unwrap();
        assert!(!stored.active);
        assert_eq!(stored.deactivated_at, Some(now));
        assert!(store.get_active_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_summaries_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = store.put_summary("talked about rust", Utc::now()).await.unwrap();
        let second = store.put_summary("planned a trip", Utc::now()).await.unwrap();
        assert_eq!(first.id, 0);
        assert_eq!(second.id, 1);
        let all = store.get_summaries().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].text, "planned a trip");
    }
}
