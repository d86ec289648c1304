//! 记忆存储：对话日志、会话摘要与相关度检索
//!
//! - append_turn：写入对话日志，持久化失败只记日志，绝不打断调用方
//! - recent_turns：最近 N 轮滑动窗口（从旧到新），控制 prompt 长度
//! - relevant_context：按 Jaccard 相似度对摘要排序，同分时新摘要优先
//! - summarize_and_store：结束会话时由 LLM 生成摘要并写入

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::core::{Clock, CompanionError};
use crate::llm::LlmClient;
use crate::memory::tokenizer::{jaccard_similarity, tokenize_to_set};
use crate::memory::{render_transcript, ConversationTurn, Message, Role};
use crate::store::{SessionSummary, Store};

/// 记忆存储：持有注入的 Store，并在内存中缓存本次会话的轮次
pub struct MemoryStore {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    /// 自上次摘要以来的轮次（结束会话时整体送去摘要）
    session: Mutex<Vec<ConversationTurn>>,
    recent_window: usize,
}

impl MemoryStore {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, recent_window: usize) -> Self {
        Self {
            store,
            clock,
            session: Mutex::new(Vec::new()),
            recent_window: recent_window.max(1),
        }
    }

    /// 追加一轮对话；持久化失败只记录 warn。
    ///
    /// 整个过程持有会话锁，前台回复与后台触发的轮次按时间戳顺序落库。
    pub async fn append_turn(&self, role: Role, content: &str) {
        let mut session = self.session.lock().await;
        let now = self.clock.now();
        // 时间戳在单个会话内保持单调不减
        let timestamp = match session.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        let turn = ConversationTurn::new(role, content, timestamp);
        if let Err(e) = self.store.put_turn(&turn).await {
            tracing::warn!(error = %e, role = role.as_str(), "Failed to persist conversation turn");
        }
        session.push(turn);
    }

    /// 最近 recent_window 轮（从旧到新）；存储读取失败时退回本次会话缓存
    pub async fn recent_turns(&self) -> Vec<ConversationTurn> {
        match self.store.get_recent_turns(self.recent_window).await {
            Ok(turns) => turns,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load recent turns, using session buffer");
                let session = self.session.lock().await;
                let start = session.len().saturating_sub(self.recent_window);
                session[start..].to_vec()
            }
        }
    }

    /// 本次会话的全部轮次
    pub async fn session_turns(&self) -> Vec<ConversationTurn> {
        self.session.lock().await.clone()
    }

    /// 按相关度返回最多 top_n 条摘要文本
    pub async fn relevant_context(&self, query: &str, top_n: usize) -> Vec<String> {
        let summaries = match self.store.get_summaries().await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load session summaries");
                return Vec::new();
            }
        };
        rank_summaries(query, &summaries, top_n)
    }

    /// 用 LLM 把整段对话压缩成摘要并写入；成功后清空会话缓存。生成超过 timeout 视为失败
    pub async fn summarize_and_store(
        &self,
        llm: &dyn LlmClient,
        full_log: &[ConversationTurn],
        timeout: Duration,
    ) -> Result<SessionSummary, CompanionError> {
        let now = self.clock.now();
        let instruction = format!(
            "Summarize the conversation in 1-3 concise sentences for long-term memory retention by an AI assistant. \
             Focus only on essential information such as user requests, preferences, tasks, or key decisions \
             to support accurate and personalized future responses. Exclude small talk or irrelevant content. \
             Replace relative time expressions (e.g. \"today\", \"tomorrow\") with the exact date and time, \
             given that it is now {}. Return only the summary text.",
            now.format("%Y-%m-%d %H:%M UTC")
        );
        let messages = vec![
            Message::system(instruction),
            Message::user(render_transcript(full_log)),
        ];
        let text = match tokio::time::timeout(timeout, llm.complete(&messages)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return Err(CompanionError::Llm(e)),
            Err(_) => return Err(CompanionError::LlmTimeout(timeout.as_secs())),
        };
        let summary = self.store.put_summary(text.trim(), now).await?;
        self.session.lock().await.clear();
        tracing::info!(summary_id = summary.id, "Session summary stored");
        Ok(summary)
    }
}

/// 纯函数排序：分数降序，同分按创建顺序（id）降序
pub fn rank_summaries(query: &str, summaries: &[SessionSummary], top_n: usize) -> Vec<String> {
    let query_tokens = tokenize_to_set(query);
    let mut scored: Vec<(f64, &SessionSummary)> = summaries
        .iter()
        .map(|s| (jaccard_similarity(&query_tokens, &tokenize_to_set(&s.text)), s))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| b.1.id.cmp(&a.1.id)));
    scored
        .into_iter()
        .take(top_n)
        .map(|(_, s)| s.text.clone())
        .collect()
}
