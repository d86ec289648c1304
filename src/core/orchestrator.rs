//! 回复编排器
//!
//! 把用户输入、工具结果、延迟事件说明与记忆上下文拼成一次生成请求，调用生成后端（带超时），
//! 再把结果写回记忆存储，并在后台通知画像适配器。适配器失败只记日志，不影响回复。

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::core::CompanionError;
use crate::llm::LlmClient;
use crate::memory::{render_transcript, ConversationTurn, MemoryStore, Message, Role};
use crate::profile::{save_json, Persona, Profile, ProfileAdapter};
use crate::tools::ResultBag;

/// 拼接回复 prompt 所需的全部上下文
#[derive(Debug, Clone)]
pub struct PromptContext<'a> {
    pub query: &'a str,
    pub results: Option<&'a ResultBag>,
    pub note: Option<&'a str>,
    pub history: &'a [ConversationTurn],
    pub relevant: &'a [String],
    pub profile: &'a Profile,
    pub persona: &'a Persona,
}

/// 拼接完整的回复 prompt
pub fn compose_prompt(ctx: &PromptContext<'_>) -> String {
    let fetched = match ctx.results {
        Some(bag) if !bag.is_empty() => bag.to_json_pretty(),
        _ => "none".to_string(),
    };
    let history = if ctx.history.is_empty() {
        "(no earlier messages)".to_string()
    } else {
        render_transcript(ctx.history)
    };
    let relevant = if ctx.relevant.is_empty() {
        "none".to_string()
    } else {
        ctx.relevant
            .iter()
            .map(|s| format!("- {s}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let mut prompt = format!("User Query: {}\nFetched Data: {}\n", ctx.query, fetched);
    if let Some(note) = ctx.note {
        prompt.push_str(&format!("Scheduling Note: {}\n", note));
    }
    prompt.push_str(&format!(
        "Conversation History:\n{history}\n\nRelevant past conversation summaries:\n{relevant}\n\n\
         User Profile:\n{profile}\n\nChatbot Personality:\n{persona}\n\n\
         Reply to the user's query as {name}, staying in character. Use the fetched data and the \
         scheduling note when they are relevant, never mention tools, JSON or internal notes, and \
         keep the reply conversational.",
        profile = ctx.profile.to_json_pretty(),
        persona = ctx.persona.describe(),
        name = ctx.persona.name,
    ));
    prompt
}

fn system_instruction(persona: &Persona) -> String {
    format!(
        "You are {}, a {} with a {} tone. You talk with one person you know well.",
        persona.name, persona.role, persona.tone
    )
}

/// 回复编排器
pub struct ResponseOrchestrator {
    llm: Arc<dyn LlmClient>,
    memory: Arc<MemoryStore>,
    profile: Arc<dyn ProfileAdapter>,
    persona: RwLock<Persona>,
    persona_path: Option<PathBuf>,
    timeout: Duration,
    relevant_top_n: usize,
    /// 最近一次后台画像更新
    pending_profile_update: Mutex<Option<JoinHandle<()>>>,
}

impl ResponseOrchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        memory: Arc<MemoryStore>,
        profile: Arc<dyn ProfileAdapter>,
        persona: Persona,
        timeout: Duration,
        relevant_top_n: usize,
    ) -> Self {
        Self {
            llm,
            memory,
            profile,
            persona: RwLock::new(persona),
            persona_path: None,
            timeout,
            relevant_top_n,
            pending_profile_update: Mutex::new(None),
        }
    }

    /// 人设调整后写回该文件
    pub fn with_persona_path(mut self, path: PathBuf) -> Self {
        self.persona_path = Some(path);
        self
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    /// 单次生成调用的超时
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn persona(&self) -> Persona {
        self.persona
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// 回复一条用户消息：记录用户轮次，生成回复并记录助手轮次，随后后台更新画像
    pub async fn respond(
        &self,
        prompt: &str,
        results: Option<&ResultBag>,
        note: Option<&str>,
    ) -> Result<String, CompanionError> {
        self.adapt_persona(prompt);

        let history = self.memory.recent_turns().await;
        let relevant = self.memory.relevant_context(prompt, self.relevant_top_n).await;
        let profile = self.profile.snapshot().await;
        let persona = self.persona();

        let full_prompt = compose_prompt(&PromptContext {
            query: prompt,
            results,
            note,
            history: &history,
            relevant: &relevant,
            profile: &profile,
            persona: &persona,
        });

        self.memory.append_turn(Role::User, prompt).await;
        let reply = self.generate(&persona, full_prompt).await?;
        self.memory.append_turn(Role::Assistant, &reply).await;

        self.notify_profile_adapter().await;
        Ok(reply)
    }

    /// 原样发送合成 prompt（主动问候、提醒触发）；只记录助手轮次
    pub async fn respond_raw(&self, prompt: &str) -> Result<String, CompanionError> {
        let persona = self.persona();
        let reply = self.generate(&persona, prompt.to_string()).await?;
        self.memory.append_turn(Role::Assistant, &reply).await;
        Ok(reply)
    }

    async fn generate(&self, persona: &Persona, prompt: String) -> Result<String, CompanionError> {
        let messages = vec![
            Message::system(system_instruction(persona)),
            Message::user(prompt),
        ];
        match tokio::time::timeout(self.timeout, self.llm.complete(&messages)).await {
            Ok(Ok(text)) => Ok(text.trim().to_string()),
            Ok(Err(e)) => Err(CompanionError::Llm(e)),
            Err(_) => Err(CompanionError::LlmTimeout(self.timeout.as_secs())),
        }
    }

    fn adapt_persona(&self, user_message: &str) {
        let updated = {
            let mut persona = self.persona.write().unwrap_or_else(|e| e.into_inner());
            persona.adapt(user_message).map(|field| (field, persona.clone()))
        };
        let Some((field, persona)) = updated else {
            return;
        };
        tracing::info!(trait_name = field, "Persona adapted to user request");
        if let Some(path) = self.persona_path.clone() {
            tokio::task::spawn_blocking(move || {
                if let Err(e) = save_json(&path, &persona) {
                    tracing::warn!(error = %e, "Failed to save persona");
                }
            });
        }
    }

    async fn notify_profile_adapter(&self) {
        let history = self.memory.recent_turns().await;
        let adapter = Arc::clone(&self.profile);
        let handle = tokio::spawn(async move {
            if let Err(e) = adapter.update(&history).await {
                tracing::warn!(error = %e, "Profile adapter update failed");
            }
        });
        let previous = self
            .pending_profile_update
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        drop(previous);
    }

    /// 等待最近一次后台画像更新完成（关闭前或测试中调用）
    pub async fn flush_profile_updates(&self) {
        let handle = self
            .pending_profile_update
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Profile update task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;
    use crate::core::ManualClock;
    use crate::llm::MockLlmClient;
    use crate::store::{InMemoryStore, Store};

    struct FailingAdapter;

    #[async_trait]
    impl ProfileAdapter for FailingAdapter {
        async fn update(&self, _history: &[ConversationTurn]) -> Result<(), String> {
            Err("adapter offline".into())
        }
        async fn snapshot(&self) -> Profile {
            Profile::from_value(json!({"name": "Asha"})).unwrap_or_default()
        }
    }

    fn orchestrator(llm: Arc<MockLlmClient>, store: Arc<InMemoryStore>) -> ResponseOrchestrator {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
        ));
        let memory = Arc::new(MemoryStore::new(store, clock, 10));
        ResponseOrchestrator::new(
            llm,
            memory,
            Arc::new(FailingAdapter),
            Persona::named("Mira"),
            Duration::from_secs(5),
            3,
        )
    }

    #[tokio::test]
    async fn test_respond_records_turns_and_survives_adapter_failure() {
        let llm = Arc::new(MockLlmClient::scripted(vec![Ok("  Hi Asha!  ".into())]));
        let store = Arc::new(InMemoryStore::new());
        let orch = orchestrator(llm.clone(), store.clone());

        let mut bag = ResultBag::new();
        bag.insert("time", json!({"day": "Monday"}));
        let reply = orch
            .respond("what day is it?", Some(&bag), Some("A reminder is set"))
            .await
            .unwrap();
        orch.flush_profile_updates().await;
        assert_eq!(reply, "Hi Asha!");

        let turns = store.get_recent_turns(10).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[1].content, "Hi Asha!");

        let prompt = &llm.calls()[0][1].content;
        assert!(prompt.contains("User Query: what day is it?"));
        assert!(prompt.contains("\"Monday\""));
        assert!(prompt.contains("Scheduling Note: A reminder is set"));
        assert!(prompt.contains("\"Asha\""));
        assert!(prompt.contains("Name: Mira"));
    }

    #[tokio::test]
    async fn test_generation_failure_is_reported() {
        let llm = Arc::new(MockLlmClient::scripted(vec![Err("quota".into())]));
        let store = Arc::new(InMemoryStore::new());
        let orch = orchestrator(llm, store.clone());
        let err = orch.respond("hello", None, None).await.unwrap_err();
        assert!(err.is_generation_failure());
        // 用户轮次仍然记录
        assert_eq!(store.get_recent_turns(10).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_timeout() {
        let llm = Arc::new(MockLlmClient::new().with_delay(Duration::from_secs(30)));
        let orch = orchestrator(llm, Arc::new(InMemoryStore::new()));
        let err = orch.respond_raw("check in").await.unwrap_err();
        assert!(matches!(err, CompanionError::LlmTimeout(5)));
    }

    #[tokio::test]
    async fn test_persona_adapts_on_keyword() {
        let llm = Arc::new(MockLlmClient::new());
        let orch = orchestrator(llm, Arc::new(InMemoryStore::new()));
        orch.respond("tell me a joke", None, None).await.unwrap();
        assert_eq!(orch.persona().humor_level, "high");
    }

    #[test]
    fn test_compose_prompt_defaults() {
        let persona = Persona::default();
        let profile = Profile::default();
        let prompt = compose_prompt(&PromptContext {
            query: "hey",
            results: None,
            note: None,
            history: &[],
            relevant: &[],
            profile: &profile,
            persona: &persona,
        });
        assert!(prompt.contains("Fetched Data: none"));
        assert!(prompt.contains("(no earlier messages)"));
        assert!(!prompt.contains("Scheduling Note"));
    }
}
