//! 画像适配器：从对话历史中提取用户特征并合并进画像
//!
//! LLM 返回「需要更新的字段」JSON；先去掉代码块包裹，再宽松解析，非 JSON 输出只记 warn 并忽略。
//! 合并后的画像以 pretty JSON 持久化到数据目录。

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::llm::LlmClient;
use crate::memory::{render_transcript, ConversationTurn, Message};
use crate::profile::{load_json, merge, save_json, Profile};
use crate::router::strip_code_fence;

/// 画像适配器协作方：尽力而为，调用方不等待也不关心合并细节
#[async_trait]
pub trait ProfileAdapter: Send + Sync {
    /// 用完整的最近历史更新画像
    async fn update(&self, history: &[ConversationTurn]) -> Result<(), String>;

    /// 当前画像快照（用于拼接回复 prompt）
    async fn snapshot(&self) -> Profile;
}

/// 由 LLM 驱动的画像适配器
pub struct LlmProfileAdapter {
    llm: Arc<dyn LlmClient>,
    profile: RwLock<Profile>,
    path: Option<PathBuf>,
}

impl LlmProfileAdapter {
    /// 不落盘（测试用）
    pub fn in_memory(llm: Arc<dyn LlmClient>, initial: Profile) -> Self {
        Self {
            llm,
            profile: RwLock::new(initial),
            path: None,
        }
    }

    /// 从文件加载画像；不存在或损坏时使用默认画像
    pub fn load(llm: Arc<dyn LlmClient>, path: PathBuf) -> Self {
        let profile = match load_json::<Profile>(&path) {
            Ok(Some(p)) => p,
            Ok(None) => Profile::default_user(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Profile file unreadable, starting from defaults");
                Profile::default_user()
            }
        };
        Self {
            llm,
            profile: RwLock::new(profile),
            path: Some(path),
        }
    }

    fn extraction_prompt(transcript: &str) -> String {
        format!(
            r#"Based on the following conversation history, extract updates to the user's personal details:
{transcript}

- If they mention their name, update "name".
- If they mention age, gender, or location, update those fields.
- Detect hobbies and update "hobbies".
- Detect professional details (job title, interests) and update "profession".
- Detect preferences (communication_style, favorite_topics, disliked_topics) under "preferences".
- Detect new activities (internships, projects, presentations, certifications, other_achievements) under "activities".

Reply with a single JSON object containing ONLY the fields that need updates. Lists are added to, not replaced.
If nothing needs updating, reply with {{}}."#
        )
    }
}

#[async_trait]
impl ProfileAdapter for LlmProfileAdapter {
    async fn update(&self, history: &[ConversationTurn]) -> Result<(), String> {
        if history.is_empty() {
            return Ok(());
        }
        let prompt = Self::extraction_prompt(&render_transcript(history));
        let response = self.llm.complete(&[Message::user(prompt)]).await?;

        let cleaned = strip_code_fence(&response);
        let parsed = match serde_json::from_str::<serde_json::Value>(cleaned)
            .ok()
            .and_then(Profile::from_value)
        {
            Some(p) => p,
            None => {
                tracing::warn!("Profile extraction returned non-JSON output, ignoring");
                return Ok(());
            }
        };
        if parsed.is_empty() {
            return Ok(());
        }

        let merged = {
            let mut guard = self.profile.write().await;
            *guard = merge(&guard, &parsed);
            guard.clone()
        };
        tracing::info!(updated = parsed.traits.len(), "User profile updated");

        if let Some(path) = &self.path {
            let path = path.clone();
            tokio::task::spawn_blocking(move || save_json(&path, &merged))
                .await
                .map_err(|e| e.to_string())?
                .map_err(|e| format!("Failed to save profile: {e}"))?;
        }
        Ok(())
    }

    async fn snapshot(&self) -> Profile {
        self.profile.read().await.clone()
    }
}
