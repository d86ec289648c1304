//! LLM 客户端抽象
//!
//! 生成后端对核心逻辑是不透明的 prompt → text 函数；所有后端（OpenAI 兼容 / Mock）实现 LlmClient。

use async_trait::async_trait;

use crate::memory::Message;

/// 生成后端：消息列表 → 文本；错误以字符串返回，由调用方归类为 CompanionError::Llm
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;
}
