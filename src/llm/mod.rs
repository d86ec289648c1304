//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

use crate::config::AppConfig;

pub use mock::MockLlmClient;
pub use openai::OpenAiClient;
pub use traits::LlmClient;

/// 按配置创建生成后端：provider = "mock" 时使用 Mock，其余走 OpenAI 兼容端点
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    match cfg.llm.provider.as_str() {
        "mock" => {
            tracing::info!("Using mock LLM backend");
            Arc::new(MockLlmClient::new())
        }
        provider => {
            tracing::info!(provider, model = %cfg.llm.model, "Using OpenAI-compatible LLM backend");
            Arc::new(OpenAiClient::from_config(&cfg.llm))
        }
    }
}
