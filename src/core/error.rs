//! 错误类型
//!
//! 按失败来源划分：路由解析、工具执行、时间解析、持久化、投递、生成后端。
//! 除「时间无法解析」与「生成后端失败」外，其余错误对用户静默，只记录日志。

use thiserror::Error;

use crate::schedule::TimeParseError;
use crate::store::StoreError;

/// 陪伴智能体运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum CompanionError {
    /// 路由输出无法解析（调用方通常直接回落为普通对话）
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Time parse error: {0}")]
    TimeParse(#[from] TimeParseError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("LLM request timed out after {0}s")]
    LlmTimeout(u64),

    #[error("Config error: {0}")]
    Config(String),
}

impl CompanionError {
    /// 是否应以「出错了」之类的回复告知用户（生成后端失败）
    pub fn is_generation_failure(&self) -> bool {
        matches!(self, CompanionError::Llm(_) | CompanionError::LlmTimeout(_))
    }
}
