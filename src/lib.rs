//! Hearth - 个人陪伴智能体
//!
//! 模块划分：
//! - **agent**: Companion 运行时，处理单条用户输入
//! - **channel**: 消息投递通道（控制台 / 测试记录）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、共享状态、时钟、回复编排、优雅关闭
//! - **llm**: 生成后端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 对话轮次、会话摘要与相关度检索
//! - **observability**: 日志初始化
//! - **profile**: 用户画像与助手人设
//! - **router**: 意图路由
//! - **schedule**: 时间解析、延迟事件、主动问候
//! - **store**: 持久化边界（SQLite / 内存）
//! - **tools**: 工具目录与执行器

pub mod agent;
pub mod channel;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod profile;
pub mod router;
pub mod schedule;
pub mod store;
pub mod tools;

pub use agent::{Companion, CompanionParts};
