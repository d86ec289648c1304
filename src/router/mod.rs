//! 意图路由：分类 prompt + 宽松解析

pub mod intent;
pub mod parse;

pub use intent::{decide, Decision, IntentRouter};
pub use parse::{parse_router_output, strip_code_fence, ParseOutcome, GENERAL_CHAT_TOKEN};
