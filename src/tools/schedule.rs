//! schedule_conversation：仅用于路由的伪工具
//!
//! 出现在工具目录里，让分类模型能把「提醒我…」「先别打扰我…」表达为一次调用；
//! 参数 schema 由 schemars 从 ScheduleArgs 生成。真正的处理在意图路由与延迟事件调度中完成，
//! 因此 execute 总是返回错误。

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::{Tool, SCHEDULE_CONVERSATION};

/// 调度动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleAction {
    /// 到点提醒用户
    ScheduleReminder,
    /// 在指定时间前不要主动打扰
    PauseConversation,
}

/// schedule_conversation 的参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ScheduleArgs {
    pub action: ScheduleAction,
    /// 自然语言时间，如 "in 30 minutes"、"tomorrow at 9am"、"until 6pm"、"for 2 hours"
    pub time_expression: String,
    /// 提醒内容（可选）
    #[serde(default)]
    pub specific_message: Option<String>,
}

pub struct ScheduleConversationTool;

#[async_trait]
impl Tool for ScheduleConversationTool {
    fn name(&self) -> &str {
        SCHEDULE_CONVERSATION
    }

    fn description(&self) -> &str {
        "Schedule a reminder for the user, or pause proactive messages until a given time. \
         Use this alone: when present, no other tool is run for the turn."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::to_value(schema_for!(ScheduleArgs)).unwrap_or(Value::Null)
    }

    fn result_key(&self) -> &str {
        "schedule"
    }

    async fn execute(&self, _args: Value) -> Result<Value, String> {
        Err("schedule_conversation is handled by the router, not executed".to_string())
    }
}
