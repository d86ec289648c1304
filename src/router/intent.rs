//! 意图路由
//!
//! 把一条用户消息分到三类之一：普通聊天 / 工具调用 / 调度指令。
//! 分类 prompt 嵌入工具目录（名称、描述、参数 schema），模型输出经 parse-or-fallback 解析。
//! 任何失败（生成失败、超时、解析失败、参数不合法）都回落为 GeneralChat，classify 从不返回错误。

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::llm::LlmClient;
use crate::memory::Message;
use crate::router::parse::{parse_router_output, ParseOutcome, GENERAL_CHAT_TOKEN};
use crate::tools::{ScheduleAction, ScheduleArgs, ToolCall, ToolRegistry, SCHEDULE_CONVERSATION};

/// 路由决策
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    GeneralChat,
    ToolCalls(Vec<ToolCall>),
    ScheduleInstruction {
        action: ScheduleAction,
        time_expression: String,
        specific_message: Option<String>,
    },
}

/// 意图路由器
pub struct IntentRouter {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl IntentRouter {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// 分类一条用户消息
    pub async fn classify(&self, turn: &str, catalog: &ToolRegistry) -> Decision {
        let messages = vec![
            Message::system(classification_prompt(catalog)),
            Message::user(format!("User message: {}", turn)),
        ];

        let output = match tokio::time::timeout(self.timeout, self.llm.complete(&messages)).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Intent classification failed, defaulting to chat");
                return Decision::GeneralChat;
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "Intent classification timed out, defaulting to chat"
                );
                return Decision::GeneralChat;
            }
        };

        let decision = decide(parse_router_output(&output), catalog);
        tracing::debug!(?decision, "Intent classified");
        decision
    }
}

/// 解析结果 → 决策：调度类调用出现在列表任意位置时，整轮视为调度指令并丢弃其余调用
pub fn decide(outcome: ParseOutcome, catalog: &ToolRegistry) -> Decision {
    let calls = match outcome {
        ParseOutcome::Parsed(calls) => calls,
        ParseOutcome::GeneralChat => return Decision::GeneralChat,
        ParseOutcome::Fallback(reason) => {
            tracing::warn!(%reason, "Router output unparseable, defaulting to chat");
            return Decision::GeneralChat;
        }
    };

    if let Some(call) = calls.iter().find(|c| schedule_action_for(&c.name).is_some()) {
        let dropped = calls.len() - 1;
        if dropped > 0 {
            tracing::info!(dropped, "Schedule intent present, discarding other tool calls");
        }
        return schedule_decision(call);
    }

    let (known, unknown): (Vec<ToolCall>, Vec<ToolCall>) =
        calls.into_iter().partition(|c| catalog.contains(&c.name));
    for call in &unknown {
        tracing::warn!(tool = %call.name, "Router returned a tool not in the catalog, ignoring");
    }
    if known.is_empty() {
        Decision::GeneralChat
    } else {
        Decision::ToolCalls(known)
    }
}

/// schedule_conversation 以及直接以动作命名的调用都属于调度类；后者的动作由名称决定
fn schedule_action_for(name: &str) -> Option<Option<ScheduleAction>> {
    match name {
        SCHEDULE_CONVERSATION => Some(None),
        "schedule_reminder" => Some(Some(ScheduleAction::ScheduleReminder)),
        "pause_conversation" => Some(Some(ScheduleAction::PauseConversation)),
        _ => None,
    }
}

fn schedule_decision(call: &ToolCall) -> Decision {
    let mut args = call.arguments.clone();
    if let (Some(Some(action)), Value::Object(map)) = (schedule_action_for(&call.name), &mut args) {
        map.entry("action")
            .or_insert_with(|| serde_json::to_value(action).unwrap_or(Value::Null));
    }
    match serde_json::from_value::<ScheduleArgs>(args) {
        Ok(ScheduleArgs {
            action,
            time_expression,
            specific_message,
        }) if !time_expression.trim().is_empty() => Decision::ScheduleInstruction {
            action,
            time_expression,
            specific_message: specific_message.filter(|m| !m.trim().is_empty()),
        },
        Ok(_) => {
            tracing::warn!("Schedule call without a time expression, defaulting to chat");
            Decision::GeneralChat
        }
        Err(e) => {
            tracing::warn!(error = %e, "Schedule call has invalid arguments, defaulting to chat");
            Decision::GeneralChat
        }
    }
}

fn classification_prompt(catalog: &ToolRegistry) -> String {
    format!(
        r#"You are the routing step of a personal companion assistant. Decide which tools, if any, are needed to answer the user's message.

Available tools (name, description, JSON schema of arguments):
{catalog}

Rules:
- Only call tools when they are actually needed; otherwise answer {token}.
- Use search_wikipedia for factual questions and search_duckduckgo for current or general web information.
- get_weather may be called without coordinates; the user's location is filled in automatically.
- When the user asks to be reminded of something, or asks not to be disturbed for a while, call {schedule} ALONE with action "schedule_reminder" or "pause_conversation", the time expression exactly as the user phrased it, and the reminder text as specific_message.

Output format:
- A JSON array of calls, e.g. [{{"tool": "get_weather", "args": {{}}}}, {{"tool": "get_current_datetime", "args": {{}}}}]
- Or the single word {token} when no tool is needed.
Output nothing else."#,
        catalog = catalog.to_schema_json(),
        token = GENERAL_CHAT_TOKEN,
        schedule = SCHEDULE_CONVERSATION,
    )
}
