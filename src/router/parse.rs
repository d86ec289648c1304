//! 路由输出解析：parse-or-fallback
//!
//! 期望的输出是工具调用的 JSON 数组，或单独的 `general_chat`。
//! 先去掉 markdown 代码块包裹；其余任何无法解释的输出都落到 Fallback 分支，绝不返回错误。

use serde_json::Value;

use crate::tools::ToolCall;

/// 表示「无需工具，直接聊天」的字面量
pub const GENERAL_CHAT_TOKEN: &str = "general_chat";

/// 解析结果
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// 解析出的调用列表（非空）
    Parsed(Vec<ToolCall>),
    /// 模型明确回答了 general_chat（或空数组）
    GeneralChat,
    /// 无法解析，附原因；调用方按普通对话处理
    Fallback(String),
}

/// 去掉 ```json ... ``` / ``` ... ``` 包裹
pub fn strip_code_fence(output: &str) -> &str {
    let trimmed = output.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let rest = &trimmed[start + 3..];
    // 跳过语言标记（json / JSON / 空）
    let rest = match rest.find('\n') {
        Some(nl) if rest[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()) => &rest[nl + 1..],
        _ => rest.trim_start_matches("json"),
    };
    rest.find("```")
        .map(|end| rest[..end].trim())
        .unwrap_or(rest.trim())
}

fn is_general_chat(text: &str) -> bool {
    text.trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '.' || c.is_whitespace())
        .eq_ignore_ascii_case(GENERAL_CHAT_TOKEN)
}

/// 解析路由模型输出
pub fn parse_router_output(output: &str) -> ParseOutcome {
    let body = strip_code_fence(output);
    if body.is_empty() {
        return ParseOutcome::Fallback("empty output".to_string());
    }
    if is_general_chat(body) {
        return ParseOutcome::GeneralChat;
    }

    // 数组前后夹杂说明文字时只取方括号之间
    let json_str = if body.starts_with('[') {
        body
    } else {
        match (body.find('['), body.rfind(']')) {
            (Some(start), Some(end)) if start < end => &body[start..=end],
            _ => return ParseOutcome::Fallback(format!("not a JSON array: {body}")),
        }
    };

    let items = match serde_json::from_str::<Value>(json_str) {
        Ok(Value::Array(items)) => items,
        Ok(other) => return ParseOutcome::Fallback(format!("expected array, got {other}")),
        Err(e) => return ParseOutcome::Fallback(format!("{e}: {json_str}")),
    };

    let mut calls = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::String(name) if is_general_chat(&name) => {}
            Value::String(name) => calls.push(ToolCall::bare(name.trim())),
            obj @ Value::Object(_) => match serde_json::from_value::<ToolCall>(obj) {
                Ok(call) if is_general_chat(&call.name) => {}
                Ok(call) => calls.push(call),
                Err(e) => return ParseOutcome::Fallback(format!("malformed call: {e}")),
            },
            other => return ParseOutcome::Fallback(format!("unexpected array element: {other}")),
        }
    }

    if calls.is_empty() {
        ParseOutcome::GeneralChat
    } else {
        ParseOutcome::Parsed(calls)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_invalid_json_falls_back() {
        assert!(matches!(
            parse_router_output("not valid json {{{"),
            ParseOutcome::Fallback(_)
        ));
    }

    #[test]
    fn test_general_chat_token() {
        assert_eq!(parse_router_output("general_chat"), ParseOutcome::GeneralChat);
        assert_eq!(parse_router_output("  'General_Chat'. "), ParseOutcome::GeneralChat);
        assert_eq!(parse_router_output("[]"), ParseOutcome::GeneralChat);
        assert_eq!(
            parse_router_output(r#"["general_chat"]"#),
            ParseOutcome::GeneralChat
        );
    }

    #[test]
    fn test_fenced_array() {
        let out = "```json\n[{\"tool\": \"get_weather\", \"args\": {}}, {\"tool\": \"get_current_datetime\"}]\n```";
        match parse_router_output(out) {
            ParseOutcome::Parsed(calls) => {
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[0].name, "get_weather");
                assert_eq!(calls[1].arguments, json!({}));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_array_with_surrounding_prose() {
        let out = "Sure, here you go: [\"get_location\"] hope that helps";
        assert_eq!(
            parse_router_output(out),
            ParseOutcome::Parsed(vec![ToolCall::bare("get_location")])
        );
    }

    #[test]
    fn test_object_is_not_accepted() {
        assert!(matches!(
            parse_router_output(r#"{"tool": "get_weather"}"#),
            ParseOutcome::Fallback(_)
        ));
    }

    #[test]
    fn test_plain_fence_without_language() {
        assert_eq!(strip_code_fence("```\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fence("```json [2] ```"), "[2]");
    }
}
