//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按名注册与查找。
//! 注册表同时充当意图识别用的工具目录：`catalog()` / `to_schema_json()` 生成名称、描述与参数 schema。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 一次工具调用（LLM 返回的简化 JSON：{"tool": "get_weather", "args": {...}}）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(rename = "tool", alias = "name")]
    pub name: String,
    #[serde(rename = "args", alias = "arguments", default = "empty_args")]
    pub arguments: Value,
}

fn empty_args() -> Value {
    Value::Object(Default::default())
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// 无参数调用
    pub fn bare(name: impl Into<String>) -> Self {
        Self::new(name, empty_args())
    }
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、结果键、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（用于 JSON 中的 "tool" 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 结果写入 ResultBag 的键（location / weather / time / search / wikipedia …）
    fn result_key(&self) -> &str {
        self.name()
    }

    /// 执行工具
    async fn execute(&self, args: Value) -> Result<Value, String>;
}

/// 工具目录中的一项
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 工具注册表：按名称存储 Arc<dyn Tool>；BTreeMap 保证目录顺序稳定
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "Tool re-registered, previous entry replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn catalog(&self) -> Vec<ToolSpec> {
        self.tools
            .values()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }

    /// 动态生成工具 schema JSON，嵌入分类 prompt
    pub fn to_schema_json(&self) -> String {
        serde_json::to_string_pretty(&self.catalog()).unwrap_or_else(|_| "[]".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ping;

    #[async_trait]
    impl Tool for Ping {
        fn name(&self) -> &str {
            "ping"
        }
        fn description(&self) -> &str {
            "Replies pong"
        }
        async fn execute(&self, _args: Value) -> Result<Value, String> {
            Ok(Value::String("pong".into()))
        }
    }

    #[test]
    fn test_catalog_contains_schema() {
        let mut registry = ToolRegistry::new();
        registry.register(Ping);
        let json = registry.to_schema_json();
        assert!(json.contains("\"ping\""));
        assert!(json.contains("Replies pong"));
        assert!(json.contains("\"parameters\""));
        assert!(registry.contains("ping"));
    }

    #[test]
    fn test_tool_call_accepts_both_field_spellings() {
        let a: ToolCall = serde_json::from_str(r#"{"tool":"x","args":{"q":1}}"#).unwrap();
        let b: ToolCall = serde_json::from_str(r#"{"name":"x","arguments":{"q":1}}"#).unwrap();
        assert_eq!(a, b);
        let c: ToolCall = serde_json::from_str(r#"{"tool":"x"}"#).unwrap();
        assert!(c.arguments.as_object().unwrap().is_empty());
    }
}
