//! ResultBag：一轮工具调用的结果累积

use serde::Serialize;
use serde_json::{Map, Value};

/// 按约定键（location / weather / time / search / wikipedia …）累积工具输出；同键后写覆盖
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResultBag {
    entries: Map<String, Value>,
}

impl ResultBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    /// 记录失败：键为 `<tool>_error`
    pub fn insert_error(&mut self, tool: &str, error: impl Into<String>) {
        self.entries
            .insert(format!("{tool}_error"), Value::String(error.into()));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(&self.entries).unwrap_or_else(|_| "{}".to_string())
    }
}
