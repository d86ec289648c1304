//! 搜索工具：维基百科摘要 + DuckDuckGo 即时答案
//!
//! 维基摘要超过 char_limit 时截断到限制前最后一个句号，保证句子完整。
//! DuckDuckGo 结果整理为 "标题: 链接" 行；没有结果时返回固定提示。

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use crate::tools::{Tool, SEARCH_DUCKDUCKGO, SEARCH_WIKIPEDIA};

const WIKIPEDIA_SUMMARY: &str = "https://en.wikipedia.org/api/rest_v1/page/summary/";
const DUCKDUCKGO_API: &str = "https://api.duckduckgo.com/";

pub const WIKIPEDIA_NOT_FOUND: &str = "I couldn't find that on Wikipedia.";
pub const NO_SEARCH_RESULTS: &str = "No relevant search results found.";

fn query_arg(args: &Value) -> Result<String, String> {
    args.get("query")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(String::from)
        .ok_or_else(|| "Missing 'query' argument".to_string())
}

fn usize_arg(args: &Value, key: &str, default: usize) -> usize {
    args.get(key)
        .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .map(|n| n as usize)
        .unwrap_or(default)
}

/// 截断到 char_limit 之前最后一个句号（含句号）；找不到句号则硬截断
pub fn truncate_at_sentence(text: &str, char_limit: usize) -> String {
    if text.chars().count() <= char_limit {
        return text.to_string();
    }
    let cut = text
        .char_indices()
        .nth(char_limit)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let head = &text[..cut];
    match head.rfind('.') {
        Some(dot) => text[..=dot].to_string(),
        None => head.to_string(),
    }
}

/// DuckDuckGo 即时答案 → "标题: 链接" 列表
pub fn format_related_topics(body: &Value, max_results: usize) -> Vec<String> {
    let mut lines = Vec::new();
    if let (Some(heading), Some(url)) = (
        body.get("Heading").and_then(Value::as_str),
        body.get("AbstractURL").and_then(Value::as_str),
    ) {
        if !heading.is_empty() && !url.is_empty() {
            lines.push(format!("{heading}: {url}"));
        }
    }

    let mut stack: Vec<&Value> = body
        .get("RelatedTopics")
        .and_then(Value::as_array)
        .map(|topics| topics.iter().rev().collect())
        .unwrap_or_default();
    while let Some(topic) = stack.pop() {
        if lines.len() >= max_results {
            break;
        }
        if let Some(nested) = topic.get("Topics").and_then(Value::as_array) {
            stack.extend(nested.iter().rev());
            continue;
        }
        let text = topic.get("Text").and_then(Value::as_str).unwrap_or_default();
        let url = topic.get("FirstURL").and_then(Value::as_str).unwrap_or_default();
        if !text.is_empty() && !url.is_empty() {
            lines.push(format!("{text}: {url}"));
        }
    }

    lines.truncate(max_results);
    if lines.is_empty() {
        lines.push(NO_SEARCH_RESULTS.to_string());
    }
    lines
}

pub struct WikipediaTool {
    client: Client,
    default_char_limit: usize,
}

impl WikipediaTool {
    pub fn new(client: Client, default_char_limit: usize) -> Self {
        Self {
            client,
            default_char_limit,
        }
    }
}

#[async_trait]
impl Tool for WikipediaTool {
    fn name(&self) -> &str {
        SEARCH_WIKIPEDIA
    }

    fn description(&self) -> &str {
        "Look up a topic on Wikipedia and return a short summary."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Article title or topic"},
                "char_limit": {"type": "integer", "default": self.default_char_limit}
            },
            "required": ["query"]
        })
    }

    fn result_key(&self) -> &str {
        "wikipedia"
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let query = query_arg(&args)?;
        let char_limit = usize_arg(&args, "char_limit", self.default_char_limit);
        let title = query.replace(' ', "_");

        let resp = self
            .client
            .get(format!("{WIKIPEDIA_SUMMARY}{title}"))
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(Value::String(WIKIPEDIA_NOT_FOUND.to_string()));
        }
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| format!("Invalid Wikipedia response: {}", e))?;
        let extract = body
            .get("extract")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if extract.is_empty() {
            return Ok(Value::String(WIKIPEDIA_NOT_FOUND.to_string()));
        }
        Ok(Value::String(truncate_at_sentence(extract, char_limit)))
    }
}

pub struct DuckDuckGoTool {
    client: Client,
    default_max_results: usize,
}

impl DuckDuckGoTool {
    pub fn new(client: Client, default_max_results: usize) -> Self {
        Self {
            client,
            default_max_results,
        }
    }
}

#[async_trait]
impl Tool for DuckDuckGoTool {
    fn name(&self) -> &str {
        SEARCH_DUCKDUCKGO
    }

    fn description(&self) -> &str {
        "Search the web with DuckDuckGo and return result titles with links."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "max_results": {"type": "integer", "default": self.default_max_results}
            },
            "required": ["query"]
        })
    }

    fn result_key(&self) -> &str {
        "search"
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let query = query_arg(&args)?;
        let max_results = usize_arg(&args, "max_results", self.default_max_results);

        let resp = self
            .client
            .get(DUCKDUCKGO_API)
            .query(&[
                ("q", query.as_str()),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| format!("Invalid search response: {}", e))?;
        Ok(json!(format_related_topics(&body, max_results)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_at_last_full_stop() {
        let text = "Rust is a language. It is fast. It is safe and productive.";
        assert_eq!(truncate_at_sentence(text, 35), "Rust is a language. It is fast.");
        assert_eq!(truncate_at_sentence(text, 500), text);
    }

    #[test]
    fn test_truncate_without_full_stop() {
        assert_eq!(truncate_at_sentence("abcdefgh", 4), "abcd");
    }

    #[test]
    fn test_related_topics_flattened_and_limited() {
        let body = json!({
            "Heading": "",
            "RelatedTopics": [
                {"Text": "Ferris", "FirstURL": "https://example.org/ferris"},
                {"Name": "Group", "Topics": [
                    {"Text": "Cargo", "FirstURL": "https://example.org/cargo"},
                    {"Text": "Clippy", "FirstURL": "https://example.org/clippy"}
                ]},
                {"Text": "Rustup", "FirstURL": "https://example.org/rustup"}
            ]
        });
        let lines = format_related_topics(&body, 3);
        assert_eq!(
            lines,
            vec![
                "Ferris: https://example.org/ferris",
                "Cargo: https://example.org/cargo",
                "Clippy: https://example.org/clippy",
            ]
        );
    }

    #[test]
    fn test_no_results_message() {
        assert_eq!(format_related_topics(&json!({}), 3), vec![NO_SEARCH_RESULTS]);
    }
}
