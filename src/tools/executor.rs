//! 工具执行器
//!
//! 持有 ToolRegistry 与单次调用超时，按顺序执行一轮的全部调用并累积到 ResultBag。
//! 每个调用相互隔离：失败或超时记为 `<key>_error` 后继续下一个；未知工具记 warning 并跳过。
//! 每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::CompanionError;
use crate::tools::{ResultBag, ToolCall, ToolRegistry, GET_LOCATION, GET_WEATHER};

/// 工具执行器：对每次调用施加超时，并把结果合并进 ResultBag
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 按接收顺序执行调用；同一结果键后写覆盖
    pub async fn execute(&self, calls: &[ToolCall]) -> ResultBag {
        let mut bag = ResultBag::new();
        for call in calls {
            let Some(tool) = self.registry.get(&call.name) else {
                tracing::warn!(tool = %call.name, "Unknown tool requested, skipping");
                continue;
            };
            let key = tool.result_key().to_string();

            let args = if call.name == GET_WEATHER {
                match self.resolve_weather_args(&call.arguments, &mut bag).await {
                    Ok(args) => args,
                    Err(e) => {
                        tracing::warn!(error = %e, "Weather call has no usable location");
                        bag.insert_error(&key, e.to_string());
                        continue;
                    }
                }
            } else {
                call.arguments.clone()
            };

            match self.execute_one(&call.name, args).await {
                Ok(value) => bag.insert(key, value),
                Err(e) => {
                    tracing::warn!(tool = %call.name, error = %e, "Tool call failed, continuing");
                    bag.insert_error(&key, e.to_string());
                }
            }
        }
        bag
    }

    /// 执行单个工具；超时返回 ToolTimeout，工具返回 Err 则转为 ToolExecution；输出 JSON 审计日志
    pub async fn execute_one(&self, tool_name: &str, args: Value) -> Result<Value, CompanionError> {
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| CompanionError::UnknownTool(tool_name.to_string()))?;

        let start = Instant::now();
        let preview = args_preview(&args);
        let result = timeout(self.timeout, tool.execute(args)).await;

        let (ok, outcome) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit, "tool");

        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CompanionError::ToolExecution(e)),
            Err(_) => Err(CompanionError::ToolTimeout(tool_name.to_string())),
        }
    }

    /// 天气调用缺坐标时：先用 bag 中已有的 location，没有再调用定位工具并写回 bag
    async fn resolve_weather_args(
        &self,
        args: &Value,
        bag: &mut ResultBag,
    ) -> Result<Value, CompanionError> {
        if coordinates(args).is_some() {
            return Ok(args.clone());
        }

        let location = match bag.get("location").filter(|v| coordinates(v).is_some()) {
            Some(existing) => existing.clone(),
            None => {
                let fetched = self.execute_one(GET_LOCATION, Value::Null).await;
                match fetched {
                    Ok(value) => {
                        bag.insert("location", value.clone());
                        value
                    }
                    Err(e) => {
                        bag.insert_error("location", e.to_string());
                        return Err(e);
                    }
                }
            }
        };

        let (lat, lon) = coordinates(&location).ok_or_else(|| {
            CompanionError::ToolExecution("location result has no coordinates".into())
        })?;
        let mut merged = match args {
            Value::Object(map) => map.clone(),
            _ => Default::default(),
        };
        merged.insert("latitude".into(), lat.into());
        merged.insert("longitude".into(), lon.into());
        if let Some(name) = location.get("city").cloned() {
            merged.entry("location").or_insert(name);
        }
        Ok(Value::Object(merged))
    }
}

fn coordinates(value: &Value) -> Option<(f64, f64)> {
    let lat = value.get("latitude")?.as_f64()?;
    let lon = value.get("longitude")?.as_f64()?;
    Some((lat, lon))
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::tools::{Tool, GET_CURRENT_DATETIME};

    struct Fixed {
        name: &'static str,
        key: &'static str,
        reply: Result<Value, String>,
        calls: Arc<AtomicUsize>,
    }

    impl Fixed {
        fn new(name: &'static str, key: &'static str, reply: Result<Value, String>) -> Self {
            Self {
                name,
                key,
                reply,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl Tool for Fixed {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "fixed"
        }
        fn result_key(&self) -> &str {
            self.key
        }
        async fn execute(&self, args: Value) -> Result<Value, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone().map(|v| {
                if v == Value::Null {
                    args
                } else {
                    v
                }
            })
        }
    }

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "never finishes in time"
        }
        async fn execute(&self, _args: Value) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let mut registry = ToolRegistry::new();
        registry.register(Fixed::new(GET_WEATHER, "weather", Err("api down".into())));
        registry.register(Fixed::new(
            GET_CURRENT_DATETIME,
            "time",
            Ok(json!({"date": "2024-01-01", "time": "10:00:00", "day": "Monday"})),
        ));
        let executor = ToolExecutor::new(registry, 5);

        let bag = executor
            .execute(&[
                ToolCall::new(GET_WEATHER, json!({"latitude": 1.0, "longitude": 2.0})),
                ToolCall::bare(GET_CURRENT_DATETIME),
            ])
            .await;

        assert!(bag.contains("weather_error"));
        assert_eq!(bag.get("time").unwrap()["day"], "Monday");
    }

    #[tokio::test]
    async fn test_unknown_tool_skipped() {
        let executor = ToolExecutor::new(ToolRegistry::new(), 5);
        let bag = executor.execute(&[ToolCall::bare("teleport")]).await;
        assert!(bag.is_empty());
    }

    #[tokio::test]
    async fn test_weather_fetches_location_when_absent() {
        let location = Fixed::new(
            GET_LOCATION,
            "location",
            Ok(json!({"city": "Pune", "latitude": 18.5, "longitude": 73.8})),
        );
        let location_calls = location.calls.clone();
        let mut registry = ToolRegistry::new();
        registry.register(location);
        // 回显参数，便于断言注入的坐标
        registry.register(Fixed::new(GET_WEATHER, "weather", Ok(Value::Null)));
        let executor = ToolExecutor::new(registry, 5);

        let bag = executor.execute(&[ToolCall::bare(GET_WEATHER)]).await;
        assert_eq!(location_calls.load(Ordering::SeqCst), 1);
        assert_eq!(bag.get("location").unwrap()["city"], "Pune");
        assert_eq!(bag.get("weather").unwrap()["latitude"], 18.5);
    }

    #[tokio::test]
    async fn test_weather_reuses_location_in_bag() {
        let location = Fixed::new(
            GET_LOCATION,
            "location",
            Ok(json!({"city": "Oslo", "latitude": 59.9, "longitude": 10.7})),
        );
        let location_calls = location.calls.clone();
        let mut registry = ToolRegistry::new();
        registry.register(location);
        registry.register(Fixed::new(GET_WEATHER, "weather", Ok(Value::Null)));
        let executor = ToolExecutor::new(registry, 5);

        let bag = executor
            .execute(&[ToolCall::bare(GET_LOCATION), ToolCall::bare(GET_WEATHER)])
            .await;
        assert_eq!(location_calls.load(Ordering::SeqCst), 1);
        assert_eq!(bag.get("weather").unwrap()["longitude"], 10.7);
    }

    #[tokio::test]
    async fn test_later_value_wins() {
        let mut registry = ToolRegistry::new();
        registry.register(Fixed::new("a", "shared", Ok(json!("first"))));
        registry.register(Fixed::new("b", "shared", Ok(json!("second"))));
        let executor = ToolExecutor::new(registry, 5);
        let bag = executor
            .execute(&[ToolCall::bare("a"), ToolCall::bare("b")])
            .await;
        assert_eq!(bag.get("shared").unwrap(), "second");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_recorded_as_error() {
        let mut registry = ToolRegistry::new();
        registry.register(Slow);
        let executor = ToolExecutor::new(registry, 1);
        let bag = executor.execute(&[ToolCall::bare("slow")]).await;
        assert!(bag.get("slow_error").unwrap().as_str().unwrap().contains("timeout"));
    }
}
