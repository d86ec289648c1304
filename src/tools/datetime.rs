//! 当前日期时间工具

use std::sync::Arc;

use async_trait::async_trait;
use chrono::FixedOffset;
use serde_json::{json, Value};

use crate::core::Clock;
use crate::tools::{Tool, GET_CURRENT_DATETIME};

/// 返回本地时区的 {date, time, day}
pub struct DateTimeTool {
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
}

impl DateTimeTool {
    pub fn new(clock: Arc<dyn Clock>, offset: FixedOffset) -> Self {
        Self { clock, offset }
    }
}

#[async_trait]
impl Tool for DateTimeTool {
    fn name(&self) -> &str {
        GET_CURRENT_DATETIME
    }

    fn description(&self) -> &str {
        "Get the current local date, time and weekday."
    }

    fn result_key(&self) -> &str {
        "time"
    }

    async fn execute(&self, _args: Value) -> Result<Value, String> {
        let now = self.clock.now().with_timezone(&self.offset);
        Ok(json!({
            "date": now.format("%Y-%m-%d").to_string(),
            "time": now.format("%H:%M:%S").to_string(),
            "day": now.format("%A").to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::core::ManualClock;

    #[tokio::test]
    async fn test_formats_local_time() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 20, 0, 0).unwrap());
        let offset = FixedOffset::east_opt(5 * 3600 + 1800).unwrap();
        let tool = DateTimeTool::new(Arc::new(clock), offset);
        let out = tool.execute(Value::Null).await.unwrap();
        assert_eq!(out["date"], "2024-01-02");
        assert_eq!(out["time"], "01:30:00");
        assert_eq!(out["day"], "Tuesday");
    }
}
