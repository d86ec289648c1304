//! 工具层：注册表 / 执行器 / 内置工具
//!
//! 内置工具是外部协作者（定位、天气、搜索、时钟）的薄封装；schedule_conversation 只参与路由。

pub mod datetime;
pub mod executor;
pub mod location;
pub mod registry;
pub mod result_bag;
pub mod schedule;
pub mod search;
pub mod weather;

use std::sync::Arc;
use std::time::Duration;

use chrono::FixedOffset;
use reqwest::Client;

use crate::config::AppConfig;
use crate::core::Clock;

pub use datetime::DateTimeTool;
pub use executor::ToolExecutor;
pub use location::LocationTool;
pub use registry::{Tool, ToolCall, ToolRegistry, ToolSpec};
pub use result_bag::ResultBag;
pub use schedule::{ScheduleAction, ScheduleArgs, ScheduleConversationTool};
pub use search::{DuckDuckGoTool, WikipediaTool};
pub use weather::WeatherTool;

pub const GET_LOCATION: &str = "get_location";
pub const GET_WEATHER: &str = "get_weather";
pub const GET_CURRENT_DATETIME: &str = "get_current_datetime";
pub const SEARCH_WIKIPEDIA: &str = "search_wikipedia";
pub const SEARCH_DUCKDUCKGO: &str = "search_duckduckgo";
pub const SCHEDULE_CONVERSATION: &str = "schedule_conversation";

/// 共享 HTTP 客户端：带超时与 User-Agent
pub fn http_client(timeout_secs: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(concat!("hearth/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}

/// 按配置注册全部内置工具
pub fn builtin_registry(cfg: &AppConfig, clock: Arc<dyn Clock>, offset: FixedOffset) -> ToolRegistry {
    let client = http_client(cfg.tools.http_timeout_secs);
    let mut registry = ToolRegistry::new();
    registry.register(LocationTool::new(client.clone()));
    registry.register(WeatherTool::new(client.clone()));
    registry.register(DateTimeTool::new(clock, offset));
    registry.register(WikipediaTool::new(client.clone(), cfg.tools.search.char_limit));
    registry.register(DuckDuckGoTool::new(client, cfg.tools.search.max_results));
    registry.register(ScheduleConversationTool);
    registry
}
