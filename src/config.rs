//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HEARTH__*` 覆盖（双下划线表示嵌套，如 `HEARTH__LLM__PROVIDER=mock`）。

use std::path::PathBuf;
use std::time::Duration;

use chrono::FixedOffset;
use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub scheduler: SchedulerSection,
    pub memory: MemorySection,
    pub store: StoreSection,
}

/// [app] 段：名称、数据目录、时区、结束会话关键词
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
    /// 数据目录（SQLite、画像 JSON），未设置时用 ./data
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// 本地时区相对 UTC 的分钟偏移；未设置时取系统本地时区
    pub utc_offset_minutes: Option<i32>,
    /// 整条消息等于其中之一时结束会话并生成摘要
    #[serde(default = "default_end_session_keywords")]
    pub end_session_keywords: Vec<String>,
}

fn default_app_name() -> String {
    "Hearth".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_end_session_keywords() -> Vec<String> {
    vec!["sleep".into(), "/sleep".into(), "/end".into()]
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            data_dir: default_data_dir(),
            utc_offset_minutes: None,
            end_session_keywords: default_end_session_keywords(),
        }
    }
}

impl AppSection {
    /// 解析本地时区偏移
    pub fn local_offset(&self) -> FixedOffset {
        self.utc_offset_minutes
            .and_then(|m| FixedOffset::east_opt(m * 60))
            .unwrap_or_else(|| *chrono::Local::now().offset())
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai（任意 OpenAI 兼容端点）/ mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 未设置时读取 OPENAI_API_KEY
    pub api_key: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

fn default_request_timeout() -> u64 {
    60
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

/// [tools] 段：工具超时、HTTP 超时、搜索参数
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default)]
    pub search: SearchSection,
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_http_timeout_secs() -> u64 {
    15
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            search: SearchSection::default(),
        }
    }
}

/// [tools.search] 段：结果条数与百科摘要长度上限
#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_char_limit")]
    pub char_limit: usize,
}

fn default_max_results() -> usize {
    3
}

fn default_char_limit() -> usize {
    500
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            char_limit: default_char_limit(),
        }
    }
}

/// [scheduler] 段：主动问候的抖动区间与静默/冷却阈值
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_initial_min")]
    pub initial_delay_min_hours: f64,
    #[serde(default = "default_initial_max")]
    pub initial_delay_max_hours: f64,
    #[serde(default = "default_reschedule_min")]
    pub reschedule_min_hours: f64,
    #[serde(default = "default_reschedule_max")]
    pub reschedule_max_hours: f64,
    /// 用户沉默超过该时长才考虑主动问候
    #[serde(default = "default_silence_minutes")]
    pub silence_threshold_minutes: i64,
    /// 距上次主动问候超过该时长才允许再次问候
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: i64,
}

fn default_true() -> bool {
    true
}

fn default_initial_min() -> f64 {
    2.5
}

fn default_initial_max() -> f64 {
    4.0
}

fn default_reschedule_min() -> f64 {
    2.0
}

fn default_reschedule_max() -> f64 {
    5.0
}

fn default_silence_minutes() -> i64 {
    60
}

fn default_cooldown_minutes() -> i64 {
    120
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_min_hours: default_initial_min(),
            initial_delay_max_hours: default_initial_max(),
            reschedule_min_hours: default_reschedule_min(),
            reschedule_max_hours: default_reschedule_max(),
            silence_threshold_minutes: default_silence_minutes(),
            cooldown_minutes: default_cooldown_minutes(),
        }
    }
}

impl SchedulerSection {
    /// 首次唤醒的抖动区间
    pub fn initial_delay_range(&self) -> (Duration, Duration) {
        hours_range(
            self.initial_delay_min_hours,
            self.initial_delay_max_hours,
            (default_initial_min(), default_initial_max()),
        )
    }

    /// 每次唤醒后重新调度的抖动区间
    pub fn reschedule_range(&self) -> (Duration, Duration) {
        hours_range(
            self.reschedule_min_hours,
            self.reschedule_max_hours,
            (default_reschedule_min(), default_reschedule_max()),
        )
    }
}

/// 小时区间 → Duration 区间（min > max 时交换）；无法表示的值退回 fallback
fn hours_range(min_hours: f64, max_hours: f64, fallback: (f64, f64)) -> (Duration, Duration) {
    let lo = hours_to_duration(min_hours, fallback.0);
    let hi = hours_to_duration(max_hours, fallback.1);
    if lo <= hi {
        (lo, hi)
    } else {
        (hi, lo)
    }
}

fn hours_to_duration(hours: f64, fallback_hours: f64) -> Duration {
    Duration::try_from_secs_f64(hours.max(0.0) * 3600.0).unwrap_or_else(|_| {
        tracing::warn!(hours, fallback_hours, "Scheduler hours out of range, using default");
        Duration::from_secs_f64(fallback_hours * 3600.0)
    })
}

/// [memory] 段：检索条数与最近窗口
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    #[serde(default = "default_top_n")]
    pub relevant_top_n: usize,
    /// prompt 中保留的最近轮数
    #[serde(default = "default_recent_window")]
    pub recent_window: usize,
}

fn default_top_n() -> usize {
    3
}

fn default_recent_window() -> usize {
    20
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            relevant_top_n: default_top_n(),
            recent_window: default_recent_window(),
        }
    }
}

/// [store] 段：持久化后端
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    /// sqlite / memory
    #[serde(default = "default_backend")]
    pub backend: String,
    /// 未设置时为 <data_dir>/hearth.db
    pub sqlite_path: Option<PathBuf>,
}

fn default_backend() -> String {
    "sqlite".to_string()
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            sqlite_path: None,
        }
    }
}

/// 从 config 目录加载配置，环境变量 HEARTH__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HEARTH__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HEARTH")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.scheduler.silence_threshold_minutes, 60);
        assert_eq!(cfg.scheduler.cooldown_minutes, 120);
        assert_eq!(cfg.memory.relevant_top_n, 3);
        assert_eq!(cfg.store.backend, "sqlite");
        assert!(cfg.app.end_session_keywords.contains(&"sleep".to_string()));
    }

    #[test]
    fn test_explicit_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[scheduler]\ncooldown_minutes = 30\n\n[app]\nutc_offset_minutes = 330\n",
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.scheduler.cooldown_minutes, 30);
        assert_eq!(cfg.scheduler.silence_threshold_minutes, 60);
        assert_eq!(cfg.app.local_offset().local_minus_utc(), 330 * 60);
    }

    #[test]
    fn test_hours_range_swaps() {
        let (lo, hi) = hours_range(5.0, 2.0, (1.0, 1.0));
        assert_eq!(lo, Duration::from_secs(2 * 3600));
        assert_eq!(hi, Duration::from_secs(5 * 3600));
    }

    #[test]
    fn test_unrepresentable_hours_use_defaults() {
        let mut scheduler = SchedulerSection::default();
        scheduler.reschedule_min_hours = f64::INFINITY;
        scheduler.reschedule_max_hours = 1e300;
        scheduler.initial_delay_min_hours = f64::NAN;
        assert_eq!(
            scheduler.reschedule_range(),
            (Duration::from_secs(2 * 3600), Duration::from_secs(5 * 3600))
        );
        let (lo, hi) = scheduler.initial_delay_range();
        assert_eq!(lo, Duration::ZERO);
        assert_eq!(hi, Duration::from_secs(4 * 3600));
    }
}
