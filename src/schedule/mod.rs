//! 调度：时间表达式解析、单槽位延迟事件、主动问候

pub mod deferred;
pub mod proactive;
pub mod time_parse;

pub use deferred::{fire_prompt, DeferredScheduler};
pub use proactive::{
    catch_panics, check_in_prompt, DayBand, ProactiveScheduler, SchedulerPhase, SilenceBand,
    WakeOutcome,
};
pub use time_parse::{apply_rollover, mentions_today, resolve_time_expression, TimeParseError};
