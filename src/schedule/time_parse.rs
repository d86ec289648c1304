//! 自然语言时间解析
//!
//! 以「现在」为基准、在配置的本地时区内把表达式解析成绝对时刻（UTC），优先取未来的解释。
//!
//! 顺延规则：解析结果不晚于现在、且表达式中没有出现 "today" 一词时，整体顺延一天。
//! 顺延后仍不在未来的（例如早已过去的绝对日期）直接报 NotInFuture，不会创建事件。
//! 该规则对明确写出的过去日期会误判，保留它是为了与既有行为一致。

use std::sync::OnceLock;

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Utc, Weekday,
};
use regex::{Captures, Regex};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimeParseError {
    #[error("unrecognized time expression '{0}'")]
    Unrecognized(String),

    #[error("invalid time of day in '{0}'")]
    InvalidTime(String),

    #[error("'{0}' does not resolve to a future time")]
    NotInFuture(String),
}

const TIME: &str = r"(\d{1,2})(?::(\d{2}))?\s*(am|pm|a\.m\.|p\.m\.)?";

fn regex(cell: &'static OnceLock<Regex>, pattern: impl FnOnce() -> String) -> &'static Regex {
    cell.get_or_init(|| Regex::new(&pattern()).unwrap_or_else(|e| panic!("bad regex: {e}")))
}

fn relative_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, || r"^(?:in|after)\s+(.+)$".to_string())
}

fn unit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, || {
        r"(\d+)\s*(weeks?|w|days?|d|hours?|hrs?|h|minutes?|mins?|m)\b".to_string()
    })
}

fn day_keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, || {
        format!(r"^(today|tonight|tomorrow)(?:\s+(?:at\s+)?{TIME})?$")
    })
}

fn time_then_day_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, || {
        format!(r"^(?:at\s+)?{TIME}\s+(today|tonight|tomorrow)$")
    })
}

fn weekday_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, || {
        format!(
            r"^(?:(on|next|this)\s+)?(monday|tuesday|wednesday|thursday|friday|saturday|sunday)(?:\s+(?:at\s+)?{TIME})?$"
        )
    })
}

fn time_only_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, || format!(r"^(at\s+)?{TIME}$"))
}

/// 表达式中是否出现独立的 "today" 一词
pub fn mentions_today(expression: &str) -> bool {
    expression
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .any(|w| w == "today")
}

/// 解析时间表达式为绝对时刻（UTC）
pub fn resolve_time_expression(
    expression: &str,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<DateTime<Utc>, TimeParseError> {
    let resolved = parse_candidate(expression, now, offset)?;
    apply_rollover(expression, resolved, now)
}

/// 顺延规则：不在未来且未提及 today 时 +1 天；之后仍不在未来则报错
pub fn apply_rollover(
    expression: &str,
    resolved: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, TimeParseError> {
    let mut resolved = resolved;
    if resolved <= now && !mentions_today(expression) {
        resolved += Duration::days(1);
    }
    if resolved <= now {
        return Err(TimeParseError::NotInFuture(expression.trim().to_string()));
    }
    Ok(resolved)
}

fn normalize(expression: &str) -> String {
    let lowered = expression
        .trim()
        .trim_end_matches(['.', '!', '?', ','])
        .to_lowercase();
    let mut text = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    for prefix in ["until ", "till ", "til "] {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest.to_string();
        }
    }
    if let Some(rest) = text.strip_prefix("for ") {
        text = format!("in {rest}");
    }
    text.replace("half an hour", "30 minutes")
        .replace("an hour", "1 hour")
        .replace("a minute", "1 minute")
        .replace("a day", "1 day")
        .replace("a week", "1 week")
}

/// 未应用顺延规则的解析结果
fn parse_candidate(
    expression: &str,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<DateTime<Utc>, TimeParseError> {
    let raw = expression.trim();
    if raw.is_empty() {
        return Err(TimeParseError::Unrecognized(String::new()));
    }
    let text = normalize(raw);
    let now_local = now.with_timezone(&offset);

    if let Some(caps) = relative_re().captures(&text) {
        if let Some(delta) = parse_relative_duration(&caps[1], raw)? {
            return now.checked_add_signed(delta).ok_or_else(|| invalid(raw));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Some(naive) = parse_absolute(raw) {
        return local_to_utc(naive, offset, raw);
    }

    match text.as_str() {
        "noon" | "at noon" => return at_time_on(now_local.date_naive(), 12, 0, offset, raw),
        "midnight" | "at midnight" => {
            let tomorrow = now_local.date_naive() + Duration::days(1);
            return at_time_on(tomorrow, 0, 0, offset, raw);
        }
        _ => {}
    }

    if let Some(caps) = day_keyword_re().captures(&text) {
        return resolve_day_keyword(&caps[1], &caps, 2, now_local, offset, raw);
    }

    if let Some(caps) = time_then_day_re().captures(&text) {
        return resolve_day_keyword(&caps[4], &caps, 1, now_local, offset, raw);
    }

    if let Some(caps) = weekday_re().captures(&text) {
        let qualifier = caps.get(1).map(|m| m.as_str());
        let weekday = parse_weekday(&caps[2])
            .ok_or_else(|| TimeParseError::Unrecognized(raw.to_string()))?;
        let (hour, minute) = if caps.get(3).is_some() {
            time_from_captures(&caps, 3, false).ok_or_else(|| invalid(raw))?
        } else {
            (9, 0)
        };
        let today = now_local.weekday().num_days_from_monday() as i64;
        let target = weekday.num_days_from_monday() as i64;
        let mut ahead = (target - today).rem_euclid(7);
        if ahead == 0 && qualifier == Some("next") {
            ahead = 7;
        }
        let date = now_local.date_naive() + Duration::days(ahead);
        let candidate = at_time_on(date, hour, minute, offset, raw)?;
        // 同一星期几但时刻已过：取下周，避免被顺延规则推到第二天
        if ahead == 0 && candidate <= now {
            return Ok(candidate + Duration::days(7));
        }
        return Ok(candidate);
    }

    if let Some(caps) = time_only_re().captures(&text) {
        let has_at = caps.get(1).is_some();
        let has_minutes = caps.get(3).is_some();
        let has_meridiem = caps.get(4).is_some();
        if has_at || has_minutes || has_meridiem {
            let (hour, minute) = time_from_captures(&caps, 2, false).ok_or_else(|| invalid(raw))?;
            return at_time_on(now_local.date_naive(), hour, minute, offset, raw);
        }
    }

    Err(TimeParseError::Unrecognized(raw.to_string()))
}

fn invalid(raw: &str) -> TimeParseError {
    TimeParseError::InvalidTime(raw.to_string())
}

fn resolve_day_keyword(
    keyword: &str,
    caps: &Captures<'_>,
    time_idx: usize,
    now_local: DateTime<FixedOffset>,
    offset: FixedOffset,
    raw: &str,
) -> Result<DateTime<Utc>, TimeParseError> {
    let tonight = keyword == "tonight";
    let (hour, minute) = if caps.get(time_idx).is_some() {
        time_from_captures(caps, time_idx, tonight).ok_or_else(|| invalid(raw))?
    } else {
        match keyword {
            "tonight" => (20, 0),
            "tomorrow" => (9, 0),
            _ => return Err(TimeParseError::Unrecognized(raw.to_string())),
        }
    };
    let date = match keyword {
        "tomorrow" => now_local.date_naive() + Duration::days(1),
        _ => now_local.date_naive(),
    };
    at_time_on(date, hour, minute, offset, raw)
}

/// 从 (hour, minute, meridiem) 三个连续捕获组取出时分；evening 为 true 时无 am/pm 的 1–11 点视为晚上
fn time_from_captures(caps: &Captures<'_>, hour_idx: usize, evening: bool) -> Option<(u32, u32)> {
    let mut hour: u32 = caps.get(hour_idx)?.as_str().parse().ok()?;
    let minute: u32 = caps
        .get(hour_idx + 1)
        .map_or(Some(0), |m| m.as_str().parse().ok())?;
    match caps.get(hour_idx + 2).map(|m| m.as_str().replace('.', "")) {
        Some(ref m) if m == "pm" => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            if hour < 12 {
                hour += 12;
            }
        }
        Some(ref m) if m == "am" => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            if hour == 12 {
                hour = 0;
            }
        }
        _ => {
            if evening && (1..12).contains(&hour) {
                hour += 12;
            }
        }
    }
    if hour > 23 || minute > 59 {
        return None;
    }
    Some((hour, minute))
}

/// 累加 "2 hours 30 minutes" 之类的时长；数值超出 chrono 可表示范围时报 InvalidTime
fn parse_relative_duration(input: &str, raw: &str) -> Result<Option<Duration>, TimeParseError> {
    let mut total = Duration::zero();
    let mut matched = false;
    for caps in unit_re().captures_iter(input) {
        let (Some(count), Some(unit)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let n: i64 = count.as_str().parse().map_err(|_| invalid(raw))?;
        let unit = unit.as_str();
        matched = true;
        let step = if unit.starts_with('w') {
            Duration::try_weeks(n)
        } else if unit.starts_with('d') {
            Duration::try_days(n)
        } else if unit.starts_with('h') {
            Duration::try_hours(n)
        } else {
            Duration::try_minutes(n)
        };
        total = step
            .and_then(|step| total.checked_add(&step))
            .ok_or_else(|| invalid(raw))?;
    }
    Ok((matched && total > Duration::zero()).then_some(total))
}

fn parse_absolute(raw: &str) -> Option<NaiveDateTime> {
    let dt_formats = [
        "%Y-%m-%d %H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y/%m/%d %H:%M",
        "%Y-%m-%d %I:%M %p",
    ];
    for fmt in dt_formats {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive);
        }
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return date.and_hms_opt(9, 0, 0);
        }
    }
    None
}

fn parse_weekday(name: &str) -> Option<Weekday> {
    name.parse::<Weekday>().ok()
}

fn at_time_on(
    date: NaiveDate,
    hour: u32,
    minute: u32,
    offset: FixedOffset,
    raw: &str,
) -> Result<DateTime<Utc>, TimeParseError> {
    let time = NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| invalid(raw))?;
    local_to_utc(NaiveDateTime::new(date, time), offset, raw)
}

fn local_to_utc(
    naive: NaiveDateTime,
    offset: FixedOffset,
    raw: &str,
) -> Result<DateTime<Utc>, TimeParseError> {
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| invalid(raw))
}
