use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;

use crate::model::{FilterExpression, TimeWindow};

/// 未识别出产品名时返回的占位符。
pub const UNKNOWN_PRODUCT: &str = "unknown";

/// 时间窗口解析不出任何模式时的默认回溯小时数。
const DEFAULT_LOOKBACK_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy)]
enum TimeUnit {
    Hours,
    Days,
    Weeks,
}

impl TimeUnit {
    fn duration(self, value: i64) -> Option<Duration> {
        match self {
            TimeUnit::Hours => Duration::try_hours(value),
            TimeUnit::Days => Duration::try_days(value),
            TimeUnit::Weeks => Duration::try_weeks(value),
        }
    }
}

/// 按优先级排列的时间窗口模式；第一个命中的生效。
const TIMEFRAME_PATTERNS: &[(&str, TimeUnit)] = &[
    (r"last\s+(\d+)\s*h(?:ours?)?", TimeUnit::Hours),
    (r"last\s+(\d+)\s*d(?:ays?)?", TimeUnit::Days),
    (r"last\s+(\d+)\s*w(?:eeks?)?", TimeUnit::Weeks),
    (r"(\d+)\s*h(?:ours?)?", TimeUnit::Hours),
    (r"(\d+)\s*d(?:ays?)?", TimeUnit::Days),
    (r"(\d+)\s*w(?:eeks?)?", TimeUnit::Weeks),
];

/// 可识别的产品名目录。新增产品只需在此追加短语。
const PRODUCT_PHRASES: &[&str] = &[
    "harmony sase",
    "harmony connect",
    "harmony endpoint",
    "harmony mobile",
    "harmony email",
    "harmony browse",
    "quantum smart-1 cloud",
    "quantum spark",
];

/// “查全部事件”类短语：命中则跳过严重级别与 IP 提取。
const ALL_EVENTS_PHRASES: &[&str] =
    &["all events", "all security events", "all the events", "all logs"];

/// 严重级别关键字与过滤子句取值的映射，按优先级排列。
const SEVERITY_LEVELS: &[(&str, &str)] = &[
    ("critical", "Critical"),
    ("high", "High"),
    ("medium", "Medium"),
    ("low", "Low"),
];

static TIMEFRAME_RES: LazyLock<Vec<(Regex, TimeUnit)>> = LazyLock::new(|| {
    TIMEFRAME_PATTERNS
        .iter()
        .map(|(pat, unit)| (Regex::new(pat).expect("static timeframe pattern"), *unit))
        .collect()
});

static PRODUCT_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    PRODUCT_PHRASES
        .iter()
        .map(|phrase| {
            let pattern = phrase
                .split(' ')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"\s+");
            Regex::new(&pattern).expect("static product pattern")
        })
        .collect()
});

static SRC_IP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:src|source)\s*[:\s]*([0-9.]+)").expect("static src pattern"));
static DST_IP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:dst|dest|destination)\s*[:\s]*([0-9.]+)").expect("static dst pattern")
});

/// Outcome of translating one free-text query + timeframe pair.
#[derive(Debug, Clone)]
pub struct Translation {
    pub product: String,
    pub filter: FilterExpression,
    pub window: TimeWindow,
}

/// Translate free text into a structured filter and an absolute time window,
/// anchored at the current instant.
pub fn translate(query: &str, timeframe_text: &str) -> Translation {
    translate_at(Utc::now(), query, timeframe_text)
}

/// Deterministic variant with an injected clock; `translate` delegates here.
pub fn translate_at(now: DateTime<Utc>, query: &str, timeframe_text: &str) -> Translation {
    let window = parse_timeframe_at(now, timeframe_text);
    let (product, filter) = parse_query(query);
    Translation {
        product,
        filter,
        window,
    }
}

/// 将自然语言时间描述解析为绝对时间窗口；`end_time` 恒为 `now`。
pub fn parse_timeframe_at(now: DateTime<Utc>, timeframe_text: &str) -> TimeWindow {
    let lower = timeframe_text.to_lowercase();
    for (re, unit) in TIMEFRAME_RES.iter() {
        let Some(caps) = re.captures(&lower) else {
            continue;
        };
        // 数值解析或减法溢出都不视为错误，继续尝试下一个模式。
        let Some(value) = caps.get(1).and_then(|m| m.as_str().parse::<i64>().ok()) else {
            continue;
        };
        let Some(delta) = unit.duration(value) else {
            continue;
        };
        let Some(start_time) = now.checked_sub_signed(delta) else {
            continue;
        };
        return TimeWindow {
            start_time,
            end_time: now,
        };
    }

    TimeWindow {
        start_time: now - Duration::hours(DEFAULT_LOOKBACK_HOURS),
        end_time: now,
    }
}

/// Extract the product name and build the filter expression from one
/// free-text query. Clauses are ANDed in the fixed order
/// {product, severity, src, dst}.
pub fn parse_query(query: &str) -> (String, FilterExpression) {
    let lower = query.to_lowercase();
    let normalized = lower.split_whitespace().collect::<Vec<_>>().join(" ");

    let product = PRODUCT_RES.iter().find_map(|re| {
        re.find(&lower)
            .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
    });

    let mut parts: Vec<String> = Vec::new();
    if let Some(name) = &product {
        parts.push(format!("ci_app_name:\"{name}\""));
    }

    // “全部事件”短路：只保留产品子句。
    let wants_everything = ALL_EVENTS_PHRASES
        .iter()
        .any(|phrase| normalized.contains(phrase));
    if wants_everything {
        let filter = if parts.is_empty() {
            FilterExpression::match_all()
        } else {
            FilterExpression::new(parts.join(" AND "))
        };
        return (product.unwrap_or_else(|| UNKNOWN_PRODUCT.to_string()), filter);
    }

    if let Some(clause) = severity_clause(&lower) {
        parts.push(clause);
    }
    if let Some(ip) = SRC_IP_RE.captures(&lower).and_then(|c| c.get(1)) {
        parts.push(format!("src:\"{}\"", ip.as_str()));
    }
    if let Some(ip) = DST_IP_RE.captures(&lower).and_then(|c| c.get(1)) {
        parts.push(format!("dst:\"{}\"", ip.as_str()));
    }

    let filter = if parts.is_empty() {
        FilterExpression::match_all()
    } else {
        FilterExpression::new(parts.join(" AND "))
    };
    (product.unwrap_or_else(|| UNKNOWN_PRODUCT.to_string()), filter)
}

/// 严重级别互斥：critical+high 组合优先，其余按目录顺序取第一个命中。
fn severity_clause(lower: &str) -> Option<String> {
    if lower.contains("critical") && lower.contains("high") {
        return Some("(severity:\"Critical\" OR severity:\"High\")".to_string());
    }
    SEVERITY_LEVELS
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, value)| format!("severity:\"{value}\""))
}
