use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 远程 API 的时间戳格式：秒级精度，固定 `Z` 后缀。
pub mod wire_time {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&dt.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let naive = NaiveDateTime::parse_from_str(&s, FORMAT).map_err(serde::de::Error::custom)?;
        Ok(DateTime::from_naive_utc_and_offset(naive, Utc))
    }
}

/// 发送给远程搜索 API 的查询语言字符串。`"*"` 表示匹配全部。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterExpression(String);

impl FilterExpression {
    pub fn new(expr: impl Into<String>) -> Self {
        Self(expr.into())
    }

    /// 匹配全部事件的通配过滤器。
    pub fn match_all() -> Self {
        Self("*".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 查询的绝对时间窗口。不变式：`start_time <= end_time`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindow {
    #[serde(with = "wire_time")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "wire_time")]
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskState {
    Pending,
    Processing,
    Ready,
    Completed,
    Failed,
    /// Unrecognized remote state string; treated as a protocol error by the
    /// poll loop.
    Other(String),
}

impl From<String> for TaskState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Pending" => TaskState::Pending,
            "Processing" => TaskState::Processing,
            "Ready" => TaskState::Ready,
            "Completed" => TaskState::Completed,
            "Failed" => TaskState::Failed,
            _ => TaskState::Other(s),
        }
    }
}

impl From<TaskState> for String {
    fn from(state: TaskState) -> Self {
        match state {
            TaskState::Pending => "Pending".to_string(),
            TaskState::Processing => "Processing".to_string(),
            TaskState::Ready => "Ready".to_string(),
            TaskState::Completed => "Completed".to_string(),
            TaskState::Failed => "Failed".to_string(),
            TaskState::Other(s) => s,
        }
    }
}

/// Status snapshot of one server-side search task.
#[derive(Debug, Clone)]
pub struct TaskStatus {
    pub state: TaskState,
    pub page_tokens: Vec<String>,
    pub errors: Vec<Value>,
}

/// One retrieved page of records. Aggregation is append-only and keeps the
/// encounter order across pages.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordBatch {
    #[serde(default)]
    pub records: Vec<Value>,
    #[serde(default)]
    pub records_count: u64,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// 返回给调用方的最终聚合结果，构造后不再修改。
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub records: Vec<Value>,
    /// Sum of the batches' reported `recordsCount` values, which the remote
    /// API owns; may differ from `records.len()`.
    pub total_records: u64,
    pub filter_used: FilterExpression,
    pub timeframe_used: TimeWindow,
}

/// Parameters accepted by the `search_infinity_events` tool and the HTTP
/// search endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParams {
    pub query: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default)]
    pub accounts: Option<Vec<String>>,
    #[serde(default)]
    pub save_locally: bool,
}

fn default_timeframe() -> String {
    "last 24 hours".to_string()
}

/// `{success, data}` envelope wrapping every remote API response.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: serde::de::DeserializeOwned"))]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<T>,
}
