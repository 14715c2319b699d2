use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::Credentials;
use crate::error::{EventSearchError, Result};
use crate::model::{ApiEnvelope, FilterExpression, RecordBatch, TaskState, TaskStatus, TimeWindow};

const AUTH_PATH: &str = "/auth/external";
const LOGS_QUERY_PATH: &str = "/app/laas-logs-api/api/logs_query";
const RETRIEVE_PATH: &str = "/app/laas-logs-api/api/logs_query/retrieve";

/// 单次查询的记录上限与分页大小，与远程 API 的兼容取值保持一致。
pub const SEARCH_LIMIT: u32 = 10_000;
pub const PAGE_LIMIT: u32 = 100;

/// Typed client for the four Infinity Events endpoints. Holds one shared
/// `reqwest::Client` carrying the fixed per-call timeout.
#[derive(Debug, Clone)]
pub struct LogsApiClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthBody<'a> {
    client_id: &'a str,
    access_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct AuthData {
    token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBody<'a> {
    filter: &'a str,
    limit: u32,
    page_limit: u32,
    timeframe: &'a TimeWindow,
    #[serde(skip_serializing_if = "Option::is_none")]
    accounts: Option<&'a [String]>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitData {
    task_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusData {
    state: String,
    #[serde(default)]
    page_tokens: Vec<String>,
    #[serde(default)]
    errors: Vec<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveBody<'a> {
    task_id: &'a str,
    page_token: &'a str,
}

impl LogsApiClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `POST /auth/external`，换取短期 bearer token。
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<String> {
        let body = AuthBody {
            client_id: &credentials.client_id,
            access_key: &credentials.access_key,
        };
        let response = self.http.post(self.url(AUTH_PATH)).json(&body).send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(EventSearchError::AuthFailed { status, body: text });
        }

        let envelope: ApiEnvelope<AuthData> = parse_envelope(&text)?;
        match envelope.data {
            Some(data) if envelope.success => Ok(data.token),
            _ => Err(EventSearchError::AuthFailed {
                status,
                body: "authentication rejected".to_string(),
            }),
        }
    }

    /// `POST /app/laas-logs-api/api/logs_query`，提交查询并返回任务 ID。
    pub async fn submit_query(
        &self,
        token: &str,
        filter: &FilterExpression,
        timeframe: &TimeWindow,
        accounts: Option<&[String]>,
    ) -> Result<String> {
        let body = SubmitBody {
            filter: filter.as_str(),
            limit: SEARCH_LIMIT,
            page_limit: PAGE_LIMIT,
            timeframe,
            accounts,
        };
        let response = self
            .http
            .post(self.url(LOGS_QUERY_PATH))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let status = response.status().as_u16();
        if status == 429 {
            return Err(EventSearchError::RateLimited { call: "submit" });
        }
        let text = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(EventSearchError::SearchRequestFailed(format!(
                "HTTP {status}: {text}"
            )));
        }

        let envelope: ApiEnvelope<SubmitData> = parse_envelope(&text)?;
        match envelope.data {
            Some(data) if envelope.success => Ok(data.task_id),
            _ => Err(EventSearchError::SearchRequestFailed(
                "search request rejected".to_string(),
            )),
        }
    }

    /// `GET /app/laas-logs-api/api/logs_query/{taskId}`，读取任务状态。
    pub async fn task_status(&self, token: &str, task_id: &str) -> Result<TaskStatus> {
        let url = format!("{}/{}", self.url(LOGS_QUERY_PATH), task_id);
        let response = self.http.get(url).bearer_auth(token).send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(EventSearchError::StatusCheckFailed(format!(
                "HTTP {status}: {text}"
            )));
        }

        let envelope: ApiEnvelope<StatusData> = parse_envelope(&text)?;
        match envelope.data {
            Some(data) if envelope.success => Ok(TaskStatus {
                state: TaskState::from(data.state),
                page_tokens: data.page_tokens,
                errors: data.errors,
            }),
            _ => Err(EventSearchError::StatusCheckFailed(
                "status check rejected".to_string(),
            )),
        }
    }

    /// `POST /app/laas-logs-api/api/logs_query/retrieve`，拉取一页记录。
    pub async fn retrieve_page(
        &self,
        token: &str,
        task_id: &str,
        page_token: &str,
    ) -> Result<RecordBatch> {
        let body = RetrieveBody {
            task_id,
            page_token,
        };
        let response = self
            .http
            .post(self.url(RETRIEVE_PATH))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let status = response.status().as_u16();
        if status == 429 {
            return Err(EventSearchError::RateLimited { call: "retrieve" });
        }
        let text = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(EventSearchError::RetrievalFailed(format!(
                "HTTP {status}: {text}"
            )));
        }

        let envelope: ApiEnvelope<RecordBatch> = parse_envelope(&text)?;
        match envelope.data {
            Some(batch) if envelope.success => Ok(batch),
            _ => Err(EventSearchError::RetrievalFailed(
                "log retrieval rejected".to_string(),
            )),
        }
    }
}

fn parse_envelope<T: DeserializeOwned>(body: &str) -> Result<ApiEnvelope<T>> {
    serde_json::from_str(body).map_err(|e| EventSearchError::MalformedResponse(e.to_string()))
}
