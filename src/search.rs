use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::api::LogsApiClient;
use crate::auth::AuthSession;
use crate::error::{EventSearchError, Result};
use crate::model::{FilterExpression, QueryResult, TaskState, TaskStatus, TimeWindow};

/// Poll-loop design parameters. Fixed interval, no backoff; both values are
/// injectable so tests run without wall-clock sleeps.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_poll_attempts: 30,
        }
    }
}

/// Drives one query through submit → poll → drain. Each `run` owns its
/// server-side task; the only shared mutable state is the auth token cache.
pub struct SearchOrchestrator {
    api: Arc<LogsApiClient>,
    auth: Arc<AuthSession>,
    config: OrchestratorConfig,
}

impl SearchOrchestrator {
    pub fn new(api: Arc<LogsApiClient>, auth: Arc<AuthSession>) -> Self {
        Self::with_config(api, auth, OrchestratorConfig::default())
    }

    pub fn with_config(
        api: Arc<LogsApiClient>,
        auth: Arc<AuthSession>,
        config: OrchestratorConfig,
    ) -> Self {
        Self { api, auth, config }
    }

    /// Submit the query, wait for the task to finish, then drain every page
    /// into one aggregated result.
    pub async fn run(
        &self,
        filter: &FilterExpression,
        window: &TimeWindow,
        accounts: Option<&[String]>,
    ) -> Result<QueryResult> {
        let token = self.auth.ensure_token().await?;
        let task_id = self
            .api
            .submit_query(&token, filter, window, accounts)
            .await?;
        info!(task_id = %task_id, filter = %filter, "search task submitted");

        let status = self.poll_until_ready(&task_id).await?;
        let (records, total_records) = self.drain_pages(&task_id, &status.page_tokens).await?;
        info!(task_id = %task_id, total_records, "search task drained");

        Ok(QueryResult {
            records,
            total_records,
            filter_used: filter.clone(),
            timeframe_used: window.clone(),
        })
    }

    /// 轮询状态机：Pending/Processing 固定间隔重试，Ready/Completed 结束，
    /// Failed 与未识别状态立即中止，超过次数上限报超时。
    async fn poll_until_ready(&self, task_id: &str) -> Result<TaskStatus> {
        for _ in 0..self.config.max_poll_attempts {
            let token = self.auth.ensure_token().await?;
            let status = self.api.task_status(&token, task_id).await?;
            match status.state {
                TaskState::Ready | TaskState::Completed => return Ok(status),
                TaskState::Failed => {
                    return Err(EventSearchError::TaskFailed {
                        errors: status.errors,
                    })
                }
                TaskState::Pending | TaskState::Processing => {
                    sleep(self.config.poll_interval).await;
                }
                TaskState::Other(state) => return Err(EventSearchError::UnknownTaskState(state)),
            }
        }
        Err(EventSearchError::Timeout {
            attempts: self.config.max_poll_attempts,
        })
    }

    /// Retrieve every shard in the order the API returned its top-level page
    /// tokens, following each shard's chained `nextPageToken`s. A top-level
    /// retrieval failure aborts the run; a chained-page failure truncates that
    /// shard and keeps what was already accumulated.
    async fn drain_pages(
        &self,
        task_id: &str,
        page_tokens: &[String],
    ) -> Result<(Vec<Value>, u64)> {
        let mut records: Vec<Value> = Vec::new();
        let mut total_records: u64 = 0;

        for page_token in page_tokens {
            let token = self.auth.ensure_token().await?;
            let batch = self.api.retrieve_page(&token, task_id, page_token).await?;
            total_records += batch.records_count;
            records.extend(batch.records);

            let mut next = batch.next_page_token;
            while let Some(chained_token) = next {
                let token = self.auth.ensure_token().await?;
                match self.api.retrieve_page(&token, task_id, &chained_token).await {
                    Ok(batch) => {
                        total_records += batch.records_count;
                        records.extend(batch.records);
                        next = batch.next_page_token;
                    }
                    Err(e) => {
                        warn!(task_id = %task_id, error = %e, "chained page retrieval failed, truncating shard");
                        break;
                    }
                }
            }
        }

        Ok((records, total_records))
    }
}
