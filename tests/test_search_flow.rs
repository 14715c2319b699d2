use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use infinity_events_mcp::api::LogsApiClient;
use infinity_events_mcp::auth::{AuthSession, Credentials};
use infinity_events_mcp::error::EventSearchError;
use infinity_events_mcp::mcp::ToolContext;
use infinity_events_mcp::model::{FilterExpression, SearchParams, TimeWindow};
use infinity_events_mcp::search::{OrchestratorConfig, SearchOrchestrator};
use infinity_events_mcp::store::ResultStore;

#[derive(Clone)]
enum PageOutcome {
    Batch(Value),
    Fail,
}

#[derive(Clone)]
struct Scenario {
    auth_status: u16,
    submit_status: u16,
    /// One entry per status call; the last entry repeats forever.
    states: Vec<&'static str>,
    page_tokens: Vec<&'static str>,
    pages: HashMap<String, PageOutcome>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            auth_status: 200,
            submit_status: 200,
            states: vec!["Ready"],
            page_tokens: Vec::new(),
            pages: HashMap::new(),
        }
    }
}

#[derive(Default)]
struct Counters {
    auth: AtomicUsize,
    submit: AtomicUsize,
    status: AtomicUsize,
    retrieve: AtomicUsize,
}

struct MockApi {
    scenario: Scenario,
    counters: Counters,
    submit_body: Mutex<Option<Value>>,
}

async fn auth_handler(State(api): State<Arc<MockApi>>) -> impl IntoResponse {
    let n = api.counters.auth.fetch_add(1, Ordering::SeqCst) + 1;
    if api.scenario.auth_status != 200 {
        return (
            StatusCode::from_u16(api.scenario.auth_status).unwrap(),
            Json(json!({"success": false})),
        )
            .into_response();
    }
    Json(json!({"success": true, "data": {"token": format!("tok-{n}")}})).into_response()
}

async fn submit_handler(
    State(api): State<Arc<MockApi>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    api.counters.submit.fetch_add(1, Ordering::SeqCst);
    *api.submit_body.lock().unwrap() = Some(body);
    if api.scenario.submit_status == 429 {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"success": false})),
        )
            .into_response();
    }
    Json(json!({"success": true, "data": {"taskId": "task-1"}})).into_response()
}

async fn status_handler(
    State(api): State<Arc<MockApi>>,
    Path(_task_id): Path<String>,
) -> impl IntoResponse {
    let idx = api.counters.status.fetch_add(1, Ordering::SeqCst);
    let states = &api.scenario.states;
    let state = states[idx.min(states.len() - 1)];

    let mut data = json!({"state": state});
    if state == "Ready" || state == "Completed" {
        data["pageTokens"] = json!(api.scenario.page_tokens);
    }
    if state == "Failed" {
        data["errors"] = json!([{"message": "index unavailable"}]);
    }
    Json(json!({"success": true, "data": data}))
}

async fn retrieve_handler(
    State(api): State<Arc<MockApi>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    api.counters.retrieve.fetch_add(1, Ordering::SeqCst);
    let token = body["pageToken"].as_str().unwrap_or_default();
    match api.scenario.pages.get(token) {
        Some(PageOutcome::Batch(data)) => {
            Json(json!({"success": true, "data": data})).into_response()
        }
        Some(PageOutcome::Fail) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"success": false})),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({"success": false}))).into_response(),
    }
}

async fn spawn_mock(scenario: Scenario) -> (String, Arc<MockApi>) {
    let api = Arc::new(MockApi {
        scenario,
        counters: Counters::default(),
        submit_body: Mutex::new(None),
    });
    let router = Router::new()
        .route("/auth/external", post(auth_handler))
        .route("/app/laas-logs-api/api/logs_query", post(submit_handler))
        .route(
            "/app/laas-logs-api/api/logs_query/retrieve",
            post(retrieve_handler),
        )
        .route(
            "/app/laas-logs-api/api/logs_query/:task_id",
            get(status_handler),
        )
        .with_state(api.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{addr}"), api)
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

fn credentials() -> Credentials {
    Credentials {
        client_id: "cid".to_string(),
        access_key: "ak".to_string(),
    }
}

fn fast_config(max_poll_attempts: u32) -> OrchestratorConfig {
    OrchestratorConfig {
        poll_interval: Duration::from_millis(1),
        max_poll_attempts,
    }
}

fn orchestrator(base_url: &str) -> SearchOrchestrator {
    orchestrator_with(base_url, fast_config(30))
}

fn orchestrator_with(base_url: &str, config: OrchestratorConfig) -> SearchOrchestrator {
    let api = Arc::new(LogsApiClient::new(http_client(), base_url));
    let auth = Arc::new(AuthSession::new(api.clone(), Some(credentials())));
    SearchOrchestrator::with_config(api, auth, config)
}

fn last_day() -> TimeWindow {
    let end_time = Utc::now();
    TimeWindow {
        start_time: end_time - chrono::Duration::hours(24),
        end_time,
    }
}

fn batch(ids: &[&str], count: u64, next: Option<&str>) -> Value {
    let records: Vec<Value> = ids.iter().map(|id| json!({"id": id})).collect();
    let mut data = json!({"records": records, "recordsCount": count});
    if let Some(token) = next {
        data["nextPageToken"] = json!(token);
    }
    data
}

fn record_ids(records: &[Value]) -> Vec<&str> {
    records
        .iter()
        .map(|r| r["id"].as_str().unwrap_or_default())
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_flow_drains_shards_and_chained_pages_in_order() {
    let mut scenario = Scenario {
        states: vec!["Processing", "Processing", "Ready"],
        page_tokens: vec!["p1", "p2"],
        ..Scenario::default()
    };
    scenario
        .pages
        .insert("p1".to_string(), PageOutcome::Batch(batch(&["r1", "r2"], 2, Some("p1b"))));
    scenario
        .pages
        .insert("p1b".to_string(), PageOutcome::Batch(batch(&["r3"], 1, None)));
    scenario
        .pages
        .insert("p2".to_string(), PageOutcome::Batch(batch(&["r4"], 1, None)));

    let (base, api) = spawn_mock(scenario).await;
    let result = orchestrator(&base)
        .run(&FilterExpression::match_all(), &last_day(), None)
        .await
        .unwrap();

    assert_eq!(record_ids(&result.records), vec!["r1", "r2", "r3", "r4"]);
    assert_eq!(result.total_records, 4);
    assert_eq!(api.counters.auth.load(Ordering::SeqCst), 1);
    assert_eq!(api.counters.submit.load(Ordering::SeqCst), 1);
    assert_eq!(api.counters.status.load(Ordering::SeqCst), 3);
    assert_eq!(api.counters.retrieve.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn total_records_uses_reported_counts_not_record_len() {
    let mut scenario = Scenario {
        page_tokens: vec!["p1"],
        ..Scenario::default()
    };
    // The remote count is authoritative even when the array disagrees.
    scenario
        .pages
        .insert("p1".to_string(), PageOutcome::Batch(batch(&["r1"], 5, None)));

    let (base, _api) = spawn_mock(scenario).await;
    let result = orchestrator(&base)
        .run(&FilterExpression::match_all(), &last_day(), None)
        .await
        .unwrap();

    assert_eq!(result.records.len(), 1);
    assert_eq!(result.total_records, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rate_limited_submit_surfaces_without_retry() {
    let scenario = Scenario {
        submit_status: 429,
        ..Scenario::default()
    };
    let (base, api) = spawn_mock(scenario).await;
    let err = orchestrator(&base)
        .run(&FilterExpression::match_all(), &last_day(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, EventSearchError::RateLimited { call: "submit" }));
    assert_eq!(api.counters.submit.load(Ordering::SeqCst), 1);
    assert_eq!(api.counters.status.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn task_failure_carries_remote_errors() {
    let scenario = Scenario {
        states: vec!["Failed"],
        ..Scenario::default()
    };
    let (base, _api) = spawn_mock(scenario).await;
    let err = orchestrator(&base)
        .run(&FilterExpression::match_all(), &last_day(), None)
        .await
        .unwrap_err();

    match err {
        EventSearchError::TaskFailed { errors } => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0]["message"], "index unavailable");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_task_state_aborts_immediately() {
    let scenario = Scenario {
        states: vec!["Sharding"],
        ..Scenario::default()
    };
    let (base, api) = spawn_mock(scenario).await;
    let err = orchestrator(&base)
        .run(&FilterExpression::match_all(), &last_day(), None)
        .await
        .unwrap_err();

    match err {
        EventSearchError::UnknownTaskState(state) => assert_eq!(state, "Sharding"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(api.counters.status.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn poll_bound_produces_timeout() {
    let scenario = Scenario {
        states: vec!["Processing"],
        ..Scenario::default()
    };
    let (base, api) = spawn_mock(scenario).await;
    let err = orchestrator_with(&base, fast_config(5))
        .run(&FilterExpression::match_all(), &last_day(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, EventSearchError::Timeout { attempts: 5 }));
    assert_eq!(api.counters.status.load(Ordering::SeqCst), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn top_level_page_failure_aborts_query() {
    let mut scenario = Scenario {
        page_tokens: vec!["p1", "p2"],
        ..Scenario::default()
    };
    scenario.pages.insert("p1".to_string(), PageOutcome::Fail);
    scenario
        .pages
        .insert("p2".to_string(), PageOutcome::Batch(batch(&["r2"], 1, None)));

    let (base, api) = spawn_mock(scenario).await;
    let err = orchestrator(&base)
        .run(&FilterExpression::match_all(), &last_day(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, EventSearchError::RetrievalFailed(_)));
    // The second shard is never touched once the first aborts the run.
    assert_eq!(api.counters.retrieve.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chained_page_failure_truncates_shard_and_continues() {
    let mut scenario = Scenario {
        page_tokens: vec!["p1", "p2"],
        ..Scenario::default()
    };
    scenario
        .pages
        .insert("p1".to_string(), PageOutcome::Batch(batch(&["r1"], 1, Some("p1b"))));
    scenario.pages.insert("p1b".to_string(), PageOutcome::Fail);
    scenario
        .pages
        .insert("p2".to_string(), PageOutcome::Batch(batch(&["r2"], 1, None)));

    let (base, _api) = spawn_mock(scenario).await;
    let result = orchestrator(&base)
        .run(&FilterExpression::match_all(), &last_day(), None)
        .await
        .unwrap();

    assert_eq!(record_ids(&result.records), vec!["r1", "r2"]);
    assert_eq!(result.total_records, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn token_is_cached_across_runs_within_ttl() {
    let (base, api) = spawn_mock(Scenario::default()).await;
    let orchestrator = orchestrator(&base);

    for _ in 0..2 {
        orchestrator
            .run(&FilterExpression::match_all(), &last_day(), None)
            .await
            .unwrap();
    }

    assert_eq!(api.counters.auth.load(Ordering::SeqCst), 1);
    assert_eq!(api.counters.submit.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn expired_token_triggers_exactly_one_fresh_acquisition() {
    let (base, api) = spawn_mock(Scenario::default()).await;
    let client = Arc::new(LogsApiClient::new(http_client(), base.as_str()));
    let session = AuthSession::with_ttl(client, Some(credentials()), Duration::ZERO);

    let first = session.ensure_token().await.unwrap();
    let second = session.ensure_token().await.unwrap();

    assert_eq!(first, "tok-1");
    assert_eq!(second, "tok-2");
    assert_eq!(api.counters.auth.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn auth_rejection_maps_to_auth_failed() {
    let scenario = Scenario {
        auth_status: 401,
        ..Scenario::default()
    };
    let (base, _api) = spawn_mock(scenario).await;
    let err = orchestrator(&base)
        .run(&FilterExpression::match_all(), &last_day(), None)
        .await
        .unwrap_err();

    match err {
        EventSearchError::AuthFailed { status, .. } => assert_eq!(status, 401),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn submit_wire_shape_is_preserved() {
    let (base, api) = spawn_mock(Scenario::default()).await;
    let accounts = vec!["acc-1".to_string()];
    orchestrator(&base)
        .run(
            &FilterExpression::new("severity:\"Critical\""),
            &last_day(),
            Some(&accounts),
        )
        .await
        .unwrap();

    let body = api.submit_body.lock().unwrap().clone().unwrap();
    assert_eq!(body["filter"], "severity:\"Critical\"");
    assert_eq!(body["limit"], 10_000);
    assert_eq!(body["pageLimit"], 100);
    assert_eq!(body["accounts"], json!(["acc-1"]));
    assert!(body["timeframe"]["startTime"]
        .as_str()
        .unwrap()
        .ends_with('Z'));
    assert!(body["timeframe"]["endTime"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tool_search_with_save_locally_writes_artifact() {
    let mut scenario = Scenario {
        page_tokens: vec!["p1"],
        ..Scenario::default()
    };
    scenario.pages.insert(
        "p1".to_string(),
        PageOutcome::Batch(json!({
            "records": [{"severity": "Critical", "src": "1.2.3.4"}],
            "recordsCount": 1
        })),
    );

    let (base, _api) = spawn_mock(scenario).await;
    let dir = tempfile::tempdir().unwrap();
    let ctx = ToolContext::new(orchestrator(&base), ResultStore::new(dir.path()));

    let params = SearchParams {
        query: "critical events on harmony sase".to_string(),
        timeframe: "last 6 hours".to_string(),
        accounts: None,
        save_locally: true,
    };
    let value = ctx.run_search(params).await.unwrap();

    assert_eq!(value["total_records"], 1);
    assert_eq!(value["sample_records"].as_array().unwrap().len(), 1);
    assert_eq!(value["report"]["severity_tally"]["Critical"], 1);
    assert_eq!(value["query_info"]["product"], "harmony sase");
    assert_eq!(
        value["query_info"]["filter"],
        "ci_app_name:\"harmony sase\" AND severity:\"Critical\""
    );

    let saved = std::path::PathBuf::from(value["filename"].as_str().unwrap());
    assert!(saved.exists());
    let written: Value = serde_json::from_slice(&std::fs::read(&saved).unwrap()).unwrap();
    assert_eq!(written["total_records"], 1);
}
