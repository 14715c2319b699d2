use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use crate::api::LogsApiClient;
use crate::auth::AuthSession;
use crate::config::Config;
use crate::error::Result;
use crate::model::SearchParams;
use crate::report::ReportMeta;
use crate::search::SearchOrchestrator;
use crate::store::ResultStore;
use crate::translate::translate;

pub const SERVER_NAME: &str = "infinity-events-mcp";
pub const PROTOCOL_VERSION: &str = "2024-11-05";
const TOOL_SEARCH: &str = "search_infinity_events";
const SAMPLE_RECORDS: usize = 5;

/// Everything a tool call needs: the orchestrator plus the artifact store.
/// Shared between the stdio loop and the HTTP surface.
pub struct ToolContext {
    orchestrator: SearchOrchestrator,
    store: ResultStore,
}

impl ToolContext {
    pub fn new(orchestrator: SearchOrchestrator, store: ResultStore) -> Self {
        Self {
            orchestrator,
            store,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api.request_timeout_secs))
            .build()?;
        let api = Arc::new(LogsApiClient::new(http, config.api.base_url.clone()));
        let auth = Arc::new(AuthSession::new(api.clone(), config.credentials()));
        let orchestrator = SearchOrchestrator::new(api, auth);
        let store = ResultStore::new(&config.api.output_dir);
        Ok(Self::new(orchestrator, store))
    }

    /// 完整的工具流程：翻译 → 提交/轮询/翻页 → 报表元数据 → 可选落盘。
    pub async fn run_search(&self, params: SearchParams) -> Result<Value> {
        let translation = translate(&params.query, &params.timeframe);
        info!(product = %translation.product, filter = %translation.filter, "translated query");

        let result = self
            .orchestrator
            .run(
                &translation.filter,
                &translation.window,
                params.accounts.as_deref(),
            )
            .await?;
        let report = ReportMeta::from_result(&result);
        let query_info = json!({
            "original_query": params.query,
            "timeframe": params.timeframe,
            "product": translation.product,
            "filter": result.filter_used.clone(),
            "timeframe_used": result.timeframe_used.clone(),
        });

        if params.save_locally {
            let path = self.store.save(
                &params.query,
                &params.timeframe,
                &translation.product,
                &result,
            )?;
            return Ok(json!({
                "message": format!(
                    "Retrieved {} records and saved to {}",
                    result.total_records,
                    path.display()
                ),
                "filename": path.display().to_string(),
                "total_records": result.total_records,
                "sample_records": result.records.iter().take(SAMPLE_RECORDS).collect::<Vec<_>>(),
                "report": report,
                "query_info": query_info,
            }));
        }

        Ok(json!({
            "message": format!("Retrieved {} records", result.total_records),
            "total_records": result.total_records,
            "records": result.records,
            "report": report,
            "query_info": query_info,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i32,
    message: String,
}

/// Line-delimited JSON-RPC 2.0 loop over stdio. Malformed lines answer with a
/// parse error and keep the loop alive.
pub async fn run_stdio(ctx: Arc<ToolContext>) -> Result<()> {
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = reader.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(resp) = handle_line(&ctx, &line).await {
            write_response(&mut stdout, resp).await?;
        }
    }

    Ok(())
}

/// Parse and dispatch one input line; `None` means nothing to write back.
async fn handle_line(ctx: &Arc<ToolContext>, line: &str) -> Option<RpcResponse> {
    let req: RpcRequest = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            return Some(RpcResponse {
                jsonrpc: "2.0",
                id: Value::Null,
                result: None,
                error: Some(RpcError {
                    code: -32700,
                    message: format!("parse error: {e}"),
                }),
            })
        }
    };
    process_request(ctx, req).await
}

/// Dispatch one request; `None` means notification, nothing to write back.
async fn process_request(ctx: &Arc<ToolContext>, req: RpcRequest) -> Option<RpcResponse> {
    if req.id.is_null() && req.method.starts_with("notifications/") {
        return None;
    }

    let resp = match req.method.as_str() {
        "initialize" => handle_initialize(&req),
        "tools/list" => handle_list_tools(&req),
        "tools/call" => handle_tool_call(ctx, &req).await,
        _ => rpc_error(&req, -32601, format!("method not found: {}", req.method)),
    };
    Some(resp)
}

fn handle_initialize(req: &RpcRequest) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0",
        id: req.id.clone(),
        result: Some(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            }
        })),
        error: None,
    }
}

fn handle_list_tools(req: &RpcRequest) -> RpcResponse {
    let tools = vec![json!({
        "name": TOOL_SEARCH,
        "description": "Search Check Point Infinity Events logs with natural language queries.",
        "inputSchema": {
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Natural language query (e.g. 'critical security events on Harmony SASE')"
                },
                "timeframe": {
                    "type": "string",
                    "description": "Time period (e.g. 'last 24 hours', '7 days', '1 week')"
                },
                "accounts": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Optional account IDs to filter"
                },
                "save_locally": {
                    "type": "boolean",
                    "description": "Save the full result to a local JSON artifact (default: false)"
                }
            }
        }
    })];

    RpcResponse {
        jsonrpc: "2.0",
        id: req.id.clone(),
        result: Some(json!({ "tools": tools })),
        error: None,
    }
}

async fn handle_tool_call(ctx: &Arc<ToolContext>, req: &RpcRequest) -> RpcResponse {
    let name = req
        .params
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if name != TOOL_SEARCH {
        return rpc_error(req, -32601, format!("unknown tool: {name}"));
    }

    let arguments = req
        .params
        .get("arguments")
        .cloned()
        .unwrap_or(Value::Null);
    let params: SearchParams = match serde_json::from_value(arguments) {
        Ok(p) => p,
        Err(e) => return rpc_error(req, -32602, format!("invalid params: {e}")),
    };

    match ctx.run_search(params).await {
        Ok(result) => RpcResponse {
            jsonrpc: "2.0",
            id: req.id.clone(),
            result: Some(json!({
                "content": [
                    {
                        "type": "text",
                        "text": serde_json::to_string_pretty(&result)
                            .unwrap_or_else(|_| "{}".to_string())
                    }
                ]
            })),
            error: None,
        },
        Err(e) => rpc_error(req, -32002, e.to_string()),
    }
}

async fn write_response(stdout: &mut tokio::io::Stdout, resp: RpcResponse) -> Result<()> {
    let line = serde_json::to_string(&resp).unwrap_or_else(|_| "{}".to_string());
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}

fn rpc_error(req: &RpcRequest, code: i32, message: String) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0",
        id: req.id.clone(),
        result: None,
        error: Some(RpcError { code, message }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ctx() -> Arc<ToolContext> {
        Arc::new(ToolContext::from_config(&Config::default()).unwrap())
    }

    fn request(method: &str, params: Value) -> RpcRequest {
        RpcRequest {
            id: json!(1),
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn initialize_reports_protocol_and_server_info() {
        let resp = process_request(&test_ctx(), request("initialize", Value::Null))
            .await
            .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], SERVER_NAME);
    }

    #[tokio::test]
    async fn initialized_notification_produces_no_response() {
        let req = RpcRequest {
            id: Value::Null,
            method: "notifications/initialized".to_string(),
            params: Value::Null,
        };
        assert!(process_request(&test_ctx(), req).await.is_none());
    }

    #[tokio::test]
    async fn tools_list_declares_the_search_tool() {
        let resp = process_request(&test_ctx(), request("tools/list", Value::Null))
            .await
            .unwrap();
        let result = resp.result.unwrap();
        let tools = result["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], TOOL_SEARCH);
        assert_eq!(tools[0]["inputSchema"]["required"][0], "query");
    }

    #[tokio::test]
    async fn malformed_line_answers_parse_error_and_keeps_going() {
        let ctx = test_ctx();
        let resp = handle_line(&ctx, "{not json").await.unwrap();
        let error = resp.error.unwrap();
        assert_eq!(error.code, -32700);
        assert!(resp.id.is_null());

        // The next well-formed line is still served.
        let resp = handle_line(&ctx, r#"{"id": 2, "method": "tools/list"}"#)
            .await
            .unwrap();
        assert!(resp.error.is_none());
        assert_eq!(resp.id, json!(2));
    }

    #[tokio::test]
    async fn unknown_method_maps_to_32601() {
        let resp = process_request(&test_ctx(), request("no/such/method", Value::Null))
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn unknown_tool_maps_to_32601() {
        let resp = process_request(
            &test_ctx(),
            request("tools/call", json!({"name": "other_tool", "arguments": {}})),
        )
        .await
        .unwrap();
        assert_eq!(resp.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn missing_query_argument_maps_to_32602() {
        let resp = process_request(
            &test_ctx(),
            request("tools/call", json!({"name": TOOL_SEARCH, "arguments": {}})),
        )
        .await
        .unwrap();
        assert_eq!(resp.error.unwrap().code, -32602);
    }
}
