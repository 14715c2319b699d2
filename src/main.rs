use std::env;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use infinity_events_mcp::config::{Config, ServerMode};
use infinity_events_mcp::http::serve_http;
use infinity_events_mcp::mcp::{run_stdio, ToolContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout 专用于 JSON-RPC，日志一律走 stderr。
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let config = match args.get(1) {
        Some(path) => Config::load_from_path(Path::new(path))
            .with_context(|| format!("load config {path}"))?,
        None => Config::default(),
    }
    .with_env_overrides();

    let ctx = Arc::new(ToolContext::from_config(&config).context("build search context")?);

    match config.server.mode {
        ServerMode::Stdio => run_stdio(ctx).await?,
        ServerMode::Http => serve_http(ctx, &config).await?,
        ServerMode::Both => {
            let http_ctx = ctx.clone();
            let http_config = config.clone();
            let http_task =
                tokio::spawn(async move { serve_http(http_ctx, &http_config).await });
            let stdio_task = tokio::spawn(async move { run_stdio(ctx).await });
            http_task.await.expect("http task panicked")?;
            stdio_task.await.expect("stdio task panicked")?;
        }
    }

    Ok(())
}
