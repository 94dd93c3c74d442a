//! Stdio serve loop for the tool server.
//!
//! Reads newline-framed JSON-RPC requests from stdin, serves them
//! concurrently, and writes each response as exactly one line under a
//! writer lock (responses may complete out of request order; clients
//! correlate by id). Stdin EOF starts shutdown: in-flight requests get a
//! bounded grace period, then the process exits.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::mcp::protocol::{RpcError, RpcRequest, RpcResponse};
use crate::mcp::service::{ToolCallError, ToolService};
use crate::mcp::tools::{self, ToolId};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub async fn serve(service: Arc<ToolService>, server_name: &str) -> anyhow::Result<()> {
    tracing::info!(server_name, "tool server ready");

    let stdin = BufReader::new(tokio::io::stdin());
    let writer = Arc::new(Mutex::new(tokio::io::stdout()));
    let mut lines = stdin.lines();
    let mut tasks: JoinSet<()> = JoinSet::new();
    let mut serving = false;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if !serving {
            tracing::info!("first request received, serving");
            serving = true;
        }

        let service = Arc::clone(&service);
        let writer = Arc::clone(&writer);
        tasks.spawn(async move {
            if let Some(response) = handle_line(&service, &line).await {
                write_response(&writer, &response).await;
            }
        });
    }

    tracing::info!(
        in_flight = tasks.len(),
        "stdin closed, shutting down with {}s grace",
        SHUTDOWN_GRACE.as_secs()
    );
    let drain = async {
        while tasks.join_next().await.is_some() {}
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        tracing::warn!("grace period elapsed, abandoning in-flight requests");
        tasks.abort_all();
    }

    tracing::info!("tool server exited");
    Ok(())
}

/// Returns `None` for client notifications (no `id`): the server never
/// writes a frame that the client cannot correlate.
async fn handle_line(service: &ToolService, line: &str) -> Option<RpcResponse> {
    let request: RpcRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(err) => {
            return Some(RpcResponse::failure(Value::Null, RpcError::parse_error(err)));
        }
    };
    let id = match request.id.clone() {
        Some(id) => id,
        None => {
            tracing::info!(method = %request.method, "ignoring notification");
            return None;
        }
    };

    let response = match request.method.as_str() {
        "tools/list" => RpcResponse::success(id, tools::catalogue()),
        "tools/call" => {
            let name = match request.params.get("name").and_then(Value::as_str) {
                Some(name) => name,
                None => {
                    return Some(RpcResponse::failure(
                        id,
                        RpcError::invalid_params("name: required field is missing"),
                    ));
                }
            };
            let tool = match ToolId::from_name(name) {
                Some(tool) => tool,
                None => return Some(RpcResponse::failure(id, RpcError::unknown_tool(name))),
            };
            let arguments = request
                .params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default()));

            tracing::info!(tool = tool.name(), "calling tool");
            match service.handle(tool, &arguments).await {
                Ok(result) => RpcResponse::success(id, result),
                Err(ToolCallError::InvalidParams(detail)) => {
                    RpcResponse::failure(id, RpcError::invalid_params(detail))
                }
                Err(ToolCallError::Failed(err)) => {
                    tracing::warn!(tool = tool.name(), "tool failed: {err}");
                    RpcResponse::failure(id, RpcError::tool_failure(&err))
                }
            }
        }
        other => RpcResponse::failure(id, RpcError::method_not_found(other)),
    };
    Some(response)
}

/// Serializes and writes one response line. `serde_json::to_string` never
/// emits raw newlines, so the frame is always a single line.
async fn write_response(writer: &Mutex<tokio::io::Stdout>, response: &RpcResponse) {
    let mut line = match serde_json::to_string(response) {
        Ok(line) => line,
        Err(err) => {
            tracing::error!("failed to serialize response: {err}");
            return;
        }
    };
    line.push('\n');

    let mut out = writer.lock().await;
    if let Err(err) = out.write_all(line.as_bytes()).await {
        tracing::error!("failed to write response: {err}");
        return;
    }
    if let Err(err) = out.flush().await {
        tracing::error!("failed to flush stdout: {err}");
    }
}
