//! Stdio protocol loop
//!
//! Reads one JSON-RPC message per line and writes one response per request.
//! Notifications are accepted silently. The loop ends when the input closes.

use anyhow::Result;
use sdk::protocol::{
    codes, methods, Incoming, ListToolsResult, RpcRequest, RpcResponse, PROTOCOL_VERSION,
};
use sdk::types::{ToolError, ToolInput};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::tools::FsTools;

pub const SERVER_NAME: &str = "parley-fs";

/// Serves requests from `reader` until it reaches end of input.
pub async fn serve<R, W>(tools: &FsTools, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match Incoming::from_line(&line) {
            Some(Incoming::Request(request)) => handle(tools, request).await,
            Some(Incoming::Notification(notification)) => {
                debug!("Notification: {}", notification.method);
                continue;
            }
            Some(Incoming::Response(_)) => continue,
            None => {
                warn!("Unparsable message: {}", line);
                RpcResponse::failure(Value::Null, codes::PARSE_ERROR, "Parse error")
            }
        };

        let mut encoded = serde_json::to_string(&response)?;
        encoded.push('\n');
        writer.write_all(encoded.as_bytes()).await?;
        writer.flush().await?;
    }

    info!("Input closed, shutting down");
    Ok(())
}

async fn handle(tools: &FsTools, request: RpcRequest) -> RpcResponse {
    let id = request.id;
    match request.method.as_str() {
        methods::INITIALIZE => RpcResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        ),
        methods::PING => RpcResponse::success(id, json!({})),
        methods::TOOLS_LIST => {
            let result = ListToolsResult {
                tools: tools.descriptors(),
                next_cursor: None,
            };
            match serde_json::to_value(result) {
                Ok(value) => RpcResponse::success(id, value),
                Err(e) => RpcResponse::failure(id, codes::INTERNAL_ERROR, e.to_string()),
            }
        }
        methods::TOOLS_CALL => {
            let params = request.params.unwrap_or(Value::Null);
            let input = match ToolInput::from_params(&params) {
                Ok(input) => input,
                Err(e) => return RpcResponse::failure(id, codes::INVALID_PARAMS, e.to_string()),
            };

            debug!("Calling {}", input.name);
            match tools.call(&input).await {
                Ok(result) => match serde_json::to_value(result) {
                    Ok(value) => RpcResponse::success(id, value),
                    Err(e) => RpcResponse::failure(id, codes::INTERNAL_ERROR, e.to_string()),
                },
                Err(e @ ToolError::UnknownTool(_)) => {
                    RpcResponse::failure(id, codes::METHOD_NOT_FOUND, e.to_string())
                }
                Err(e) => RpcResponse::failure(id, codes::INVALID_PARAMS, e.to_string()),
            }
        }
        other => RpcResponse::failure(
            id,
            codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", other),
        ),
    }
}
