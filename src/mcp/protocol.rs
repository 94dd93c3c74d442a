//! Newline-framed JSON-RPC 2.0 types for the tool channel.
//!
//! One JSON object per line in both directions. Responses always echo the
//! request `id`; the server never emits notifications.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::ToolError;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const TOOL_FAILURE: i64 = -32000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(Value::from(id)),
            method: method.to_string(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn parse_error(detail: impl std::fmt::Display) -> Self {
        Self {
            code: PARSE_ERROR,
            message: format!("parse error: {detail}"),
            data: None,
        }
    }

    pub fn method_not_found(name: &str) -> Self {
        Self {
            code: METHOD_NOT_FOUND,
            message: format!("method not found: {name}"),
            data: None,
        }
    }

    pub fn unknown_tool(name: &str) -> Self {
        Self {
            code: METHOD_NOT_FOUND,
            message: format!("unknown tool: {name}"),
            data: None,
        }
    }

    pub fn invalid_params(detail: impl std::fmt::Display) -> Self {
        Self {
            code: INVALID_PARAMS,
            message: format!("invalid params: {detail}"),
            data: None,
        }
    }

    pub fn tool_failure(err: &ToolError) -> Self {
        Self {
            code: TOOL_FAILURE,
            message: err.detail.clone(),
            data: serde_json::to_value(err).ok(),
        }
    }

    /// Recovers the structured tool error from the `data` payload, falling
    /// back to a kind inferred from the code.
    pub fn to_tool_error(&self) -> ToolError {
        if let Some(data) = &self.data {
            if let Ok(err) = serde_json::from_value::<ToolError>(data.clone()) {
                return err;
            }
        }
        match self.code {
            METHOD_NOT_FOUND | INVALID_PARAMS => ToolError::bad_input(self.message.clone()),
            _ => ToolError::internal(self.message.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}
