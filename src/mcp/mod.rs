//! MCP server (Streamable HTTP)
//!
//! JSON-RPC 2.0 over plain HTTP POST at `/mcp`: stateless, no SSE, no
//! session ids. GET returns 405. `MCP-Protocol-Version` is validated when
//! present; a missing header assumes the 2025-03-26 revision. `Origin` is
//! checked against the configured allowlist. The surface exposes tools and
//! resources only — content is always extracted text, never URLs.

pub mod resources;
pub mod tools;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::api::SharedState;
use crate::{Error, Result};

/// Protocol revision assumed when the client sends no version header.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-03-26";
/// Protocol revisions this server accepts.
const SUPPORTED_PROTOCOL_VERSIONS: [&str; 3] = ["2024-11-05", "2025-03-26", "2025-06-18"];

/// Marker appended when returned content was cut at a `max_chars` bound.
pub const TRUNCATION_MARKER: &str = "\n…[truncated]";
/// Default bound for resource reads and tool content.
pub const DEFAULT_MAX_CHARS: usize = 50_000;

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

pub fn mcp_router(state: SharedState) -> Router {
    Router::new()
        .route("/mcp", post(handle_post).get(handle_get))
        .with_state(state)
}

/// The Streamable HTTP transport is POST-only here; there is no SSE stream
/// to subscribe to.
async fn handle_get() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({
            "error": "method_not_allowed",
            "message": "MCP endpoint accepts POST only",
        })),
    )
        .into_response()
}

async fn handle_post(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if let Err(err) = validate_headers(&state, &headers) {
        let status = if matches!(err, Error::OriginNotAllowed(_)) {
            StatusCode::FORBIDDEN
        } else {
            StatusCode::BAD_REQUEST
        };
        return (
            status,
            Json(json!({"error": err.code(), "message": err.to_string()})),
        )
            .into_response();
    }

    let request: JsonRpcRequest = match serde_json::from_str(&body) {
        Ok(req) => req,
        Err(e) => {
            return rpc_error_response(
                Value::Null,
                -32700,
                format!("parse error: {e}"),
                None,
            )
        }
    };
    if request.jsonrpc != "2.0" {
        return rpc_error_response(
            request.id.unwrap_or(Value::Null),
            -32600,
            "jsonrpc must be \"2.0\"".to_string(),
            None,
        );
    }

    // Notifications get no response body.
    let Some(id) = request.id.clone() else {
        return StatusCode::ACCEPTED.into_response();
    };

    match dispatch(&state, &request).await {
        Ok(result) => Json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result,
        }))
        .into_response(),
        Err(RpcFailure { code, message, data }) => rpc_error_response(id, code, message, data),
    }
}

fn validate_headers(state: &SharedState, headers: &HeaderMap) -> Result<()> {
    if let Some(origin) = headers.get("origin").and_then(|v| v.to_str().ok()) {
        let allowed = state.allowed_origins.is_empty()
            || state.allowed_origins.iter().any(|o| o == origin);
        if !allowed {
            return Err(Error::OriginNotAllowed(origin.to_string()));
        }
    }
    if let Some(version) = headers
        .get("mcp-protocol-version")
        .and_then(|v| v.to_str().ok())
    {
        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&version) {
            return Err(Error::InvalidProtocolVersion(version.to_string()));
        }
    }
    Ok(())
}

/// A JSON-RPC level failure (method/params problems) or a tool-level error
/// promoted to one (resource reads).
pub struct RpcFailure {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl RpcFailure {
    pub fn method_not_found(method: &str) -> Self {
        RpcFailure {
            code: -32601,
            message: format!("method not found: {method}"),
            data: None,
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        RpcFailure {
            code: -32602,
            message: message.into(),
            data: None,
        }
    }

    pub fn internal(err: &Error) -> Self {
        RpcFailure {
            code: -32603,
            message: err.to_string(),
            data: Some(json!({"error": err.code()})),
        }
    }
}

fn rpc_error_response(id: Value, code: i64, message: String, data: Option<Value>) -> Response {
    Json(json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": JsonRpcError { code, message, data },
    }))
    .into_response()
}

async fn dispatch(state: &SharedState, request: &JsonRpcRequest) -> std::result::Result<Value, RpcFailure> {
    match request.method.as_str() {
        "initialize" => Ok(json!({
            "protocolVersion": DEFAULT_PROTOCOL_VERSION,
            "capabilities": {
                "tools": {},
                "resources": {},
            },
            "serverInfo": {
                "name": "paperdb",
                "version": env!("CARGO_PKG_VERSION"),
            },
        })),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({ "tools": tools::tool_descriptors() })),
        "tools/call" => tools::call_tool(state, &request.params).await,
        "resources/list" => Ok(json!({ "resources": [] })),
        "resources/templates/list" => Ok(json!({
            "resourceTemplates": resources::resource_templates(),
        })),
        "resources/read" => resources::read_resource(state, &request.params).await,
        other => Err(RpcFailure::method_not_found(other)),
    }
}

/// Char-boundary-safe truncation with a visible marker.
pub fn truncate_with_marker(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncation_marker() {
        assert_eq!(truncate_with_marker("short", 100), "short");
        let cut = truncate_with_marker(&"x".repeat(200), 100);
        assert!(cut.starts_with(&"x".repeat(100)));
        assert!(cut.ends_with(TRUNCATION_MARKER));
        assert_eq!(cut.chars().count(), 100 + TRUNCATION_MARKER.chars().count());
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let text = "深度学习模型";
        let cut = truncate_with_marker(text, 3);
        assert!(cut.starts_with("深度学"));
        assert!(cut.ends_with(TRUNCATION_MARKER));
    }
}
