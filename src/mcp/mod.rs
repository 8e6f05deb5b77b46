//! MCP client for hosted servers over the streamable HTTP transport.
//!
//! Each JSON-RPC message is POSTed to the server URL. Replies arrive either as
//! a plain JSON body or as a short `text/event-stream` carrying the response.

use crate::http::{HttpError, SseParser, create_http_client};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

const PROTOCOL_VERSION: &str = "2025-03-26";
const SESSION_HEADER: &str = "mcp-session-id";

#[derive(Debug, Error)]
pub enum McpError {
    #[error("Connection error: {0}")]
    Connection(#[from] HttpError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server error {code}: {message}")]
    Rpc { code: i64, message: String },
}

impl From<reqwest::Error> for McpError {
    fn from(e: reqwest::Error) -> Self {
        Self::Connection(HttpError::Transport(e))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default = "empty_schema")]
    pub input_schema: Value,
}

fn empty_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

/// Flattened result of a `tools/call`.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

pub struct McpClient {
    client: reqwest::Client,
    url: String,
    token: String,
    session_id: Option<String>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("url", &self.url)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl McpClient {
    /// Connect and run the `initialize` handshake.
    pub async fn connect(url: impl Into<String>, token: impl Into<String>) -> Result<Self, McpError> {
        let mut client = Self {
            client: create_http_client(),
            url: url.into(),
            token: token.into(),
            session_id: None,
            next_id: AtomicU64::new(1),
        };

        let (result, session_id) = client
            .exchange(
                "initialize",
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION")
                    }
                })),
            )
            .await?;
        client.session_id = session_id;
        tracing::debug!(
            url = %client.url,
            server = %result["serverInfo"]["name"],
            "MCP session initialized"
        );

        client.notify("notifications/initialized").await?;
        Ok(client)
    }

    pub async fn list_tools(&self) -> Result<Vec<McpToolDef>, McpError> {
        let response = self.request("tools/list", None).await?;
        serde_json::from_value(response["tools"].clone())
            .map_err(|e| McpError::Protocol(format!("Bad tools/list reply: {e}")))
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult, McpError> {
        let response = self
            .request(
                "tools/call",
                Some(json!({
                    "name": name,
                    "arguments": arguments
                })),
            )
            .await?;

        let is_error = response
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        // Content is usually an array of { type: "text", text: "..." } items.
        let content = &response["content"];
        let text = if let Some(arr) = content.as_array() {
            arr.iter()
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        } else {
            content.to_string()
        };

        Ok(ToolResult {
            content: text,
            is_error,
        })
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        Ok(self.exchange(method, params).await?.0)
    }

    async fn exchange(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(Value, Option<String>), McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut message = json!({ "jsonrpc": "2.0", "id": id, "method": method });
        if let Some(params) = params {
            message["params"] = params;
        }

        let response = self.post(&message).await?;
        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let body = response.text().await?;

        let reply = if is_stream {
            find_stream_reply(&body, id)?
        } else {
            serde_json::from_str(&body)
                .map_err(|e| McpError::Protocol(format!("Bad JSON reply: {e}")))?
        };

        Ok((into_result(reply)?, session_id))
    }

    async fn notify(&self, method: &str) -> Result<(), McpError> {
        let message = json!({ "jsonrpc": "2.0", "method": method });
        self.post(&message).await?;
        Ok(())
    }

    async fn post(&self, message: &Value) -> Result<reqwest::Response, McpError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(ACCEPT, "application/json, text/event-stream")
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .json(message);
        if let Some(session_id) = &self.session_id
            && let Ok(value) = HeaderValue::from_str(session_id)
        {
            request = request.header(SESSION_HEADER, value);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HttpError::Status { status, body }.into());
        }
        Ok(response)
    }
}

/// Pick the JSON-RPC response with the given id out of an event stream.
fn find_stream_reply(body: &str, id: u64) -> Result<Value, McpError> {
    let mut parser = SseParser::new();
    let mut events = parser.feed(body);
    events.extend(parser.finish());

    events
        .into_iter()
        .filter_map(|event| serde_json::from_str::<Value>(&event.data).ok())
        .find(|message| message.get("id").and_then(Value::as_u64) == Some(id))
        .ok_or_else(|| McpError::Protocol(format!("No response for request {id} in stream")))
}

fn into_result(mut reply: Value) -> Result<Value, McpError> {
    if let Some(error) = reply.get("error") {
        return Err(McpError::Rpc {
            code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        });
    }
    Ok(reply
        .get_mut("result")
        .map(Value::take)
        .unwrap_or(Value::Null))
}
