use crate::mcp::{McpClient, McpError, McpToolDef, ToolResult};
use async_trait::async_trait;

/// The remote operations an agent may invoke.
#[async_trait]
pub trait Toolset: Send + Sync {
    fn definitions(&self) -> &[McpToolDef];

    async fn call(&self, name: &str, args: serde_json::Value) -> Result<ToolResult, McpError>;
}

/// Tools served by one user's MCP server.
#[derive(Debug)]
pub struct McpToolset {
    client: McpClient,
    tools: Vec<McpToolDef>,
}

impl McpToolset {
    /// Connect to `server_url` and index its tools.
    pub async fn bind(server_url: &str, token: &str) -> Result<Self, McpError> {
        let client = McpClient::connect(server_url, token).await?;
        let tools = client.list_tools().await?;
        tracing::debug!(server_url, tools = tools.len(), "Bound MCP tools");
        Ok(Self { client, tools })
    }
}

#[async_trait]
impl Toolset for McpToolset {
    fn definitions(&self) -> &[McpToolDef] {
        &self.tools
    }

    async fn call(&self, name: &str, args: serde_json::Value) -> Result<ToolResult, McpError> {
        self.client.call_tool(name, args).await
    }
}
