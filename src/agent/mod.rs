//! Tool-bearing Gmail agent.
//!
//! An agent is built per request and bound to exactly one user's MCP server;
//! nothing here is cached across users.

pub mod instructions;
mod tools;

pub use tools::{McpToolset, Toolset};

use crate::config::AgentConfig;
use crate::llm::{ChatMessage, ChatRequest, ChatTool, LlmApi, LlmError};
use crate::mcp::McpError;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("MCP error: {0}")]
    Mcp(#[from] McpError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Failed to render instructions: {0}")]
    Instructions(#[from] minijinja::Error),

    #[error("No final answer after {0} turns")]
    TurnLimit(usize),
}

/// An agent scoped to one user's tools.
#[async_trait]
pub trait ScopedAgent: Send + Sync {
    async fn respond(&self, prompt: &str) -> Result<String, AgentError>;
}

/// Builds a [`ScopedAgent`] for a server URL.
#[async_trait]
pub trait AgentFactory: Send + Sync {
    async fn bind(&self, server_url: &str) -> Result<Box<dyn ScopedAgent>, AgentError>;
}

pub struct GmailAgent {
    llm: Arc<dyn LlmApi>,
    tools: Box<dyn Toolset>,
    model: String,
    instructions: String,
    max_turns: usize,
}

impl GmailAgent {
    pub fn new(
        llm: Arc<dyn LlmApi>,
        tools: Box<dyn Toolset>,
        config: &AgentConfig,
    ) -> Result<Self, AgentError> {
        let instructions = instructions::render(tools.definitions())?;
        Ok(Self {
            llm,
            tools,
            model: config.model.clone(),
            instructions,
            max_turns: config.max_turns.max(1),
        })
    }

    fn chat_tools(&self) -> Vec<ChatTool> {
        self.tools
            .definitions()
            .iter()
            .map(|t| ChatTool::function(&t.name, &t.description, t.input_schema.clone()))
            .collect()
    }

    /// Run one tool call, folding failures into text the model can read.
    async fn run_tool(&self, name: &str, arguments: &str) -> String {
        let args = if arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            match serde_json::from_str(arguments) {
                Ok(args) => args,
                Err(e) => {
                    warn!("Malformed tool arguments for {name}: {e}");
                    return format!("Error: invalid JSON arguments: {e}");
                }
            }
        };

        match self.tools.call(name, args).await {
            Ok(result) if result.is_error => format!("Error: {}", result.content),
            Ok(result) => result.content,
            Err(e) => {
                warn!("Tool {name} failed: {e}");
                format!("Error: {e}")
            }
        }
    }
}

#[async_trait]
impl ScopedAgent for GmailAgent {
    async fn respond(&self, prompt: &str) -> Result<String, AgentError> {
        let mut request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(&self.instructions),
                ChatMessage::user(prompt),
            ],
            tools: self.chat_tools(),
        };

        for turn in 1..=self.max_turns {
            let reply = self.llm.complete(&request).await?;
            if reply.tool_calls.is_empty() {
                return Ok(reply.content.unwrap_or_default());
            }

            let calls = reply.tool_calls.clone();
            request.messages.push(reply);
            for call in calls {
                debug!(turn, tool = %call.function.name, "Calling tool");
                let output = self
                    .run_tool(&call.function.name, &call.function.arguments)
                    .await;
                request
                    .messages
                    .push(ChatMessage::tool_result(call.id, output));
            }
        }

        Err(AgentError::TurnLimit(self.max_turns))
    }
}

/// Builds [`GmailAgent`]s against the user's hosted MCP server.
pub struct GmailAgentFactory {
    llm: Arc<dyn LlmApi>,
    config: AgentConfig,
    /// Bearer token the MCP servers expect.
    mcp_token: String,
}

impl GmailAgentFactory {
    pub fn new(llm: Arc<dyn LlmApi>, config: AgentConfig, mcp_token: impl Into<String>) -> Self {
        Self {
            llm,
            config,
            mcp_token: mcp_token.into(),
        }
    }
}

#[async_trait]
impl AgentFactory for GmailAgentFactory {
    async fn bind(&self, server_url: &str) -> Result<Box<dyn ScopedAgent>, AgentError> {
        let tools = McpToolset::bind(server_url, &self.mcp_token).await?;
        let agent = GmailAgent::new(Arc::clone(&self.llm), Box::new(tools), &self.config)?;
        Ok(Box::new(agent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{FunctionCall, Role, ToolCall};
    use crate::mcp::{McpToolDef, ToolResult};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned replies and records every request.
    struct ScriptedLlm {
        replies: Mutex<VecDeque<ChatMessage>>,
        seen: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<ChatMessage>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmApi for ScriptedLlm {
        async fn complete(&self, request: &ChatRequest) -> Result<ChatMessage, LlmError> {
            self.seen.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(LlmError::EmptyResponse)
        }
    }

    struct FakeTools {
        defs: Vec<McpToolDef>,
        calls: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl FakeTools {
        fn new() -> Self {
            Self {
                defs: vec![McpToolDef {
                    name: "gmail_search_emails".into(),
                    description: "Search mail".into(),
                    input_schema: serde_json::json!({ "type": "object" }),
                }],
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Toolset for Arc<FakeTools> {
        fn definitions(&self) -> &[McpToolDef] {
            &self.defs
        }

        async fn call(&self, name: &str, args: serde_json::Value) -> Result<ToolResult, McpError> {
            self.calls.lock().unwrap().push((name.to_string(), args));
            Ok(ToolResult {
                content: "2 receipts found".into(),
                is_error: false,
            })
        }
    }

    fn tool_call(id: &str, name: &str, arguments: &str) -> ChatMessage {
        ChatMessage {
            role: Role::Assistant,
            content: None,
            tool_calls: vec![ToolCall {
                id: id.into(),
                call_type: "function".into(),
                function: FunctionCall {
                    name: name.into(),
                    arguments: arguments.into(),
                },
            }],
            tool_call_id: None,
        }
    }

    fn answer(text: &str) -> ChatMessage {
        ChatMessage {
            role: Role::Assistant,
            content: Some(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    #[tokio::test]
    async fn test_tool_loop() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            tool_call("call_1", "gmail_search_emails", r#"{"query":"receipts"}"#),
            answer("You have 2 receipts."),
        ]));
        let tools = Arc::new(FakeTools::new());
        let agent = GmailAgent::new(
            llm.clone(),
            Box::new(Arc::clone(&tools)),
            &AgentConfig::default(),
        )
        .unwrap();

        let response = agent.respond("find my receipts").await.unwrap();
        assert_eq!(response, "You have 2 receipts.");

        let calls = tools.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1["query"], "receipts");

        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].tools.len(), 1);
        let last = seen[1].messages.last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert_eq!(last.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(last.content.as_deref(), Some("2 receipts found"));
    }

    #[tokio::test]
    async fn test_malformed_arguments_reported_to_model() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            tool_call("call_1", "gmail_search_emails", "{not json"),
            answer("Sorry."),
        ]));
        let tools = Arc::new(FakeTools::new());
        let agent =
            GmailAgent::new(llm.clone(), Box::new(Arc::clone(&tools)), &AgentConfig::default())
                .unwrap();

        agent.respond("find my receipts").await.unwrap();

        assert!(tools.calls.lock().unwrap().is_empty());
        let seen = llm.seen.lock().unwrap();
        let tool_msg = seen[1].messages.last().unwrap();
        assert!(tool_msg.content.as_deref().unwrap().starts_with("Error:"));
    }

    #[tokio::test]
    async fn test_turn_limit() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            tool_call("call_1", "gmail_search_emails", "{}"),
            tool_call("call_2", "gmail_search_emails", "{}"),
        ]));
        let config = AgentConfig {
            max_turns: 2,
            ..AgentConfig::default()
        };
        let agent =
            GmailAgent::new(llm, Box::new(Arc::new(FakeTools::new())), &config).unwrap();

        let err = agent.respond("loop forever").await.unwrap_err();
        assert!(matches!(err, AgentError::TurnLimit(2)));
    }
}
