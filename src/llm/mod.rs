//! Chat completions client used by the agent.

mod types;

pub use types::*;

use crate::http::{HttpClient, HttpError};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("Model returned no choices")]
    EmptyResponse,
}

/// Anything that can answer a chat completions request.
#[async_trait]
pub trait LlmApi: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatMessage, LlmError>;
}

/// OpenAI-compatible `/chat/completions` client.
#[derive(Debug)]
pub struct ChatClient {
    http: HttpClient,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: HttpClient::new(base_url, api_key),
        }
    }
}

#[async_trait]
impl LlmApi for ChatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatMessage, LlmError> {
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Chat completion request"
        );
        let response: ChatResponse = self.http.post_json("/chat/completions", request).await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or(LlmError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Reply, TestServer};
    use serde_json::json;

    #[tokio::test]
    async fn test_complete_returns_first_choice() {
        let server = TestServer::start(|req| {
            assert_eq!(req.url, "/v1/chat/completions");
            assert_eq!(req.header("authorization"), Some("Bearer sk-test"));
            Reply::json(&json!({
                "choices": [{ "message": { "role": "assistant", "content": "hello" } }]
            }))
        });
        let client = ChatClient::new(server.url("/v1"), "sk-test");
        let request = ChatRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![ChatMessage::user("hi")],
            tools: vec![],
        };

        let message = client.complete(&request).await.unwrap();
        assert_eq!(message.content.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_complete_without_choices() {
        let server = TestServer::start(|_| Reply::json(&json!({ "choices": [] })));
        let client = ChatClient::new(server.base_url.clone(), "sk-test");
        let request = ChatRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![ChatMessage::user("hi")],
            tools: vec![],
        };

        assert!(matches!(
            client.complete(&request).await,
            Err(LlmError::EmptyResponse)
        ));
    }
}
