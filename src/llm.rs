//! Chat model seam.
//!
//! The orchestrator talks to a [`ChatModel`]; [`OpenAiChatModel`] speaks the
//! OpenAI-compatible `/chat/completions` protocol, which also covers Ollama,
//! vLLM and most hosted gateways via `llm.base_url`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::LlmConfig;
use crate::error::{TetherError, TetherResult};
use crate::http::{build_client, post_json_with_retry};
use crate::models::Role;

pub const RETRIEVE_TOOL: &str = "retrieve";

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Set on assistant messages that requested tools.
    pub tool_calls: Vec<ToolCall>,
    /// Set on tool-result messages.
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn assistant_tool_request(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }

    pub fn is_tool_request(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }
}

/// A function the model may call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// The single tool exposed during the decide step.
pub fn retrieve_tool() -> ToolSpec {
    ToolSpec {
        name: RETRIEVE_TOOL.to_string(),
        description: "Retrieve information related to a query.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" }
            },
            "required": ["query"]
        }),
    }
}

/// What the model produced for one completion.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    Text(String),
    ToolRequest { content: String, calls: Vec<ToolCall> },
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// One completion. An empty `tools` slice means no tools are bound.
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec])
        -> TetherResult<ModelReply>;
}

pub struct OpenAiChatModel {
    client: reqwest::Client,
    config: LlmConfig,
    api_key: Option<String>,
}

impl OpenAiChatModel {
    /// The API key is read from the environment variable named by
    /// `llm.api_key_env`. Without it requests go out unauthenticated.
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!(env = %config.api_key_env, "no API key set for the chat model");
        }
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            config: config.clone(),
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn build_request_body(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "messages": messages.iter().map(message_to_openai).collect::<Vec<_>>(),
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(tool_to_openai).collect());
        }
        body
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> TetherResult<ModelReply> {
        let body = self.build_request_body(messages, tools);
        let json = post_json_with_retry(
            &self.client,
            &self.endpoint(),
            self.api_key.as_deref(),
            &body,
            self.config.max_retries,
            "Chat API",
        )
        .await
        .map_err(|e| TetherError::generation(e.to_string()))?;

        parse_completion(json)
    }
}

fn message_to_openai(message: &ChatMessage) -> Value {
    let mut msg = json!({
        "role": message.role.api_role(),
        "content": message.content,
    });

    if !message.tool_calls.is_empty() {
        msg["tool_calls"] = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": call.arguments.to_string(),
                    }
                })
            })
            .collect();
    }
    if let Some(id) = &message.tool_call_id {
        msg["tool_call_id"] = json!(id);
    }
    msg
}

fn tool_to_openai(tool: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    arguments: String,
}

/// Turn a `/chat/completions` response body into a [`ModelReply`].
pub fn parse_completion(json: Value) -> TetherResult<ModelReply> {
    let response: CompletionResponse = serde_json::from_value(json)
        .map_err(|e| TetherError::generation(format!("invalid completion response: {}", e)))?;

    let message = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .ok_or_else(|| TetherError::generation("completion response has no message"))?;

    let content = message.content.unwrap_or_default();
    let raw_calls = message.tool_calls.unwrap_or_default();
    if raw_calls.is_empty() {
        return Ok(ModelReply::Text(content));
    }

    let calls = raw_calls
        .into_iter()
        .map(|tc| {
            let arguments = if tc.function.arguments.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(&tc.function.arguments).map_err(|e| {
                    TetherError::generation(format!(
                        "unparsable arguments for tool '{}': {}",
                        tc.function.name, e
                    ))
                })?
            };
            Ok(ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments,
            })
        })
        .collect::<TetherResult<Vec<_>>>()?;

    Ok(ModelReply::ToolRequest { content, calls })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_reply() {
        let json = json!({
            "choices": [{"message": {"role": "assistant", "content": "Hi there"}}]
        });
        assert_eq!(
            parse_completion(json).unwrap(),
            ModelReply::Text("Hi there".into())
        );
    }

    #[test]
    fn test_parse_tool_request() {
        let json = json!({
            "choices": [{"message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "retrieve", "arguments": "{\"query\":\"pomodoro\"}"}
                }]
            }}]
        });
        match parse_completion(json).unwrap() {
            ModelReply::ToolRequest { content, calls } => {
                assert_eq!(content, "");
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].id, "call_1");
                assert_eq!(calls[0].name, "retrieve");
                assert_eq!(calls[0].arguments["query"], "pomodoro");
            }
            other => panic!("expected tool request, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_bad_arguments_is_generation_error() {
        let json = json!({
            "choices": [{"message": {
                "tool_calls": [{"id": "c", "function": {"name": "retrieve", "arguments": "{oops"}}]
            }}]
        });
        let err = parse_completion(json).unwrap_err();
        assert_eq!(err.code(), "generation");
    }

    #[test]
    fn test_parse_no_choices() {
        let err = parse_completion(json!({"choices": []})).unwrap_err();
        assert_eq!(err.code(), "generation");
    }

    #[test]
    fn test_tool_request_message_format() {
        let call = ToolCall {
            id: "call_9".into(),
            name: "retrieve".into(),
            arguments: json!({"query": "focus"}),
        };
        let msg = message_to_openai(&ChatMessage::assistant_tool_request("", vec![call]));
        assert_eq!(msg["role"], "assistant");
        assert_eq!(msg["tool_calls"][0]["type"], "function");
        assert_eq!(
            msg["tool_calls"][0]["function"]["arguments"],
            "{\"query\":\"focus\"}"
        );

        let result = message_to_openai(&ChatMessage::tool_result("call_9", "Source: {}"));
        assert_eq!(result["role"], "tool");
        assert_eq!(result["tool_call_id"], "call_9");
    }

    #[test]
    fn test_retrieve_tool_format() {
        let tool = tool_to_openai(&retrieve_tool());
        assert_eq!(tool["type"], "function");
        assert_eq!(tool["function"]["name"], "retrieve");
        assert_eq!(tool["function"]["parameters"]["required"][0], "query");
    }
}
