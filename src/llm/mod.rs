//! A single OpenAI-chat-completion-compatible `complete()` call, plus the
//! tool-calling driver in [`tool_loop`]. One interface shape, not a
//! provider zoo.

pub mod openai;
pub mod tool_loop;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A message role, matching the strict ordering alphabet
/// `system → (user | assistant-with-tool-calls | tool-result)*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One tool call emitted by the model inside an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Arguments as a parsed JSON value — never re-exposed as the opaque
    /// wrapper some SDKs use internally.
    pub arguments: serde_json::Value,
}

/// A single message in the chat transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set only on `role: Tool` messages, echoing the call it answers.
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: Some(content.into()), tool_calls: Vec::new(), tool_call_id: None }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: Some(content.into()), tool_calls: Vec::new(), tool_call_id: None }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: Some(content.into()), tool_calls: Vec::new(), tool_call_id: None }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// An OpenAI-compatible tool definition, serialized to the documented JSON
/// schema: `{type: "function", function: {name, description, parameters}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Whether the model must call a tool on this completion. The first
/// tool-calling completion in a conversation sets `tool_choice = required`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    Required,
    None,
}

/// The LLM contract: completion only — the tool-calling *loop* lives in
/// [`tool_loop`] and is built on top of this trait, not part of it, so the
/// driver can be tested against a mock implementation.
#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDef]>,
        tool_choice: Option<ToolChoice>,
        temperature: f32,
        timeout: Duration,
    ) -> Result<ChatMessage>;
}
