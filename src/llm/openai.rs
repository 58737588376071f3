//! `OpenAiCompatClient` — the one concrete [`LLMClient`](super::LLMClient)
//! implementation: `async_openai`-backed, bound to a configurable
//! `base_url` so any OpenAI-chat-completion-compatible endpoint works.

use super::{ChatMessage, LLMClient, Role, ToolCall, ToolChoice, ToolDef};
use crate::error::{EngineError, Result};
use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionMessageToolCalls, ChatCompletionRequestAssistantMessageArgs,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionTool, ChatCompletionToolChoiceOption, ChatCompletionTools,
        CreateChatCompletionRequestArgs, FunctionObject,
    },
    Client,
};
use async_trait::async_trait;

/// An OpenAI-chat-completion-compatible client pointed at a configurable
/// base URL (a self-hosted LLM service, an OpenRouter-style gateway, etc.).
pub struct OpenAiCompatClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiCompatClient {
    pub fn new(base_url: &str, api_key: Option<&str>, model: impl Into<String>) -> Self {
        let mut config = OpenAIConfig::new().with_api_base(base_url);
        if let Some(key) = api_key {
            config = config.with_api_key(key);
        }
        Self {
            client: Client::with_config(config),
            model: model.into(),
        }
    }

    fn convert_tool(tool: &ToolDef) -> ChatCompletionTools {
        ChatCompletionTools::Function(ChatCompletionTool {
            function: FunctionObject {
                name: tool.name.clone(),
                description: Some(tool.description.clone()),
                parameters: Some(tool.parameters.clone()),
                strict: None,
            },
        })
    }

    fn convert_message(msg: &ChatMessage) -> Result<ChatCompletionRequestMessage> {
        let content = msg.content.clone().unwrap_or_default();
        let built = match msg.role {
            Role::System => ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(content)
                    .build()
                    .map_err(|e| EngineError::DataValidation(e.to_string()))?,
            ),
            Role::User => ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(content)
                    .build()
                    .map_err(|e| EngineError::DataValidation(e.to_string()))?,
            ),
            Role::Assistant => ChatCompletionRequestMessage::Assistant(
                ChatCompletionRequestAssistantMessageArgs::default()
                    .content(content)
                    .build()
                    .map_err(|e| EngineError::DataValidation(e.to_string()))?,
            ),
            Role::Tool => {
                let tool_call_id = msg.tool_call_id.clone().ok_or_else(|| {
                    EngineError::DataValidation(
                        "tool-result message is missing tool_call_id".to_string(),
                    )
                })?;
                ChatCompletionRequestMessage::Tool(
                    ChatCompletionRequestToolMessageArgs::default()
                        .tool_call_id(tool_call_id)
                        .content(content)
                        .build()
                        .map_err(|e| EngineError::DataValidation(e.to_string()))?,
                )
            }
        };
        Ok(built)
    }

    /// Extract tool calls, parsing each call's JSON-string arguments into a
    /// plain `serde_json::Value` map up front — this is the only point the
    /// opaque SDK wrapper is touched; everything downstream works with the
    /// parsed value.
    fn extract_tool_calls(tool_calls: &[ChatCompletionMessageToolCalls]) -> Vec<ToolCall> {
        tool_calls
            .iter()
            .filter_map(|wrapper| match wrapper {
                ChatCompletionMessageToolCalls::Function(call) => Some(ToolCall {
                    id: call.id.clone(),
                    name: call.function.name.clone(),
                    arguments: serde_json::from_str(&call.function.arguments)
                        .unwrap_or(serde_json::json!({})),
                }),
                ChatCompletionMessageToolCalls::Custom(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl LLMClient for OpenAiCompatClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDef]>,
        tool_choice: Option<ToolChoice>,
        temperature: f32,
        timeout: std::time::Duration,
    ) -> Result<ChatMessage> {
        let chat_messages: Vec<ChatCompletionRequestMessage> = messages
            .iter()
            .map(Self::convert_message)
            .collect::<Result<_>>()?;

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(&self.model);
        builder.messages(chat_messages);
        builder.temperature(temperature);

        if let Some(tools) = tools {
            let openai_tools: Vec<ChatCompletionTools> =
                tools.iter().map(Self::convert_tool).collect();
            builder.tools(openai_tools);
        }

        if let Some(choice) = tool_choice {
            let option = match choice {
                ToolChoice::Auto => ChatCompletionToolChoiceOption::Auto,
                ToolChoice::None => ChatCompletionToolChoiceOption::None,
                ToolChoice::Required => ChatCompletionToolChoiceOption::Required,
            };
            builder.tool_choice(option);
        }

        let request = builder
            .build()
            .map_err(|e| EngineError::DataValidation(format!("failed to build request: {e}")))?;

        let response = tokio::time::timeout(timeout, self.client.chat().create(request))
            .await
            .map_err(|_| EngineError::RagTimeout(timeout))?
            .map_err(|e| EngineError::TransientExternal(e.to_string()))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::FatalExternal("empty completion choices".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .as_deref()
            .map(Self::extract_tool_calls)
            .unwrap_or_default();

        Ok(ChatMessage {
            role: Role::Assistant,
            content: choice.message.content,
            tool_calls,
            tool_call_id: None,
        })
    }
}
