//! The tool-calling driver: repeatedly calls [`LLMClient::complete`] while
//! the response carries tool calls, executing each through an injected
//! dispatcher and feeding the result back as a `role: tool` message until
//! the model answers in plain text.

use super::{ChatMessage, LLMClient, Role, ToolChoice, ToolDef};
use crate::error::{EngineError, Result};
use futures::future::BoxFuture;
use std::time::Duration;

/// A tool dispatcher: given a tool name and its parsed arguments, executes
/// the tool and returns the string to feed back as the `role: tool` message
/// content. Injected rather than hard-coded so the loop can be driven
/// against a fake in tests.
pub type ToolDispatcher<'a> =
    dyn Fn(&str, serde_json::Value) -> BoxFuture<'a, Result<String>> + Send + Sync + 'a;

/// Safety valve against a model that never stops calling tools.
const MAX_ROUNDS: usize = 8;

/// Drive one tool-calling conversation to completion.
///
/// `messages` is mutated in place so the caller retains the full transcript
/// (including the final assistant answer) after the loop returns. Returns
/// the final assistant [`ChatMessage`] (guaranteed to carry no tool calls).
pub async fn run(
    llm: &dyn LLMClient,
    messages: &mut Vec<ChatMessage>,
    tools: &[ToolDef],
    temperature: f32,
    timeout: Duration,
    dispatch: &ToolDispatcher<'_>,
) -> Result<ChatMessage> {
    let mut tool_choice = ToolChoice::Required;

    for round in 0..MAX_ROUNDS {
        debug_assert!(
            last_two_are_not_both_assistant(messages),
            "tool loop must never submit two assistant messages without an intervening user/tool message",
        );

        let response = llm
            .complete(messages, Some(tools), Some(tool_choice), temperature, timeout)
            .await?;

        if !response.has_tool_calls() {
            messages.push(response.clone());
            return Ok(response);
        }

        messages.push(response.clone());

        for call in &response.tool_calls {
            // Re-serialize from the parsed `serde_json::Value`, never the
            // original JSON string the SDK handed back.
            let result = dispatch(&call.name, call.arguments.clone()).await;
            let content = match result {
                Ok(text) => text,
                Err(e) => format!("tool execution failed: {e}"),
            };
            messages.push(ChatMessage::tool_result(call.id.clone(), content));
        }

        // Only the very first completion forces a tool call; subsequent
        // rounds let the model decide whether it has enough to answer.
        tool_choice = ToolChoice::Auto;

        if round == MAX_ROUNDS - 1 {
            return Err(EngineError::FatalExternal(
                "tool-calling loop exceeded maximum rounds without a final answer".to_string(),
            ));
        }
    }

    unreachable!("loop always returns or errors within MAX_ROUNDS");
}

fn last_two_are_not_both_assistant(messages: &[ChatMessage]) -> bool {
    let len = messages.len();
    if len < 2 {
        return true;
    }
    !(messages[len - 1].role == Role::Assistant && messages[len - 2].role == Role::Assistant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolCall;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedClient {
        responses: Mutex<Vec<ChatMessage>>,
    }

    #[async_trait]
    impl LLMClient for ScriptedClient {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _tools: Option<&[ToolDef]>,
            _tool_choice: Option<ToolChoice>,
            _temperature: f32,
            _timeout: Duration,
        ) -> Result<ChatMessage> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                panic!("scripted client ran out of responses");
            }
            Ok(responses.remove(0))
        }
    }

    fn tool_def() -> ToolDef {
        ToolDef {
            name: "search_knowledge_base".to_string(),
            description: "search".to_string(),
            parameters: serde_json::json!({"type": "object"}),
        }
    }

    #[tokio::test]
    async fn stops_as_soon_as_response_has_no_tool_calls() {
        let client = ScriptedClient {
            responses: Mutex::new(vec![ChatMessage::assistant("final answer")]),
        };
        let mut messages = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];
        let dispatch: Box<ToolDispatcher> =
            Box::new(|_name, _args| Box::pin(async { Ok("unused".to_string()) }));

        let result = run(
            &client,
            &mut messages,
            &[tool_def()],
            0.0,
            Duration::from_secs(5),
            &*dispatch,
        )
        .await
        .unwrap();

        assert_eq!(result.content.as_deref(), Some("final answer"));
        assert_eq!(messages.len(), 3);
    }

    /// The dispatcher must see a parsed `serde_json::Value`, and the
    /// tool-result message content must round-trip through serialization
    /// without ever touching the model's original JSON string
    /// representation.
    #[tokio::test]
    async fn tool_call_arguments_round_trip_through_parsed_value_not_raw_string() {
        let mut first = ChatMessage::assistant("");
        first.tool_calls.push(ToolCall {
            id: "call_1".to_string(),
            name: "search_knowledge_base".to_string(),
            arguments: serde_json::json!({"query": "renewable energy", "limit": 5}),
        });

        let client = ScriptedClient {
            responses: Mutex::new(vec![first, ChatMessage::assistant("done")]),
        };
        let mut messages = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];

        let observed_args = std::sync::Arc::new(Mutex::new(None));
        let observed_for_closure = observed_args.clone();
        let dispatch: Box<ToolDispatcher> = Box::new(move |name, args| {
            assert_eq!(name, "search_knowledge_base");
            *observed_for_closure.lock().unwrap() = Some(args.clone());
            Box::pin(async move { Ok(serde_json::to_string(&args).unwrap()) })
        });

        run(
            &client,
            &mut messages,
            &[tool_def()],
            0.0,
            Duration::from_secs(5),
            &*dispatch,
        )
        .await
        .unwrap();

        let seen = observed_args.lock().unwrap().clone().unwrap();
        assert_eq!(seen["query"], "renewable energy");
        assert_eq!(seen["limit"], 5);

        let tool_message = messages
            .iter()
            .find(|m| m.role == Role::Tool)
            .expect("tool-result message must be present");
        let round_tripped: serde_json::Value =
            serde_json::from_str(tool_message.content.as_deref().unwrap()).unwrap();
        assert_eq!(round_tripped, seen);
        assert_eq!(tool_message.tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn first_completion_requires_tool_choice_and_later_ones_do_not() {
        let calls = AtomicUsize::new(0);
        let mut first = ChatMessage::assistant("");
        first.tool_calls.push(ToolCall {
            id: "call_1".to_string(),
            name: "search_knowledge_base".to_string(),
            arguments: serde_json::json!({"query": "x"}),
        });

        struct TrackingClient {
            calls: AtomicUsize,
            responses: Mutex<Vec<ChatMessage>>,
        }

        #[async_trait]
        impl LLMClient for TrackingClient {
            async fn complete(
                &self,
                _messages: &[ChatMessage],
                _tools: Option<&[ToolDef]>,
                tool_choice: Option<ToolChoice>,
                _temperature: f32,
                _timeout: Duration,
            ) -> Result<ChatMessage> {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    assert_eq!(tool_choice, Some(ToolChoice::Required));
                } else {
                    assert_eq!(tool_choice, Some(ToolChoice::Auto));
                }
                Ok(self.responses.lock().unwrap().remove(0))
            }
        }

        let client = TrackingClient {
            calls: AtomicUsize::new(0),
            responses: Mutex::new(vec![first, ChatMessage::assistant("done")]),
        };
        let _ = calls;
        let mut messages = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];
        let dispatch: Box<ToolDispatcher> =
            Box::new(|_name, _args| Box::pin(async { Ok("result".to_string()) }));

        run(
            &client,
            &mut messages,
            &[tool_def()],
            0.0,
            Duration::from_secs(5),
            &*dispatch,
        )
        .await
        .unwrap();
    }
}
