//! Coordinates preprocessing, retrieval, context assembly and the
//! tool-calling loop into the public `answer()` contract.
//!
//! Sources cited while answering a single request are captured in a
//! `tokio::task_local!`, not a module-level `Mutex<Vec<SourceSnapshot>>`: the
//! latter would race between overlapping requests served on the same worker,
//! while a task-local is isolated per async task by construction.

use crate::context::{ContextAssembler, RetrievalSettings, SourceSnapshot};
use crate::db::models::MessageRole;
use crate::db::repository::ConversationRepository;
use crate::embedding::EmbeddingClient;
use crate::error::{EngineError, Result};
use crate::llm::{tool_loop, ChatMessage, LLMClient, ToolChoice, ToolDef};
use crate::preprocessor;
use crate::retrieval::{RetrievalEngine, SearchParams};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::time::Duration;
use uuid::Uuid;

tokio::task_local! {
    static SOURCES: RefCell<Vec<SourceSnapshot>>;
}

/// Per-conversation knobs the orchestrator reads in addition to the global
/// `Config` defaults.
#[derive(Debug, Clone)]
pub struct ConversationSettings {
    pub tool_calling_enabled: bool,
    pub hybrid_search_enabled: bool,
    pub alpha_override: Option<f32>,
    pub retrieval: RetrievalSettings,
    pub retrieval_k: i64,
    pub history_window: i64,
    pub rag_timeout: Duration,
    pub llm_model: String,
    pub llm_timeout: Duration,
}

/// The result handed back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResult {
    pub assistant_message: String,
    pub sources: Vec<SourceSnapshot>,
}

pub struct RagOrchestrator {
    conversations: ConversationRepository,
    preprocessed_embedding: EmbeddingClient,
    retrieval: RetrievalEngine,
    context: ContextAssembler,
    llm: Box<dyn LLMClient>,
}

impl RagOrchestrator {
    pub fn new(
        conversations: ConversationRepository,
        embedding: EmbeddingClient,
        retrieval: RetrievalEngine,
        context: ContextAssembler,
        llm: Box<dyn LLMClient>,
    ) -> Self {
        Self { conversations, preprocessed_embedding: embedding, retrieval, context, llm }
    }

    /// Runs the full answer pipeline (history, reformulation, retrieval,
    /// completion, persistence) inside a wall-clock budget: past the
    /// deadline the request fails with `RagTimeout` and no partial
    /// assistant message is persisted.
    #[tracing::instrument(skip(self, settings), fields(%conversation_id))]
    pub async fn answer(
        &self,
        conversation_id: Uuid,
        user_message: &str,
        user_id: Uuid,
        active_universes: &[Uuid],
        settings: &ConversationSettings,
    ) -> Result<AnswerResult> {
        let _ = user_id;
        let budget = settings.rag_timeout;
        match tokio::time::timeout(budget, self.answer_inner(conversation_id, user_message, active_universes, settings)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::RagTimeout(budget)),
        }
    }

    async fn answer_inner(
        &self,
        conversation_id: Uuid,
        user_message: &str,
        active_universes: &[Uuid],
        settings: &ConversationSettings,
    ) -> Result<AnswerResult> {
        // Step 1: load conversation history.
        let history = self
            .conversations
            .recent_messages(conversation_id, settings.history_window)
            .await?;
        let mut chat_history: Vec<ChatMessage> = history
            .iter()
            .map(|m| match m.role {
                MessageRole::System => ChatMessage::system(m.content.clone()),
                MessageRole::User => ChatMessage::user(m.content.clone()),
                MessageRole::Assistant => ChatMessage::assistant(m.content.clone()),
                MessageRole::Tool => ChatMessage::tool_result("", m.content.clone()),
            })
            .collect();

        // Step 2: reformulation, tool-calling mode only.
        let query_for_retrieval = if settings.tool_calling_enabled {
            if let Some(_strength) = preprocessor::detect_contextual_reference(user_message) {
                if !chat_history.is_empty() {
                    let reformulated = preprocessor::reformulate(self.llm.as_ref(), &chat_history, user_message).await?;
                    tracing::debug!(original = %user_message, reformulated = %reformulated, "query reformulated against history");
                    reformulated
                } else {
                    user_message.to_string()
                }
            } else {
                user_message.to_string()
            }
        } else {
            user_message.to_string()
        };

        // Step 3: construct system prompt / messages.
        let mut messages: Vec<ChatMessage> = Vec::new();
        let search_tool = ToolDef {
            name: "search_knowledge_base".to_string(),
            description: "Recherche dans la base de connaissances des passages pertinents pour répondre à la question.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "La requête de recherche"},
                    "limit": {"type": "integer", "description": "Nombre de passages à retourner", "default": 5}
                },
                "required": ["query"]
            }),
        };

        // Non-tool mode retrieves once, up front; tool mode retrieves
        // lazily, once per tool call, inside the loop below.
        let mut up_front_sources: Vec<SourceSnapshot> = Vec::new();

        if settings.tool_calling_enabled {
            // Prior conversation history is deliberately omitted from the
            // first completion: including it suppresses tool use.
            messages.push(ChatMessage::system(
                "Tu es un assistant qui répond aux questions en utilisant l'outil \
                 search_knowledge_base pour trouver des informations pertinentes \
                 avant de répondre. Cite toujours tes sources.",
            ));
            messages.push(ChatMessage::user(query_for_retrieval.clone()));
        } else {
            let (blocks, sources) = self.retrieve_and_assemble(&query_for_retrieval, active_universes, settings).await?;
            up_front_sources = sources;
            let context_text = render_context(&blocks);
            messages.push(ChatMessage::system(format!(
                "Tu es un assistant qui répond aux questions en te basant sur le \
                 contexte suivant. Cite toujours tes sources.\n\n{context_text}"
            )));
            messages.append(&mut chat_history);
            messages.push(ChatMessage::user(query_for_retrieval.clone()));
        }

        // Completion, tool dispatch, and persistence all run inside the
        // task-local source store.
        let answer_future = async {
            if settings.tool_calling_enabled {
                let dispatch_active_universes = active_universes.to_vec();
                let dispatch_settings = settings.clone();
                let dispatch: Box<tool_loop::ToolDispatcher> = Box::new(move |name, args| {
                    let active_universes = dispatch_active_universes.clone();
                    let settings = dispatch_settings.clone();
                    Box::pin(async move {
                        if name != "search_knowledge_base" {
                            return Err(EngineError::DataValidation(format!("unknown tool: {name}")));
                        }
                        let query = args
                            .get("query")
                            .and_then(|v| v.as_str())
                            .ok_or_else(|| EngineError::DataValidation("missing query argument".to_string()))?
                            .to_string();

                        // Tool execution itself re-enters preprocessor →
                        // retrieval → context, same as the non-tool path.
                        let (blocks, sources) = self.retrieve_and_assemble(&query, &active_universes, &settings).await?;
                        SOURCES.with(|s| s.borrow_mut().extend(sources));
                        Ok(render_context(&blocks))
                    })
                });

                let final_message = tool_loop::run(
                    self.llm.as_ref(),
                    &mut messages,
                    &[search_tool],
                    0.2,
                    settings.llm_timeout,
                    &*dispatch,
                )
                .await?;
                Ok(final_message.content.unwrap_or_default())
            } else {
                let response = self
                    .llm
                    .complete(&messages, None, Some(ToolChoice::None), 0.2, settings.llm_timeout)
                    .await?;
                Ok(response.content.unwrap_or_default())
            }
        };

        let (assistant_text, sources): (String, Vec<SourceSnapshot>) = SOURCES
            .scope(RefCell::new(Vec::new()), async {
                let text = answer_future.await?;
                let sources = SOURCES.with(|s| s.borrow().clone());
                Ok::<_, EngineError>((text, sources))
            })
            .await?;

        // Non-tool mode never populates the task-local store (it retrieved
        // up front, before entering the scope); use that snapshot instead.
        let sources = if settings.tool_calling_enabled { sources } else { up_front_sources };

        self.conversations
            .insert_message(conversation_id, MessageRole::User, user_message, None)
            .await?;
        self.conversations
            .insert_message(
                conversation_id,
                MessageRole::Assistant,
                &assistant_text,
                Some(serde_json::to_value(&sources).unwrap_or_default()),
            )
            .await?;

        Ok(AnswerResult { assistant_message: assistant_text, sources })
    }

    /// Preprocess → retrieve → assemble, the unit of work both the
    /// up-front (non-tool) path and every tool invocation in the
    /// tool-calling path run.
    async fn retrieve_and_assemble(
        &self,
        query: &str,
        active_universes: &[Uuid],
        settings: &ConversationSettings,
    ) -> Result<(Vec<crate::context::ContextBlock>, Vec<SourceSnapshot>)> {
        let preprocessed = preprocessor::process(query);
        let alpha = settings.alpha_override.unwrap_or(preprocessed.adaptive_alpha);

        let embedding = self
            .preprocessed_embedding
            .embed(&[preprocessed.enriched_query_for_embedding.clone()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::FatalExternal("embedding service returned no vectors".to_string()))?;

        let tsquery_text = if settings.hybrid_search_enabled {
            preprocessed.tsquery_text.as_deref()
        } else {
            None
        };

        let candidates = self
            .retrieval
            .search(SearchParams {
                query_text: query,
                tsquery_text,
                query_embedding: &embedding,
                k: settings.retrieval_k,
                alpha,
                universe_ids: active_universes,
                hierarchical: settings.retrieval.hierarchical,
            })
            .await?;

        self.context.assemble(candidates, query, &settings.retrieval).await
    }
}

fn render_context(blocks: &[crate::context::ContextBlock]) -> String {
    let mut out = String::new();
    for (i, block) in blocks.iter().enumerate() {
        out.push_str(&format!("[Source {}] (document {})\n{}\n\n", i + 1, block.document_id, block.content));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_context_labels_each_source() {
        let blocks = vec![
            crate::context::ContextBlock { chunk_id: Uuid::new_v4(), document_id: Uuid::new_v4(), content: "a".to_string() },
            crate::context::ContextBlock { chunk_id: Uuid::new_v4(), document_id: Uuid::new_v4(), content: "b".to_string() },
        ];
        let rendered = render_context(&blocks);
        assert!(rendered.contains("[Source 1]"));
        assert!(rendered.contains("[Source 2]"));
    }
}
