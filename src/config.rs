//! Environment-driven configuration: `dotenvy` plus typed env reads with
//! logged fallbacks, flattened into a single struct. No hot-reload surface
//! is needed here, so there's no case for a second TOML-backed config
//! layer alongside it.

use crate::error::{EngineError, Result};
use std::env;
use std::time::Duration;

/// All configuration read from the environment at process start.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string for the persistence layer.
    pub database_url: String,
    /// Base URL of the embedding service (`POST /embed_batch`).
    pub embedding_service_url: String,
    /// Base URL of the cross-encoder reranker service (`POST /rerank`).
    pub reranker_service_url: String,
    /// Base URL of the OpenAI-chat-completion-compatible LLM service.
    pub llm_service_url: String,
    /// Base URL of the external document parser invoked during ingestion.
    /// Opaque HTTP collaborator — its OCR/parsing internals are out of
    /// scope here.
    pub document_parser_url: String,
    /// Base URL of the external VLM service invoked during ingestion for
    /// image description and OCR.
    pub vlm_service_url: String,
    /// Model identifier passed on every LLM completion request.
    pub llm_model: String,
    /// API key for the LLM service, if it requires one.
    pub llm_api_key: Option<String>,

    /// Vector width; must match the schema (`vector(N)` columns).
    pub embedding_dimension: usize,
    /// Global default for hybrid search; a conversation may override.
    pub hybrid_search_enabled: bool,
    /// Global default for reranking; a conversation may override tri-state.
    pub reranker_enabled: bool,
    /// Enable adjacent-chunk expansion at context-assembly time.
    pub use_adjacent_chunks: bool,
    /// Default hierarchical (parent/child) resolution on retrieval.
    pub use_parent_child_chunks: bool,
    /// Chunker token-budget default before the size-adaptive override.
    pub chunk_size: usize,
    /// Chunker overlap in tokens.
    pub chunk_overlap: usize,
    /// Reranker candidate window (default 20).
    pub reranker_top_k: usize,
    /// Reranker return window (default 5).
    pub reranker_return_k: usize,
    /// Enable the thumbs-down analyzer subscription.
    pub thumbs_down_auto_analysis: bool,
    /// Confidence cutoff below which a classification needs admin review.
    pub thumbs_down_confidence_threshold: f32,
    /// Global tool-calling toggle.
    pub llm_use_tools: bool,
    /// Per-call wall clock for LLM completions.
    pub llm_timeout: Duration,
    /// Session expiry, carried as a plain field — its consumer (the UI/
    /// session layer) is out of scope, but the config surface itself isn't
    /// a feature to cut.
    pub inactivity_session_timeout_minutes: u32,

    /// Bounded embedding batch size (default 20).
    pub embedding_batch_size: usize,
    /// Bounded embedding HTTP timeout (default 90s).
    pub embedding_timeout: Duration,
    /// Retry budget for a failed embedding batch during ingestion.
    pub embedding_batch_retries: u32,
    /// Orchestrator wall-clock budget (default 180s).
    pub rag_timeout: Duration,
    /// Conversation-history window loaded by the orchestrator (default 10).
    pub conversation_history_window: usize,
    /// Quality-gate satisfaction floor below which a chunk is dropped.
    pub quality_satisfaction_threshold: f32,
    /// Quality-gate significance floor — minimum appearances before the
    /// satisfaction threshold applies.
    pub quality_significance_floor: i64,
    /// Bounded Postgres connection pool size.
    pub database_max_connections: u32,
}

impl Config {
    /// Load configuration from the environment, applying sensible
    /// defaults for anything unset. `dotenvy` is consulted first so a
    /// local `.env` file works during development.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
            database_url: env::var("DATABASE_URL").map_err(|_| {
                EngineError::Configuration("DATABASE_URL is required".to_string())
            })?,
            embedding_service_url: env_or("EMBEDDING_SERVICE_URL", "http://localhost:8001"),
            reranker_service_url: env_or("RERANKER_SERVICE_URL", "http://localhost:8002"),
            llm_service_url: env_or("LLM_SERVICE_URL", "http://localhost:8003/v1"),
            document_parser_url: env_or("DOCUMENT_PARSER_URL", "http://localhost:8004"),
            vlm_service_url: env_or("VLM_SERVICE_URL", "http://localhost:8005"),
            llm_model: env_or("LLM_MODEL", "gpt-4o-mini"),
            llm_api_key: env::var("LLM_API_KEY").ok(),

            embedding_dimension: env_parsed("EMBEDDING_DIMENSION", 1024)?,
            hybrid_search_enabled: env_bool("HYBRID_SEARCH_ENABLED", true),
            reranker_enabled: env_bool("RERANKER_ENABLED", true),
            use_adjacent_chunks: env_bool("USE_ADJACENT_CHUNKS", true),
            use_parent_child_chunks: env_bool("USE_PARENT_CHILD_CHUNKS", false),
            chunk_size: env_parsed("CHUNK_SIZE", 800)?,
            chunk_overlap: env_parsed("CHUNK_OVERLAP", 400)?,
            reranker_top_k: env_parsed("RERANKER_TOP_K", 20)?,
            reranker_return_k: env_parsed("RERANKER_RETURN_K", 5)?,
            thumbs_down_auto_analysis: env_bool("THUMBS_DOWN_AUTO_ANALYSIS", true),
            thumbs_down_confidence_threshold: env_parsed(
                "THUMBS_DOWN_CONFIDENCE_THRESHOLD",
                0.7,
            )?,
            llm_use_tools: env_bool("LLM_USE_TOOLS", true),
            llm_timeout: Duration::from_secs(env_parsed("LLM_TIMEOUT", 60)?),
            inactivity_session_timeout_minutes: env_parsed(
                "INACTIVITY_SESSION_TIMEOUT_MINUTES",
                30,
            )?,

            embedding_batch_size: env_parsed("EMBEDDING_BATCH_SIZE", 20)?,
            embedding_timeout: Duration::from_secs(env_parsed("EMBEDDING_TIMEOUT_SECS", 90)?),
            embedding_batch_retries: env_parsed("EMBEDDING_BATCH_RETRIES", 3)?,
            rag_timeout: Duration::from_secs(env_parsed("RAG_TIMEOUT_SECS", 180)?),
            conversation_history_window: env_parsed("CONVERSATION_HISTORY_WINDOW", 10)?,
            quality_satisfaction_threshold: env_parsed("QUALITY_SATISFACTION_THRESHOLD", 0.3)?,
            quality_significance_floor: env_parsed("QUALITY_SIGNIFICANCE_FLOOR", 3)?,
            database_max_connections: env_parsed("DATABASE_MAX_CONNECTIONS", 10)?,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| {
        tracing::debug!(key, default, "env var unset, using default");
        default.to_string()
    })
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(default)
}

fn env_parsed<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr + Copy,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|e| {
            EngineError::Configuration(format!("invalid value for {key}: {e}"))
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_bool_accepts_truthy_variants() {
        std::env::set_var("RAGFAB_TEST_BOOL", "TRUE");
        assert!(env_bool("RAGFAB_TEST_BOOL", false));
        std::env::set_var("RAGFAB_TEST_BOOL", "1");
        assert!(env_bool("RAGFAB_TEST_BOOL", false));
        std::env::remove_var("RAGFAB_TEST_BOOL");
        assert!(env_bool("RAGFAB_TEST_BOOL", true));
    }

    #[test]
    fn env_parsed_falls_back_to_default() {
        std::env::remove_var("RAGFAB_TEST_NUM");
        let v: usize = env_parsed("RAGFAB_TEST_NUM", 42).unwrap();
        assert_eq!(v, 42);
    }

    #[test]
    fn env_parsed_rejects_invalid() {
        std::env::set_var("RAGFAB_TEST_BAD_NUM", "not-a-number");
        let res: Result<usize> = env_parsed("RAGFAB_TEST_BAD_NUM", 1);
        assert!(res.is_err());
        std::env::remove_var("RAGFAB_TEST_BAD_NUM");
    }
}
