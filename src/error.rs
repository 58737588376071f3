//! Error taxonomy for the engine: six kinds, each with its own retry and
//! propagation policy, rather than one flat bag of string variants. A
//! `thiserror` enum, without any HTTP response mapping — there is no HTTP
//! layer in this crate.

use thiserror::Error;

/// The six policy-distinguished error kinds, plus the two ambient kinds
/// every Rust service needs (database, configuration).
#[derive(Debug, Error)]
pub enum EngineError {
    /// Network timeout or 5xx from the embedding/reranker/LLM services.
    /// Policy: retry with exponential backoff; surface as `ServiceDegraded`
    /// once the caller's budget is exhausted.
    #[error("transient external failure: {0}")]
    TransientExternal(String),

    /// Authentication failure, 4xx misconfiguration, or a dimension
    /// mismatch. Policy: fail the operation outright.
    #[error("fatal external failure: {0}")]
    FatalExternal(String),

    /// Malformed tool-call arguments, unparseable LLM JSON, or an empty
    /// tsquery. Policy: fall back to a safe default and continue.
    #[error("data validation failure: {0}")]
    DataValidation(String),

    /// Unique constraint violation or a lost optimistic-lock race on an
    /// ingestion job claim. Policy: not an error — "someone else got it".
    #[error("storage conflict: {0}")]
    StorageConflict(String),

    /// The caller disconnected or cancelled the request. Policy: propagate,
    /// do not persist partial writes, do not log as an error.
    #[error("request cancelled")]
    CancellationRequested,

    /// The external service is rate-limiting us. Policy: back off longer
    /// than `TransientExternal`.
    #[error("rate limited{}", retry_after_secs.map(|s| format!(", retry after {s}s")).unwrap_or_default())]
    QuotaOrRateLimit {
        /// Seconds to wait before retrying, if the service told us.
        retry_after_secs: Option<u64>,
    },

    /// Retrieval returned zero results while the store is known non-empty.
    #[error("service degraded: {0}")]
    ServiceDegraded(String),

    /// The request exceeded its wall-clock budget (default 180s).
    #[error("request timed out after {0:?}")]
    RagTimeout(std::time::Duration),

    /// A database error not otherwise classified above.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A misconfigured or missing environment setting.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl EngineError {
    /// Whether this error's policy calls for a retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::TransientExternal(_) | EngineError::QuotaOrRateLimit { .. }
        )
    }

    /// The user-visible message for a failed answer: "I encountered an
    /// error: <kind>", with no sources attached.
    pub fn user_visible_message(&self) -> String {
        let kind = match self {
            EngineError::TransientExternal(_) => "service temporarily unavailable",
            EngineError::FatalExternal(_) => "service misconfigured",
            EngineError::DataValidation(_) => "could not process the request",
            EngineError::StorageConflict(_) => "conflicting update, please retry",
            EngineError::CancellationRequested => "request cancelled",
            EngineError::QuotaOrRateLimit { .. } => "please retry shortly",
            EngineError::ServiceDegraded(_) => "service degraded",
            EngineError::RagTimeout(_) => "request timed out",
            EngineError::Database(_) => "storage error",
            EngineError::Configuration(_) => "service misconfigured",
        };
        format!("I encountered an error: {kind}")
    }
}

/// The crate-wide result alias.
pub type Result<T> = std::result::Result<T, EngineError>;
