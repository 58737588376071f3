//! Typed rows for every table, one `sqlx::FromRow` struct per table.

use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

/// A logical source document.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Document {
    pub id: Uuid,
    pub title: String,
    pub source_path: String,
    pub full_text: String,
    pub metadata: Json,
    pub universe_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `chunk_level` enum, fixed strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChunkLevel {
    Parent,
    Child,
    Unlabeled,
}

/// A passage-sized chunk of document text.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub chunk_index: i32,
    pub content: String,
    pub token_count: i32,
    /// Nullable only during in-flight ingestion.
    pub embedding: Option<Vector>,
    pub section_hierarchy: Vec<String>,
    pub heading_context: Option<String>,
    pub document_position: f32,
    pub bounding_box: Option<Json>,
    pub prev_chunk_id: Option<Uuid>,
    pub next_chunk_id: Option<Uuid>,
    pub parent_chunk_id: Option<Uuid>,
    pub chunk_level: ChunkLevel,
    pub metadata: Json,
    pub created_at: DateTime<Utc>,
}

/// Per-chunk quality tracking.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChunkQualityScore {
    pub chunk_id: Uuid,
    pub positive_count: i32,
    pub negative_count: i32,
    pub appearance_count: i32,
    pub blacklisted: bool,
    pub blacklist_reason: Option<String>,
    pub whitelisted: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl ChunkQualityScore {
    /// `positives / (positives + negatives)`, NULL (`None`) if neither is
    /// positive. Never stored independently of the counts it derives from.
    pub fn satisfaction_rate(&self) -> Option<f32> {
        let total = self.positive_count + self.negative_count;
        if total == 0 {
            None
        } else {
            Some(self.positive_count as f32 / total as f32)
        }
    }
}

/// Per-document aggregated quality.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DocumentQualityScore {
    pub document_id: Uuid,
    pub positive_count: i32,
    pub negative_count: i32,
    pub needs_reingestion: bool,
    pub reingestion_reason: Option<String>,
}

impl DocumentQualityScore {
    pub fn satisfaction_rate(&self) -> Option<f32> {
        let total = self.positive_count + self.negative_count;
        if total == 0 {
            None
        } else {
            Some(self.positive_count as f32 / total as f32)
        }
    }
}

/// A stored conversation with per-conversation retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub universe_id: Option<Uuid>,
    pub title: Option<String>,
    pub hybrid_enabled: Option<bool>,
    pub alpha_override: Option<f32>,
    /// Tri-state: NULL inherits the global default, TRUE/FALSE overrides.
    pub reranker_enabled: Option<bool>,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `role` enum for messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message within a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    /// Snapshot of chunk ids + similarity scores at answer time, present
    /// only on assistant messages that cited sources.
    pub sources: Option<Json>,
    pub created_at: DateTime<Utc>,
}

/// A thumbs up/down rating on a message.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MessageRating {
    pub id: Uuid,
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub polarity: i16,
    pub feedback_text: Option<String>,
    pub is_cancelled: bool,
    pub cancelled_by: Option<Uuid>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The four classification buckets a negative rating can fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ThumbsDownClassification {
    BadQuestion,
    BadAnswer,
    MissingSources,
    UnrealisticExpectations,
}

/// The admin-actionable outcome of a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AdminAction {
    ContactUser,
    MarkForReingestion,
    Ignore,
    Pending,
}

/// One record per negative rating, carrying the LLM's classification and
/// the resulting admin action.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ThumbsDownValidation {
    pub id: Uuid,
    pub rating_id: Uuid,
    pub user_question: String,
    pub assistant_response: String,
    pub sources_snapshot: Option<Json>,
    pub classification: ThumbsDownClassification,
    pub confidence: f32,
    pub reasoning: String,
    pub suggested_reformulation: Option<String>,
    pub missing_info_details: Option<String>,
    pub needs_admin_review: bool,
    pub admin_override_classification: Option<ThumbsDownClassification>,
    pub admin_action: AdminAction,
    pub validator_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A notification surfaced to a user after a `contact_user` action.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserNotification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub notification_type: String,
    pub message: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// `status` enum for ingestion jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum IngestionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One ingestion job per uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IngestionJob {
    pub id: Uuid,
    pub file_path: String,
    pub ocr_engine: String,
    pub vlm_engine: Option<String>,
    pub chunker_variant: String,
    pub universe_id: Option<Uuid>,
    pub progress: i32,
    pub status: IngestionStatus,
    pub error_message: Option<String>,
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A named response-rewriting template.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ResponseTemplate {
    pub id: Uuid,
    pub name: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// The result of applying a template to a message.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FormattedResponse {
    pub id: Uuid,
    pub message_id: Uuid,
    pub template_name: String,
    pub formatted_content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A tenancy boundary.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProductUniverse {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// An image extracted during ingestion, linked to a page and
/// transitively to the chunks sharing that page number.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DocumentImage {
    pub id: Uuid,
    pub document_id: Uuid,
    pub page_number: i32,
    pub description: Option<String>,
    pub ocr_text: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A row in the migration ledger.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SchemaMigration {
    pub filename: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
    pub success: bool,
    pub execution_time_ms: i64,
    pub error_message: Option<String>,
}
