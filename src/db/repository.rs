//! Typed repositories over `PgPool`, one per aggregate. Plain structs
//! rather than a trait-abstracted god-client — there is exactly one
//! backend here, so that indirection doesn't pay for itself.

use crate::db::models::*;
use crate::error::Result;
use chrono::Utc;
use pgvector::Vector;
use serde_json::Value as Json;
use sqlx::PgPool;
use uuid::Uuid;

/// Draft of a chunk prior to persistence, produced by the chunker.
#[derive(Debug, Clone)]
pub struct ChunkDraft {
    pub chunk_index: i32,
    pub content: String,
    pub token_count: i32,
    pub embedding: Option<Vec<f32>>,
    pub section_hierarchy: Vec<String>,
    pub heading_context: Option<String>,
    pub document_position: f32,
    pub bounding_box: Option<Json>,
    pub parent_local_index: Option<i32>,
    pub chunk_level: ChunkLevel,
    pub metadata: Json,
}

/// Document aggregate: documents + their images.
#[derive(Clone)]
pub struct DocumentRepository {
    pool: PgPool,
}

impl DocumentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert a document by its canonical `source_path` — re-ingestion of
    /// the same file preserves the document identity.
    pub async fn upsert(
        &self,
        title: &str,
        source_path: &str,
        full_text: &str,
        metadata: Json,
        universe_id: Option<Uuid>,
    ) -> Result<Document> {
        let doc = sqlx::query_as::<_, Document>(
            "INSERT INTO documents (title, source_path, full_text, metadata, universe_id)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (source_path) DO UPDATE SET
                title = EXCLUDED.title,
                full_text = EXCLUDED.full_text,
                metadata = EXCLUDED.metadata,
                universe_id = EXCLUDED.universe_id,
                updated_at = now()
             RETURNING *",
        )
        .bind(title)
        .bind(source_path)
        .bind(full_text)
        .bind(metadata)
        .bind(universe_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(doc)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Document>> {
        let doc = sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(doc)
    }

    pub async fn insert_image(
        &self,
        document_id: Uuid,
        page_number: i32,
        description: Option<&str>,
        ocr_text: Option<&str>,
    ) -> Result<DocumentImage> {
        let img = sqlx::query_as::<_, DocumentImage>(
            "INSERT INTO document_images (document_id, page_number, description, ocr_text)
             VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(document_id)
        .bind(page_number)
        .bind(description)
        .bind(ocr_text)
        .fetch_one(&self.pool)
        .await?;
        Ok(img)
    }
}

/// Chunk aggregate: chunks, adjacency, and quality scores.
#[derive(Clone)]
pub struct ChunkRepository {
    pool: PgPool,
}

impl ChunkRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist a full chunk set for a document inside one transaction:
    /// delete the document's prior chunks (re-ingestion), insert the new
    /// ones, then fix up adjacency and parent/child linkage.
    pub async fn replace_document_chunks(
        &self,
        document_id: Uuid,
        drafts: &[ChunkDraft],
    ) -> Result<Vec<Chunk>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = $1")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        let mut ids = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let id: (Uuid,) = sqlx::query_as(
                "INSERT INTO chunks
                    (document_id, chunk_index, content, token_count, embedding,
                     section_hierarchy, heading_context, document_position,
                     bounding_box, chunk_level, metadata)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                 RETURNING id",
            )
            .bind(document_id)
            .bind(draft.chunk_index)
            .bind(&draft.content)
            .bind(draft.token_count)
            .bind(draft.embedding.clone().map(Vector::from))
            .bind(&draft.section_hierarchy)
            .bind(&draft.heading_context)
            .bind(draft.document_position)
            .bind(&draft.bounding_box)
            .bind(draft.chunk_level)
            .bind(&draft.metadata)
            .fetch_one(&mut *tx)
            .await?;
            ids.push(id.0);
        }

        // Adjacency materialization: a single pass in document order.
        for i in 0..ids.len() {
            let prev = if i > 0 { Some(ids[i - 1]) } else { None };
            let next = ids.get(i + 1).copied();
            sqlx::query("UPDATE chunks SET prev_chunk_id = $1, next_chunk_id = $2 WHERE id = $3")
                .bind(prev)
                .bind(next)
                .bind(ids[i])
                .execute(&mut *tx)
                .await?;
        }

        // Parent/child linkage, keyed by the draft's local parent index.
        for (i, draft) in drafts.iter().enumerate() {
            if let Some(parent_idx) = draft.parent_local_index {
                if let Some(&parent_id) = ids.get(parent_idx as usize) {
                    sqlx::query("UPDATE chunks SET parent_chunk_id = $1 WHERE id = $2")
                        .bind(parent_id)
                        .bind(ids[i])
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        for id in &ids {
            sqlx::query(
                "INSERT INTO chunk_quality_scores (chunk_id) VALUES ($1)
                 ON CONFLICT (chunk_id) DO NOTHING",
            )
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let chunks = sqlx::query_as::<_, Chunk>(
            "SELECT * FROM chunks WHERE document_id = $1 ORDER BY chunk_index",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(chunks)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Chunk>> {
        let chunk = sqlx::query_as::<_, Chunk>("SELECT * FROM chunks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(chunk)
    }

    /// Fetch a chunk's immediate document-order neighbors, for adjacent
    /// expansion at context-assembly time.
    pub async fn get_adjacent(&self, chunk: &Chunk) -> Result<(Option<Chunk>, Option<Chunk>)> {
        let prev = match chunk.prev_chunk_id {
            Some(id) => self.get(id).await?,
            None => None,
        };
        let next = match chunk.next_chunk_id {
            Some(id) => self.get(id).await?,
            None => None,
        };
        Ok((prev, next))
    }

    pub async fn quality(&self, chunk_id: Uuid) -> Result<Option<ChunkQualityScore>> {
        let q = sqlx::query_as::<_, ChunkQualityScore>(
            "SELECT * FROM chunk_quality_scores WHERE chunk_id = $1",
        )
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(q)
    }

    /// Bulk-fetch quality rows for the candidate set a single retrieval
    /// call needs to gate.
    pub async fn quality_for_many(&self, chunk_ids: &[Uuid]) -> Result<Vec<ChunkQualityScore>> {
        let rows = sqlx::query_as::<_, ChunkQualityScore>(
            "SELECT * FROM chunk_quality_scores WHERE chunk_id = ANY($1)",
        )
        .bind(chunk_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn record_appearance(&self, chunk_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE chunk_quality_scores SET appearance_count = appearance_count + 1,
                last_seen_at = now() WHERE chunk_id = $1",
        )
        .bind(chunk_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_rating(&self, chunk_id: Uuid, positive: bool) -> Result<()> {
        let column = if positive { "positive_count" } else { "negative_count" };
        let sql = format!(
            "UPDATE chunk_quality_scores SET {column} = {column} + 1 WHERE chunk_id = $1"
        );
        sqlx::query(&sql).bind(chunk_id).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn set_blacklisted(&self, chunk_id: Uuid, reason: &str) -> Result<()> {
        sqlx::query(
            "UPDATE chunk_quality_scores SET blacklisted = true, blacklist_reason = $2
             WHERE chunk_id = $1 AND NOT whitelisted",
        )
        .bind(chunk_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Conversation + message aggregate.
#[derive(Clone)]
pub struct ConversationRepository {
    pool: PgPool,
}

impl ConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Conversation>> {
        let c = sqlx::query_as::<_, Conversation>("SELECT * FROM conversations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(c)
    }

    /// Last `limit` messages in chronological order (default window 10).
    pub async fn recent_messages(&self, conversation_id: Uuid, limit: i64) -> Result<Vec<Message>> {
        let mut rows = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE conversation_id = $1
             ORDER BY created_at DESC LIMIT $2",
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.reverse();
        Ok(rows)
    }

    pub async fn insert_message(
        &self,
        conversation_id: Uuid,
        role: MessageRole,
        content: &str,
        sources: Option<Json>,
    ) -> Result<Message> {
        let m = sqlx::query_as::<_, Message>(
            "INSERT INTO messages (conversation_id, role, content, sources)
             VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(conversation_id)
        .bind(role)
        .bind(content)
        .bind(sources)
        .fetch_one(&self.pool)
        .await?;
        Ok(m)
    }

    pub async fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        let m = sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(m)
    }

    /// The message immediately preceding `message_id` in the same
    /// conversation — the user question an assistant message answered.
    pub async fn preceding_message(&self, message_id: Uuid) -> Result<Option<Message>> {
        let m = sqlx::query_as::<_, Message>(
            "SELECT p.* FROM messages p
             JOIN messages m ON m.conversation_id = p.conversation_id
             WHERE m.id = $1 AND p.created_at < m.created_at
             ORDER BY p.created_at DESC LIMIT 1",
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(m)
    }
}

/// Ratings + the thumbs-down validation queue.
#[derive(Clone)]
pub struct RatingRepository {
    pool: PgPool,
}

impl RatingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        polarity: i16,
        feedback_text: Option<&str>,
    ) -> Result<MessageRating> {
        let r = sqlx::query_as::<_, MessageRating>(
            "INSERT INTO message_ratings (message_id, user_id, polarity, feedback_text)
             VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(polarity)
        .bind(feedback_text)
        .fetch_one(&self.pool)
        .await?;
        Ok(r)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<MessageRating>> {
        let r = sqlx::query_as::<_, MessageRating>("SELECT * FROM message_ratings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(r)
    }

    pub async fn insert_validation(
        &self,
        rating_id: Uuid,
        user_question: &str,
        assistant_response: &str,
        sources_snapshot: Option<Json>,
        classification: ThumbsDownClassification,
        confidence: f32,
        reasoning: &str,
        suggested_reformulation: Option<&str>,
        missing_info_details: Option<&str>,
        needs_admin_review: bool,
        admin_action: AdminAction,
    ) -> Result<ThumbsDownValidation> {
        let v = sqlx::query_as::<_, ThumbsDownValidation>(
            "INSERT INTO thumbs_down_validations
                (rating_id, user_question, assistant_response, sources_snapshot,
                 classification, confidence, reasoning, suggested_reformulation,
                 missing_info_details, needs_admin_review, admin_action)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (rating_id) DO UPDATE SET
                classification = EXCLUDED.classification,
                confidence = EXCLUDED.confidence,
                reasoning = EXCLUDED.reasoning,
                suggested_reformulation = EXCLUDED.suggested_reformulation,
                missing_info_details = EXCLUDED.missing_info_details,
                needs_admin_review = EXCLUDED.needs_admin_review,
                admin_action = EXCLUDED.admin_action,
                updated_at = now()
             RETURNING *",
        )
        .bind(rating_id)
        .bind(user_question)
        .bind(assistant_response)
        .bind(sources_snapshot)
        .bind(classification)
        .bind(confidence)
        .bind(reasoning)
        .bind(suggested_reformulation)
        .bind(missing_info_details)
        .bind(needs_admin_review)
        .bind(admin_action)
        .fetch_one(&self.pool)
        .await?;
        Ok(v)
    }

    pub async fn insert_notification(&self, user_id: Uuid, notification_type: &str, message: &str) -> Result<UserNotification> {
        let n = sqlx::query_as::<_, UserNotification>(
            "INSERT INTO user_notifications (user_id, notification_type, message)
             VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(user_id)
        .bind(notification_type)
        .bind(message)
        .fetch_one(&self.pool)
        .await?;
        Ok(n)
    }
}

/// Ingestion job queue.
#[derive(Clone)]
pub struct IngestionJobRepository {
    pool: PgPool,
}

impl IngestionJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn enqueue(
        &self,
        file_path: &str,
        ocr_engine: &str,
        vlm_engine: Option<&str>,
        chunker_variant: &str,
        universe_id: Option<Uuid>,
    ) -> Result<IngestionJob> {
        let job = sqlx::query_as::<_, IngestionJob>(
            "INSERT INTO ingestion_jobs (file_path, ocr_engine, vlm_engine, chunker_variant, universe_id)
             VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(file_path)
        .bind(ocr_engine)
        .bind(vlm_engine)
        .bind(chunker_variant)
        .bind(universe_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(job)
    }

    /// Atomically claim the oldest pending job via a compare-and-set
    /// `UPDATE ... WHERE status = 'pending'`. Returns `None` if no pending
    /// job exists or another worker won the race — not a `StorageConflict`,
    /// just "someone else got it".
    pub async fn claim_next(&self, worker_id: &str) -> Result<Option<IngestionJob>> {
        let job = sqlx::query_as::<_, IngestionJob>(
            "UPDATE ingestion_jobs SET status = 'processing', worker_id = $1, started_at = now()
             WHERE id = (
                SELECT id FROM ingestion_jobs
                WHERE status = 'pending'
                ORDER BY created_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
             )
             RETURNING *",
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    pub async fn set_progress(&self, id: Uuid, progress: i32) -> Result<()> {
        sqlx::query("UPDATE ingestion_jobs SET progress = $2 WHERE id = $1")
            .bind(id)
            .bind(progress)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn complete(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE ingestion_jobs SET status = 'completed', progress = 100, completed_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fail(&self, id: Uuid, error_message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE ingestion_jobs SET status = 'failed', error_message = $2, completed_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<IngestionJob>> {
        let job = sqlx::query_as::<_, IngestionJob>("SELECT * FROM ingestion_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }
}

/// Response templates + their applied outputs.
#[derive(Clone)]
pub struct TemplateRepository {
    pool: PgPool,
}

impl TemplateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<ResponseTemplate>> {
        let t = sqlx::query_as::<_, ResponseTemplate>(
            "SELECT * FROM response_templates WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(t)
    }

    /// Upsert the formatted output for a message — re-formatting replaces
    /// the prior version rather than accumulating history.
    pub async fn upsert_formatted(
        &self,
        message_id: Uuid,
        template_name: &str,
        formatted_content: &str,
    ) -> Result<FormattedResponse> {
        let f = sqlx::query_as::<_, FormattedResponse>(
            "INSERT INTO formatted_responses (message_id, template_name, formatted_content)
             VALUES ($1, $2, $3)
             ON CONFLICT (message_id) DO UPDATE SET
                template_name = EXCLUDED.template_name,
                formatted_content = EXCLUDED.formatted_content,
                updated_at = now()
             RETURNING *",
        )
        .bind(message_id)
        .bind(template_name)
        .bind(formatted_content)
        .fetch_one(&self.pool)
        .await?;
        Ok(f)
    }
}

/// Document/chunk quality aggregation used by the feedback analyzer.
#[derive(Clone)]
pub struct QualityRepository {
    pool: PgPool,
}

impl QualityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Mark a document for re-ingestion, concatenating the reason onto any
    /// existing one.
    pub async fn mark_needs_reingestion(&self, document_id: Uuid, reason: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO document_quality_scores (document_id, needs_reingestion, reingestion_reason)
             VALUES ($1, true, $2)
             ON CONFLICT (document_id) DO UPDATE SET
                needs_reingestion = true,
                reingestion_reason = CASE
                    WHEN document_quality_scores.reingestion_reason IS NULL
                        THEN EXCLUDED.reingestion_reason
                    ELSE document_quality_scores.reingestion_reason || '; ' || EXCLUDED.reingestion_reason
                END",
        )
        .bind(document_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, document_id: Uuid) -> Result<Option<DocumentQualityScore>> {
        let q = sqlx::query_as::<_, DocumentQualityScore>(
            "SELECT * FROM document_quality_scores WHERE document_id = $1",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(q)
    }

    pub async fn record_rating(&self, document_id: Uuid, positive: bool) -> Result<()> {
        let column = if positive { "positive_count" } else { "negative_count" };
        let sql = format!(
            "INSERT INTO document_quality_scores (document_id, {column}) VALUES ($1, 1)
             ON CONFLICT (document_id) DO UPDATE SET {column} = document_quality_scores.{column} + 1"
        );
        sqlx::query(&sql).bind(document_id).execute(&self.pool).await?;
        Ok(())
    }
}

/// The document owning a chunk, for feedback-driven re-ingestion lookups.
pub async fn document_id_for_chunk(pool: &PgPool, chunk_id: Uuid) -> Result<Option<Uuid>> {
    let row: Option<(Uuid,)> = sqlx::query_as("SELECT document_id FROM chunks WHERE id = $1")
        .bind(chunk_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(id,)| id))
}

pub fn now_utc() -> chrono::DateTime<Utc> {
    Utc::now()
}
