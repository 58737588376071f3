//! Hybrid dense/keyword retrieval fused with reciprocal rank fusion.
//! Rather than two round trips with in-process fusion, this issues exactly
//! one `sqlx::query_as` against a single CTE pipeline the database can plan
//! index use over: vector candidates, keyword candidates, full outer join,
//! RRF (`k=60`, `1/(k+rank)`). Typo-tolerant fuzzy matching is out of scope
//! here — retrieval quality for near-miss spelling is the preprocessor's
//! concern.

use crate::db::models::Chunk;
use crate::error::Result;
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// A single ranked result from hybrid search, carrying every raw score
/// plus the chunk's structural metadata.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScoredChunk {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub content: String,
    pub section_hierarchy: Vec<String>,
    pub heading_context: Option<String>,
    pub chunk_level: crate::db::models::ChunkLevel,
    pub parent_chunk_id: Option<Uuid>,
    /// Cosine similarity in `[0, 1]`, `NULL` when the chunk had no rank in
    /// the vector candidate set.
    pub vector_similarity: Option<f64>,
    /// `ts_rank_cd` score, `NULL` when the chunk had no rank in the keyword
    /// candidate set.
    pub bm25_score: Option<f64>,
    pub combined_score: f64,
}

/// `search()` call parameters that vary per request, grouped so the public
/// signature stays readable.
#[derive(Debug, Clone)]
pub struct SearchParams<'a> {
    pub query_text: &'a str,
    pub tsquery_text: Option<&'a str>,
    pub query_embedding: &'a [f32],
    pub k: i64,
    pub alpha: f32,
    pub universe_ids: &'a [Uuid],
    pub hierarchical: bool,
}

/// RRF stability constant. Fixed rather than configurable: changing it
/// would invalidate any stored analytics derived from past combined scores.
const RRF_K: f64 = 60.0;
/// Sentinel rank assigned to a chunk absent from one candidate set.
const MISSING_RANK_SENTINEL: i64 = 1000;
/// Candidate-set multiplier before fusion: each side fetches `k * 4` rows.
const CANDIDATE_MULTIPLIER: i64 = 4;
/// `ts_rank_cd` normalization flag: cover-density weighting.
const TS_RANK_NORMALIZATION: i32 = 32;

pub struct RetrievalEngine {
    pool: PgPool,
}

impl RetrievalEngine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs the vector-only fallback automatically when
    /// `params.tsquery_text` is `None` (an all-stopword query yields no
    /// tsquery). Never degrades silently on an embedding/database failure —
    /// those propagate to the caller.
    #[tracing::instrument(skip(self, params), fields(k = params.k, alpha = params.alpha))]
    pub async fn search(&self, params: SearchParams<'_>) -> Result<Vec<ScoredChunk>> {
        let embedding = Vector::from(params.query_embedding.to_vec());
        let candidate_k = params.k * CANDIDATE_MULTIPLIER;

        let rows = if let Some(tsquery) = params.tsquery_text.filter(|t| !t.trim().is_empty()) {
            self.hybrid_query(
                &embedding,
                tsquery,
                candidate_k,
                params.k,
                params.alpha,
                params.universe_ids,
                params.hierarchical,
            )
            .await?
        } else {
            tracing::debug!("empty tsquery, running vector-only fallback (equivalent to alpha=1)");
            self.vector_only_query(&embedding, candidate_k, params.k, params.universe_ids, params.hierarchical)
                .await?
        };

        if params.hierarchical {
            Ok(self.resolve_parents(rows).await?)
        } else {
            Ok(rows)
        }
    }

    async fn hybrid_query(
        &self,
        embedding: &Vector,
        tsquery: &str,
        candidate_k: i64,
        k: i64,
        alpha: f32,
        universe_ids: &[Uuid],
        hierarchical: bool,
    ) -> Result<Vec<ScoredChunk>> {
        // A single CTE pipeline: vector candidates, keyword candidates,
        // full outer join with RRF fusion, tie-break on chunk id ascending
        // for determinism. When hierarchical resolution is requested,
        // both candidate sets are restricted to child-level chunks so
        // parent chunks never win a ranking slot directly.
        const SQL: &str = r#"
WITH vector_candidates AS (
    SELECT c.id AS chunk_id,
           row_number() OVER (ORDER BY c.embedding <=> $1) AS rank_vector,
           1 - (c.embedding <=> $1) AS vector_similarity
    FROM chunks c
    JOIN chunk_quality_scores q ON q.chunk_id = c.id
    WHERE c.embedding IS NOT NULL
      AND NOT q.blacklisted
      AND ($6::uuid[] IS NULL OR c.document_id IN (
          SELECT id FROM documents WHERE universe_id = ANY($6) OR universe_id IS NULL
      ))
      AND (NOT $8 OR c.chunk_level = 'child')
    ORDER BY c.embedding <=> $1
    LIMIT $2
),
keyword_candidates AS (
    SELECT c.id AS chunk_id,
           row_number() OVER (ORDER BY ts_rank_cd(c.content_tsv, to_tsquery('french', $3), $7)::double precision DESC) AS rank_keyword,
           ts_rank_cd(c.content_tsv, to_tsquery('french', $3), $7) AS bm25_score
    FROM chunks c
    JOIN chunk_quality_scores q ON q.chunk_id = c.id
    WHERE c.content_tsv @@ to_tsquery('french', $3)
      AND NOT q.blacklisted
      AND ($6::uuid[] IS NULL OR c.document_id IN (
          SELECT id FROM documents WHERE universe_id = ANY($6) OR universe_id IS NULL
      ))
      AND (NOT $8 OR c.chunk_level = 'child')
    ORDER BY rank_keyword
    LIMIT $2
),
fused AS (
    SELECT
        COALESCE(v.chunk_id, kw.chunk_id) AS chunk_id,
        v.vector_similarity,
        kw.bm25_score,
        ($4 * (1.0 / (60 + COALESCE(v.rank_vector, 1000))))
            + ((1 - $4) * (1.0 / (60 + COALESCE(kw.rank_keyword, 1000)))) AS combined_score
    FROM vector_candidates v
    FULL OUTER JOIN keyword_candidates kw ON v.chunk_id = kw.chunk_id
)
SELECT
    c.id AS chunk_id,
    c.document_id,
    c.content,
    c.section_hierarchy,
    c.heading_context,
    c.chunk_level,
    c.parent_chunk_id,
    f.vector_similarity,
    f.bm25_score,
    f.combined_score
FROM fused f
JOIN chunks c ON c.id = f.chunk_id
ORDER BY f.combined_score DESC, c.id ASC
LIMIT $5
"#;

        let universes: Option<Vec<Uuid>> = if universe_ids.is_empty() {
            None
        } else {
            Some(universe_ids.to_vec())
        };

        let rows = sqlx::query_as::<_, ScoredChunk>(SQL)
            .bind(embedding)
            .bind(candidate_k)
            .bind(tsquery)
            .bind(alpha as f64)
            .bind(k)
            .bind(universes)
            .bind(TS_RANK_NORMALIZATION)
            .bind(hierarchical)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn vector_only_query(
        &self,
        embedding: &Vector,
        candidate_k: i64,
        k: i64,
        universe_ids: &[Uuid],
        hierarchical: bool,
    ) -> Result<Vec<ScoredChunk>> {
        const SQL: &str = r#"
SELECT
    c.id AS chunk_id,
    c.document_id,
    c.content,
    c.section_hierarchy,
    c.heading_context,
    c.chunk_level,
    c.parent_chunk_id,
    (1 - (c.embedding <=> $1)) AS vector_similarity,
    NULL::double precision AS bm25_score,
    (1.0 / (60 + row_number() OVER (ORDER BY c.embedding <=> $1))) AS combined_score
FROM chunks c
JOIN chunk_quality_scores q ON q.chunk_id = c.id
WHERE c.embedding IS NOT NULL
  AND NOT q.blacklisted
  AND ($3::uuid[] IS NULL OR c.document_id IN (
      SELECT id FROM documents WHERE universe_id = ANY($3) OR universe_id IS NULL
  ))
  AND (NOT $4 OR c.chunk_level = 'child')
ORDER BY c.embedding <=> $1, c.id ASC
LIMIT $2
"#;
        let universes: Option<Vec<Uuid>> = if universe_ids.is_empty() {
            None
        } else {
            Some(universe_ids.to_vec())
        };
        let _ = candidate_k; // vector-only fallback already limits directly to k.

        let rows = sqlx::query_as::<_, ScoredChunk>(SQL)
            .bind(embedding)
            .bind(k)
            .bind(universes)
            .bind(hierarchical)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// For each returned child whose `parent_chunk_id` exists, substitute
    /// the parent's content while keeping the child's rank and scores,
    /// deduplicating by parent id.
    async fn resolve_parents(&self, rows: Vec<ScoredChunk>) -> Result<Vec<ScoredChunk>> {
        let mut seen_parents = std::collections::HashSet::new();
        let mut out = Vec::with_capacity(rows.len());

        for mut row in rows {
            if row.chunk_level != crate::db::models::ChunkLevel::Child {
                out.push(row);
                continue;
            }
            let Some(parent_id) = row.parent_chunk_id else {
                out.push(row);
                continue;
            };
            if !seen_parents.insert(parent_id) {
                continue;
            }
            if let Some(parent) = sqlx::query_as::<_, Chunk>("SELECT * FROM chunks WHERE id = $1")
                .bind(parent_id)
                .fetch_optional(&self.pool)
                .await?
            {
                row.content = parent.content;
                row.section_hierarchy = parent.section_hierarchy;
                row.heading_context = parent.heading_context;
            }
            out.push(row);
        }
        Ok(out)
    }
}
