//! Turns ranked candidates from the retrieval engine into the text blocks
//! actually shown to the LLM, in a fixed order: rerank, quality-gate,
//! adjacent-chunk expand. The HTTP reranking call accepts a `top_k`/
//! `return_k` pair per call rather than baking them in as service-wide
//! constants.

use crate::db::models::ChunkQualityScore;
use crate::db::repository::ChunkRepository;
use crate::error::Result;
use crate::reranker::{RerankPassage, RerankerClient};
use crate::retrieval::ScoredChunk;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A text block ready to hand to the LLM, already including any
/// adjacent-chunk expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBlock {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub content: String,
}

/// One entry of the `sources_snapshot` the orchestrator attaches to the
/// final assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSnapshot {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub vector_similarity: Option<f64>,
    pub bm25_score: Option<f64>,
    pub combined_score: f64,
    pub section_hierarchy: Vec<String>,
}

/// Per-conversation toggles the Context Assembler reads; distinct from
/// [`crate::retrieval::SearchParams`] since these govern what happens
/// *after* the candidates come back, not the search itself.
#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub rerank_enabled: bool,
    pub rerank_top_k: usize,
    pub rerank_return_k: usize,
    pub adjacent_chunks_enabled: bool,
    pub quality_satisfaction_threshold: f32,
    pub quality_significance_floor: i64,
    pub hierarchical: bool,
}

impl RetrievalSettings {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            rerank_enabled: config.reranker_enabled,
            rerank_top_k: config.reranker_top_k,
            rerank_return_k: config.reranker_return_k,
            adjacent_chunks_enabled: config.use_adjacent_chunks,
            quality_satisfaction_threshold: config.quality_satisfaction_threshold,
            quality_significance_floor: config.quality_significance_floor,
            hierarchical: config.use_parent_child_chunks,
        }
    }
}

pub struct ContextAssembler {
    reranker: RerankerClient,
    chunks: ChunkRepository,
}

impl ContextAssembler {
    pub fn new(reranker: RerankerClient, chunks: ChunkRepository) -> Self {
        Self { reranker, chunks }
    }

    /// Runs rerank, quality-gate, and adjacent-chunk expansion in order.
    /// Never fails: reranker and adjacent-chunk fetch failures degrade
    /// silently (logged, not propagated) — only a quality-gate lookup
    /// failure against the database propagates, since the database itself
    /// does not degrade.
    #[tracing::instrument(skip(self, candidates, query, settings), fields(candidates = candidates.len()))]
    pub async fn assemble(
        &self,
        candidates: Vec<ScoredChunk>,
        query: &str,
        settings: &RetrievalSettings,
    ) -> Result<(Vec<ContextBlock>, Vec<SourceSnapshot>)> {
        let reranked = if settings.rerank_enabled && !candidates.is_empty() {
            self.rerank(candidates, query, settings).await
        } else {
            candidates
                .into_iter()
                .take(settings.rerank_return_k)
                .collect()
        };

        let gated = self.quality_gate(reranked, settings).await?;

        let mut blocks = Vec::with_capacity(gated.len());
        let mut sources = Vec::with_capacity(gated.len());

        for chunk in &gated {
            self.chunks.record_appearance(chunk.chunk_id).await?;

            let content = if settings.adjacent_chunks_enabled {
                self.expand_adjacent(chunk).await
            } else {
                chunk.content.clone()
            };

            blocks.push(ContextBlock {
                chunk_id: chunk.chunk_id,
                document_id: chunk.document_id,
                content,
            });
            sources.push(SourceSnapshot {
                chunk_id: chunk.chunk_id,
                document_id: chunk.document_id,
                vector_similarity: chunk.vector_similarity,
                bm25_score: chunk.bm25_score,
                combined_score: chunk.combined_score,
                section_hierarchy: chunk.section_hierarchy.clone(),
            });
        }

        Ok((blocks, sources))
    }

    /// Take the top `rerank_top_k` candidates (already ranked by the
    /// retrieval engine, so truncation before rerank is safe) and replace
    /// similarity order with reranker score, down to `return_k`.
    async fn rerank(
        &self,
        candidates: Vec<ScoredChunk>,
        query: &str,
        settings: &RetrievalSettings,
    ) -> Vec<ScoredChunk> {
        let windowed: Vec<ScoredChunk> = candidates.into_iter().take(settings.rerank_top_k).collect();
        let by_id: std::collections::HashMap<Uuid, ScoredChunk> =
            windowed.iter().cloned().map(|c| (c.chunk_id, c)).collect();

        let passages: Vec<RerankPassage> = windowed
            .iter()
            .map(|c| RerankPassage { chunk_id: c.chunk_id, content: c.content.clone() })
            .collect();

        let reranked = self.reranker.rerank(query, passages, settings.rerank_return_k).await;

        reranked
            .into_iter()
            .filter_map(|p| by_id.get(&p.chunk_id).cloned())
            .collect()
    }

    /// Drop blacklisted chunks, or chunks whose satisfaction rate is below
    /// threshold once they've accumulated enough appearances to be
    /// statistically meaningful. Chunks with no rate yet (insufficient
    /// data) always pass.
    async fn quality_gate(
        &self,
        candidates: Vec<ScoredChunk>,
        settings: &RetrievalSettings,
    ) -> Result<Vec<ScoredChunk>> {
        if candidates.is_empty() {
            return Ok(candidates);
        }
        let ids: Vec<Uuid> = candidates.iter().map(|c| c.chunk_id).collect();
        let scores = self.chunks.quality_for_many(&ids).await?;
        let by_id: std::collections::HashMap<Uuid, ChunkQualityScore> =
            scores.into_iter().map(|s| (s.chunk_id, s)).collect();

        Ok(candidates
            .into_iter()
            .filter(|c| {
                let Some(score) = by_id.get(&c.chunk_id) else {
                    return true;
                };
                if score.blacklisted {
                    tracing::debug!(chunk_id = %c.chunk_id, "dropped by quality gate: blacklisted");
                    return false;
                }
                if score.appearance_count >= settings.quality_significance_floor {
                    if let Some(rate) = score.satisfaction_rate() {
                        if rate < settings.quality_satisfaction_threshold {
                            tracing::debug!(chunk_id = %c.chunk_id, rate, "dropped by quality gate: low satisfaction");
                            return false;
                        }
                    }
                }
                true
            })
            .collect())
    }

    /// Degrades to the unexpanded content on any fetch failure rather than
    /// propagating — the context block is still usable without its
    /// neighbors.
    async fn expand_adjacent(&self, chunk: &ScoredChunk) -> String {
        let Ok(Some(full)) = self.chunks.get(chunk.chunk_id).await else {
            tracing::warn!(chunk_id = %chunk.chunk_id, "could not refetch chunk for adjacent expansion, using unexpanded content");
            return chunk.content.clone();
        };

        match self.chunks.get_adjacent(&full).await {
            Ok((prev, next)) => {
                let mut out = String::new();
                if let Some(p) = prev {
                    out.push_str(&p.content);
                    out.push_str("\n---\n");
                }
                out.push_str(&chunk.content);
                if let Some(n) = next {
                    out.push_str("\n---\n");
                    out.push_str(&n.content);
                }
                out
            }
            Err(e) => {
                tracing::warn!(chunk_id = %chunk.chunk_id, error = %e, "adjacent-chunk fetch failed, using unexpanded content");
                chunk.content.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RetrievalSettings {
        RetrievalSettings {
            rerank_enabled: false,
            rerank_top_k: 20,
            rerank_return_k: 5,
            adjacent_chunks_enabled: false,
            quality_satisfaction_threshold: 0.3,
            quality_significance_floor: 3,
            hierarchical: false,
        }
    }

    fn candidate(content: &str) -> ScoredChunk {
        ScoredChunk {
            chunk_id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            content: content.to_string(),
            section_hierarchy: Vec::new(),
            heading_context: None,
            chunk_level: crate::db::models::ChunkLevel::Unlabeled,
            parent_chunk_id: None,
            vector_similarity: Some(0.9),
            bm25_score: None,
            combined_score: 0.9,
        }
    }

    #[test]
    fn source_snapshot_carries_all_three_raw_scores() {
        // sources_snapshot retains similarity/bm25/combined scores and
        // section hierarchy, exercised at the struct-shape level since
        // full assembly needs a database.
        let c = candidate("x");
        let snapshot = SourceSnapshot {
            chunk_id: c.chunk_id,
            document_id: c.document_id,
            vector_similarity: c.vector_similarity,
            bm25_score: c.bm25_score,
            combined_score: c.combined_score,
            section_hierarchy: c.section_hierarchy.clone(),
        };
        assert_eq!(snapshot.vector_similarity, Some(0.9));
        assert_eq!(snapshot.bm25_score, None);
    }

    #[test]
    fn settings_from_config_reads_quality_gate_fields() {
        std::env::set_var("DATABASE_URL", "postgres://localhost/test");
        let config = crate::config::Config::from_env().unwrap();
        let s = RetrievalSettings::from_config(&config);
        assert_eq!(s.quality_significance_floor, 3);
        assert!((s.quality_satisfaction_threshold - 0.3).abs() < f32::EPSILON);
        std::env::remove_var("DATABASE_URL");
    }

    #[test]
    fn no_rerank_path_truncates_to_return_k() {
        let s = settings();
        let candidates = vec![candidate("a"), candidate("b"), candidate("c")];
        let truncated: Vec<ScoredChunk> = candidates.into_iter().take(s.rerank_return_k).collect();
        assert_eq!(truncated.len(), 3);
    }
}
