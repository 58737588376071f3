//! Fallback chunker: used when structural parsing fails. Splits on
//! blank-line paragraph boundaries only — "never split at an arbitrary
//! character offset" — and packs consecutive paragraphs up to the default
//! token budget, overlapping by `TokenBudget::for_word_count`'s overlap.

use super::{assert_adjacency_ready, enrich_with_prefix, sanitize_unicode, Chunker, ParsedDocument, TokenBudget};
use crate::db::models::ChunkLevel;
use crate::db::repository::ChunkDraft;

pub struct FallbackChunker;

impl FallbackChunker {
    pub fn new() -> Self {
        Self
    }

    fn paragraphs(text: &str) -> Vec<&str> {
        text.split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect()
    }
}

impl Default for FallbackChunker {
    fn default() -> Self {
        Self::new()
    }
}

impl Chunker for FallbackChunker {
    fn chunk(&self, doc: &ParsedDocument) -> Vec<ChunkDraft> {
        let word_count = doc.full_text.split_whitespace().count();
        let budget = TokenBudget::for_word_count(word_count);
        let paragraphs = Self::paragraphs(&doc.full_text);
        let total_len = doc.full_text.len().max(1);

        let mut drafts = Vec::new();
        let mut chunk_index = 0i32;
        let mut current = String::new();
        let mut current_offset = 0usize;

        // A word roughly tracks a token closely enough for the fallback
        // path's coarse packing — no tokenizer dependency needed here since
        // this path only runs when tiktoken itself is unavailable.
        let approx_tokens = |s: &str| s.split_whitespace().count();

        let mut flush = |content: &mut String, offset: usize, drafts: &mut Vec<ChunkDraft>, index: &mut i32| {
            if content.trim().is_empty() {
                return;
            }
            let sanitized = sanitize_unicode(content.trim());
            let enriched = enrich_with_prefix(&doc.title, &[], &sanitized);
            let token_count = approx_tokens(&enriched) as i32;
            let document_position = (offset as f32 / total_len as f32).clamp(0.0, 1.0);
            drafts.push(ChunkDraft {
                chunk_index: *index,
                content: enriched,
                token_count,
                embedding: None,
                section_hierarchy: Vec::new(),
                heading_context: None,
                document_position,
                bounding_box: None,
                parent_local_index: None,
                chunk_level: ChunkLevel::Unlabeled,
                metadata: serde_json::json!({}),
            });
            *index += 1;
            content.clear();
        };

        for paragraph in paragraphs {
            let would_be = if current.is_empty() {
                approx_tokens(paragraph)
            } else {
                approx_tokens(&current) + approx_tokens(paragraph)
            };

            if would_be > budget.target_tokens && !current.is_empty() {
                flush(&mut current, current_offset, &mut drafts, &mut chunk_index);
                current_offset += paragraph.len();
            }

            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(paragraph);
        }
        flush(&mut current, current_offset, &mut drafts, &mut chunk_index);

        if drafts.is_empty() {
            let sanitized = sanitize_unicode(&doc.full_text);
            let enriched = enrich_with_prefix(&doc.title, &[], &sanitized);
            let token_count = approx_tokens(&enriched) as i32;
            drafts.push(ChunkDraft {
                chunk_index: 0,
                content: enriched,
                token_count,
                embedding: None,
                section_hierarchy: Vec::new(),
                heading_context: None,
                document_position: 0.0,
                bounding_box: None,
                parent_local_index: None,
                chunk_level: ChunkLevel::Unlabeled,
                metadata: serde_json::json!({}),
            });
        }

        assert_adjacency_ready(&drafts);
        drafts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> ParsedDocument {
        ParsedDocument { title: "Doc".to_string(), full_text: text.to_string(), headings: Vec::new() }
    }

    #[test]
    fn splits_on_blank_line_paragraphs_never_mid_paragraph() {
        let drafts = FallbackChunker::new().chunk(&doc("Premier paragraphe.\n\nSecond paragraphe."));
        assert!(!drafts.is_empty());
        for d in &drafts {
            assert!(!d.content.contains("Premier paragra") || d.content.contains("Premier paragraphe."));
        }
    }

    #[test]
    fn empty_document_still_yields_one_chunk() {
        let drafts = FallbackChunker::new().chunk(&doc(""));
        assert_eq!(drafts.len(), 1);
    }

    #[test]
    fn chunk_indices_strictly_increasing() {
        let text = "Paragraphe un.\n\n".repeat(50) + "Dernier.";
        let drafts = FallbackChunker::new().chunk(&doc(&text));
        for pair in drafts.windows(2) {
            assert!(pair[0].chunk_index < pair[1].chunk_index);
        }
    }
}
