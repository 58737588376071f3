//! Default chunking strategy: structure-aware, size-adaptive segmentation
//! built on `text_splitter::TextSplitter` with a token-based,
//! document-size-adaptive budget, using the `tiktoken-rs` sizer.

use super::{assert_adjacency_ready, enrich_with_prefix, sanitize_unicode, Chunker, ParsedDocument, TokenBudget};
use crate::db::models::ChunkLevel;
use crate::db::repository::ChunkDraft;
use text_splitter::{ChunkConfig, TextSplitter};
use tiktoken_rs::cl100k_base;

/// A document split into structural sections by heading, each carrying its
/// own hierarchy path for prefix enrichment.
struct Section {
    hierarchy: Vec<String>,
    heading_context: Option<String>,
    text: String,
    start_offset: usize,
}

pub struct HybridChunker;

impl HybridChunker {
    pub fn new() -> Self {
        Self
    }

    fn sections(doc: &ParsedDocument) -> Vec<Section> {
        if doc.headings.is_empty() {
            return vec![Section {
                hierarchy: Vec::new(),
                heading_context: None,
                text: doc.full_text.clone(),
                start_offset: 0,
            }];
        }

        let mut sections = Vec::with_capacity(doc.headings.len());
        let mut stack: Vec<(u8, String)> = Vec::new();

        for (i, heading) in doc.headings.iter().enumerate() {
            while stack.last().is_some_and(|(level, _)| *level >= heading.level) {
                stack.pop();
            }
            stack.push((heading.level, heading.text.clone()));

            let end = doc
                .headings
                .get(i + 1)
                .map(|next| next.offset)
                .unwrap_or(doc.full_text.len());
            let body = doc.full_text.get(heading.offset..end).unwrap_or_default();

            sections.push(Section {
                hierarchy: stack.iter().map(|(_, text)| text.clone()).collect(),
                heading_context: Some(heading.text.clone()),
                text: body.to_string(),
                start_offset: heading.offset,
            });
        }
        sections
    }
}

impl Default for HybridChunker {
    fn default() -> Self {
        Self::new()
    }
}

impl Chunker for HybridChunker {
    fn chunk(&self, doc: &ParsedDocument) -> Vec<ChunkDraft> {
        let word_count = doc.full_text.split_whitespace().count();
        let budget = TokenBudget::for_word_count(word_count);
        let total_len = doc.full_text.len().max(1);

        let tokenizer = match cl100k_base() {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, "tiktoken tokenizer unavailable, falling back to paragraph splitting");
                return super::FallbackChunker::new().chunk(doc);
            }
        };

        let config = ChunkConfig::new(budget.target_tokens)
            .with_sizer(tokenizer.clone())
            .with_overlap(budget.overlap_tokens)
            .map(|c| c)
            .unwrap_or_else(|_| ChunkConfig::new(budget.target_tokens).with_sizer(tokenizer.clone()));
        let splitter = TextSplitter::new(config);

        let mut drafts = Vec::new();
        let mut chunk_index = 0i32;

        for section in Self::sections(doc) {
            for chunk_text in splitter.chunks(&section.text) {
                let sanitized = sanitize_unicode(chunk_text);
                let content = enrich_with_prefix(&doc.title, &section.hierarchy, &sanitized);
                let token_count = tokenizer.encode_with_special_tokens(&content).len() as i32;
                let document_position = (section.start_offset as f32 / total_len as f32).clamp(0.0, 1.0);

                drafts.push(ChunkDraft {
                    chunk_index,
                    content,
                    token_count,
                    embedding: None,
                    section_hierarchy: section.hierarchy.clone(),
                    heading_context: section.heading_context.clone(),
                    document_position,
                    bounding_box: None,
                    parent_local_index: None,
                    chunk_level: ChunkLevel::Unlabeled,
                    metadata: serde_json::json!({}),
                });
                chunk_index += 1;
            }
        }

        assert_adjacency_ready(&drafts);
        drafts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::ParsedHeading;

    fn plain_doc(text: &str) -> ParsedDocument {
        ParsedDocument {
            title: "Guide RH".to_string(),
            full_text: text.to_string(),
            headings: Vec::new(),
        }
    }

    #[test]
    fn produces_at_least_one_chunk_for_short_document() {
        let doc = plain_doc("Les jours de RTT sont accordés selon l'ancienneté.");
        let drafts = HybridChunker::new().chunk(&doc);
        assert!(!drafts.is_empty());
        assert!(drafts[0].content.starts_with("[Document: Guide RH]"));
    }

    #[test]
    fn chunk_indices_are_strictly_increasing() {
        let doc = plain_doc(&"Paragraphe. ".repeat(2000));
        let drafts = HybridChunker::new().chunk(&doc);
        for pair in drafts.windows(2) {
            assert!(pair[0].chunk_index < pair[1].chunk_index);
        }
    }

    #[test]
    fn headings_populate_section_hierarchy() {
        let doc = ParsedDocument {
            title: "Guide RH".to_string(),
            full_text: "Intro.\n\nRTT et congés.\n\nDétails sur l'ancienneté.".to_string(),
            headings: vec![
                ParsedHeading { text: "Congés".to_string(), level: 1, offset: 0 },
                ParsedHeading { text: "RTT".to_string(), level: 2, offset: 8 },
            ],
        };
        let drafts = HybridChunker::new().chunk(&doc);
        assert!(drafts.iter().any(|d| d.section_hierarchy == vec!["Congés".to_string(), "RTT".to_string()]));
    }
}
