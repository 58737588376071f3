//! Splits parsed documents into chunk drafts ready for embedding and
//! persistence: structure-aware, size-adaptive segmentation backed by
//! `text-splitter`'s `ChunkConfig`/`TextSplitter` building blocks.

mod fallback;
mod hybrid;
mod parent_child;
mod sanitize;

pub use fallback::FallbackChunker;
pub use hybrid::HybridChunker;
pub use parent_child::ParentChildChunker;
pub use sanitize::sanitize_unicode;

use crate::db::repository::ChunkDraft;

/// A document as handed to the chunker by the ingestion pipeline, after
/// external parsing.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub title: String,
    pub full_text: String,
    /// Pre-extracted section headings in document order, if the parser
    /// could detect document structure; empty for plain text.
    pub headings: Vec<ParsedHeading>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ParsedHeading {
    pub text: String,
    pub level: u8,
    /// Character offset into `full_text` where this heading's section body
    /// starts.
    pub offset: usize,
}

/// Target token budget for the hybrid chunker, selected by document size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    pub target_tokens: usize,
    pub overlap_tokens: usize,
}

impl TokenBudget {
    /// `< 1000 words -> 1500 tokens`, `1000-5000 -> 800`, `> 5000 -> 512`,
    /// overlap fixed at 400 tokens regardless of bucket.
    pub fn for_word_count(word_count: usize) -> Self {
        let target_tokens = if word_count < 1000 {
            1500
        } else if word_count <= 5000 {
            800
        } else {
            512
        };
        Self { target_tokens, overlap_tokens: 400 }
    }
}

/// Strategy contract: turn a parsed document into chunk drafts ready for
/// embedding and persistence, with section hierarchy, heading context,
/// document position, and token counts populated.
pub trait Chunker {
    fn chunk(&self, doc: &ParsedDocument) -> Vec<ChunkDraft>;
}

/// Assign `prev_chunk_id`/`next_chunk_id` analogues in document order as a
/// single pass — the actual id linkage happens at persistence time (ids
/// don't exist until insert), so here we only need the drafts to already be
/// ordered by `chunk_index`; this function documents and enforces that
/// invariant for every chunker output.
pub fn assert_adjacency_ready(drafts: &[ChunkDraft]) {
    debug_assert!(
        drafts.windows(2).all(|w| w[0].chunk_index < w[1].chunk_index),
        "chunk drafts must be in strictly increasing chunk_index order for adjacency materialization",
    );
}

/// Build the `[Document: <title>] [Section: <hierarchy>]\n\n<content>`
/// prefix used both for the stored content and for what gets embedded, so
/// retrieval-time match and embedding match stay consistent.
pub fn enrich_with_prefix(title: &str, section_hierarchy: &[String], content: &str) -> String {
    let section = if section_hierarchy.is_empty() {
        "(root)".to_string()
    } else {
        section_hierarchy.join(" > ")
    };
    format!("[Document: {title}] [Section: {section}]\n\n{content}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_budget_thresholds() {
        assert_eq!(TokenBudget::for_word_count(500).target_tokens, 1500);
        assert_eq!(TokenBudget::for_word_count(999).target_tokens, 1500);
        assert_eq!(TokenBudget::for_word_count(1000).target_tokens, 800);
        assert_eq!(TokenBudget::for_word_count(5000).target_tokens, 800);
        assert_eq!(TokenBudget::for_word_count(5001).target_tokens, 512);
        assert_eq!(TokenBudget::for_word_count(500).overlap_tokens, 400);
    }

    #[test]
    fn prefix_enrichment_joins_hierarchy_with_arrow() {
        let prefixed = enrich_with_prefix(
            "Guide RH",
            &["Congés".to_string(), "RTT".to_string()],
            "Les jours de RTT sont accordés selon l'ancienneté.",
        );
        assert!(prefixed.starts_with("[Document: Guide RH] [Section: Congés > RTT]\n\n"));
    }

    #[test]
    fn prefix_enrichment_handles_empty_hierarchy() {
        let prefixed = enrich_with_prefix("Doc", &[], "body");
        assert!(prefixed.contains("[Section: (root)]"));
    }
}
