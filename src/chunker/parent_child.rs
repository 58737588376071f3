//! Parent-child chunking strategy for long narrative text. Parents target
//! ~2000 tokens, children ~600 tokens; children carry `parent_chunk_id` and
//! are the only level embedded — parents need no embedding but are returned
//! as context at retrieval time via hierarchical resolution.

use super::{assert_adjacency_ready, enrich_with_prefix, sanitize_unicode, Chunker, ParsedDocument};
use crate::db::models::ChunkLevel;
use crate::db::repository::ChunkDraft;
use text_splitter::{ChunkConfig, TextSplitter};
use tiktoken_rs::cl100k_base;

const PARENT_TARGET_TOKENS: usize = 2000;
const CHILD_TARGET_TOKENS: usize = 600;

pub struct ParentChildChunker;

impl ParentChildChunker {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ParentChildChunker {
    fn default() -> Self {
        Self::new()
    }
}

impl Chunker for ParentChildChunker {
    fn chunk(&self, doc: &ParsedDocument) -> Vec<ChunkDraft> {
        let tokenizer = match cl100k_base() {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, "tiktoken tokenizer unavailable, falling back to paragraph splitting");
                return super::FallbackChunker::new().chunk(doc);
            }
        };

        let parent_config = ChunkConfig::new(PARENT_TARGET_TOKENS).with_sizer(tokenizer.clone());
        let parent_splitter = TextSplitter::new(parent_config);
        let child_config = ChunkConfig::new(CHILD_TARGET_TOKENS).with_sizer(tokenizer.clone());
        let child_splitter = TextSplitter::new(child_config);

        let total_len = doc.full_text.len().max(1);
        let mut drafts = Vec::new();
        let mut chunk_index = 0i32;
        let mut cursor = 0usize;

        for parent_text in parent_splitter.chunks(&doc.full_text) {
            let parent_offset = doc.full_text[cursor..].find(parent_text).map(|p| cursor + p).unwrap_or(cursor);
            cursor = parent_offset + parent_text.len();

            let parent_sanitized = sanitize_unicode(parent_text);
            let parent_content = enrich_with_prefix(&doc.title, &[], &parent_sanitized);
            let parent_token_count = tokenizer.encode_with_special_tokens(&parent_content).len() as i32;
            let parent_position = (parent_offset as f32 / total_len as f32).clamp(0.0, 1.0);
            let parent_local_index = chunk_index;

            drafts.push(ChunkDraft {
                chunk_index,
                content: parent_content,
                token_count: parent_token_count,
                // Parents need no embedding — left None and never
                // filled in by the embedding phase for chunk_level=parent.
                embedding: None,
                section_hierarchy: Vec::new(),
                heading_context: None,
                document_position: parent_position,
                bounding_box: None,
                parent_local_index: None,
                chunk_level: ChunkLevel::Parent,
                metadata: serde_json::json!({}),
            });
            chunk_index += 1;

            for child_text in child_splitter.chunks(parent_text) {
                let sanitized = sanitize_unicode(child_text);
                let content = enrich_with_prefix(&doc.title, &[], &sanitized);
                let token_count = tokenizer.encode_with_special_tokens(&content).len() as i32;

                drafts.push(ChunkDraft {
                    chunk_index,
                    content,
                    token_count,
                    embedding: None,
                    section_hierarchy: Vec::new(),
                    heading_context: None,
                    document_position: parent_position,
                    bounding_box: None,
                    parent_local_index: Some(parent_local_index),
                    chunk_level: ChunkLevel::Child,
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

    fn doc(text: &str) -> ParsedDocument {
        ParsedDocument { title: "Roman".to_string(), full_text: text.to_string(), headings: Vec::new() }
    }

    #[test]
    fn every_child_has_a_parent_in_the_same_draft_set() {
        let text = "Il était une fois. ".repeat(3000);
        let drafts = ParentChildChunker::new().chunk(&doc(&text));

        let parent_indices: std::collections::HashSet<i32> = drafts
            .iter()
            .filter(|d| d.chunk_level == ChunkLevel::Parent)
            .map(|d| d.chunk_index)
            .collect();

        for draft in drafts.iter().filter(|d| d.chunk_level == ChunkLevel::Child) {
            let parent_idx = draft.parent_local_index.expect("child must carry a parent index");
            assert!(parent_indices.contains(&parent_idx));
        }
    }

    #[test]
    fn parents_have_no_parent_local_index() {
        let text = "Phrase narrative. ".repeat(1000);
        let drafts = ParentChildChunker::new().chunk(&doc(&text));
        for draft in drafts.iter().filter(|d| d.chunk_level == ChunkLevel::Parent) {
            assert!(draft.parent_local_index.is_none());
        }
    }
}
