//! Integration tests against a real Postgres + pgvector instance.
//!
//! These run only when infra is actually reachable, and are `#[ignore]`d by
//! default so `cargo test` stays hermetic without a database.
//!
//! Set `DATABASE_URL` to a scratch Postgres database with the `vector`
//! extension installable (e.g. `pgvector/pgvector` docker image) to run
//! them: `DATABASE_URL=postgres://... cargo test --test retrieval_tests -- --ignored`.

use ragfab::db::migrations;
use ragfab::db::repository::{ChunkDraft, ChunkRepository, DocumentRepository};
use ragfab::db::models::ChunkLevel;
use ragfab::retrieval::{RetrievalEngine, SearchParams};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::path::Path;

fn should_run_live_tests() -> bool {
    std::env::var("DATABASE_URL").is_ok()
}

macro_rules! skip_if_not_live {
    () => {
        if !should_run_live_tests() {
            eprintln!("Skipping live test. Set DATABASE_URL=postgres://... to run against a real database.");
            return;
        }
    };
}

const EMBEDDING_DIM: usize = 1024;

/// A 1024-dim embedding with a single weighted component, the rest zero.
/// Cosine similarity between two such vectors is easy to reason about by
/// hand, which is what the fallback-ordering assertions below depend on.
fn embedding_with(weights: &[(usize, f32)]) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    for &(i, w) in weights {
        v[i] = w;
    }
    v
}

async fn live_pool() -> PgPool {
    let database_url = std::env::var("DATABASE_URL").expect("checked by skip_if_not_live!");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("connect to live test database");
    migrations::run(&pool, Path::new("migrations"))
        .await
        .expect("run migrations");
    pool
}

async fn seed_document(pool: &PgPool, source_path: &str) -> uuid::Uuid {
    let documents = DocumentRepository::new(pool.clone());
    let doc = documents
        .upsert(
            "Manuel RH",
            source_path,
            "texte complet du document",
            json!({}),
            None,
        )
        .await
        .expect("upsert document");
    doc.id
}

fn draft(content: &str, embedding: Vec<f32>, index: i32) -> ChunkDraft {
    ChunkDraft {
        chunk_index: index,
        content: content.to_string(),
        token_count: content.split_whitespace().count() as i32,
        embedding: Some(embedding),
        section_hierarchy: vec![],
        heading_context: None,
        document_position: index as f32,
        bounding_box: None,
        parent_local_index: None,
        chunk_level: ChunkLevel::Unlabeled,
        metadata: json!({}),
    }
}

/// Re-running a migration that has already succeeded is a no-op,
/// reported as an empty `applied` list.
#[tokio::test]
#[ignore]
async fn rerunning_migrations_is_idempotent() {
    skip_if_not_live!();
    let pool = live_pool().await;

    let second_run = migrations::run(&pool, Path::new("migrations"))
        .await
        .expect("second migration run");
    assert!(second_run.is_empty(), "no migration file should re-apply: {second_run:?}");
}

/// An acronym query biases toward keyword matching via the adaptive α
/// table, so the chunk containing the literal acronym "RTT" outranks a
/// semantically unrelated chunk even though both chunks are given identical
/// embeddings (pure keyword signal).
#[tokio::test]
#[ignore]
async fn acronym_query_ranks_the_keyword_matching_chunk_first() {
    skip_if_not_live!();
    let pool = live_pool().await;
    let document_id = seed_document(&pool, "tests/fixtures/acronym-bias.txt").await;

    let shared_embedding = embedding_with(&[(0, 1.0)]);
    let drafts = vec![
        draft(
            "Les jours de RTT sont accordés selon l'ancienneté.",
            shared_embedding.clone(),
            0,
        ),
        draft(
            "Le télétravail requiert un accord préalable.",
            shared_embedding.clone(),
            1,
        ),
    ];
    let chunks = ChunkRepository::new(pool.clone());
    chunks
        .replace_document_chunks(document_id, &drafts)
        .await
        .expect("persist chunks");

    let engine = RetrievalEngine::new(pool);
    let query_embedding = shared_embedding;
    let results = engine
        .search(SearchParams {
            query_text: "procédure RTT",
            tsquery_text: Some("procédure & RTT"),
            query_embedding: &query_embedding,
            k: 5,
            alpha: 0.3,
            universe_ids: &[],
            hierarchical: false,
        })
        .await
        .expect("hybrid search");

    assert!(!results.is_empty());
    assert!(
        results[0].content.contains("RTT"),
        "expected the RTT chunk to rank first, got: {}",
        results[0].content
    );
}

/// A query made entirely of French stopwords produces no tsquery, so
/// retrieval falls back to vector-only search instead of erroring, and
/// results come back in cosine order.
#[tokio::test]
#[ignore]
async fn all_stopword_query_falls_back_to_vector_only_search() {
    skip_if_not_live!();
    let pool = live_pool().await;
    let document_id = seed_document(&pool, "tests/fixtures/stopword-fallback.txt").await;

    let close_embedding = embedding_with(&[(0, 0.9), (1, 0.1)]);
    let far_embedding = embedding_with(&[(0, 0.1), (1, 0.9)]);
    let drafts = vec![
        draft("Les congés payés se calculent par mois travaillé.", close_embedding, 0),
        draft("Le remboursement des frais professionnels est mensuel.", far_embedding, 1),
    ];
    let chunks = ChunkRepository::new(pool.clone());
    let persisted = chunks
        .replace_document_chunks(document_id, &drafts)
        .await
        .expect("persist chunks");
    assert_eq!(persisted.len(), 2);

    let preprocessed = ragfab::preprocessor::process("le la les");
    assert!(preprocessed.tsquery_text.is_none(), "all-stopword query must yield no tsquery");

    let engine = RetrievalEngine::new(pool);
    let query_embedding = embedding_with(&[(0, 1.0)]);
    let results = engine
        .search(SearchParams {
            query_text: "le la les",
            tsquery_text: preprocessed.tsquery_text.as_deref(),
            query_embedding: &query_embedding,
            k: 5,
            alpha: preprocessed.adaptive_alpha,
            universe_ids: &[],
            hierarchical: false,
        })
        .await
        .expect("vector-only fallback search should not error");

    assert_eq!(results.len(), 2, "both chunks should be returned, no query-side error");
    assert!(results[0].content.contains("congés"), "the cosine-closer chunk should rank first");
    assert!(results.iter().all(|r| r.bm25_score.is_none()), "vector-only fallback carries no bm25 score");
}
