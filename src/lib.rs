//! # RAGFab
//!
//! A French-optimized Retrieval-Augmented-Generation engine: hybrid
//! pgvector/BM25 retrieval with reciprocal rank fusion, adaptive structure-
//! aware chunking, an OpenAI-compatible tool-calling orchestrator, and a
//! thumbs-down feedback loop that can trigger re-ingestion automatically.
//!
//! ## Modules
//!
//! - [`config`] - environment-driven configuration
//! - [`error`] - the engine-wide error taxonomy and retry policy
//! - [`db`] - Postgres/pgvector persistence layer and migration runner
//! - [`embedding`] - batched text→vector client
//! - [`reranker`] - cross-encoder reranking client
//! - [`llm`] - OpenAI-chat-completion-compatible client and tool-calling loop
//! - [`chunker`] - structure-aware and parent/child chunking strategies
//! - [`ingestion`] - the document ingestion job pipeline
//! - [`preprocessor`] - French query preprocessing and contextual reformulation
//! - [`retrieval`] - hybrid dense/keyword search with reciprocal rank fusion
//! - [`context`] - reranking, quality gating, and adjacent-chunk expansion
//! - [`orchestrator`] - the RAG answer pipeline
//! - [`template`] - response template formatting
//! - [`feedback`] - thumbs-down classification and automatic re-ingestion
//! - [`cli`] - terminal output helpers for the worker binary

#![warn(missing_docs)]

/// Terminal output helpers for the worker binary.
pub mod cli;
/// Context assembly: rerank, quality gate, adjacent expansion.
pub mod context;
/// Environment-driven configuration.
pub mod config;
/// Structure-aware and parent/child chunking strategies.
pub mod chunker;
/// Postgres/pgvector persistence layer.
pub mod db;
/// Batched embedding client.
pub mod embedding;
/// The engine-wide error taxonomy.
pub mod error;
/// Thumbs-down classification and automatic re-ingestion.
pub mod feedback;
/// Document ingestion pipeline.
pub mod ingestion;
/// OpenAI-compatible chat client and tool-calling loop.
pub mod llm;
/// The RAG answer orchestrator.
pub mod orchestrator;
/// French query preprocessing.
pub mod preprocessor;
/// Cross-encoder reranking client.
pub mod reranker;
/// Hybrid dense/keyword retrieval.
pub mod retrieval;
/// Response template formatting.
pub mod template;

pub use error::{EngineError, Result};
