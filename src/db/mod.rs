//! Persistence layer: a single Postgres+pgvector implementation. The data
//! here is fundamentally relational (documents, chunks, conversations,
//! ratings) with one vector column for embeddings, not a case for a
//! swappable multi-backend vector store.

pub mod migrations;
pub mod models;
pub mod pool;
pub mod repository;

pub use pool::connect;
pub use repository::{
    ChunkRepository, ConversationRepository, DocumentRepository, IngestionJobRepository,
    QualityRepository, RatingRepository, TemplateRepository,
};
