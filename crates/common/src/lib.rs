//! Scribe Common Library
//!
//! Shared code for the Scribe services including:
//! - Campaign and book models, repository and status state machine
//! - Blob storage, embedding and vector store abstractions
//! - Retry policy for transient upstream failures
//! - Error types and handling
//! - Configuration management
//! - SQS event transport and metrics

pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod metrics;
pub mod queue;
pub mod retry;
pub mod services;
pub mod status;
pub mod storage;
pub mod vector;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{BookStore, CatalogStore, DbPool, Repository};
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use queue::{BookUploadedEvent, EventPublisher};
pub use retry::RetryPolicy;
pub use status::{BookStatus, BookTransition, TransitionOutcome};
pub use storage::BlobStore;
pub use vector::VectorStore;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;

/// Vector store collection holding every chunk of a campaign's books
pub fn campaign_collection(campaign_id: uuid::Uuid) -> String {
    format!("campaign-{}", campaign_id)
}

/// Deterministic vector id for the `index`-th chunk of a book
pub fn chunk_id(book_id: uuid::Uuid, index: usize) -> String {
    format!("book-{}-chunk-{}", book_id, index)
}
