//! Scribe ingestion pipeline
//!
//! Turns an uploaded rulebook PDF into searchable passages:
//! download, text extraction, chunking, embedding, and vector indexing,
//! with the book's status tracked in the database throughout.

pub mod chunker;
pub mod consumer;
pub mod errors;
pub mod indexer;
pub mod orchestrator;
pub mod pdf;
pub mod shutdown;
pub mod tracker;

#[cfg(test)]
mod testing;

pub use chunker::{chunk_text, ChunkingConfig, TextChunk};
pub use consumer::{Disposition, IngestionConsumer, MessageSource, ReceivedMessage};
pub use errors::{IngestionError, PipelineStage};
pub use indexer::{EmbeddingIndexer, IndexReport};
pub use orchestrator::{IngestOutcome, IngestionOrchestrator, SkipReason};
pub use shutdown::ShutdownSignal;
pub use tracker::StatusTracker;
