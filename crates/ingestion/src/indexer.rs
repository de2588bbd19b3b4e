//! Embedding indexer: embeds each chunk and stores it in the campaign collection

use crate::chunker::TextChunk;
use crate::errors::{IngestionError, PipelineStage};
use crate::shutdown::ShutdownSignal;
use scribe_common::embeddings::Embedder;
use scribe_common::metrics;
use scribe_common::retry::RetryPolicy;
use scribe_common::campaign_collection;
use scribe_common::vector::{VectorRecord, VectorStore};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Result of indexing one book
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexReport {
    pub collection: String,
    pub chunks_indexed: usize,
}

pub struct EmbeddingIndexer {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    retry: RetryPolicy,
}

impl EmbeddingIndexer {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            embedder,
            vectors,
            retry,
        }
    }

    /// Embed and upsert every chunk, in order.
    ///
    /// A chunk that still fails after its retries aborts the book. Records use
    /// deterministic ids, so indexing the same book again overwrites them.
    #[instrument(skip(self, chunks, shutdown), fields(chunk_count = chunks.len()))]
    pub async fn index_book(
        &self,
        book_id: Uuid,
        campaign_id: Uuid,
        chunks: &[TextChunk],
        shutdown: &ShutdownSignal,
    ) -> Result<IndexReport, IngestionError> {
        let collection = campaign_collection(campaign_id);

        for chunk in chunks {
            if shutdown.is_triggered() {
                return Err(IngestionError::Cancelled {
                    stage: PipelineStage::Index,
                });
            }

            let failed = |source| IngestionError::Indexing {
                chunk_index: chunk.index,
                source,
            };

            let embedding = self
                .retry
                .run("embed", || self.embedder.embed(&chunk.content))
                .await
                .map_err(failed)?;

            let record =
                VectorRecord::for_chunk(book_id, chunk.index, chunk.content.clone(), embedding);

            self.retry
                .run("upsert", || self.vectors.upsert(&collection, record.clone()))
                .await
                .map_err(failed)?;

            debug!(chunk_index = chunk.index, "Chunk indexed");
        }

        metrics::record_chunks_indexed(chunks.len());

        Ok(IndexReport {
            collection,
            chunks_indexed: chunks.len(),
        })
    }
}
