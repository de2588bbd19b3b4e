//! Campaign-scoped semantic search over indexed book chunks

use crate::config::RetrievalConfig;
use crate::embeddings::Embedder;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::retry::RetryPolicy;
use crate::vector::{ScoredChunk, VectorStore};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};
use uuid::Uuid;

pub struct CampaignRetriever {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    retry: RetryPolicy,
    limit: usize,
    min_relevance: f64,
}

impl CampaignRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        retry: RetryPolicy,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            vectors,
            retry,
            limit: config.limit,
            min_relevance: config.min_relevance,
        }
    }

    /// Passages of the campaign's books most relevant to `query`, best first
    #[instrument(skip(self, query), fields(query_len = query.len()))]
    pub async fn relevant_passages(
        &self,
        campaign_id: Uuid,
        query: &str,
    ) -> Result<Vec<ScoredChunk>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::Validation {
                message: "query must not be empty".to_string(),
                field: Some("query".to_string()),
            });
        }

        let started = Instant::now();
        let embedding = self
            .retry
            .run("embed_query", || self.embedder.embed(query))
            .await?;

        let collection = crate::campaign_collection(campaign_id);
        let hits = self
            .retry
            .run("vector_search", || {
                self.vectors
                    .search(&collection, &embedding, self.limit, self.min_relevance)
            })
            .await?;

        metrics::record_search(started.elapsed(), hits.len());
        debug!(collection = %collection, hits = hits.len(), "Campaign search finished");
        Ok(hits)
    }
}
