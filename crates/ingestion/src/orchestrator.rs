//! Ingestion orchestrator
//!
//! Drives one uploaded book through download, extraction, chunking and
//! indexing, recording progress in the book's status. Status is read before
//! anything else, so redelivered events for finished books are no-ops.

use crate::chunker::{chunk_text, ChunkingConfig};
use crate::errors::{IngestionError, PipelineStage};
use crate::indexer::EmbeddingIndexer;
use crate::pdf;
use crate::shutdown::ShutdownSignal;
use crate::tracker::StatusTracker;
use scribe_common::db::BookStore;
use scribe_common::errors::{AppError, Result};
use scribe_common::metrics;
use scribe_common::queue::BookUploadedEvent;
use scribe_common::status::{BookStatus, TransitionOutcome};
use scribe_common::storage::BlobStore;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

/// Why an event was dropped without doing any work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    BookMissing,
    NotPending(BookStatus),
    /// Another worker claimed the book between our read and our claim
    LostRace,
    /// The stored status is not one we know
    UnreadableStatus(String),
}

/// Result of handling one ingestion event
#[derive(Debug)]
pub enum IngestOutcome {
    Skipped(SkipReason),
    Completed {
        chunks: usize,
    },
    Failed {
        stage: PipelineStage,
        error: IngestionError,
    },
    /// The book was claimed but its final status could not be written;
    /// it stays in Processing until an operator sweep picks it up
    Stranded {
        error: String,
    },
    /// Storage was unavailable before the book was claimed
    Deferred {
        error: AppError,
    },
    /// Shutdown began before the book was claimed; it stays pending
    Postponed,
}

impl IngestOutcome {
    /// Whether the triggering message can be removed from the queue
    pub fn should_acknowledge(&self) -> bool {
        !matches!(
            self,
            IngestOutcome::Deferred { .. } | IngestOutcome::Postponed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IngestOutcome::Skipped(_) => "skipped",
            IngestOutcome::Completed { .. } => "completed",
            IngestOutcome::Failed { .. } => "failed",
            IngestOutcome::Stranded { .. } => "stranded",
            IngestOutcome::Deferred { .. } => "deferred",
            IngestOutcome::Postponed => "postponed",
        }
    }
}

pub struct IngestionOrchestrator {
    store: Arc<dyn BookStore>,
    blobs: Arc<dyn BlobStore>,
    tracker: StatusTracker,
    indexer: EmbeddingIndexer,
    chunking: ChunkingConfig,
    cleanup_timeout: Duration,
}

impl IngestionOrchestrator {
    pub fn new(
        store: Arc<dyn BookStore>,
        blobs: Arc<dyn BlobStore>,
        indexer: EmbeddingIndexer,
        chunking: ChunkingConfig,
        cleanup_timeout: Duration,
    ) -> std::result::Result<Self, IngestionError> {
        chunking.validate()?;

        Ok(Self {
            tracker: StatusTracker::new(store.clone()),
            store,
            blobs,
            indexer,
            chunking,
            cleanup_timeout,
        })
    }

    /// Ingest the book named by `event`. Never fails: every problem is
    /// reported through the returned outcome.
    #[instrument(
        skip(self, event, shutdown),
        fields(book_id = %event.book_id, campaign_id = %event.campaign_id)
    )]
    pub async fn ingest(&self, event: &BookUploadedEvent, shutdown: &ShutdownSignal) -> IngestOutcome {
        let started = Instant::now();
        let outcome = self.run(event, shutdown).await;
        let elapsed = started.elapsed();

        metrics::record_ingestion(outcome.as_str(), elapsed);

        match &outcome {
            IngestOutcome::Completed { chunks } => {
                info!(chunks, elapsed_ms = elapsed.as_millis() as u64, "Book ingested");
            }
            IngestOutcome::Skipped(reason) => {
                info!(?reason, "Ingestion skipped");
            }
            IngestOutcome::Failed { stage, error } => {
                warn!(%stage, error = %error, "Book ingestion failed");
            }
            IngestOutcome::Stranded { error } => {
                error!(error = %error, "Book left in processing");
            }
            IngestOutcome::Deferred { error } => {
                warn!(
                    error = %error,
                    error_code = error.code().as_code(),
                    "Ingestion deferred, message will be redelivered"
                );
            }
            IngestOutcome::Postponed => {
                info!("Shutting down, book left pending for redelivery");
            }
        }

        outcome
    }

    async fn run(&self, event: &BookUploadedEvent, shutdown: &ShutdownSignal) -> IngestOutcome {
        let book = match self.store.get_book(event.book_id).await {
            Ok(Some(book)) => book,
            Ok(None) => return IngestOutcome::Skipped(SkipReason::BookMissing),
            Err(error) => return IngestOutcome::Deferred { error },
        };

        match book.book_status() {
            Ok(BookStatus::Pending) => {}
            Ok(status) => return IngestOutcome::Skipped(SkipReason::NotPending(status)),
            Err(unknown) => return IngestOutcome::Skipped(SkipReason::UnreadableStatus(unknown.0)),
        }

        // Only claim books this worker will actually get to work on
        if shutdown.is_triggered() {
            return IngestOutcome::Postponed;
        }

        match self.tracker.start_processing(event.book_id).await {
            Ok(TransitionOutcome::Accepted { .. }) => {}
            Ok(TransitionOutcome::Rejected { .. }) => {
                return IngestOutcome::Skipped(SkipReason::LostRace)
            }
            Err(error) => return IngestOutcome::Deferred { error },
        }

        match self.process(event, shutdown).await {
            Ok(chunks) => match self.finish(self.tracker.mark_completed(event.book_id), shutdown).await {
                Ok(TransitionOutcome::Accepted { .. }) => IngestOutcome::Completed { chunks },
                Ok(TransitionOutcome::Rejected { from, .. }) => IngestOutcome::Stranded {
                    error: format!("completion rejected while book was {}", from),
                },
                Err(error) => IngestOutcome::Stranded { error },
            },
            Err(failure) => {
                let stage = failure.stage();
                match self.finish(self.tracker.mark_failed(event.book_id), shutdown).await {
                    Ok(_) => IngestOutcome::Failed {
                        stage,
                        error: failure,
                    },
                    Err(error) => IngestOutcome::Stranded {
                        error: format!("{} (after {} failure: {})", error, stage, failure),
                    },
                }
            }
        }
    }

    /// Download, extract, chunk and index. Returns the number of chunks stored.
    async fn process(
        &self,
        event: &BookUploadedEvent,
        shutdown: &ShutdownSignal,
    ) -> std::result::Result<usize, IngestionError> {
        let bytes = cancellable(PipelineStage::Download, shutdown, async {
            self.blobs
                .download(&event.storage_locator)
                .await
                .map_err(IngestionError::Download)
        })
        .await?;

        let text = cancellable(PipelineStage::Extract, shutdown, async move {
            match tokio::task::spawn_blocking(move || pdf::extract_text(&bytes)).await {
                Ok(extracted) => extracted,
                Err(e) => Err(IngestionError::Task(e.to_string())),
            }
        })
        .await?;

        let chunks = chunk_text(&text, &self.chunking);

        let report = cancellable(
            PipelineStage::Index,
            shutdown,
            self.indexer
                .index_book(event.book_id, event.campaign_id, &chunks, shutdown),
        )
        .await?;

        Ok(report.chunks_indexed)
    }

    /// Final status write. Bounded by the cleanup timeout once shutdown began.
    async fn finish<F>(&self, write: F, shutdown: &ShutdownSignal) -> std::result::Result<TransitionOutcome, String>
    where
        F: Future<Output = Result<TransitionOutcome>>,
    {
        if !shutdown.is_triggered() {
            return write.await.map_err(|e| e.to_string());
        }

        match tokio::time::timeout(self.cleanup_timeout, write).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!(
                "status write timed out after {}ms",
                self.cleanup_timeout.as_millis()
            )),
        }
    }
}

/// Run a stage, abandoning it as soon as shutdown is requested
async fn cancellable<T, F>(
    stage: PipelineStage,
    shutdown: &ShutdownSignal,
    work: F,
) -> std::result::Result<T, IngestionError>
where
    F: Future<Output = std::result::Result<T, IngestionError>>,
{
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Err(IngestionError::Cancelled { stage }),
        result = work => result,
    }
}
