//! Queue consumer
//!
//! Long-polls the ingestion queue and feeds each batch through the
//! orchestrator, a bounded number of books at a time. A message is deleted
//! once its book reaches a handled outcome; deferred books stay on the queue
//! and come back after the visibility timeout.

use crate::orchestrator::{IngestOutcome, IngestionOrchestrator};
use crate::shutdown::ShutdownSignal;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use scribe_common::errors::Result;
use scribe_common::metrics;
use scribe_common::queue::{parse_body, BookUploadedEvent, Queue};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Consecutive receive failures before the consumer pauses
const MAX_FAILURES: u32 = 5;
const CIRCUIT_BREAK_DURATION: Duration = Duration::from_secs(30);
const RECEIVE_ERROR_DELAY: Duration = Duration::from_secs(5);

/// A message as seen by the consumer
#[derive(Debug, Clone, Default)]
pub struct ReceivedMessage {
    pub message_id: Option<String>,
    pub body: Option<String>,
    pub receipt_handle: Option<String>,
}

/// Where ingestion events come from
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn receive(&self) -> Result<Vec<ReceivedMessage>>;

    /// Remove a handled message so it is not delivered again
    async fn acknowledge(&self, receipt_handle: &str) -> Result<()>;
}

#[async_trait]
impl MessageSource for Queue {
    async fn receive(&self) -> Result<Vec<ReceivedMessage>> {
        let messages = Queue::receive(self).await?;
        Ok(messages
            .into_iter()
            .map(|m| ReceivedMessage {
                message_id: m.message_id,
                body: m.body,
                receipt_handle: m.receipt_handle,
            })
            .collect())
    }

    async fn acknowledge(&self, receipt_handle: &str) -> Result<()> {
        self.delete(receipt_handle).await
    }
}

/// What happened to one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Book handled; carries the outcome label
    Handled(&'static str),
    /// Body could not be read as an event
    Poison,
    /// Left on the queue for redelivery
    Retained,
}

impl Disposition {
    pub fn should_delete(&self) -> bool {
        !matches!(self, Disposition::Retained)
    }

    fn label(&self) -> &'static str {
        match self {
            Disposition::Handled(outcome) => outcome,
            Disposition::Poison => "poison",
            Disposition::Retained => "retained",
        }
    }
}

pub struct IngestionConsumer {
    source: Arc<dyn MessageSource>,
    orchestrator: Arc<IngestionOrchestrator>,
    max_concurrent_books: usize,
}

impl IngestionConsumer {
    pub fn new(
        source: Arc<dyn MessageSource>,
        orchestrator: Arc<IngestionOrchestrator>,
        max_concurrent_books: usize,
    ) -> Self {
        Self {
            source,
            orchestrator,
            max_concurrent_books: max_concurrent_books.max(1),
        }
    }

    /// Poll until shutdown is requested. In-flight books are cancelled by the
    /// same signal and finish their cleanup before this returns.
    pub async fn run(&self, shutdown: ShutdownSignal) {
        info!(
            max_concurrent_books = self.max_concurrent_books,
            "Ingestion consumer started"
        );

        let mut consecutive_failures = 0;

        while !shutdown.is_triggered() {
            if consecutive_failures >= MAX_FAILURES {
                warn!(
                    failures = consecutive_failures,
                    "Circuit breaker open, pausing..."
                );
                if !pause(&shutdown, CIRCUIT_BREAK_DURATION).await {
                    break;
                }
                consecutive_failures = 0;
                info!("Circuit breaker reset, resuming...");
            }

            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.source.receive() => result,
            };

            match received {
                Ok(messages) => {
                    consecutive_failures = 0;
                    if !messages.is_empty() {
                        self.handle_batch(messages, &shutdown).await;
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    error!(
                        error = %e,
                        failures = consecutive_failures,
                        "Failed to receive messages from queue"
                    );
                    if !pause(&shutdown, RECEIVE_ERROR_DELAY).await {
                        break;
                    }
                }
            }
        }

        info!("Ingestion consumer stopped");
    }

    /// Handle a received batch, up to `max_concurrent_books` at once. Messages
    /// not yet started when shutdown fires are left on the queue.
    pub async fn handle_batch(&self, messages: Vec<ReceivedMessage>, shutdown: &ShutdownSignal) {
        debug!(count = messages.len(), "Handling batch");

        stream::iter(messages)
            .for_each_concurrent(self.max_concurrent_books, |message| async move {
                let disposition = self.handle_message(&message, shutdown).await;
                metrics::record_queue_message(disposition.label());

                if !disposition.should_delete() {
                    return;
                }
                let Some(receipt_handle) = message.receipt_handle.as_deref() else {
                    warn!(message_id = ?message.message_id, "Message has no receipt handle");
                    return;
                };
                if let Err(e) = self.source.acknowledge(receipt_handle).await {
                    error!(
                        message_id = ?message.message_id,
                        error = %e,
                        "Failed to delete message"
                    );
                }
            })
            .await;
    }

    /// Parse one message and ingest the book it names
    pub async fn handle_message(
        &self,
        message: &ReceivedMessage,
        shutdown: &ShutdownSignal,
    ) -> Disposition {
        if shutdown.is_triggered() {
            debug!(message_id = ?message.message_id, "Shutting down, leaving message on queue");
            return Disposition::Retained;
        }

        let event = match message.body.as_deref().map(parse_body::<BookUploadedEvent>) {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                error!(message_id = ?message.message_id, error = %e, "Dropping unreadable message");
                return Disposition::Poison;
            }
            None => {
                error!(message_id = ?message.message_id, "Dropping message without body");
                return Disposition::Poison;
            }
        };

        let outcome: IngestOutcome = self.orchestrator.ingest(&event, shutdown).await;
        if outcome.should_acknowledge() {
            Disposition::Handled(outcome.as_str())
        } else {
            Disposition::Retained
        }
    }
}

/// Sleep for `duration` unless shutdown comes first. Returns false on shutdown.
async fn pause(shutdown: &ShutdownSignal, duration: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::ChunkingConfig;
    use crate::indexer::EmbeddingIndexer;
    use crate::testing::{build_pdf, seed_book, CountingVectorStore, FlakyStore, Script, ScriptedEmbedder};
    use scribe_common::db::{BookStore, InMemoryStore};
    use scribe_common::errors::AppError;
    use scribe_common::retry::RetryPolicy;
    use scribe_common::status::BookStatus;
    use scribe_common::storage::MemoryBlobStore;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Source replaying fixed batches, then requesting shutdown
    struct ScriptedSource {
        batches: Mutex<VecDeque<Result<Vec<ReceivedMessage>>>>,
        acknowledged: Mutex<Vec<String>>,
        shutdown: ShutdownSignal,
    }

    impl ScriptedSource {
        fn new(batches: Vec<Result<Vec<ReceivedMessage>>>, shutdown: ShutdownSignal) -> Arc<Self> {
            Arc::new(Self {
                batches: Mutex::new(batches.into()),
                acknowledged: Mutex::new(Vec::new()),
                shutdown,
            })
        }

        fn acknowledged(&self) -> Vec<String> {
            self.acknowledged.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageSource for ScriptedSource {
        async fn receive(&self) -> Result<Vec<ReceivedMessage>> {
            let next = self.batches.lock().unwrap().pop_front();
            match next {
                Some(batch) => batch,
                None => {
                    self.shutdown.trigger();
                    Ok(Vec::new())
                }
            }
        }

        async fn acknowledge(&self, receipt_handle: &str) -> Result<()> {
            self.acknowledged
                .lock()
                .unwrap()
                .push(receipt_handle.to_string());
            Ok(())
        }
    }

    fn message(receipt: &str, body: &str) -> ReceivedMessage {
        ReceivedMessage {
            message_id: Some(format!("id-{}", receipt)),
            body: Some(body.to_string()),
            receipt_handle: Some(receipt.to_string()),
        }
    }

    fn event_body(event: &BookUploadedEvent) -> String {
        serde_json::to_string(event).unwrap()
    }

    fn orchestrator(store: Arc<dyn BookStore>, blobs: Arc<MemoryBlobStore>) -> Arc<IngestionOrchestrator> {
        let indexer = EmbeddingIndexer::new(
            ScriptedEmbedder::new(Script::FailFirst(0)),
            CountingVectorStore::new(),
            RetryPolicy::new(3, Duration::from_millis(1), 2.0),
        );
        Arc::new(
            IngestionOrchestrator::new(
                store,
                blobs,
                indexer,
                ChunkingConfig::default(),
                Duration::from_millis(200),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_batch_ingests_books_and_deletes_messages() {
        let store = Arc::new(InMemoryStore::new());
        let blobs = Arc::new(MemoryBlobStore::default());
        let shutdown = ShutdownSignal::new();

        let mut messages = Vec::new();
        let mut books = Vec::new();
        for n in 0..3 {
            let locator = blobs.put(
                &format!("books/{}.pdf", n),
                build_pdf(&["BT /F1 12 Tf 50 700 Td (Chapter one.) Tj ET"]),
            );
            let book = seed_book(&store, BookStatus::Pending, &locator);
            let event = BookUploadedEvent {
                book_id: book.id,
                campaign_id: book.campaign_id,
                storage_locator: locator,
            };
            messages.push(message(&format!("r{}", n), &event_body(&event)));
            books.push(book.id);
        }

        let source = ScriptedSource::new(vec![Ok(messages)], shutdown.clone());
        let consumer = IngestionConsumer::new(source.clone(), orchestrator(store.clone(), blobs), 2);
        consumer.run(shutdown).await;

        let mut acked = source.acknowledged();
        acked.sort();
        assert_eq!(acked, vec!["r0", "r1", "r2"]);
        for id in books {
            assert_eq!(store.status_of(id), Some(BookStatus::Completed));
        }
    }

    #[tokio::test]
    async fn test_poison_message_is_deleted() {
        let store = Arc::new(InMemoryStore::new());
        let consumer = IngestionConsumer::new(
            ScriptedSource::new(Vec::new(), ShutdownSignal::new()),
            orchestrator(store, Arc::new(MemoryBlobStore::default())),
            1,
        );

        let shutdown = ShutdownSignal::new();
        let garbage = consumer
            .handle_message(&message("r1", "{not json"), &shutdown)
            .await;
        let empty = consumer
            .handle_message(&ReceivedMessage::default(), &shutdown)
            .await;

        assert_eq!(garbage, Disposition::Poison);
        assert_eq!(empty, Disposition::Poison);
        assert!(garbage.should_delete());
    }

    #[tokio::test]
    async fn test_deferred_book_stays_on_queue() {
        let store = FlakyStore::failing_reads();
        let book = seed_book(&store.inner, BookStatus::Pending, "s3://scribe-books/a.pdf");
        let event = BookUploadedEvent {
            book_id: book.id,
            campaign_id: book.campaign_id,
            storage_locator: book.storage_locator.clone(),
        };

        let shutdown = ShutdownSignal::new();
        let source = ScriptedSource::new(
            vec![Ok(vec![message("keep", &event_body(&event))])],
            shutdown.clone(),
        );
        let consumer = IngestionConsumer::new(
            source.clone(),
            orchestrator(store, Arc::new(MemoryBlobStore::default())),
            1,
        );
        consumer.run(shutdown).await;

        assert!(source.acknowledged().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_book_is_acknowledged() {
        let store = Arc::new(InMemoryStore::new());
        let consumer = IngestionConsumer::new(
            ScriptedSource::new(Vec::new(), ShutdownSignal::new()),
            orchestrator(store, Arc::new(MemoryBlobStore::default())),
            1,
        );
        let event = BookUploadedEvent {
            book_id: uuid::Uuid::new_v4(),
            campaign_id: uuid::Uuid::new_v4(),
            storage_locator: "s3://scribe-books/missing.pdf".to_string(),
        };

        let disposition = consumer
            .handle_message(&message("r1", &event_body(&event)), &ShutdownSignal::new())
            .await;

        assert_eq!(disposition, Disposition::Handled("skipped"));
    }

    #[tokio::test]
    async fn test_batch_after_shutdown_leaves_messages_queued() {
        let store = Arc::new(InMemoryStore::new());
        let blobs = Arc::new(MemoryBlobStore::default());
        let locator = blobs.put(
            "books/late.pdf",
            build_pdf(&["BT /F1 12 Tf 50 700 Td (Chapter one.) Tj ET"]),
        );
        let book = seed_book(&store, BookStatus::Pending, &locator);
        let event = BookUploadedEvent {
            book_id: book.id,
            campaign_id: book.campaign_id,
            storage_locator: locator,
        };

        let shutdown = ShutdownSignal::new();
        let source = ScriptedSource::new(Vec::new(), shutdown.clone());
        let consumer = IngestionConsumer::new(source.clone(), orchestrator(store.clone(), blobs), 2);
        shutdown.trigger();

        let disposition = consumer
            .handle_message(&message("late", &event_body(&event)), &shutdown)
            .await;
        consumer
            .handle_batch(vec![message("late", &event_body(&event))], &shutdown)
            .await;

        assert_eq!(disposition, Disposition::Retained);
        assert!(source.acknowledged().is_empty());
        assert_eq!(store.status_history(book.id), vec![BookStatus::Pending]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_errors_back_off_until_shutdown() {
        let shutdown = ShutdownSignal::new();
        let failure = || {
            Err(AppError::QueueError {
                message: "throttled".to_string(),
            })
        };
        let source = ScriptedSource::new(vec![failure(), failure()], shutdown.clone());
        let consumer = IngestionConsumer::new(
            source.clone(),
            orchestrator(Arc::new(InMemoryStore::new()), Arc::new(MemoryBlobStore::default())),
            1,
        );

        consumer.run(shutdown.clone()).await;

        assert!(shutdown.is_triggered());
        assert!(source.acknowledged().is_empty());
    }

    #[tokio::test]
    async fn test_stops_immediately_when_already_shut_down() {
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();
        let source = ScriptedSource::new(vec![Ok(vec![message("r1", "{}")])], shutdown.clone());
        let consumer = IngestionConsumer::new(
            source.clone(),
            orchestrator(Arc::new(InMemoryStore::new()), Arc::new(MemoryBlobStore::default())),
            1,
        );

        tokio_test::assert_ready!(tokio_test::task::spawn(consumer.run(shutdown)).poll());
        assert!(source.acknowledged().is_empty());
    }
}
