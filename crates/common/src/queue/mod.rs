//! SQS Queue integration for book ingestion events
//!
//! Provides:
//! - `BookUploadedEvent`, the message produced by uploads and consumed by ingestion
//! - SQS client wrapper
//! - `EventPublisher` seam with an in-memory recorder for tests

use crate::config::QueueConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use aws_sdk_sqs::types::Message;
use aws_sdk_sqs::Client as SqsClient;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tracing::debug;
use uuid::Uuid;

/// A book's bytes are stored and its row is Pending
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookUploadedEvent {
    pub book_id: Uuid,
    pub campaign_id: Uuid,
    pub storage_locator: String,
}

/// Outbound side of the ingestion trigger
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &BookUploadedEvent) -> Result<()>;
}

/// SQS Queue client wrapper
pub struct Queue {
    client: SqsClient,
    url: String,
    max_messages: i32,
    wait_time_seconds: i32,
    visibility_timeout: i32,
}

impl Queue {
    /// Create a new queue client from the default AWS configuration
    pub async fn new(config: &QueueConfig) -> Result<Self> {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::with_client(SqsClient::new(&aws_config), config)
    }

    /// Create with an existing client
    pub fn with_client(client: SqsClient, config: &QueueConfig) -> Result<Self> {
        let url = config
            .ingestion_queue_url
            .clone()
            .ok_or_else(|| AppError::Configuration {
                message: "queue.ingestion_queue_url is not configured".to_string(),
            })?;

        Ok(Self {
            client,
            url,
            // SQS caps a receive at 10 messages and a long poll at 20 seconds
            max_messages: config.batch_size.clamp(1, 10) as i32,
            wait_time_seconds: config.poll_timeout_secs.min(20) as i32,
            visibility_timeout: config.visibility_timeout_secs.min(43_200) as i32,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send a message to the queue
    pub async fn send<T: Serialize>(&self, message: &T) -> Result<String> {
        let body = serde_json::to_string(message).map_err(|e| AppError::QueueError {
            message: format!("Failed to serialize message: {}", e),
        })?;

        let result = self
            .client
            .send_message()
            .queue_url(&self.url)
            .message_body(&body)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to send message: {}", e),
            })?;

        let message_id = result.message_id.unwrap_or_default();
        debug!(message_id = %message_id, "Message sent to queue");

        Ok(message_id)
    }

    /// Receive messages from the queue (long poll)
    pub async fn receive(&self) -> Result<Vec<Message>> {
        let result = self
            .client
            .receive_message()
            .queue_url(&self.url)
            .max_number_of_messages(self.max_messages)
            .visibility_timeout(self.visibility_timeout)
            .wait_time_seconds(self.wait_time_seconds)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to receive messages: {}", e),
            })?;

        let messages = result.messages.unwrap_or_default();
        debug!(count = messages.len(), "Received messages from queue");

        Ok(messages)
    }

    /// Delete (acknowledge) a message after processing
    pub async fn delete(&self, receipt_handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to delete message: {}", e),
            })?;

        debug!("Message deleted from queue");
        Ok(())
    }
}

/// Parse a raw message body as JSON
pub fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| AppError::QueueError {
        message: format!("Failed to parse message: {}", e),
    })
}

#[async_trait]
impl EventPublisher for Queue {
    async fn publish(&self, event: &BookUploadedEvent) -> Result<()> {
        let message_id = self.send(event).await?;
        debug!(
            book_id = %event.book_id,
            message_id = %message_id,
            "Published book uploaded event"
        );
        Ok(())
    }
}

/// Publisher that keeps events in memory
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<BookUploadedEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<BookUploadedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &BookUploadedEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}
