//! Book library: upload, list and delete the PDFs of a campaign

use super::owned_campaign;
use crate::db::models::Book;
use crate::db::CatalogStore;
use crate::errors::{AppError, Result};
use crate::queue::{BookUploadedEvent, EventPublisher};
use crate::status::BookStatus;
use crate::storage::{book_object_key, BlobStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// An uploaded file as received from the client
#[derive(Debug, Clone)]
pub struct UploadBook {
    pub campaign_id: Uuid,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Book as exposed to API clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookDto {
    pub id: Uuid,
    pub file_name: String,
    pub status: BookStatus,
    pub uploaded_at: DateTime<Utc>,
    pub campaign_id: Uuid,
}

impl TryFrom<Book> for BookDto {
    type Error = AppError;

    fn try_from(book: Book) -> Result<Self> {
        let status = book.book_status().map_err(|e| AppError::Internal {
            message: format!("book {}: {}", book.id, e),
        })?;

        Ok(Self {
            id: book.id,
            file_name: book.file_name,
            status,
            uploaded_at: book.uploaded_at.with_timezone(&Utc),
            campaign_id: book.campaign_id,
        })
    }
}

pub struct LibraryService {
    store: Arc<dyn CatalogStore>,
    blobs: Arc<dyn BlobStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl LibraryService {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        blobs: Arc<dyn BlobStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            blobs,
            publisher,
        }
    }

    /// Store the PDF, record the book as Pending and announce it for ingestion
    #[instrument(skip(self, upload), fields(campaign_id = %upload.campaign_id, file_name = %upload.file_name))]
    pub async fn upload_book(&self, owner_id: &str, upload: UploadBook) -> Result<BookDto> {
        if upload.bytes.is_empty() {
            return Err(AppError::Validation {
                message: "No file was sent".to_string(),
                field: Some("file".to_string()),
            });
        }
        if upload.content_type != PDF_CONTENT_TYPE {
            return Err(AppError::Validation {
                message: "Only PDF files are allowed".to_string(),
                field: Some("file".to_string()),
            });
        }

        owned_campaign(self.store.as_ref(), owner_id, upload.campaign_id).await?;

        let key = book_object_key(upload.campaign_id, &upload.file_name);
        let locator = self
            .blobs
            .upload(&key, upload.bytes, &upload.content_type)
            .await?;

        let now = Utc::now().fixed_offset();
        let book = Book {
            id: Uuid::new_v4(),
            file_name: upload.file_name,
            storage_locator: locator.clone(),
            status: BookStatus::Pending.as_str().to_string(),
            uploaded_at: now,
            status_changed_at: now,
            campaign_id: upload.campaign_id,
        };

        let book = match self.store.insert_book(book).await {
            Ok(book) => book,
            Err(e) => {
                if let Err(cleanup) = self.blobs.delete(&locator).await {
                    warn!(locator = %locator, error = %cleanup, "Failed to remove orphaned blob");
                }
                return Err(e);
            }
        };

        self.publisher
            .publish(&BookUploadedEvent {
                book_id: book.id,
                campaign_id: book.campaign_id,
                storage_locator: book.storage_locator.clone(),
            })
            .await?;

        info!(book_id = %book.id, locator = %book.storage_locator, "Book uploaded");
        BookDto::try_from(book)
    }

    /// Books of a campaign owned by `owner_id`
    pub async fn list_books(&self, owner_id: &str, campaign_id: Uuid) -> Result<Vec<BookDto>> {
        owned_campaign(self.store.as_ref(), owner_id, campaign_id).await?;

        self.store
            .list_books(campaign_id)
            .await?
            .into_iter()
            .map(BookDto::try_from)
            .collect()
    }

    /// Remove the stored file, then the book row.
    ///
    /// Chunks already indexed for the book stay in the campaign collection.
    #[instrument(skip(self))]
    pub async fn delete_book(&self, owner_id: &str, campaign_id: Uuid, book_id: Uuid) -> Result<()> {
        owned_campaign(self.store.as_ref(), owner_id, campaign_id).await?;

        let book = self
            .store
            .get_book(book_id)
            .await?
            .ok_or_else(|| AppError::BookNotFound {
                id: book_id.to_string(),
            })?;

        if book.campaign_id != campaign_id {
            return Err(AppError::Validation {
                message: format!("book {} does not belong to campaign {}", book_id, campaign_id),
                field: Some("bookId".to_string()),
            });
        }

        self.blobs.delete(&book.storage_locator).await?;
        self.store.delete_book(book_id).await?;

        info!(book_id = %book_id, "Book deleted");
        Ok(())
    }
}
