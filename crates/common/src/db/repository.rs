//! Repository pattern for database operations
//!
//! Provides a clean interface for all data access operations
//! with proper error handling.

use crate::db::models::*;
use crate::db::{BookStore, CatalogStore, DbPool};
use crate::errors::{AppError, Result};
use crate::status::BookStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    // ========================================================================
    // Campaign Operations
    // ========================================================================

    /// Find campaign by ID
    pub async fn find_campaign_by_id(&self, id: Uuid) -> Result<Option<Campaign>> {
        CampaignEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// List campaigns owned by a user, newest first
    pub async fn list_campaigns_by_user(&self, user_id: &str) -> Result<Vec<Campaign>> {
        CampaignEntity::find()
            .filter(CampaignColumn::UserId.eq(user_id))
            .order_by_desc(CampaignColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Book Operations
    // ========================================================================

    /// Find book by ID
    pub async fn find_book_by_id(&self, id: Uuid) -> Result<Option<Book>> {
        // Always read from primary: the ingestion guard must see the latest status.
        BookEntity::find_by_id(id)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    /// Get books for a campaign
    pub async fn list_books_by_campaign(&self, campaign_id: Uuid) -> Result<Vec<Book>> {
        BookEntity::find()
            .filter(BookColumn::CampaignId.eq(campaign_id))
            .order_by_asc(BookColumn::UploadedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Conditionally update a book's status in a single statement:
    ///
    /// `UPDATE books SET status = $to, status_changed_at = NOW()
    ///  WHERE id = $id AND status IN ($from...)`
    pub async fn transition_book_status(
        &self,
        id: Uuid,
        from: &[BookStatus],
        to: BookStatus,
    ) -> Result<bool> {
        let result = BookEntity::update_many()
            .col_expr(BookColumn::Status, Expr::value(to.as_str()))
            .col_expr(BookColumn::StatusChangedAt, Expr::current_timestamp().into())
            .filter(BookColumn::Id.eq(id))
            .filter(BookColumn::Status.is_in(from.iter().map(|s| s.as_str())))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Books claimed for processing before `older_than` and never finished.
    ///
    /// Candidates for an operator reconciliation sweep; this never mutates.
    pub async fn find_stale_processing(&self, older_than: DateTime<Utc>) -> Result<Vec<Book>> {
        BookEntity::find()
            .filter(BookColumn::Status.eq(BookStatus::Processing.as_str()))
            .filter(BookColumn::StatusChangedAt.lt(older_than))
            .order_by_asc(BookColumn::StatusChangedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }
}

#[async_trait]
impl BookStore for Repository {
    async fn get_book(&self, id: Uuid) -> Result<Option<Book>> {
        self.find_book_by_id(id).await
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: &[BookStatus],
        to: BookStatus,
    ) -> Result<bool> {
        self.transition_book_status(id, from, to).await
    }
}

#[async_trait]
impl CatalogStore for Repository {
    async fn find_campaign(&self, id: Uuid) -> Result<Option<Campaign>> {
        self.find_campaign_by_id(id).await
    }

    async fn list_campaigns(&self, user_id: &str) -> Result<Vec<Campaign>> {
        self.list_campaigns_by_user(user_id).await
    }

    async fn insert_campaign(&self, campaign: Campaign) -> Result<Campaign> {
        let active = CampaignActiveModel {
            id: Set(campaign.id),
            name: Set(campaign.name),
            description: Set(campaign.description),
            system: Set(campaign.system),
            created_at: Set(campaign.created_at),
            user_id: Set(campaign.user_id),
        };

        active.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn save_campaign(&self, campaign: Campaign) -> Result<Campaign> {
        let existing = CampaignEntity::find_by_id(campaign.id)
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::CampaignNotFound {
                id: campaign.id.to_string(),
            })?;

        let mut active: CampaignActiveModel = existing.into();
        active.name = Set(campaign.name);
        active.description = Set(campaign.description);
        active.system = Set(campaign.system);

        active.update(self.write_conn()).await.map_err(Into::into)
    }

    async fn delete_campaign(&self, id: Uuid) -> Result<bool> {
        let result = CampaignEntity::delete_by_id(id)
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn insert_book(&self, book: Book) -> Result<Book> {
        let active = BookActiveModel {
            id: Set(book.id),
            file_name: Set(book.file_name),
            storage_locator: Set(book.storage_locator),
            status: Set(book.status),
            uploaded_at: Set(book.uploaded_at),
            status_changed_at: Set(book.status_changed_at),
            campaign_id: Set(book.campaign_id),
        };

        active.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn list_books(&self, campaign_id: Uuid) -> Result<Vec<Book>> {
        self.list_books_by_campaign(campaign_id).await
    }

    async fn delete_book(&self, id: Uuid) -> Result<bool> {
        let result = BookEntity::delete_by_id(id)
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }
}
