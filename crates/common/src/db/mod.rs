//! Database layer for Scribe
//!
//! Provides:
//! - SeaORM entity models
//! - Repository pattern for data access
//! - Connection pool management and migrations
//! - Store traits consumed by the ingestion pipeline and services

mod memory;
pub mod models;
mod repository;

pub use memory::InMemoryStore;
pub use repository::Repository;

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use crate::status::BookStatus;
use async_trait::async_trait;
use models::{Book, Campaign};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Book access needed by the ingestion pipeline.
///
/// `transition_status` is a single-row compare-and-set: the row is updated to
/// `to` only while its current status is one of `from`. Implementations must
/// make the check and the write atomic with respect to that row.
#[async_trait]
pub trait BookStore: Send + Sync {
    /// Look up a book by id
    async fn get_book(&self, id: Uuid) -> Result<Option<Book>>;

    /// Move the book to `to` if its status is one of `from`.
    /// Returns whether a row was changed.
    async fn transition_status(&self, id: Uuid, from: &[BookStatus], to: BookStatus)
        -> Result<bool>;
}

/// Campaign and book CRUD used by the library and campaign services
#[async_trait]
pub trait CatalogStore: BookStore {
    async fn find_campaign(&self, id: Uuid) -> Result<Option<Campaign>>;

    async fn list_campaigns(&self, user_id: &str) -> Result<Vec<Campaign>>;

    async fn insert_campaign(&self, campaign: Campaign) -> Result<Campaign>;

    /// Persist name, description and system of an existing campaign
    async fn save_campaign(&self, campaign: Campaign) -> Result<Campaign>;

    /// Delete a campaign and, by cascade, its books
    async fn delete_campaign(&self, id: Uuid) -> Result<bool>;

    async fn insert_book(&self, book: Book) -> Result<Book>;

    /// Books of a campaign, oldest upload first
    async fn list_books(&self, campaign_id: Uuid) -> Result<Vec<Book>>;

    async fn delete_book(&self, id: Uuid) -> Result<bool>;
}

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    /// Primary connection (for writes)
    pub primary: DatabaseConnection,

    /// Read replica connection (optional)
    pub replica: Option<DatabaseConnection>,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to primary database...");

        let primary = Database::connect(connect_options(&config.url, config))
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect to primary: {}", e),
            })?;

        // Connect to replica if configured
        let replica = if let Some(ref read_url) = config.read_url {
            info!("Connecting to read replica...");

            let replica_conn = Database::connect(connect_options(read_url, config))
                .await
                .map_err(|e| AppError::DatabaseConnection {
                    message: format!("Failed to connect to replica: {}", e),
                })?;

            Some(replica_conn)
        } else {
            None
        };

        info!("Database connections established");

        Ok(Self { primary, replica })
    }

    /// Apply the SQL migrations shipped in `migrations/`
    pub async fn migrate(&self) -> Result<()> {
        info!("Applying database migrations...");

        sqlx::migrate!("../../migrations")
            .run(self.primary.get_postgres_connection_pool())
            .await
            .map_err(|e| AppError::Migration {
                message: e.to_string(),
            })?;

        info!("Database migrations applied");
        Ok(())
    }

    /// Get the connection for reads (replica if available, otherwise primary)
    pub fn read(&self) -> &DatabaseConnection {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    /// Get the connection for writes (always primary)
    pub fn write(&self) -> &DatabaseConnection {
        &self.primary
    }
}

fn connect_options(url: &str, config: &DatabaseConfig) -> ConnectOptions {
    let mut opts = ConnectOptions::new(url);
    opts.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .sqlx_logging(false);
    opts
}
