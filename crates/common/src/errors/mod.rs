//! Error types for Scribe services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - Transient/permanent classification for upstream calls
//! - Status code mapping for API adapters
//! - Error codes for client handling

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    InvalidFormat,

    // Authentication errors (2xxx)
    Unauthorized,

    // Authorization errors (3xxx)
    Forbidden,

    // Resource errors (4xxx)
    NotFound,
    BookNotFound,
    CampaignNotFound,
    BlobNotFound,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,
    MigrationError,

    // External service errors (8xxx)
    UpstreamError,
    EmbeddingError,
    EmbeddingTimeout,
    VectorStoreError,
    BlobStorageError,
    QueueError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,

    // Service unavailable
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidFormat => 1003,

            ErrorCode::Unauthorized => 2001,

            ErrorCode::Forbidden => 3001,

            ErrorCode::NotFound => 4001,
            ErrorCode::BookNotFound => 4002,
            ErrorCode::CampaignNotFound => 4003,
            ErrorCode::BlobNotFound => 4004,

            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,
            ErrorCode::MigrationError => 7003,

            ErrorCode::UpstreamError => 8001,
            ErrorCode::EmbeddingError => 8002,
            ErrorCode::EmbeddingTimeout => 8003,
            ErrorCode::VectorStoreError => 8004,
            ErrorCode::BlobStorageError => 8005,
            ErrorCode::QueueError => 8006,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,

            ErrorCode::ServiceUnavailable => 9999,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    // Authentication errors
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    // Authorization errors
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Book not found: {id}")]
    BookNotFound { id: String },

    #[error("Campaign not found: {id}")]
    CampaignNotFound { id: String },

    #[error("Blob not found: {locator}")]
    BlobNotFound { locator: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    #[error("Migration error: {message}")]
    Migration { message: String },

    // External service errors
    #[error("{service} returned {status}: {message}")]
    Upstream {
        service: String,
        status: u16,
        message: String,
    },

    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Embedding timeout after {timeout_ms}ms")]
    EmbeddingTimeout { timeout_ms: u64 },

    #[error("Vector store error: {message}")]
    VectorStore { message: String },

    #[error("Blob storage error: {message}")]
    BlobStorage { message: String },

    #[error("Queue error: {message}")]
    QueueError { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// HTTP statuses worth retrying: request timeout, throttling and gateway failures
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::Unauthorized { .. } => ErrorCode::Unauthorized,
            AppError::Forbidden { .. } => ErrorCode::Forbidden,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::BookNotFound { .. } => ErrorCode::BookNotFound,
            AppError::CampaignNotFound { .. } => ErrorCode::CampaignNotFound,
            AppError::BlobNotFound { .. } => ErrorCode::BlobNotFound,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::Migration { .. } => ErrorCode::MigrationError,
            AppError::Upstream { .. } => ErrorCode::UpstreamError,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::EmbeddingTimeout { .. } => ErrorCode::EmbeddingTimeout,
            AppError::VectorStore { .. } => ErrorCode::VectorStoreError,
            AppError::BlobStorage { .. } => ErrorCode::BlobStorageError,
            AppError::QueueError { .. } => ErrorCode::QueueError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status an API adapter should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation { .. } | AppError::InvalidFormat { .. } => 400,

            AppError::Unauthorized { .. } => 401,

            AppError::Forbidden { .. } => 403,

            AppError::NotFound { .. }
            | AppError::BookNotFound { .. }
            | AppError::CampaignNotFound { .. }
            | AppError::BlobNotFound { .. } => 404,

            AppError::Database(_)
            | AppError::DatabaseConnection { .. }
            | AppError::Migration { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => 500,

            AppError::Upstream { .. }
            | AppError::EmbeddingError { .. }
            | AppError::EmbeddingTimeout { .. }
            | AppError::VectorStore { .. }
            | AppError::BlobStorage { .. }
            | AppError::HttpClient(_) => 502,

            AppError::QueueError { .. } | AppError::ServiceUnavailable { .. } => 503,
        }
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Timeouts, connection failures, throttling (429) and unavailable
    /// upstreams (5xx gateway family) are transient; everything else,
    /// including provider rejections of the request itself, is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::EmbeddingTimeout { .. } | AppError::ServiceUnavailable { .. } => true,
            AppError::Upstream { status, .. } => is_transient_status(*status),
            AppError::HttpClient(err) => {
                err.is_timeout()
                    || err.is_connect()
                    || err.status().map(|s| is_transient_status(s.as_u16())).unwrap_or(false)
            }
            _ => false,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        let field = err.field_errors().keys().next().map(|f| f.to_string());
        AppError::Validation {
            message: err.to_string(),
            field,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::BookNotFound { id: "test".into() };
        assert_eq!(err.code(), ErrorCode::BookNotFound);
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::Validation {
            message: "File must be pdf".into(),
            field: Some("content_type".into()),
        };
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[test]
    fn test_transient_classification() {
        let throttled = AppError::Upstream {
            service: "gemini".into(),
            status: 429,
            message: "Too Many Requests".into(),
        };
        let unavailable = AppError::Upstream {
            service: "chroma".into(),
            status: 503,
            message: "Service Unavailable".into(),
        };
        let rejected = AppError::Upstream {
            service: "gemini".into(),
            status: 400,
            message: "invalid argument".into(),
        };

        assert!(throttled.is_transient());
        assert!(unavailable.is_transient());
        assert!(!rejected.is_transient());
        assert!(AppError::EmbeddingTimeout { timeout_ms: 30_000 }.is_transient());
        assert!(!AppError::BlobNotFound { locator: "s3://b/k".into() }.is_transient());
    }

    #[test]
    fn test_error_codes_unique() {
        let codes = [
            ErrorCode::BookNotFound,
            ErrorCode::CampaignNotFound,
            ErrorCode::BlobNotFound,
            ErrorCode::VectorStoreError,
            ErrorCode::BlobStorageError,
        ];
        let mut numeric: Vec<u16> = codes.iter().map(|c| c.as_code()).collect();
        numeric.sort_unstable();
        numeric.dedup();
        assert_eq!(numeric.len(), codes.len());
    }
}
