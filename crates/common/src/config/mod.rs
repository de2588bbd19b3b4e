//! Configuration management for Scribe services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml, config/local.toml)
//! - Default values

use crate::errors::AppError;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Prefix of the unconfigured API key shipped in sample settings
const PLACEHOLDER_API_KEY_PREFIX: &str = "SUA_API_KEY";

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Blob storage configuration (S3)
    #[serde(default)]
    pub storage: StorageConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Vector store configuration (Chroma)
    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    /// Queue configuration (SQS)
    #[serde(default)]
    pub queue: QueueConfig,

    /// Ingestion pipeline tuning
    #[serde(default)]
    pub ingestion: IngestionConfig,

    /// Retrieval defaults for campaign search
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Apply pending migrations on start-up
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Bucket holding uploaded books
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// AWS region override
    pub region: Option<String>,

    /// Custom endpoint (e.g. LocalStack / MinIO)
    pub endpoint_url: Option<String>,

    /// Use path-style addressing (required by most S3 emulators)
    #[serde(default)]
    pub force_path_style: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: gemini, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorStoreConfig {
    /// Chroma base URL, e.g. http://localhost:8000
    #[serde(default = "default_vector_store_url")]
    pub url: String,

    /// Chroma tenant
    #[serde(default = "default_chroma_tenant")]
    pub tenant: String,

    /// Chroma database
    #[serde(default = "default_chroma_database")]
    pub database: String,

    /// Request timeout in seconds
    #[serde(default = "default_vector_store_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// SQS queue carrying book-uploaded events
    pub ingestion_queue_url: Option<String>,

    /// Maximum messages to receive per poll
    #[serde(default = "default_queue_batch_size")]
    pub batch_size: u32,

    /// Long polling timeout in seconds
    #[serde(default = "default_queue_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Visibility timeout in seconds
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestionConfig {
    /// Upper bound of a line, in estimated tokens
    #[serde(default = "default_max_tokens_per_line")]
    pub max_tokens_per_line: usize,

    /// Upper bound of a paragraph chunk, in estimated tokens
    #[serde(default = "default_max_tokens_per_paragraph")]
    pub max_tokens_per_paragraph: usize,

    /// Trailing context carried into the next chunk, in estimated tokens
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,

    /// Total attempts for a transient embedding/upsert failure
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    /// First backoff delay in milliseconds
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,

    /// Backoff growth factor
    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,

    /// Books ingested concurrently by one worker
    #[serde(default = "default_max_concurrent_books")]
    pub max_concurrent_books: usize,

    /// Budget for the final status write after a cancellation
    #[serde(default = "default_cleanup_timeout")]
    pub cleanup_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Maximum passages returned per query
    #[serde(default = "default_retrieval_limit")]
    pub limit: usize,

    /// Minimum relevance score (0..1)
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level / filter directive (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for logs and metrics
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_run_migrations() -> bool { true }
fn default_bucket() -> String { "scribe-books".to_string() }
fn default_embedding_provider() -> String { "gemini".to_string() }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_embedding_timeout() -> u64 { 30 }
fn default_vector_store_url() -> String { "http://localhost:8000".to_string() }
fn default_chroma_tenant() -> String { "default_tenant".to_string() }
fn default_chroma_database() -> String { "default_database".to_string() }
fn default_vector_store_timeout() -> u64 { 30 }
fn default_queue_batch_size() -> u32 { 10 }
fn default_queue_poll_timeout() -> u64 { 20 }
fn default_visibility_timeout() -> u64 { 900 }
fn default_max_tokens_per_line() -> usize { 128 }
fn default_max_tokens_per_paragraph() -> usize { 1024 }
fn default_overlap_tokens() -> usize { 64 }
fn default_retry_max_attempts() -> u32 { 3 }
fn default_retry_initial_delay_ms() -> u64 { 1000 }
fn default_retry_multiplier() -> f64 { 2.0 }
fn default_max_concurrent_books() -> usize { 4 }
fn default_cleanup_timeout() -> u64 { 10 }
fn default_retrieval_limit() -> usize { 20 }
fn default_min_relevance() -> f64 { 0.5 }
fn default_log_level() -> String { "info,lopdf=warn".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "scribe".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__QUEUE__INGESTION_QUEUE_URL=https://sqs...
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reject settings that would only fail later, at the first upstream call
    pub fn validate(&self) -> Result<(), AppError> {
        if self.embedding.provider == "gemini" {
            match self.embedding.api_key.as_deref() {
                None | Some("") => {
                    return Err(AppError::Configuration {
                        message: "embedding.api_key is not configured".to_string(),
                    })
                }
                Some(key) if key.starts_with(PLACEHOLDER_API_KEY_PREFIX) => {
                    return Err(AppError::Configuration {
                        message: "embedding.api_key is still set to the placeholder value"
                            .to_string(),
                    })
                }
                Some(_) => {}
            }
        }

        let ingestion = &self.ingestion;
        if ingestion.max_tokens_per_line == 0 || ingestion.max_tokens_per_paragraph == 0 {
            return Err(AppError::Configuration {
                message: "chunk sizes must be positive".to_string(),
            });
        }
        if ingestion.max_tokens_per_line > ingestion.max_tokens_per_paragraph {
            return Err(AppError::Configuration {
                message: "max_tokens_per_line exceeds max_tokens_per_paragraph".to_string(),
            });
        }
        if ingestion.overlap_tokens >= ingestion.max_tokens_per_paragraph {
            return Err(AppError::Configuration {
                message: "overlap_tokens must be smaller than max_tokens_per_paragraph"
                    .to_string(),
            });
        }
        if ingestion.retry_max_attempts == 0 {
            return Err(AppError::Configuration {
                message: "retry_max_attempts must be at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.retrieval.min_relevance) {
            return Err(AppError::Configuration {
                message: "retrieval.min_relevance must be within 0..=1".to_string(),
            });
        }

        Ok(())
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }

    /// Embedding request timeout as Duration
    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding.timeout_secs)
    }

    /// Final status write budget as Duration
    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.ingestion.cleanup_timeout_secs)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            region: None,
            endpoint_url: None,
            force_path_style: false,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: default_vector_store_url(),
            tenant: default_chroma_tenant(),
            database: default_chroma_database(),
            timeout_secs: default_vector_store_timeout(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            ingestion_queue_url: None,
            batch_size: default_queue_batch_size(),
            poll_timeout_secs: default_queue_poll_timeout(),
            visibility_timeout_secs: default_visibility_timeout(),
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_line: default_max_tokens_per_line(),
            max_tokens_per_paragraph: default_max_tokens_per_paragraph(),
            overlap_tokens: default_overlap_tokens(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_multiplier: default_retry_multiplier(),
            max_concurrent_books: default_max_concurrent_books(),
            cleanup_timeout_secs: default_cleanup_timeout(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: default_retrieval_limit(),
            min_relevance: default_min_relevance(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgres://localhost/scribe".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
                run_migrations: default_run_migrations(),
            },
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            vector_store: VectorStoreConfig::default(),
            queue: QueueConfig::default(),
            ingestion: IngestionConfig::default(),
            retrieval: RetrievalConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
