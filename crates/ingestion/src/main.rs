//! Scribe Ingestion Worker
//!
//! Consumes book-uploaded events from SQS:
//! 1. Claims the pending book
//! 2. Downloads and extracts the PDF text
//! 3. Chunks, embeds and indexes it into the campaign collection
//! 4. Records the final book status

use anyhow::Context;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use scribe_common::{
    config::AppConfig,
    db::{DbPool, Repository},
    embeddings::create_embedder,
    metrics::{self, EMBEDDING_BUCKETS, INGESTION_BUCKETS},
    queue::Queue,
    retry::RetryPolicy,
    storage::S3BlobStore,
    vector::ChromaVectorStore,
    VERSION,
};
use scribe_ingestion::{
    ChunkingConfig, EmbeddingIndexer, IngestionConsumer, IngestionOrchestrator, ShutdownSignal,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("failed to load configuration")?;

    init_tracing(&config);
    info!(
        service = %config.observability.service_name,
        "Starting Scribe Ingestion Worker v{}",
        VERSION
    );

    config.validate().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;

    if config.observability.metrics_port != 0 {
        init_metrics(config.observability.metrics_port)?;
    }

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    if config.database.run_migrations {
        db.migrate().await?;
    }
    let repository = Arc::new(Repository::new(db));

    let embedder = create_embedder(&config.embedding)?;
    info!(
        model = %embedder.model_name(),
        dimension = embedder.dimension(),
        "Embedder initialized"
    );

    let vectors = Arc::new(ChromaVectorStore::new(&config.vector_store)?);
    let blobs = Arc::new(S3BlobStore::new(&config.storage).await?);
    let queue = Arc::new(Queue::new(&config.queue).await?);
    info!(url = %queue.url(), "Connected to ingestion queue");

    let indexer = EmbeddingIndexer::new(
        embedder,
        vectors,
        RetryPolicy::from_config(&config.ingestion),
    );
    let orchestrator = Arc::new(IngestionOrchestrator::new(
        repository,
        blobs,
        indexer,
        ChunkingConfig::from_config(&config.ingestion),
        config.cleanup_timeout(),
    )?);

    let consumer = IngestionConsumer::new(
        queue,
        orchestrator,
        config.ingestion.max_concurrent_books,
    );

    let shutdown = ShutdownSignal::new();
    let worker = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { consumer.run(shutdown).await }
    });

    info!("Ingestion worker ready, polling queue...");
    shutdown_signal().await;
    shutdown.trigger();

    // In-flight books record their final status before the consumer returns
    if let Err(e) = worker.await {
        error!(error = %e, "Consumer task panicked");
    }

    info!("Ingestion worker shutting down");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Suffix("embedding_duration_seconds".to_string()),
            EMBEDDING_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Suffix("ingestion_duration_seconds".to_string()),
            INGESTION_BUCKETS,
        )?
        .install()
        .context("failed to install Prometheus exporter")?;

    metrics::register_metrics();
    info!(%addr, "Metrics exporter listening");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
