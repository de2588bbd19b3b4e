//! Metrics and observability utilities
//!
//! Provides Prometheus metrics for the ingestion pipeline
//! with standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Duration;

/// Metrics prefix for all Scribe metrics
pub const METRICS_PREFIX: &str = "scribe";

/// Buckets for embedding and vector store latency
pub const EMBEDDING_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
];

/// Buckets for whole-book ingestion (large rulebooks take minutes)
pub const INGESTION_BUCKETS: &[f64] = &[
    1.0,
    5.0,
    15.0,
    30.0,
    60.0,
    120.0,
    300.0,
    600.0,
    1200.0,
];

/// Fully qualified metric name
pub fn metric_name(suffix: &str) -> String {
    format!("{}_{}", METRICS_PREFIX, suffix)
}

/// Register all metric descriptions
pub fn register_metrics() {
    // Ingestion metrics
    describe_counter!(
        metric_name("books_ingested_total"),
        Unit::Count,
        "Books that finished an ingestion attempt, by outcome"
    );

    describe_histogram!(
        metric_name("ingestion_duration_seconds"),
        Unit::Seconds,
        "Book ingestion latency in seconds"
    );

    describe_counter!(
        metric_name("chunks_indexed_total"),
        Unit::Count,
        "Total chunks embedded and stored"
    );

    describe_counter!(
        metric_name("status_transitions_total"),
        Unit::Count,
        "Book status transitions, by transition and result"
    );

    // Embedding metrics
    describe_counter!(
        metric_name("embedding_requests_total"),
        Unit::Count,
        "Total embedding API requests"
    );

    describe_histogram!(
        metric_name("embedding_duration_seconds"),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    describe_counter!(
        metric_name("embedding_errors_total"),
        Unit::Count,
        "Total embedding API errors"
    );

    describe_counter!(
        metric_name("retry_attempts_total"),
        Unit::Count,
        "Retries of transient upstream failures"
    );

    // Retrieval metrics
    describe_counter!(
        metric_name("search_queries_total"),
        Unit::Count,
        "Total campaign search queries"
    );

    describe_histogram!(
        metric_name("search_duration_seconds"),
        Unit::Seconds,
        "Campaign search latency in seconds"
    );

    // Queue metrics
    describe_counter!(
        metric_name("queue_messages_processed_total"),
        Unit::Count,
        "Total queue messages processed"
    );

    tracing::info!("Metrics registered");
}

/// Record one embedding provider call
pub fn record_embedding_request(model: &str, duration: Duration, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        metric_name("embedding_requests_total"),
        "model" => model.to_string(),
        "status" => status
    )
    .increment(1);

    if success {
        histogram!(
            metric_name("embedding_duration_seconds"),
            "model" => model.to_string()
        )
        .record(duration.as_secs_f64());
    } else {
        counter!(
            metric_name("embedding_errors_total"),
            "model" => model.to_string()
        )
        .increment(1);
    }
}

/// Record a retry of a transient failure
pub fn record_retry(operation: &str) {
    counter!(
        metric_name("retry_attempts_total"),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a finished ingestion attempt
pub fn record_ingestion(outcome: &str, duration: Duration) {
    counter!(
        metric_name("books_ingested_total"),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        metric_name("ingestion_duration_seconds"),
        "outcome" => outcome.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record chunks written to the vector store
pub fn record_chunks_indexed(count: usize) {
    counter!(metric_name("chunks_indexed_total")).increment(count as u64);
}

/// Record a status transition attempt
pub fn record_status_transition(transition: &str, accepted: bool) {
    let result = if accepted { "accepted" } else { "rejected" };

    counter!(
        metric_name("status_transitions_total"),
        "transition" => transition.to_string(),
        "result" => result
    )
    .increment(1);
}

/// Record a campaign search
pub fn record_search(duration: Duration, result_count: usize) {
    counter!(
        metric_name("search_queries_total"),
        "empty" => (result_count == 0).to_string()
    )
    .increment(1);

    histogram!(metric_name("search_duration_seconds")).record(duration.as_secs_f64());
}

/// Record a handled queue message
pub fn record_queue_message(result: &str) {
    counter!(
        metric_name("queue_messages_processed_total"),
        "result" => result.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_sorted() {
        for buckets in [EMBEDDING_BUCKETS, INGESTION_BUCKETS] {
            let mut prev = 0.0;
            for &bucket in buckets {
                assert!(bucket > prev);
                prev = bucket;
            }
        }
    }

    #[test]
    fn test_metric_name() {
        assert_eq!(metric_name("chunks_indexed_total"), "scribe_chunks_indexed_total");
    }

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: every helper must be a silent no-op
        record_embedding_request("mock", Duration::from_millis(5), true);
        record_embedding_request("mock", Duration::ZERO, false);
        record_retry("embed");
        record_ingestion("completed", Duration::from_secs(1));
        record_chunks_indexed(3);
        record_status_transition("start_processing", true);
        record_search(Duration::from_millis(2), 0);
        record_queue_message("acknowledged");
    }
}
