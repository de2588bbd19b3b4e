//! Embedding service abstraction
//!
//! Provides a unified interface for embedding providers:
//! - Google Gemini (text-embedding-004)
//! - Deterministic mock for tests and offline runs

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// Gemini embedding client
pub struct GeminiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    parts: [GeminiPart<'a>; 1],
}

#[derive(Serialize)]
struct GeminiRequest<'a> {
    model: String,
    content: GeminiContent<'a>,
}

#[derive(Deserialize)]
struct GeminiEmbedding {
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct GeminiResponse {
    embedding: GeminiEmbedding,
}

impl GeminiEmbedder {
    /// Create a new Gemini embedder
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::Configuration {
                message: "Gemini API key required".to_string(),
            })?;

        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            dimension: config.dimension,
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| GEMINI_API_BASE.to_string()),
            timeout,
        })
    }

    fn request<'a>(&self, text: &'a str) -> GeminiRequest<'a> {
        GeminiRequest {
            model: format!("models/{}", self.model),
            content: GeminiContent {
                parts: [GeminiPart { text }],
            },
        }
    }

    async fn post<B: Serialize, R: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<R> {
        let url = format!("{}/models/{}:{}", self.base_url, self.model, method);
        let started = Instant::now();

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            metrics::record_embedding_request(&self.model, started.elapsed(), false);
            return Err(AppError::Upstream {
                service: "gemini".to_string(),
                status: status.as_u16(),
                message,
            });
        }

        let parsed = response.json::<R>().await.map_err(|e| AppError::EmbeddingError {
            message: format!("Failed to parse response: {}", e),
        });
        metrics::record_embedding_request(&self.model, started.elapsed(), parsed.is_ok());
        parsed
    }

    fn transport_error(&self, err: reqwest::Error) -> AppError {
        metrics::record_embedding_request(&self.model, Duration::ZERO, false);
        if err.is_timeout() {
            AppError::EmbeddingTimeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            AppError::HttpClient(err)
        }
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response: GeminiResponse = self.post("embedContent", &self.request(text)).await?;

        if response.embedding.values.is_empty() {
            return Err(AppError::EmbeddingError {
                message: "Empty embedding in response".to_string(),
            });
        }
        Ok(response.embedding.values)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Mock embedder for testing.
///
/// Vectors are derived from a SHA-256 of the text, so equal texts always get
/// equal unit-length vectors.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let seed = Sha256::digest(text.as_bytes());
        let mut values = Vec::with_capacity(self.dimension);
        let mut block: u32 = 0;

        while values.len() < self.dimension {
            let mut hasher = Sha256::new();
            hasher.update(seed);
            hasher.update(block.to_le_bytes());
            for byte in hasher.finalize() {
                if values.len() == self.dimension {
                    break;
                }
                values.push(byte as f32 / 255.0 - 0.5);
            }
            block += 1;
        }

        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            values.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(values)
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiEmbedder::new(config)?)),
        "mock" => Ok(Arc::new(MockEmbedder::new(config.dimension))),
        other => Err(AppError::Configuration {
            message: format!("Unknown embedding provider: {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_embedder() {
        let embedder = MockEmbedder::new(768);
        let embedding = embedder.embed("test text").await.unwrap();
        assert_eq!(embedding.len(), 768);

        let norm: f32 = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_mock_is_deterministic() {
        let embedder = MockEmbedder::new(64);
        let a = embedder.embed("Hello world.").await.unwrap();
        let b = embedder.embed("Hello world.").await.unwrap();
        let c = embedder.embed("Goodbye world.").await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_create_embedder() {
        let mock = EmbeddingConfig {
            provider: "mock".to_string(),
            ..Default::default()
        };
        assert_eq!(create_embedder(&mock).unwrap().model_name(), "mock-embedding");

        let keyless = EmbeddingConfig::default();
        assert!(create_embedder(&keyless).is_err());

        let unknown = EmbeddingConfig {
            provider: "openai".to_string(),
            ..Default::default()
        };
        assert!(create_embedder(&unknown).is_err());
    }

    #[test]
    fn test_gemini_request_shape() {
        let config = EmbeddingConfig {
            api_key: Some("test-key".to_string()),
            ..Default::default()
        };
        let embedder = GeminiEmbedder::new(&config).unwrap();
        let json = serde_json::to_value(embedder.request("Hello")).unwrap();

        assert_eq!(json["model"], "models/text-embedding-004");
        assert_eq!(json["content"]["parts"][0]["text"], "Hello");
    }
}
