//! Vector store abstraction
//!
//! Provides:
//! - `VectorStore` trait: upsert chunk records, similarity search
//! - Chroma implementation over its REST API (cosine space)
//! - In-memory implementation for tests
//!
//! Relevance is reported as cosine similarity in `0..=1`-ish terms:
//! `1.0 - cosine_distance`.

use crate::config::VectorStoreConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// One chunk of a book, ready to be stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Deterministic id, `book-{bookId}-chunk-{n}`
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    /// `Source BookId: {bookId}`
    pub description: String,
    pub book_id: Uuid,
}

impl VectorRecord {
    pub fn for_chunk(book_id: Uuid, index: usize, text: String, embedding: Vec<f32>) -> Self {
        Self {
            id: crate::chunk_id(book_id, index),
            text,
            embedding,
            description: format!("Source BookId: {}", book_id),
            book_id,
        }
    }
}

/// A search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub id: String,
    pub text: String,
    pub description: String,
    pub book_id: Option<Uuid>,
    pub relevance: f64,
}

/// Trait for vector storage backends
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or overwrite a record in `collection`, creating the collection if needed
    async fn upsert(&self, collection: &str, record: VectorRecord) -> Result<()>;

    /// Records whose relevance is at least `min_relevance`, best first, at most `limit`.
    /// A collection that does not exist yields no results.
    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        limit: usize,
        min_relevance: f64,
    ) -> Result<Vec<ScoredChunk>>;
}

/// Chroma client (REST API v2)
pub struct ChromaVectorStore {
    client: reqwest::Client,
    base_url: String,
    /// collection name -> Chroma collection id
    collections: Mutex<HashMap<String, String>>,
}

#[derive(Deserialize)]
struct ChromaCollection {
    id: String,
}

#[derive(Deserialize)]
struct ChromaQueryResponse {
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<HashMap<String, Value>>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f64>>>>,
}

impl ChromaVectorStore {
    pub fn new(config: &VectorStoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: format!(
                "{}/api/v2/tenants/{}/databases/{}",
                config.url.trim_end_matches('/'),
                config.tenant,
                config.database
            ),
            collections: Mutex::new(HashMap::new()),
        })
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.collections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn post<R: serde::de::DeserializeOwned>(&self, path: &str, body: Value) -> Result<R> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self.client.post(&url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream {
                service: "chroma".to_string(),
                status: status.as_u16(),
                message,
            });
        }

        response.json::<R>().await.map_err(|e| AppError::VectorStore {
            message: format!("Failed to parse Chroma response: {}", e),
        })
    }

    async fn collection_id(&self, name: &str) -> Result<String> {
        if let Some(id) = self.cache().get(name) {
            return Ok(id.clone());
        }

        let collection: ChromaCollection = self
            .post(
                "collections",
                json!({
                    "name": name,
                    "get_or_create": true,
                    "metadata": { "hnsw:space": "cosine" },
                }),
            )
            .await?;

        debug!(collection = name, id = %collection.id, "Resolved Chroma collection");
        self.cache().insert(name.to_string(), collection.id.clone());
        Ok(collection.id)
    }

    /// Id of an existing collection, without creating it
    async fn existing_collection_id(&self, name: &str) -> Result<Option<String>> {
        if let Some(id) = self.cache().get(name) {
            return Ok(Some(id.clone()));
        }

        let url = format!("{}/collections/{}", self.base_url, name);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!(collection = name, "Chroma collection does not exist");
            return Ok(None);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream {
                service: "chroma".to_string(),
                status: status.as_u16(),
                message,
            });
        }

        let collection: ChromaCollection =
            response.json().await.map_err(|e| AppError::VectorStore {
                message: format!("Failed to parse Chroma response: {}", e),
            })?;
        self.cache().insert(name.to_string(), collection.id.clone());
        Ok(Some(collection.id))
    }
}

#[async_trait]
impl VectorStore for ChromaVectorStore {
    async fn upsert(&self, collection: &str, record: VectorRecord) -> Result<()> {
        let id = self.collection_id(collection).await?;

        let _: Value = self
            .post(
                &format!("collections/{}/upsert", id),
                json!({
                    "ids": [record.id],
                    "embeddings": [record.embedding],
                    "documents": [record.text],
                    "metadatas": [{
                        "description": record.description,
                        "book_id": record.book_id.to_string(),
                    }],
                }),
            )
            .await?;

        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        limit: usize,
        min_relevance: f64,
    ) -> Result<Vec<ScoredChunk>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let Some(id) = self.existing_collection_id(collection).await? else {
            return Ok(Vec::new());
        };

        let response: ChromaQueryResponse = self
            .post(
                &format!("collections/{}/query", id),
                json!({
                    "query_embeddings": [embedding],
                    "n_results": limit,
                    "include": ["documents", "metadatas", "distances"],
                }),
            )
            .await?;

        let ids = response.ids.into_iter().next().unwrap_or_default();
        let documents = first_row(response.documents);
        let metadatas = first_row(response.metadatas);
        let distances = first_row(response.distances);

        let mut hits = Vec::with_capacity(ids.len());
        for (i, id) in ids.into_iter().enumerate() {
            let Some(distance) = distances.get(i).copied().flatten() else {
                continue;
            };
            let relevance = 1.0 - distance;
            if relevance < min_relevance {
                continue;
            }

            let metadata = metadatas.get(i).cloned().flatten().unwrap_or_default();
            let text_of = |key: &str| {
                metadata
                    .get(key)
                    .and_then(Value::as_str)
                    .map(str::to_string)
            };

            hits.push(ScoredChunk {
                id,
                text: documents.get(i).cloned().flatten().unwrap_or_default(),
                description: text_of("description").unwrap_or_default(),
                book_id: text_of("book_id").and_then(|s| Uuid::parse_str(&s).ok()),
                relevance,
            });
        }

        hits.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        Ok(hits)
    }
}

fn first_row<T>(rows: Option<Vec<Vec<T>>>) -> Vec<T> {
    rows.and_then(|r| r.into_iter().next()).unwrap_or_default()
}

/// Cosine similarity of two vectors; 0.0 when either is zero or lengths differ
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// In-memory vector store for testing
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: Mutex<HashMap<String, BTreeMap<String, VectorRecord>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, BTreeMap<String, VectorRecord>>> {
        self.collections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records of a collection ordered by id
    pub fn records(&self, collection: &str) -> Vec<VectorRecord> {
        self.lock()
            .get(collection)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<VectorRecord> {
        self.lock().get(collection).and_then(|c| c.get(id).cloned())
    }

    pub fn count(&self, collection: &str) -> usize {
        self.lock().get(collection).map(BTreeMap::len).unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.lock().values().map(BTreeMap::len).sum()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, collection: &str, record: VectorRecord) -> Result<()> {
        self.lock()
            .entry(collection.to_string())
            .or_default()
            .insert(record.id.clone(), record);
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        limit: usize,
        min_relevance: f64,
    ) -> Result<Vec<ScoredChunk>> {
        let mut hits: Vec<ScoredChunk> = self
            .records(collection)
            .into_iter()
            .map(|r| ScoredChunk {
                relevance: cosine_similarity(&r.embedding, embedding),
                id: r.id,
                text: r.text,
                description: r.description,
                book_id: Some(r.book_id),
            })
            .filter(|hit| hit.relevance >= min_relevance)
            .collect();

        hits.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_record_for_chunk() {
        let book = Uuid::new_v4();
        let record = VectorRecord::for_chunk(book, 2, "text".to_string(), vec![0.1]);

        assert_eq!(record.id, format!("book-{}-chunk-2", book));
        assert_eq!(record.description, format!("Source BookId: {}", book));
    }

    #[tokio::test]
    async fn test_upsert_overwrites_same_id() {
        let store = InMemoryVectorStore::new();
        let book = Uuid::new_v4();

        store
            .upsert("campaign-x", VectorRecord::for_chunk(book, 0, "old".into(), vec![1.0, 0.0]))
            .await
            .unwrap();
        store
            .upsert("campaign-x", VectorRecord::for_chunk(book, 0, "new".into(), vec![1.0, 0.0]))
            .await
            .unwrap();

        assert_eq!(store.count("campaign-x"), 1);
        assert_eq!(store.records("campaign-x")[0].text, "new");
    }

    #[tokio::test]
    async fn test_search_filters_and_orders() {
        let store = InMemoryVectorStore::new();
        let book = Uuid::new_v4();
        for (i, v) in [[1.0, 0.0], [0.8, 0.6], [0.0, 1.0]].iter().enumerate() {
            store
                .upsert(
                    "campaign-x",
                    VectorRecord::for_chunk(book, i, format!("chunk {}", i), v.to_vec()),
                )
                .await
                .unwrap();
        }

        let hits = store.search("campaign-x", &[1.0, 0.0], 20, 0.5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "chunk 0");
        assert_eq!(hits[1].text, "chunk 1");

        let limited = store.search("campaign-x", &[1.0, 0.0], 1, 0.0).await.unwrap();
        assert_eq!(limited.len(), 1);

        let none = store.search("campaign-missing", &[1.0, 0.0], 20, 0.0).await.unwrap();
        assert!(none.is_empty());
    }

    /// Local HTTP endpoint answering 404 to everything, recording request lines
    async fn chroma_without_collections() -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let seen = requests.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = vec![0u8; 8192];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                if let Some(line) = request.lines().next() {
                    seen.lock().unwrap().push(line.to_string());
                }
                let _ = socket
                    .write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                    .await;
            }
        });

        (format!("http://{}", addr), requests)
    }

    #[tokio::test]
    async fn test_chroma_search_of_missing_collection_is_empty() {
        let (url, requests) = chroma_without_collections().await;
        let store = ChromaVectorStore::new(&VectorStoreConfig {
            url,
            ..Default::default()
        })
        .unwrap();

        let hits = store.search("campaign-new", &[1.0, 0.0], 5, 0.0).await.unwrap();

        assert!(hits.is_empty());
        assert_eq!(
            *requests.lock().unwrap(),
            vec![
                "GET /api/v2/tenants/default_tenant/databases/default_database/collections/campaign-new HTTP/1.1"
                    .to_string()
            ]
        );
        assert!(store.cache().is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_search_creates_nothing() {
        let store = InMemoryVectorStore::new();
        let hits = store.search("campaign-new", &[1.0, 0.0], 5, 0.0).await.unwrap();

        assert!(hits.is_empty());
        assert!(store.lock().is_empty());
    }

    #[test]
    fn test_chroma_base_url() {
        let store = ChromaVectorStore::new(&VectorStoreConfig {
            url: "http://chroma:8000/".to_string(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(
            store.base_url,
            "http://chroma:8000/api/v2/tenants/default_tenant/databases/default_database"
        );
    }
}
