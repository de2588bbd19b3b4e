//! Fault-injecting collaborators for pipeline tests

use async_trait::async_trait;
use chrono::Utc;
use lopdf::{dictionary, Document, Object, Stream};
use scribe_common::db::models::{Book, Campaign};
use scribe_common::db::{BookStore, InMemoryStore};
use scribe_common::embeddings::{Embedder, MockEmbedder};
use scribe_common::errors::{AppError, Result};
use scribe_common::status::BookStatus;
use scribe_common::storage::{BlobStore, MemoryBlobStore};
use scribe_common::vector::{InMemoryVectorStore, ScoredChunk, VectorRecord, VectorStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const DIMENSION: usize = 16;

pub fn unavailable() -> AppError {
    AppError::Upstream {
        service: "gemini".to_string(),
        status: 503,
        message: "model overloaded".to_string(),
    }
}

pub fn rejected() -> AppError {
    AppError::Upstream {
        service: "gemini".to_string(),
        status: 400,
        message: "invalid argument".to_string(),
    }
}

/// How an embedder call should behave, decided by its 1-based call number
pub enum Script {
    /// Fail the first `n` calls with 503
    FailFirst(usize),
    /// Fail every call with the given error builder
    Always(fn() -> AppError),
    /// Fail call number `n` with a permanent error
    RejectCall(usize),
    /// Sleep before answering
    Slow(Duration),
}

/// Embedder delegating to `MockEmbedder` after applying a script
pub struct ScriptedEmbedder {
    inner: MockEmbedder,
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedEmbedder {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            inner: MockEmbedder::new(DIMENSION),
            script,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for ScriptedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.script {
            Script::FailFirst(n) if call <= n => return Err(unavailable()),
            Script::Always(err) => return Err(err()),
            Script::RejectCall(n) if call == n => return Err(rejected()),
            Script::Slow(delay) => tokio::time::sleep(delay).await,
            _ => {}
        }
        self.inner.embed(text).await
    }

    fn model_name(&self) -> &str {
        "scripted"
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }
}

/// Vector store counting upserts and optionally failing them
pub struct CountingVectorStore {
    pub inner: InMemoryVectorStore,
    upserts: AtomicUsize,
    fail_first: usize,
}

impl CountingVectorStore {
    pub fn new() -> Arc<Self> {
        Self::failing_first(0)
    }

    pub fn failing_first(n: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryVectorStore::new(),
            upserts: AtomicUsize::new(0),
            fail_first: n,
        })
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorStore for CountingVectorStore {
    async fn upsert(&self, collection: &str, record: VectorRecord) -> Result<()> {
        let call = self.upserts.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_first {
            return Err(AppError::Upstream {
                service: "chroma".to_string(),
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        self.inner.upsert(collection, record).await
    }

    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        limit: usize,
        min_relevance: f64,
    ) -> Result<Vec<ScoredChunk>> {
        self.inner
            .search(collection, embedding, limit, min_relevance)
            .await
    }
}

/// Blob store counting downloads
#[derive(Default)]
pub struct CountingBlobStore {
    pub inner: MemoryBlobStore,
    downloads: AtomicUsize,
}

impl CountingBlobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, key: &str, bytes: impl Into<Vec<u8>>) -> String {
        self.inner.put(key, bytes)
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for CountingBlobStore {
    async fn upload(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        self.inner.upload(key, bytes, content_type).await
    }

    async fn download(&self, locator: &str) -> Result<Vec<u8>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.inner.download(locator).await
    }

    async fn delete(&self, locator: &str) -> Result<()> {
        self.inner.delete(locator).await
    }
}

fn database_down() -> AppError {
    AppError::DatabaseConnection {
        message: "connection refused".to_string(),
    }
}

/// Book store that can fail reads, or writes towards one status
pub struct FlakyStore {
    pub inner: InMemoryStore,
    fail_reads: bool,
    fail_writes_to: Option<BookStatus>,
}

impl FlakyStore {
    pub fn failing_reads() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryStore::new(),
            fail_reads: true,
            fail_writes_to: None,
        })
    }

    pub fn failing_writes_to(status: BookStatus) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryStore::new(),
            fail_reads: false,
            fail_writes_to: Some(status),
        })
    }
}

#[async_trait]
impl BookStore for FlakyStore {
    async fn get_book(&self, id: Uuid) -> Result<Option<Book>> {
        if self.fail_reads {
            return Err(database_down());
        }
        self.inner.get_book(id).await
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: &[BookStatus],
        to: BookStatus,
    ) -> Result<bool> {
        if self.fail_writes_to == Some(to) {
            return Err(database_down());
        }
        self.inner.transition_status(id, from, to).await
    }
}

/// Seed a campaign with one book in `status`, returning the book
pub fn seed_book(store: &InMemoryStore, status: BookStatus, locator: &str) -> Book {
    let campaign = Campaign {
        id: Uuid::new_v4(),
        name: "Storm King's Thunder".to_string(),
        description: None,
        system: "D&D 5e".to_string(),
        created_at: Utc::now().fixed_offset(),
        user_id: "user-1".to_string(),
    };
    let book = Book {
        id: Uuid::new_v4(),
        file_name: "handbook.pdf".to_string(),
        storage_locator: locator.to_string(),
        status: status.as_str().to_string(),
        uploaded_at: Utc::now().fixed_offset(),
        status_changed_at: Utc::now().fixed_offset(),
        campaign_id: campaign.id,
    };
    store.put_campaign(campaign);
    store.put_book(book.clone());
    book
}

/// Build a PDF with one page per content stream
pub fn build_pdf(contents: &[&str]) -> Vec<u8> {
    build_pdf_with_font(contents, None)
}

/// Build a PDF whose font `F1` declares the given `/Encoding`
pub fn build_pdf_with_encoding(contents: &[&str], encoding: &str) -> Vec<u8> {
    build_pdf_with_font(contents, Some(encoding))
}

fn build_pdf_with_font(contents: &[&str], encoding: Option<&str>) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut font = dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    };
    if let Some(encoding) = encoding {
        font.set("Encoding", Object::Name(encoding.as_bytes().to_vec()));
    }
    let font_id = doc.add_object(font);
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for content in contents {
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.as_bytes().to_vec()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}
