//! Ingestion service error types

use scribe_common::errors::AppError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Pipeline stage a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Download,
    Extract,
    Chunk,
    Index,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Download => "download",
            PipelineStage::Extract => "extract",
            PipelineStage::Chunk => "chunk",
            PipelineStage::Index => "index",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Download failed: {0}")]
    Download(#[source] AppError),

    #[error("PDF is encrypted")]
    PdfEncrypted,

    #[error("PDF parse error: {message}")]
    PdfParse { message: String },

    #[error("Chunking error: {0}")]
    Chunking(String),

    #[error("Indexing chunk {chunk_index} failed: {source}")]
    Indexing {
        chunk_index: usize,
        #[source]
        source: AppError,
    },

    #[error("Cancelled during {stage}")]
    Cancelled { stage: PipelineStage },

    #[error("Extraction task failed: {0}")]
    Task(String),
}

impl IngestionError {
    /// Stage this error is attributed to
    pub fn stage(&self) -> PipelineStage {
        match self {
            IngestionError::Download(_) => PipelineStage::Download,
            IngestionError::PdfEncrypted
            | IngestionError::PdfParse { .. }
            | IngestionError::Task(_) => PipelineStage::Extract,
            IngestionError::Chunking(_) => PipelineStage::Chunk,
            IngestionError::Indexing { .. } => PipelineStage::Index,
            IngestionError::Cancelled { stage } => *stage,
        }
    }

    /// Whether a missing blob caused the failure
    pub fn is_missing_blob(&self) -> bool {
        matches!(self, IngestionError::Download(AppError::BlobNotFound { .. }))
    }
}
