//! Blob-store downloads with a hard size ceiling.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use mediaflow_core::ByteSize;

pub mod http;
pub mod memory;

pub use http::HttpBlobStore;
pub use memory::InMemoryBlobStore;

/// Source of raw resource bytes.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Fetch the object at `url`.
    ///
    /// Implementations must fail with [`BlobError::TooLarge`] as soon as the
    /// object is known to exceed `limit`, without buffering past it.
    async fn fetch(&self, url: &str, limit: ByteSize) -> Result<Bytes, BlobError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlobError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("file too large ({size}); maximum size for processing is {limit}")]
    TooLarge { size: ByteSize, limit: ByteSize },

    #[error("blob store rejected the request (http {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("transient blob store failure: {0}")]
    Transient(String),

    #[error("invalid blob url: {0}")]
    InvalidUrl(String),
}

impl BlobError {
    /// Whether the same request may succeed if retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, BlobError::Transient(_))
    }
}
