use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use mediaflow_core::ByteSize;

use super::{BlobError, BlobStore};

/// In-memory blob store for tests/dev. Counts every fetch.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    objects: RwLock<HashMap<String, Bytes>>,
    /// Failures returned (in order) before any object is served.
    failures: RwLock<VecDeque<BlobError>>,
    fetches: AtomicUsize,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, data: impl Into<Bytes>) {
        self.objects.write().insert(url.into(), data.into());
    }

    /// Queue a failure for the next fetch.
    pub fn fail_next(&self, err: BlobError) {
        self.failures.write().push_back(err);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn fetch(&self, url: &str, limit: ByteSize) -> Result<Bytes, BlobError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = self.failures.write().pop_front() {
            return Err(err);
        }

        let data = self
            .objects
            .read()
            .get(url)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(url.to_string()))?;

        if data.len() as u64 > limit.as_u64() {
            return Err(BlobError::TooLarge {
                size: ByteSize::bytes(data.len() as u64),
                limit,
            });
        }
        Ok(data)
    }
}
