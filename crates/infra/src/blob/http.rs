use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use tracing::debug;

use mediaflow_core::ByteSize;

use super::{BlobError, BlobStore};

/// Downloads over HTTP(S), streaming chunks and enforcing the size ceiling.
#[derive(Debug, Clone)]
pub struct HttpBlobStore {
    client: reqwest::Client,
}

impl HttpBlobStore {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn fetch(&self, url: &str, limit: ByteSize) -> Result<Bytes, BlobError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| BlobError::InvalidUrl(format!("{url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(BlobError::InvalidUrl(format!("unsupported scheme in {url}")));
        }

        let mut response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| BlobError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, url));
        }

        if let Some(declared) = response.content_length() {
            check_ceiling(declared, limit)?;
        }

        let mut buffer = Vec::with_capacity(
            response
                .content_length()
                .map_or(0, |n| n.min(limit.as_u64()) as usize),
        );
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| BlobError::Transient(e.to_string()))?
        {
            check_ceiling((buffer.len() + chunk.len()) as u64, limit)?;
            buffer.extend_from_slice(&chunk);
        }

        debug!(url, bytes = buffer.len(), "blob downloaded");
        Ok(Bytes::from(buffer))
    }
}

fn check_ceiling(size: u64, limit: ByteSize) -> Result<(), BlobError> {
    if size > limit.as_u64() {
        return Err(BlobError::TooLarge {
            size: ByteSize::bytes(size),
            limit,
        });
    }
    Ok(())
}

fn classify_status(status: StatusCode, url: &str) -> BlobError {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => BlobError::NotFound(url.to_string()),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            BlobError::Transient(format!("http {}", status.as_u16()))
        }
        s if s.is_server_error() => BlobError::Transient(format!("http {}", s.as_u16())),
        s => BlobError::Rejected {
            status: s.as_u16(),
            message: s.canonical_reason().unwrap_or("unexpected status").to_string(),
        },
    }
}
