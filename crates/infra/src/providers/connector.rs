//! Upload provider contract.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::account::Credentials;
use super::error::ProviderError;

/// Builds sessions bound to one account's credentials.
///
/// Each upload attempt gets its own session, so concurrent uploads on different
/// accounts never share client configuration.
pub trait ProviderConnector: Send + Sync + 'static {
    fn configure(&self, credentials: &Credentials) -> Box<dyn ProviderSession>;
}

/// A provider client configured for one account.
///
/// The pool is the video transcoding path: every upload is a video asset and
/// `delete` addresses video assets by their `provider_ref`.
#[async_trait]
pub trait ProviderSession: Send + Sync {
    async fn upload_stream(
        &self,
        data: Bytes,
        options: &UploadOptions,
    ) -> Result<UploadResult, ProviderError>;

    async fn delete(&self, provider_ref: &str) -> Result<(), ProviderError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOptions {
    pub public_id: Option<String>,
    pub folder: Option<String>,
}

/// What a successful upload produced. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub provider_ref: String,
    pub primary_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_url: Option<String>,
    pub byte_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}
