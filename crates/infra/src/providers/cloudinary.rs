//! HTTP adapter for a Cloudinary-style signed upload API.
//!
//! Everything provider-specific (signing, eager transformation results, error
//! bodies) is validated here and converted into [`UploadResult`] /
//! [`ProviderError`]; nothing past this module inspects raw responses.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::account::Credentials;
use super::connector::{ProviderConnector, ProviderSession, UploadOptions, UploadResult};
use super::error::{ProviderError, ProviderStatus};

const DEFAULT_API_BASE: &str = "https://api.cloudinary.com";
const DEFAULT_DELIVERY_BASE: &str = "https://res.cloudinary.com";

/// Asset type for both upload and destroy; the pool only moves video.
const RESOURCE_TYPE: &str = "video";

/// HLS playlist with the HD streaming profile.
const HLS_EAGER: &str = "sp_hd/m3u8";
/// 720p MP4 fallback.
const MP4_EAGER: &str = "c_limit,h_720,q_auto,w_1280/mp4";

#[derive(Debug, Clone)]
pub struct CloudinaryConnector {
    client: reqwest::Client,
    api_base: String,
    delivery_base: String,
}

impl CloudinaryConnector {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            api_base: DEFAULT_API_BASE.to_string(),
            delivery_base: DEFAULT_DELIVERY_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_delivery_base(mut self, delivery_base: impl Into<String>) -> Self {
        self.delivery_base = delivery_base.into();
        self
    }
}

impl ProviderConnector for CloudinaryConnector {
    fn configure(&self, credentials: &Credentials) -> Box<dyn ProviderSession> {
        Box::new(CloudinarySession {
            client: self.client.clone(),
            credentials: credentials.clone(),
            api_base: self.api_base.clone(),
            delivery_base: self.delivery_base.clone(),
        })
    }
}

struct CloudinarySession {
    client: reqwest::Client,
    credentials: Credentials,
    api_base: String,
    delivery_base: String,
}

impl CloudinarySession {
    fn endpoint(&self, action: &str) -> String {
        format!(
            "{}/v1_1/{}/{RESOURCE_TYPE}/{}",
            self.api_base, self.credentials.cloud_name, action
        )
    }
}

#[async_trait]
impl ProviderSession for CloudinarySession {
    async fn upload_stream(
        &self,
        data: Bytes,
        options: &UploadOptions,
    ) -> Result<UploadResult, ProviderError> {
        let mut params: BTreeMap<&'static str, String> = BTreeMap::new();
        params.insert("timestamp", Utc::now().timestamp().to_string());
        params.insert("eager", format!("{HLS_EAGER}|{MP4_EAGER}"));
        params.insert("eager_async", "false".to_string());
        params.insert("streaming_profile", "hd".to_string());
        params.insert("overwrite", "true".to_string());
        params.insert("invalidate", "true".to_string());
        if let Some(folder) = &options.folder {
            params.insert("folder", folder.clone());
        }
        if let Some(public_id) = &options.public_id {
            params.insert("public_id", public_id.clone());
        }
        let signature = sign_params(&params, &self.credentials.api_secret);

        let length = data.len() as u64;
        let mut form = Form::new();
        for (key, value) in params {
            form = form.text(key, value);
        }
        let form = form
            .text("api_key", self.credentials.api_key.clone())
            .text("signature", signature)
            .text("signature_algorithm", "sha256")
            .part("file", Part::stream_with_length(data, length).file_name("upload"));

        let url = self.endpoint("upload");
        debug!(account = %self.credentials.cloud_name, bytes = length, "posting upload");

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(error_from_body(status.as_u16(), &body));
        }
        parse_upload_response(&body, &self.credentials.cloud_name, &self.delivery_base)
    }

    async fn delete(&self, provider_ref: &str) -> Result<(), ProviderError> {
        let mut params: BTreeMap<&'static str, String> = BTreeMap::new();
        params.insert("public_id", provider_ref.to_string());
        params.insert("timestamp", Utc::now().timestamp().to_string());
        params.insert("invalidate", "true".to_string());
        let signature = sign_params(&params, &self.credentials.api_secret);

        let mut body: BTreeMap<&'static str, String> = params;
        body.insert("api_key", self.credentials.api_key.clone());
        body.insert("signature", signature);
        body.insert("signature_algorithm", "sha256".to_string());

        let response = self
            .client
            .post(self.endpoint("destroy"))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(error_from_body(status.as_u16(), &text));
        }
        parse_destroy_response(&text)
    }
}

/// SHA-256 request signature: `k1=v1&k2=v2...` (sorted, empty values skipped) + secret.
pub fn sign_params(params: &BTreeMap<&'static str, String>, secret: &str) -> String {
    let joined = params
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");
    hex::encode(Sha256::digest(format!("{joined}{secret}").as_bytes()))
}

/// One entry of the provider's eager transformation results.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawEager")]
pub enum EagerTransformation {
    HlsPlaylist { url: String },
    Video { url: String, format: String },
    Other { url: Option<String> },
}

#[derive(Deserialize)]
struct RawEager {
    format: Option<String>,
    secure_url: Option<String>,
}

impl From<RawEager> for EagerTransformation {
    fn from(raw: RawEager) -> Self {
        match (raw.format, raw.secure_url) {
            (format, Some(url)) if format.as_deref() == Some("m3u8") || url.ends_with(".m3u8") => {
                EagerTransformation::HlsPlaylist { url }
            }
            (Some(format), Some(url)) if matches!(format.as_str(), "mp4" | "webm" | "mov") => {
                EagerTransformation::Video { url, format }
            }
            (_, url) => EagerTransformation::Other { url },
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    public_id: String,
    secure_url: String,
    bytes: u64,
    duration: Option<f64>,
    #[serde(default)]
    eager: Vec<EagerTransformation>,
}

pub fn parse_upload_response(
    body: &str,
    cloud_name: &str,
    delivery_base: &str,
) -> Result<UploadResult, ProviderError> {
    let response: UploadResponse = serde_json::from_str(body).map_err(|e| {
        ProviderError::new(
            ProviderStatus::InvalidResponse,
            format!("malformed upload response: {e}"),
        )
    })?;

    let video_base = format!("{delivery_base}/{cloud_name}/video/upload");
    let secondary_url = response
        .eager
        .iter()
        .find_map(|eager| match eager {
            EagerTransformation::HlsPlaylist { url } => Some(url.clone()),
            EagerTransformation::Video { .. } | EagerTransformation::Other { .. } => None,
        })
        .unwrap_or_else(|| format!("{video_base}/sp_hd/{}.m3u8", response.public_id));

    Ok(UploadResult {
        thumbnail_url: Some(format!("{video_base}/so_0/{}.jpg", response.public_id)),
        provider_ref: response.public_id,
        primary_url: response.secure_url,
        secondary_url: Some(secondary_url),
        byte_size: response.bytes,
        duration_sec: response.duration,
    })
}

fn parse_destroy_response(body: &str) -> Result<(), ProviderError> {
    #[derive(Deserialize)]
    struct DestroyResponse {
        result: String,
    }

    let response: DestroyResponse = serde_json::from_str(body).map_err(|e| {
        ProviderError::new(
            ProviderStatus::InvalidResponse,
            format!("malformed destroy response: {e}"),
        )
    })?;
    match response.result.as_str() {
        "ok" => Ok(()),
        "not found" => Err(ProviderError::http(404, "resource not found")),
        other => Err(ProviderError::new(
            ProviderStatus::InvalidResponse,
            format!("unexpected destroy result: {other}"),
        )),
    }
}

fn error_from_body(status: u16, body: &str) -> ProviderError {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: ErrorDetail,
    }
    #[derive(Deserialize)]
    struct ErrorDetail {
        message: String,
    }

    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.chars().take(200).collect());
    ProviderError::http(status, message)
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::new(ProviderStatus::Timeout, err.to_string())
    } else if let Some(status) = err.status() {
        ProviderError::http(status.as_u16(), err.to_string())
    } else {
        ProviderError::new(ProviderStatus::Network, err.to_string())
    }
}
