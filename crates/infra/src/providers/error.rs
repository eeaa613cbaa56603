use thiserror::Error;

/// Structured classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    /// Account-level quota or rate limit (HTTP 420 / 429).
    QuotaExceeded(u16),
    /// Any other non-success HTTP status.
    Http(u16),
    /// The call did not finish in time.
    Timeout,
    /// Transport failure before a status was received (DNS, TLS, reset).
    Network,
    /// The provider answered but the response could not be understood.
    InvalidResponse,
}

impl ProviderStatus {
    pub fn from_http(code: u16) -> Self {
        match code {
            420 | 429 => ProviderStatus::QuotaExceeded(code),
            other => ProviderStatus::Http(other),
        }
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, ProviderStatus::QuotaExceeded(_))
    }
}

impl core::fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ProviderStatus::QuotaExceeded(code) => write!(f, "quota exceeded (http {code})"),
            ProviderStatus::Http(code) => write!(f, "http {code}"),
            ProviderStatus::Timeout => f.write_str("timeout"),
            ProviderStatus::Network => f.write_str("network"),
            ProviderStatus::InvalidResponse => f.write_str("invalid response"),
        }
    }
}

/// Failure reported by a single provider call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{status}: {message}")]
pub struct ProviderError {
    pub status: ProviderStatus,
    pub message: String,
}

impl ProviderError {
    pub fn new(status: ProviderStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn http(code: u16, message: impl Into<String>) -> Self {
        Self::new(ProviderStatus::from_http(code), message)
    }
}

/// Pool-level failure surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("no valid provider accounts configured")]
    NoValidAccounts,

    #[error("no eligible provider account (all throttled or inactive)")]
    PoolExhausted,

    #[error("upload failed after {attempts} attempts; last error: {last}")]
    UploadFailed { attempts: u32, last: ProviderError },

    #[error("delete of {provider_ref} failed: {source}")]
    DeleteFailed {
        provider_ref: String,
        source: ProviderError,
    },

    #[error("provider call cancelled")]
    Cancelled,
}
