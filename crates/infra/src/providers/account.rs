//! Provider accounts and their credentials.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Raw account settings as read from configuration; any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountConfig {
    pub cloud_name: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
}

impl AccountConfig {
    pub fn new(
        cloud_name: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        Self {
            cloud_name: Some(cloud_name.into()),
            api_key: Some(api_key.into()),
            api_secret: Some(api_secret.into()),
        }
    }

    /// Complete credentials, or `None` if any part is missing or blank.
    pub fn credentials(&self) -> Option<Credentials> {
        let present = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Some(Credentials {
            cloud_name: present(&self.cloud_name)?,
            api_key: present(&self.api_key)?,
            api_secret: present(&self.api_secret)?,
        })
    }
}

/// Credentials for one provider account.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

impl core::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credentials")
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// One account in the pool.
///
/// `Active -> QuotaExceeded` on a quota signal, back to `Active` only through
/// an explicit quota reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAccount {
    pub credentials: Credentials,
    pub is_active: bool,
    pub quota_exceeded: bool,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ProviderAccount {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            is_active: true,
            quota_exceeded: false,
            last_used_at: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.credentials.cloud_name
    }

    pub fn is_eligible(&self) -> bool {
        self.is_active && !self.quota_exceeded
    }
}

/// Counts for dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub total: usize,
    pub available: usize,
    pub quota_exceeded: usize,
}
