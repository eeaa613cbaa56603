//! Configuration loading from the process environment.

use std::str::FromStr;
use std::time::Duration;

use tracing::debug;

use mediaflow_cache::{CacheConfig, TierConfig};
use mediaflow_core::ByteSize;

use crate::ai::OpenAiEmbedderConfig;
use crate::jobs::{ProcessorConfig, RetryPolicy};
use crate::providers::{AccountConfig, PoolConfig};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

/// Everything the worker needs to wire the pool, cache and processor.
#[derive(Debug, Clone)]
pub struct MediaflowConfig {
    /// Raw account triples, incomplete ones included; the pool filters them.
    pub accounts: Vec<AccountConfig>,
    pub pool: PoolConfig,
    pub processor: ProcessorConfig,
    pub cache: CacheConfig,
    pub quota_reset_interval: Duration,
    pub database_url: Option<String>,
    /// Set when `EMBEDDING_API_KEY` is present.
    pub embedding: Option<OpenAiEmbedderConfig>,
}

impl MediaflowConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset or blank keys take their defaults;
    /// malformed numbers are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let max_accounts: usize = env.parse_or("MEDIA_PROVIDER_MAX_ACCOUNTS", 3)?;
        let accounts = (1..=max_accounts)
            .map(|n| AccountConfig {
                cloud_name: env.get(&format!("MEDIA_PROVIDER_CLOUD_NAME_{n}")),
                api_key: env.get(&format!("MEDIA_PROVIDER_API_KEY_{n}")),
                api_secret: env.get(&format!("MEDIA_PROVIDER_API_SECRET_{n}")),
            })
            .filter(|account| {
                account.cloud_name.is_some() || account.api_key.is_some() || account.api_secret.is_some()
            })
            .collect();

        let pool_defaults = PoolConfig::default();
        let pool = PoolConfig {
            max_retries: env.parse_or("MEDIA_PROVIDER_MAX_RETRIES", pool_defaults.max_retries)?,
            upload_timeout: env.secs_or(
                "MEDIA_PROVIDER_UPLOAD_TIMEOUT_SECS",
                pool_defaults.upload_timeout,
            )?,
            default_folder: env
                .get("MEDIA_PROVIDER_FOLDER")
                .unwrap_or(pool_defaults.default_folder),
        };

        let defaults = ProcessorConfig::default();
        let download_retries =
            env.parse_or("JOB_DOWNLOAD_RETRIES", defaults.download_retry.max_retries)?;
        let processor = ProcessorConfig {
            max_file_size: ByteSize::bytes(
                env.parse_or("JOB_MAX_FILE_BYTES", defaults.max_file_size.as_u64())?,
            ),
            download_timeout: env.secs_or("JOB_DOWNLOAD_TIMEOUT_SECS", defaults.download_timeout)?,
            transform_timeout: env.secs_or("JOB_TRANSFORM_TIMEOUT_SECS", defaults.transform_timeout)?,
            embed_timeout: env.secs_or("JOB_EMBED_TIMEOUT_SECS", defaults.embed_timeout)?,
            job_deadline: env.secs_or("JOB_DEADLINE_SECS", defaults.job_deadline)?,
            text_preview_chars: env.parse_or("JOB_TEXT_PREVIEW_CHARS", defaults.text_preview_chars)?,
            preview_base_path: env
                .get("JOB_PREVIEW_BASE_PATH")
                .unwrap_or(defaults.preview_base_path),
            download_retry: RetryPolicy {
                max_retries: download_retries,
                ..defaults.download_retry
            },
            stale_after: env.secs_or("JOB_STALE_AFTER_SECS", defaults.stale_after)?,
            store_timeout: env.secs_or("JOB_STORE_TIMEOUT_SECS", defaults.store_timeout)?,
        };

        let cache_defaults = CacheConfig::default();
        let cache = CacheConfig {
            embedding: env.tier(
                "CACHE_EMBEDDING_TTL_SECS",
                "CACHE_EMBEDDING_CAPACITY",
                cache_defaults.embedding,
            )?,
            query: env.tier("CACHE_QUERY_TTL_SECS", "CACHE_QUERY_CAPACITY", cache_defaults.query)?,
            search: env.tier("CACHE_SEARCH_TTL_SECS", "CACHE_SEARCH_CAPACITY", cache_defaults.search)?,
            health: mediaflow_cache::HealthThresholds {
                memory_ceiling_bytes: env.parse_or(
                    "CACHE_MEMORY_CEILING_BYTES",
                    cache_defaults.health.memory_ceiling_bytes,
                )?,
                ..cache_defaults.health
            },
        };

        let config = Self {
            accounts,
            pool,
            processor,
            cache,
            quota_reset_interval: env
                .secs_or("MEDIA_PROVIDER_QUOTA_RESET_SECS", Duration::from_secs(24 * 60 * 60))?,
            database_url: env.get("DATABASE_URL"),
            embedding: env.get("EMBEDDING_API_KEY").map(|api_key| {
                let defaults = OpenAiEmbedderConfig::new(api_key);
                OpenAiEmbedderConfig {
                    api_base: env.get("EMBEDDING_API_BASE").unwrap_or(defaults.api_base.clone()),
                    model: env.get("EMBEDDING_MODEL").unwrap_or(defaults.model.clone()),
                    ..defaults
                }
            }),
        };
        debug!(accounts = config.accounts.len(), "configuration loaded");
        Ok(config)
    }
}

/// Upper bound for every duration setting: one year.
const MAX_SECS: u64 = 365 * 24 * 60 * 60;

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: core::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key: key.to_string(),
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn secs_or(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let secs = self.parse_or(key, default.as_secs())?;
        if secs == 0 {
            return Err(ConfigError::Invalid {
                key: key.to_string(),
                value: "0".to_string(),
                reason: "must be at least 1 second".to_string(),
            });
        }
        if secs > MAX_SECS {
            return Err(ConfigError::Invalid {
                key: key.to_string(),
                value: secs.to_string(),
                reason: format!("must be at most {MAX_SECS} seconds"),
            });
        }
        Ok(Duration::from_secs(secs))
    }

    fn tier(&self, ttl_key: &str, capacity_key: &str, default: TierConfig) -> Result<TierConfig, ConfigError> {
        let capacity = self.parse_or(capacity_key, default.capacity)?;
        if capacity == 0 {
            return Err(ConfigError::Invalid {
                key: capacity_key.to_string(),
                value: "0".to_string(),
                reason: "capacity must be positive".to_string(),
            });
        }
        Ok(TierConfig {
            ttl: self.secs_or(ttl_key, default.ttl)?,
            capacity,
            ..default
        })
    }
}
