//! Provider Pool: one upload operation backed by N credentialed accounts.
//!
//! ## Selection
//!
//! Account choice is a pure function of the pool state ([`PoolState::select`]):
//! the eligible account with the oldest `last_used_at` wins (never-used first,
//! ties by registration order). The pool applies the returned state under its
//! lock in one step, so two concurrent uploads cannot pick the same account
//! based on the same stale timestamp, and quota flags are never lost.
//!
//! The lock is never held across a provider call.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::io::{CallContext, Interrupted};

use super::account::{AccountConfig, Credentials, PoolStatus, ProviderAccount};
use super::connector::{ProviderConnector, UploadOptions, UploadResult};
use super::error::{PoolError, ProviderError, ProviderStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Upper bound on upload attempts per call (quota switches included).
    pub max_retries: u32,
    pub upload_timeout: Duration,
    /// Folder used when the caller does not name one.
    pub default_folder: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            upload_timeout: Duration::from_secs(300),
            default_folder: "mediaflow-videos".to_string(),
        }
    }
}

/// Snapshot of every account plus the most recently selected one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolState {
    accounts: Vec<ProviderAccount>,
    current: Option<usize>,
}

impl PoolState {
    pub fn new(accounts: Vec<ProviderAccount>) -> Self {
        Self {
            accounts,
            current: None,
        }
    }

    pub fn accounts(&self) -> &[ProviderAccount] {
        &self.accounts
    }

    pub fn current(&self) -> Option<&ProviderAccount> {
        self.current.and_then(|i| self.accounts.get(i))
    }

    /// Pick the least recently used eligible account.
    ///
    /// Returns the chosen index and the state after the selection (account
    /// stamped with `now`, marked current), or `None` when nothing is eligible.
    pub fn select(&self, now: DateTime<Utc>) -> Option<(usize, PoolState)> {
        let index = self
            .accounts
            .iter()
            .enumerate()
            .filter(|(_, account)| account.is_eligible())
            .min_by_key(|(i, account)| (account.last_used_at, *i))
            .map(|(i, _)| i)?;

        let mut next = self.clone();
        next.accounts[index].last_used_at = Some(now);
        next.current = Some(index);
        Some((index, next))
    }

    fn mark_quota_exceeded(&mut self, index: usize) {
        if let Some(account) = self.accounts.get_mut(index) {
            account.quota_exceeded = true;
        }
    }

    fn reset_quotas(&mut self) {
        for account in &mut self.accounts {
            account.quota_exceeded = false;
        }
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            total: self.accounts.len(),
            available: self.accounts.iter().filter(|a| a.is_eligible()).count(),
            quota_exceeded: self.accounts.iter().filter(|a| a.quota_exceeded).count(),
        }
    }
}

/// An account handed out by [`ProviderPool::acquire_account`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountLease {
    pub index: usize,
    pub credentials: Credentials,
}

impl AccountLease {
    pub fn name(&self) -> &str {
        &self.credentials.cloud_name
    }
}

/// Shared pool of upload accounts. Construct once per process and share via `Arc`.
pub struct ProviderPool {
    state: Mutex<PoolState>,
    connector: Arc<dyn ProviderConnector>,
    config: PoolConfig,
}

impl core::fmt::Debug for ProviderPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProviderPool")
            .field("status", &self.status())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ProviderPool {
    /// Register the complete account configs; incomplete ones are skipped.
    pub fn new(
        configs: impl IntoIterator<Item = AccountConfig>,
        connector: Arc<dyn ProviderConnector>,
        config: PoolConfig,
    ) -> Result<Self, PoolError> {
        let mut skipped = 0usize;
        let accounts: Vec<ProviderAccount> = configs
            .into_iter()
            .filter_map(|c| {
                let creds = c.credentials();
                if creds.is_none() {
                    skipped += 1;
                }
                creds
            })
            .map(ProviderAccount::new)
            .collect();

        if accounts.is_empty() {
            return Err(PoolError::NoValidAccounts);
        }
        if skipped > 0 {
            warn!(skipped, "ignoring incomplete provider account configs");
        }
        info!(accounts = accounts.len(), "provider pool initialized");

        Ok(Self {
            state: Mutex::new(PoolState::new(accounts)),
            connector,
            config,
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn acquire_account(&self) -> Result<AccountLease, PoolError> {
        let mut state = self.state.lock();
        let (index, next) = state.select(Utc::now()).ok_or(PoolError::PoolExhausted)?;
        *state = next;
        let credentials = state.accounts[index].credentials.clone();
        Ok(AccountLease { index, credentials })
    }

    /// Upload through whichever account is eligible, failing over on quota errors.
    ///
    /// Every attempt, quota switches included, counts against `max_retries`.
    pub async fn upload_media(
        &self,
        data: Bytes,
        options: &UploadOptions,
        ctx: &CallContext,
    ) -> Result<UploadResult, PoolError> {
        let mut options = options.clone();
        if options.folder.is_none() {
            options.folder = Some(self.config.default_folder.clone());
        }

        let max_attempts = self.config.max_retries.max(1);
        let mut last_error: Option<ProviderError> = None;

        for attempt in 1..=max_attempts {
            let lease = match self.acquire_account() {
                Ok(lease) => lease,
                Err(err) => {
                    warn!(attempt, "no eligible provider account");
                    return Err(match last_error {
                        Some(last) => PoolError::UploadFailed {
                            attempts: attempt - 1,
                            last,
                        },
                        None => err,
                    });
                }
            };

            let session = self.connector.configure(&lease.credentials);
            let outcome = ctx
                .run(
                    "provider_upload",
                    self.config.upload_timeout,
                    session.upload_stream(data.clone(), &options),
                )
                .await;

            let err = match outcome {
                Ok(Ok(result)) => {
                    info!(
                        account = lease.name(),
                        attempt,
                        provider_ref = %result.provider_ref,
                        bytes = result.byte_size,
                        "media uploaded"
                    );
                    return Ok(result);
                }
                Ok(Err(err)) => err,
                Err(Interrupted::Cancelled { .. }) => return Err(PoolError::Cancelled),
                Err(Interrupted::TimedOut { after, .. }) => ProviderError::new(
                    ProviderStatus::Timeout,
                    format!("upload did not finish within {after:?}"),
                ),
            };

            match err.status {
                ProviderStatus::QuotaExceeded(code) => {
                    self.mark_quota_exceeded(lease.index);
                    warn!(
                        account = lease.name(),
                        code,
                        attempt,
                        "provider quota exceeded; switching accounts"
                    );
                }
                ProviderStatus::Http(_)
                | ProviderStatus::Timeout
                | ProviderStatus::Network
                | ProviderStatus::InvalidResponse => {
                    warn!(account = lease.name(), attempt, error = %err, "upload attempt failed");
                }
            }
            last_error = Some(err);
        }

        Err(match last_error {
            Some(last) => PoolError::UploadFailed {
                attempts: max_attempts,
                last,
            },
            None => PoolError::PoolExhausted,
        })
    }

    /// Delete through the most recently selected account (acquiring one if none was).
    pub async fn delete_media(&self, provider_ref: &str, ctx: &CallContext) -> Result<(), PoolError> {
        let current = self.state.lock().current().map(|a| a.credentials.clone());
        let credentials = match current {
            Some(credentials) => credentials,
            None => self.acquire_account()?.credentials,
        };

        let session = self.connector.configure(&credentials);
        let outcome = ctx
            .run("provider_delete", self.config.upload_timeout, session.delete(provider_ref))
            .await;

        let source = match outcome {
            Ok(Ok(())) => {
                info!(account = %credentials.cloud_name, provider_ref, "media deleted");
                return Ok(());
            }
            Ok(Err(err)) => err,
            Err(Interrupted::Cancelled { .. }) => {
                error!(account = %credentials.cloud_name, provider_ref, "media delete cancelled");
                return Err(PoolError::Cancelled);
            }
            Err(Interrupted::TimedOut { after, .. }) => ProviderError::new(
                ProviderStatus::Timeout,
                format!("delete did not finish within {after:?}"),
            ),
        };

        error!(
            account = %credentials.cloud_name,
            provider_ref,
            error = %source,
            "failed to delete media"
        );
        Err(PoolError::DeleteFailed {
            provider_ref: provider_ref.to_string(),
            source,
        })
    }

    /// Clear every quota flag. Driven by an external schedule.
    pub fn reset_quotas(&self) {
        self.state.lock().reset_quotas();
        info!("provider quotas reset");
    }

    pub fn status(&self) -> PoolStatus {
        self.state.lock().status()
    }

    /// Name of the most recently selected account.
    pub fn current_account(&self) -> Option<String> {
        self.state.lock().current().map(|a| a.name().to_string())
    }

    pub fn snapshot(&self) -> PoolState {
        self.state.lock().clone()
    }

    fn mark_quota_exceeded(&self, index: usize) {
        self.state.lock().mark_quota_exceeded(index);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted provider used by pool and processor tests.

    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::providers::connector::ProviderSession;

    #[derive(Default)]
    pub struct ScriptedConnector {
        uploads: Mutex<HashMap<String, VecDeque<Result<UploadResult, ProviderError>>>>,
        deletes: Mutex<Vec<(String, String)>>,
        delete_error: Mutex<Option<ProviderError>>,
        pub calls: AtomicUsize,
        pub upload_log: Mutex<Vec<String>>,
    }

    impl ScriptedConnector {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn script(&self, account: &str, response: Result<UploadResult, ProviderError>) {
            self.uploads
                .lock()
                .entry(account.to_string())
                .or_default()
                .push_back(response);
        }

        pub fn fail_deletes(&self, err: ProviderError) {
            *self.delete_error.lock() = Some(err);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn deletes(&self) -> Vec<(String, String)> {
            self.deletes.lock().clone()
        }
    }

    pub fn uploaded(account: &str, provider_ref: &str) -> UploadResult {
        UploadResult {
            provider_ref: provider_ref.to_string(),
            primary_url: format!("https://cdn.test/{account}/{provider_ref}.mp4"),
            secondary_url: Some(format!("https://cdn.test/{account}/{provider_ref}.m3u8")),
            byte_size: 1024,
            duration_sec: Some(12.5),
            thumbnail_url: Some(format!("https://cdn.test/{account}/{provider_ref}.jpg")),
        }
    }

    struct ScriptedSession {
        account: String,
        connector: Arc<ScriptedConnector>,
    }

    impl ProviderConnector for Arc<ScriptedConnector> {
        fn configure(&self, credentials: &Credentials) -> Box<dyn ProviderSession> {
            Box::new(ScriptedSession {
                account: credentials.cloud_name.clone(),
                connector: self.clone(),
            })
        }
    }

    #[async_trait]
    impl ProviderSession for ScriptedSession {
        async fn upload_stream(
            &self,
            _data: Bytes,
            _options: &UploadOptions,
        ) -> Result<UploadResult, ProviderError> {
            self.connector.calls.fetch_add(1, Ordering::SeqCst);
            self.connector.upload_log.lock().push(self.account.clone());
            let next = self
                .connector
                .uploads
                .lock()
                .get_mut(&self.account)
                .and_then(|q| q.pop_front());
            next.unwrap_or_else(|| Ok(uploaded(&self.account, "default")))
        }

        async fn delete(&self, provider_ref: &str) -> Result<(), ProviderError> {
            self.connector.calls.fetch_add(1, Ordering::SeqCst);
            self.connector
                .deletes
                .lock()
                .push((self.account.clone(), provider_ref.to_string()));
            match self.connector.delete_error.lock().clone() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    pub fn accounts(names: &[&str]) -> Vec<AccountConfig> {
        names
            .iter()
            .map(|n| AccountConfig::new(*n, format!("{n}-key"), format!("{n}-secret")))
            .collect()
    }

    pub fn pool(names: &[&str], connector: &Arc<ScriptedConnector>) -> ProviderPool {
        ProviderPool::new(accounts(names), Arc::new(connector.clone()), PoolConfig::default())
            .expect("valid accounts")
    }
}
