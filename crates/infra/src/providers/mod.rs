//! Media upload providers and the failover pool in front of them.
//!
//! ## Components
//!
//! - `ProviderPool`: account selection, quota failover, bounded retries
//! - `ProviderConnector` / `ProviderSession`: per-provider contract
//! - `CloudinaryConnector`: HTTP adapter for a signed-upload API

pub mod account;
pub mod cloudinary;
pub mod connector;
pub mod error;
pub mod pool;

pub use account::{AccountConfig, Credentials, PoolStatus, ProviderAccount};
pub use cloudinary::{CloudinaryConnector, EagerTransformation};
pub use connector::{ProviderConnector, ProviderSession, UploadOptions, UploadResult};
pub use error::{PoolError, ProviderError, ProviderStatus};
pub use pool::{AccountLease, PoolConfig, PoolState, ProviderPool};
