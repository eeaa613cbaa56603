//! `mediaflow-core` — shared primitives for the media-processing subsystem.
//!
//! This crate contains **pure** building blocks (no I/O): identifiers, the
//! domain error model, and byte-size helpers used by the cache, provider pool
//! and job processor crates.

pub mod error;
pub mod id;
pub mod size;

pub use error::{DomainError, DomainResult};
pub use id::{JobId, ResourceId, UserId};
pub use size::ByteSize;
