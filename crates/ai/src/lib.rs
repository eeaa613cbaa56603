//! `mediaflow-ai`
//!
//! **Responsibility:** Boundary to the model-backed services the media pipeline calls.
//!
//! This crate owns no model code:
//! - `Embedder` and `Transcriber` are ports implemented by adapters outside the core.
//! - `EmbeddingSink` is where computed vectors leave the subsystem.
//! - `EmbeddingService` routes every embedding request through the multi-tier cache.

pub mod error;
pub mod ports;
pub mod service;

pub use error::AiError;
pub use ports::{Embedder, EmbeddingSink, Transcriber, Transcript};
pub use service::EmbeddingService;
