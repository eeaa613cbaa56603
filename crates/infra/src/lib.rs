//! Infrastructure layer: provider pool, blob downloads, job processing, config.

pub mod ai;
pub mod blob;
pub mod config;
pub mod io;
pub mod jobs;
pub mod providers;

pub use config::{ConfigError, MediaflowConfig};
pub use io::{CallContext, Interrupted};
