//! Adapters for the AI ports: an HTTP embedder and a Postgres vector sink.

pub mod openai;
pub mod postgres;

pub use openai::{OpenAiEmbedder, OpenAiEmbedderConfig};
pub use postgres::PostgresEmbeddingSink;
