//! Queue-consuming worker: wires the provider pool, cache and processor from
//! configuration and feeds them JSON-lines queue messages.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use mediaflow_ai::{Embedder, EmbeddingService, EmbeddingSink};
use mediaflow_cache::MultiTierCache;
use mediaflow_infra::MediaflowConfig;
use mediaflow_infra::ai::{OpenAiEmbedder, PostgresEmbeddingSink};
use mediaflow_infra::blob::{BlobStore, HttpBlobStore};
use mediaflow_infra::io::deadline_after;
use mediaflow_infra::jobs::{
    InMemoryJobStatusStore, JobOutcome, JobProcessor, JobStatusStore, PostgresJobStatusStore,
    ProcessorStats,
};
use mediaflow_infra::providers::{CloudinaryConnector, PoolError, ProviderPool};

/// A fully wired worker.
pub struct Worker {
    processor: Arc<JobProcessor>,
    pool: Option<Arc<ProviderPool>>,
    embeddings: Option<Arc<EmbeddingService>>,
    cache: Arc<MultiTierCache>,
}

/// Adapters chosen by [`Worker::build`]; tests supply their own.
pub struct Components {
    pub store: Arc<dyn JobStatusStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub pool: Option<Arc<ProviderPool>>,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub sink: Option<Arc<dyn EmbeddingSink>>,
}

impl Worker {
    /// Wire everything from configuration.
    ///
    /// Without provider accounts the worker still runs document jobs; video
    /// jobs then fail as unavailable on this worker. Embeddings need both an
    /// API key and a database to land in.
    pub async fn build(config: &MediaflowConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("building http client")?;

        let mut sink: Option<Arc<dyn EmbeddingSink>> = None;
        let store: Arc<dyn JobStatusStore> = match &config.database_url {
            Some(url) => {
                let store = PostgresJobStatusStore::connect(url, 5)
                    .await
                    .context("connecting to the job status database")?;
                store.ensure_schema().await.context("creating job status table")?;
                if let Some(embedding) = &config.embedding {
                    let vectors =
                        PostgresEmbeddingSink::new(store.pool().clone(), embedding.model.clone());
                    vectors
                        .ensure_schema()
                        .await
                        .context("creating resource embedding table")?;
                    sink = Some(Arc::new(vectors));
                }
                info!("using postgres job status store");
                Arc::new(store)
            }
            None => {
                warn!("DATABASE_URL not set; job status is kept in memory");
                if config.embedding.is_some() {
                    warn!("no database for embeddings; content embedding is disabled");
                }
                InMemoryJobStatusStore::arc()
            }
        };

        let pool = match ProviderPool::new(
            config.accounts.clone(),
            Arc::new(CloudinaryConnector::new(client.clone())),
            config.pool.clone(),
        ) {
            Ok(pool) => Some(Arc::new(pool)),
            Err(PoolError::NoValidAccounts) => {
                warn!("no complete provider accounts configured; video jobs will fail");
                None
            }
            Err(err) => return Err(err).context("building provider pool"),
        };

        let embedder = config.embedding.clone().map(|embedding| {
            Arc::new(OpenAiEmbedder::new(client.clone(), embedding)) as Arc<dyn Embedder>
        });

        Ok(Self::assemble(
            config,
            Components {
                store,
                blobs: Arc::new(HttpBlobStore::new(client)),
                pool,
                embedder,
                sink,
            },
        ))
    }

    /// Wire the processor, cache and embedding service around `components`.
    pub fn assemble(config: &MediaflowConfig, components: Components) -> Self {
        let Components {
            store,
            blobs,
            pool,
            embedder,
            sink,
        } = components;

        let cache = Arc::new(MultiTierCache::new(config.cache.clone()));
        let embeddings =
            embedder.map(|embedder| Arc::new(EmbeddingService::new(embedder, cache.clone())));

        let mut processor = JobProcessor::new(store, blobs, config.processor.clone());
        if let Some(pool) = &pool {
            processor = processor.with_provider_pool(pool.clone());
        }
        if let Some(embeddings) = &embeddings {
            processor = processor.with_embeddings(embeddings.clone());
        }
        if let Some(sink) = sink {
            processor = processor.with_embedding_sink(sink);
        }

        Self::from_parts(processor, pool, embeddings, cache)
    }

    pub fn from_parts(
        processor: JobProcessor,
        pool: Option<Arc<ProviderPool>>,
        embeddings: Option<Arc<EmbeddingService>>,
        cache: Arc<MultiTierCache>,
    ) -> Self {
        Self {
            processor: Arc::new(processor),
            pool,
            embeddings,
            cache,
        }
    }

    pub fn processor(&self) -> &JobProcessor {
        &self.processor
    }

    pub fn cache(&self) -> &MultiTierCache {
        &self.cache
    }

    /// Reset provider quotas every `interval` until cancelled.
    pub fn spawn_quota_reset(
        &self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let pool = self.pool.clone()?;
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(deadline_after(interval), interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        pool.reset_quotas();
                        let status = pool.status();
                        info!(total = status.total, available = status.available, "scheduled quota reset");
                    }
                }
            }
        }))
    }

    /// Pre-embed common search queries. Returns how many were computed.
    pub async fn warm_queries<I, S>(&self, queries: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match &self.embeddings {
            Some(embeddings) => {
                let queries: Vec<String> = queries
                    .into_iter()
                    .map(|q| q.as_ref().trim().to_string())
                    .filter(|q| !q.is_empty())
                    .collect();
                embeddings.warm_queries(queries).await
            }
            None => {
                warn!("no embedding API configured; skipping query warm-up");
                0
            }
        }
    }

    /// Process one message per input line, writing one JSON outcome per line.
    ///
    /// At most `concurrency` jobs run at once. Cancellation stops reading new
    /// lines; jobs already running see the same token.
    pub async fn run<R, W>(
        &self,
        input: R,
        mut output: W,
        concurrency: usize,
        cancel: CancellationToken,
    ) -> anyhow::Result<ProcessorStats>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let concurrency = concurrency.max(1);
        let mut lines = input.lines();
        let mut running: JoinSet<JobOutcome> = JoinSet::new();

        loop {
            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(in_flight = running.len(), "stopping intake");
                    break;
                }
                line = lines.next_line() => line.context("reading queue messages")?,
            };
            let Some(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }

            if running.len() >= concurrency {
                if let Some(done) = running.join_next().await {
                    write_outcome(&mut output, done.context("job task panicked")?).await?;
                }
            }

            let processor = self.processor.clone();
            let token = cancel.child_token();
            running.spawn(async move { processor.process(&line, token).await });
        }

        while let Some(done) = running.join_next().await {
            write_outcome(&mut output, done.context("job task panicked")?).await?;
        }
        output.flush().await.context("flushing outcomes")?;

        Ok(self.processor.stats())
    }
}

async fn write_outcome<W: AsyncWrite + Unpin>(output: &mut W, outcome: JobOutcome) -> anyhow::Result<()> {
    let mut line = serde_json::to_vec(&outcome).context("encoding outcome")?;
    line.push(b'\n');
    output.write_all(&line).await.context("writing outcome")?;
    Ok(())
}
