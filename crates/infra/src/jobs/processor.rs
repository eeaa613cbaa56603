//! Job processor: one queue message in, one terminal status record out.
//!
//! ## Flow
//!
//! 1. Parse and validate the payload (malformed payloads fail without retry)
//! 2. Reconcile with any existing record (redelivery)
//! 3. Persist `Processing` at 10% before any I/O
//! 4. Run the kind-specific pipeline under the job deadline
//! 5. Persist the terminal status
//!
//! Progress writes are best effort. The terminal write is retried once.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mediaflow_ai::{AiError, EmbeddingService, EmbeddingSink, Transcriber};
use mediaflow_core::{ByteSize, DomainError, JobId};

use crate::blob::{BlobError, BlobStore};
use crate::io::{CallContext, Interrupted};
use crate::providers::{PoolError, ProviderPool, UploadOptions};

use super::store::{JobStatusStore, JobStoreError};
use super::types::{
    JobKind, JobRecord, JobStatus, ProcessingResult, QueueMessage, RecordVersion, RetryPolicy,
};

/// Processor configuration.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Hard ceiling on downloaded bytes
    pub max_file_size: ByteSize,
    pub download_timeout: Duration,
    /// Bound on transform-side calls (transcription)
    pub transform_timeout: Duration,
    pub embed_timeout: Duration,
    /// Budget for the whole job, across every step
    pub job_deadline: Duration,
    pub text_preview_chars: usize,
    /// Base of the streaming endpoint used as preview URL
    pub preview_base_path: String,
    pub download_retry: RetryPolicy,
    /// A `Processing` record older than this is treated as abandoned
    pub stale_after: Duration,
    /// Bound on each status-store call
    pub store_timeout: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_file_size: ByteSize::mib(100),
            download_timeout: Duration::from_secs(120),
            transform_timeout: Duration::from_secs(60),
            embed_timeout: Duration::from_secs(30),
            job_deadline: Duration::from_secs(900),
            text_preview_chars: 5000,
            preview_base_path: "/api/attachments".to_string(),
            download_retry: RetryPolicy::default(),
            stale_after: Duration::from_secs(1800),
            store_timeout: Duration::from_secs(10),
        }
    }
}

impl ProcessorConfig {
    pub fn with_max_file_size(mut self, max: ByteSize) -> Self {
        self.max_file_size = max;
        self
    }

    pub fn with_job_deadline(mut self, deadline: Duration) -> Self {
        self.job_deadline = deadline;
        self
    }

    pub fn with_download_retry(mut self, policy: RetryPolicy) -> Self {
        self.download_retry = policy;
        self
    }

    pub fn with_text_preview_chars(mut self, chars: usize) -> Self {
        self.text_preview_chars = chars;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

/// Why a job failed.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("file too large ({size}). Maximum size for processing is {limit}")]
    FileTooLarge { size: ByteSize, limit: ByteSize },

    #[error("unsupported document type: {0}")]
    UnsupportedKind(String),

    #[error("{0} is not configured on this worker")]
    Unavailable(&'static str),

    #[error("download failed: {0}")]
    Fetch(BlobError),

    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    #[error("{step} timed out after {after:?}")]
    Timeout { step: &'static str, after: Duration },

    #[error("{step} cancelled")]
    Cancelled { step: &'static str },

    #[error("media upload failed: {0}")]
    Upload(#[from] PoolError),

    #[error("could not decode content: {0}")]
    Decode(String),

    #[error("transcription failed: {0}")]
    Transcription(AiError),

    #[error("embedding failed: {0}")]
    Embedding(AiError),

    #[error("status store failure: {0}")]
    Store(#[from] JobStoreError),
}

impl JobError {
    /// Whether the broker should redeliver the message.
    pub fn is_retryable(&self) -> bool {
        match self {
            JobError::Validation(_)
            | JobError::FileTooLarge { .. }
            | JobError::UnsupportedKind(_)
            | JobError::Unavailable(_)
            | JobError::Fetch(_)
            | JobError::Decode(_)
            | JobError::Store(JobStoreError::Conflict(_)) => false,
            JobError::TransientIo(_)
            | JobError::Timeout { .. }
            | JobError::Cancelled { .. }
            | JobError::Store(_) => true,
            JobError::Upload(err) => !matches!(err, PoolError::NoValidAccounts),
            JobError::Transcription(err) | JobError::Embedding(err) => err.is_retryable(),
        }
    }
}

impl From<Interrupted> for JobError {
    fn from(value: Interrupted) -> Self {
        match value {
            Interrupted::TimedOut { step, after } => JobError::Timeout { step, after },
            Interrupted::Cancelled { step } => JobError::Cancelled { step },
        }
    }
}

impl From<BlobError> for JobError {
    fn from(value: BlobError) -> Self {
        match value {
            BlobError::TooLarge { size, limit } => JobError::FileTooLarge { size, limit },
            BlobError::Transient(msg) => JobError::TransientIo(msg),
            other => JobError::Fetch(other),
        }
    }
}

/// What one delivery of a message amounted to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    /// Absent only when the payload carried no usable job id.
    pub job_id: Option<JobId>,
    pub status: JobStatus,
    /// Whether the broker should redeliver.
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ProcessingResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobOutcome {
    fn failed(job_id: Option<JobId>, error: impl Into<String>, retryable: bool) -> Self {
        Self {
            job_id,
            status: JobStatus::Failed,
            retryable,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Another delivery owns the job right now; the broker should try later.
    fn in_progress(job_id: JobId) -> Self {
        Self {
            job_id: Some(job_id),
            status: JobStatus::Processing,
            retryable: true,
            result: None,
            error: None,
        }
    }
}

/// Processor runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorStats {
    pub messages: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    messages: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

/// Runs queue messages through their pipelines.
///
/// Stateless per job; share one instance across concurrent deliveries.
pub struct JobProcessor {
    store: Arc<dyn JobStatusStore>,
    blobs: Arc<dyn BlobStore>,
    pool: Option<Arc<ProviderPool>>,
    embeddings: Option<Arc<EmbeddingService>>,
    transcriber: Option<Arc<dyn Transcriber>>,
    sink: Option<Arc<dyn EmbeddingSink>>,
    config: ProcessorConfig,
    counters: Counters,
}

impl core::fmt::Debug for JobProcessor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobProcessor")
            .field("config", &self.config)
            .field("pool", &self.pool.is_some())
            .field("embeddings", &self.embeddings.is_some())
            .field("transcriber", &self.transcriber.is_some())
            .finish_non_exhaustive()
    }
}

impl JobProcessor {
    pub fn new(
        store: Arc<dyn JobStatusStore>,
        blobs: Arc<dyn BlobStore>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            store,
            blobs,
            pool: None,
            embeddings: None,
            transcriber: None,
            sink: None,
            config,
            counters: Counters::default(),
        }
    }

    /// Provider pool for video uploads.
    pub fn with_provider_pool(mut self, pool: Arc<ProviderPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_embeddings(mut self, embeddings: Arc<EmbeddingService>) -> Self {
        self.embeddings = Some(embeddings);
        self
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn with_embedding_sink(mut self, sink: Arc<dyn EmbeddingSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            messages: self.counters.messages.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
        }
    }

    /// Process one raw queue message. Never panics and never returns early
    /// without a terminal status, unless the job was already handled.
    pub async fn process(&self, raw: &str, cancel: CancellationToken) -> JobOutcome {
        self.counters.messages.fetch_add(1, Ordering::Relaxed);
        let outcome = self.process_inner(raw, cancel).await;

        let counter = match outcome.status {
            JobStatus::Completed => &self.counters.completed,
            JobStatus::Failed => &self.counters.failed,
            JobStatus::Queued | JobStatus::Processing => &self.counters.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        outcome
    }

    async fn process_inner(&self, raw: &str, cancel: CancellationToken) -> JobOutcome {
        let message = match QueueMessage::parse(raw) {
            Ok(message) => message,
            Err(err) => return self.reject(raw, JobError::Validation(validation_detail(err))).await,
        };
        let job_id = message.job_id.clone();

        let (mut record, previous) = match self.reconcile(&message).await {
            Ok(Reconciled::Run { record, previous }) => (record, previous),
            Ok(Reconciled::Done(outcome)) => return outcome,
            Err(err) => {
                warn!(job_id = %job_id, error = %err, "could not read job status; leaving for redelivery");
                return JobOutcome::failed(Some(job_id), JobError::from(err).to_string(), true);
            }
        };

        info!(
            job_id = %job_id,
            kind = %message.kind,
            resource_id = %message.resource_id,
            attempt = record.attempt,
            "job started"
        );
        if let Err(err) = record.mark_processing("Starting") {
            return JobOutcome::failed(Some(job_id), err.to_string(), false);
        }
        match self.claim(&record, previous).await {
            Ok(true) => {}
            Ok(false) => {
                info!(job_id = %job_id, "job claimed by a concurrent delivery");
                return JobOutcome::in_progress(job_id);
            }
            Err(err) => {
                warn!(job_id = %job_id, error = %err, "could not claim job; leaving for redelivery");
                return JobOutcome::failed(Some(job_id), JobError::from(err).to_string(), true);
            }
        }

        let ctx = CallContext::new(self.config.job_deadline, cancel);
        let run = self.run_pipeline(&message, &mut record, &ctx).await;

        let (outcome, transition) = match run {
            Ok(result) => {
                info!(job_id = %job_id, bytes = result.file_size_bytes, "job completed");
                let outcome = JobOutcome {
                    job_id: Some(job_id.clone()),
                    status: JobStatus::Completed,
                    retryable: false,
                    result: Some(result.clone()),
                    error: None,
                };
                (outcome, record.mark_completed(result))
            }
            Err(err) => {
                error!(
                    job_id = %job_id,
                    kind = %message.kind,
                    retryable = err.is_retryable(),
                    error = %err,
                    "job failed"
                );
                let reason = format!("{} processing failed: {err}", message.kind);
                let outcome = JobOutcome::failed(Some(job_id.clone()), &reason, err.is_retryable());
                (outcome, record.mark_failed(reason))
            }
        };

        if let Err(err) = transition {
            return JobOutcome::failed(Some(job_id), err.to_string(), false);
        }
        if let Err(err) = self.write_terminal(&record).await {
            error!(job_id = %job_id, error = %err, "failed to persist terminal job status");
            let err = JobError::from(err);
            return JobOutcome {
                retryable: err.is_retryable(),
                error: Some(err.to_string()),
                ..outcome
            };
        }
        outcome
    }

    /// Fail a payload that did not validate, recording it if a job id can be recovered.
    async fn reject(&self, raw: &str, err: JobError) -> JobOutcome {
        let reason = err.to_string();
        let Some(job_id) = QueueMessage::salvage_job_id(raw) else {
            warn!(error = %reason, "dropping malformed job payload without a job id");
            return JobOutcome::failed(None, reason, false);
        };
        warn!(job_id = %job_id, error = %reason, "rejecting malformed job payload");

        let existing = match self.read(&job_id).await {
            Ok(existing) => existing,
            Err(err) => {
                warn!(job_id = %job_id, error = %err, "could not read job status for rejected payload");
                None
            }
        };

        let record = match existing {
            // Never clobber a finished job with a bad redelivery.
            Some(record) if record.status.is_terminal() => {
                return JobOutcome::failed(Some(job_id), reason, false);
            }
            Some(mut record) => {
                let started = match record.status {
                    JobStatus::Queued => record.mark_processing("Validating"),
                    _ => Ok(()),
                };
                match started.and_then(|()| record.mark_failed(reason.clone())) {
                    Ok(()) => record,
                    Err(_) => JobRecord::rejected(job_id.clone(), reason.clone()),
                }
            }
            None => JobRecord::rejected(job_id.clone(), reason.clone()),
        };

        if let Err(err) = self.write_terminal(&record).await {
            error!(job_id = %job_id, error = %err, "failed to persist rejected job status");
        }
        JobOutcome::failed(Some(job_id), reason, false)
    }

    async fn reconcile(&self, message: &QueueMessage) -> Result<Reconciled, JobStoreError> {
        let job_id = &message.job_id;
        let Some(mut record) = self.read(job_id).await? else {
            return Ok(Reconciled::Run {
                record: JobRecord::queued(job_id.clone()),
                previous: None,
            });
        };
        let previous = Some(record.version());

        match record.status {
            JobStatus::Queued => Ok(Reconciled::Run { record, previous }),
            JobStatus::Completed => {
                info!(job_id = %job_id, "job already completed; skipping redelivery");
                Ok(Reconciled::Done(JobOutcome {
                    job_id: Some(job_id.clone()),
                    status: JobStatus::Completed,
                    retryable: false,
                    result: record.result,
                    error: None,
                }))
            }
            JobStatus::Processing if !self.is_stale(&record) => {
                info!(job_id = %job_id, stage = %record.stage, "job already in progress");
                Ok(Reconciled::Done(JobOutcome::in_progress(job_id.clone())))
            }
            JobStatus::Processing | JobStatus::Failed => {
                info!(
                    job_id = %job_id,
                    previous = record.status.as_str(),
                    attempt = record.attempt + 1,
                    "re-running job from scratch"
                );
                record.requeue();
                Ok(Reconciled::Run { record, previous })
            }
        }
    }

    fn is_stale(&self, record: &JobRecord) -> bool {
        let age = Utc::now().signed_duration_since(record.updated_at);
        age.to_std().map_or(false, |age| age >= self.config.stale_after)
    }

    async fn run_pipeline(
        &self,
        message: &QueueMessage,
        record: &mut JobRecord,
        ctx: &CallContext,
    ) -> Result<ProcessingResult, JobError> {
        match &message.kind {
            JobKind::Pdf => self.process_pdf(message, record, ctx).await,
            JobKind::Text => self.process_text(message, record, ctx).await,
            JobKind::Office => self.process_office(message, record, ctx).await,
            JobKind::Video => self.process_video(message, record, ctx).await,
            JobKind::Unsupported(kind) => Err(JobError::UnsupportedKind(kind.clone())),
        }
    }

    async fn process_pdf(
        &self,
        message: &QueueMessage,
        record: &mut JobRecord,
        ctx: &CallContext,
    ) -> Result<ProcessingResult, JobError> {
        self.progress(record, 20, "Downloading PDF").await;
        let data = self.download(message, ctx).await?;

        self.progress(record, 50, "Reading PDF structure").await;
        if !data.starts_with(b"%PDF-") {
            return Err(JobError::Decode("missing %PDF header".to_string()));
        }
        let page_count = count_pdf_pages(&data);

        self.progress(record, 80, "Preparing preview").await;
        Ok(ProcessingResult {
            preview_url: Some(self.preview_url(message)),
            page_count: Some(page_count),
            file_size_bytes: data.len() as u64,
            ..Default::default()
        })
    }

    async fn process_text(
        &self,
        message: &QueueMessage,
        record: &mut JobRecord,
        ctx: &CallContext,
    ) -> Result<ProcessingResult, JobError> {
        self.progress(record, 20, "Downloading text file").await;
        let data = self.download(message, ctx).await?;

        self.progress(record, 60, "Extracting text content").await;
        let text = String::from_utf8_lossy(&data);

        if self.embeds() && !text.trim().is_empty() {
            self.progress(record, 80, "Embedding text").await;
            self.embed(message, &text, ctx).await?;
        }

        self.progress(record, 90, "Creating preview").await;
        Ok(ProcessingResult {
            preview_url: Some(self.preview_url(message)),
            text_content: Some(truncate_chars(&text, self.config.text_preview_chars)),
            file_size_bytes: data.len() as u64,
            ..Default::default()
        })
    }

    async fn process_office(
        &self,
        message: &QueueMessage,
        record: &mut JobRecord,
        ctx: &CallContext,
    ) -> Result<ProcessingResult, JobError> {
        self.progress(record, 20, "Downloading Office document").await;
        let data = self.download(message, ctx).await?;

        self.progress(record, 70, "Processing Office document").await;
        Ok(ProcessingResult {
            preview_url: Some(self.preview_url(message)),
            file_size_bytes: data.len() as u64,
            ..Default::default()
        })
    }

    async fn process_video(
        &self,
        message: &QueueMessage,
        record: &mut JobRecord,
        ctx: &CallContext,
    ) -> Result<ProcessingResult, JobError> {
        let pool = self.pool.as_ref().ok_or(JobError::Unavailable("provider pool"))?;

        self.progress(record, 20, "Downloading video").await;
        let data = self.download(message, ctx).await?;
        let file_size_bytes = data.len() as u64;

        self.progress(record, 40, "Uploading to media provider").await;
        let options = UploadOptions {
            public_id: Some(format!("resource-{}", message.resource_id)),
            folder: None,
        };
        let upload = pool.upload_media(data, &options, ctx).await?;

        let mut transcript = None;
        if let Some(transcriber) = &self.transcriber {
            self.progress(record, 70, "Transcribing audio").await;
            let text = ctx
                .run(
                    "transcribe",
                    self.config.transform_timeout,
                    transcriber.transcribe(&upload.primary_url),
                )
                .await?
                .map_err(JobError::Transcription)?
                .text;
            transcript = Some(text);
        }

        if let Some(text) = transcript.as_deref().filter(|t| !t.trim().is_empty()) {
            if self.embeds() {
                self.progress(record, 85, "Embedding transcript").await;
                self.embed(message, text, ctx).await?;
            }
        }

        Ok(ProcessingResult {
            preview_url: Some(upload.secondary_url.unwrap_or(upload.primary_url)),
            thumbnail_url: upload.thumbnail_url,
            text_content: transcript.map(|t| truncate_chars(&t, self.config.text_preview_chars)),
            page_count: None,
            file_size_bytes,
        })
    }

    /// Download with the size ceiling, retrying transient failures.
    async fn download(&self, message: &QueueMessage, ctx: &CallContext) -> Result<Bytes, JobError> {
        let limit = self.config.max_file_size;
        if let Some(declared) = message.resource_size {
            if declared > limit.as_u64() {
                return Err(JobError::FileTooLarge {
                    size: ByteSize::bytes(declared),
                    limit,
                });
            }
        }

        let policy = &self.config.download_retry;
        let mut retries = 0;
        loop {
            let outcome = ctx
                .run(
                    "download",
                    self.config.download_timeout,
                    self.blobs.fetch(&message.resource_url, limit),
                )
                .await;

            let err = match outcome {
                Ok(Ok(data)) => {
                    debug!(job_id = %message.job_id, bytes = data.len(), "resource downloaded");
                    return Ok(data);
                }
                Ok(Err(err)) => JobError::from(err),
                Err(interrupted) => JobError::from(interrupted),
            };

            let transient = matches!(err, JobError::TransientIo(_) | JobError::Timeout { .. });
            if !transient || !policy.should_retry(retries) {
                return Err(err);
            }
            retries += 1;
            let delay = policy.delay_for_retry(retries);
            warn!(
                job_id = %message.job_id,
                attempt = retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "download failed; retrying"
            );
            ctx.pause("download_backoff", delay).await?;
        }
    }

    /// Embedding runs only when the vector has somewhere to go.
    fn embeds(&self) -> bool {
        self.embeddings.is_some() && self.sink.is_some()
    }

    async fn embed(&self, message: &QueueMessage, text: &str, ctx: &CallContext) -> Result<(), JobError> {
        let (Some(embeddings), Some(sink)) = (&self.embeddings, &self.sink) else {
            return Ok(());
        };
        let vector = ctx
            .run("embed", self.config.embed_timeout, embeddings.embed_content(text))
            .await?
            .map_err(JobError::Embedding)?;

        ctx.run(
            "store_embedding",
            self.config.embed_timeout,
            sink.store(message.resource_id, &vector),
        )
        .await?
        .map_err(JobError::Embedding)?;
        debug!(job_id = %message.job_id, dims = vector.len(), "content embedded");
        Ok(())
    }

    fn preview_url(&self, message: &QueueMessage) -> String {
        format!(
            "{}/{}/stream",
            self.config.preview_base_path.trim_end_matches('/'),
            message.resource_id
        )
    }

    async fn progress(&self, record: &mut JobRecord, pct: u8, stage: &str) {
        if let Err(err) = record.advance(pct, stage) {
            warn!(job_id = %record.job_id, error = %err, "progress update rejected");
            return;
        }
        debug!(job_id = %record.job_id, progress = record.progress_pct, stage, "job progress");
        self.write_progress(record).await;
    }

    async fn write_progress(&self, record: &JobRecord) {
        if let Err(err) = self.write(record).await {
            warn!(
                job_id = %record.job_id,
                status = record.status.as_str(),
                error = %err,
                "failed to persist job progress"
            );
        }
    }

    async fn write_terminal(&self, record: &JobRecord) -> Result<(), JobStoreError> {
        match self.write(record).await {
            Ok(()) => Ok(()),
            Err(err @ JobStoreError::Conflict(_)) => Err(err),
            Err(err) => {
                warn!(job_id = %record.job_id, error = %err, "terminal status write failed; retrying once");
                self.write(record).await
            }
        }
    }

    async fn write(&self, record: &JobRecord) -> Result<(), JobStoreError> {
        self.bounded("write", self.store.upsert(record)).await
    }

    async fn claim(
        &self,
        record: &JobRecord,
        previous: Option<RecordVersion>,
    ) -> Result<bool, JobStoreError> {
        self.bounded("claim", self.store.claim(record, previous)).await
    }

    async fn read(&self, job_id: &JobId) -> Result<Option<JobRecord>, JobStoreError> {
        self.bounded("read", self.store.get(job_id)).await
    }

    async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T, JobStoreError>
    where
        F: Future<Output = Result<T, JobStoreError>>,
    {
        match tokio::time::timeout(self.config.store_timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(JobStoreError::Storage(format!(
                "{op} timed out after {:?}",
                self.config.store_timeout
            ))),
        }
    }
}

fn validation_detail(err: DomainError) -> String {
    match err {
        DomainError::Validation(msg) | DomainError::InvalidId(msg) => msg,
        other => other.to_string(),
    }
}

enum Reconciled {
    /// Run `record`, claiming it over the stored `previous` version.
    Run {
        record: JobRecord,
        previous: Option<RecordVersion>,
    },
    Done(JobOutcome),
}

/// Count `/Type /Page` object markers, ignoring `/Pages` tree nodes. At least 1.
fn count_pdf_pages(data: &[u8]) -> u32 {
    const TYPE: &[u8] = b"/Type";
    const PAGE: &[u8] = b"/Page";

    let mut count = 0u32;
    let mut rest = data;
    while let Some(pos) = find(rest, TYPE) {
        rest = &rest[pos + TYPE.len()..];
        let value = trim_pdf_whitespace(rest);
        if value.starts_with(PAGE) {
            let next = value.get(PAGE.len()).copied();
            if !next.is_some_and(|b| b.is_ascii_alphanumeric()) {
                count += 1;
            }
        }
    }
    count.max(1)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn trim_pdf_whitespace(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b'\x0c' | b'\0'))
        .unwrap_or(data.len());
    &data[start..]
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::InMemoryBlobStore;
    use crate::jobs::store::InMemoryJobStatusStore;
    use crate::jobs::types::RecordVersion;
    use crate::providers::pool::testing::{ScriptedConnector, pool, uploaded};
    use crate::providers::ProviderError;
    use async_trait::async_trait;
    use mediaflow_ai::{Embedder, Transcript};
    use mediaflow_cache::{Embedding, MultiTierCache};
    use mediaflow_core::ResourceId;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::sync::atomic::AtomicUsize;

    const PDF: &[u8] = b"%PDF-1.7\n1 0 obj << /Type /Pages /Count 2 >>\n\
        2 0 obj << /Type /Page /Parent 1 0 R >>\n3 0 obj << /Type/Page >>\n%%EOF";

    struct Harness {
        store: Arc<InMemoryJobStatusStore>,
        blobs: Arc<InMemoryBlobStore>,
        connector: Arc<ScriptedConnector>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: InMemoryJobStatusStore::arc(),
                blobs: Arc::new(InMemoryBlobStore::new()),
                connector: ScriptedConnector::new(),
            }
        }

        fn config() -> ProcessorConfig {
            ProcessorConfig::default().with_download_retry(RetryPolicy::fixed(2, Duration::from_millis(10)))
        }

        fn processor(&self) -> JobProcessor {
            JobProcessor::new(self.store.clone(), self.blobs.clone(), Self::config())
                .with_provider_pool(Arc::new(pool(&["acct-1", "acct-2"], &self.connector)))
        }

        fn history(&self, job: &str) -> Vec<JobStatus> {
            self.store.status_history(&JobId::parse(job).unwrap())
        }

        async fn record(&self, job: &str) -> JobRecord {
            self.store.get(&JobId::parse(job).unwrap()).await.unwrap().unwrap()
        }
    }

    fn message(job: &str, kind: &str, url: &str, size: Option<u64>) -> String {
        serde_json::json!({
            "jobId": job,
            "resourceId": 7,
            "kind": kind,
            "userId": "user-1",
            "resourceUrl": url,
            "resourceName": "resource",
            "resourceSize": size,
        })
        .to_string()
    }

    #[derive(Default)]
    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model(&self) -> &str {
            "counting"
        }

        async fn embed(&self, text: &str) -> Result<Embedding, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        stored: Mutex<Vec<(ResourceId, Embedding)>>,
    }

    #[async_trait]
    impl EmbeddingSink for RecordingSink {
        async fn store(&self, resource_id: ResourceId, embedding: &Embedding) -> Result<(), AiError> {
            self.stored.lock().push((resource_id, embedding.clone()));
            Ok(())
        }
    }

    struct FixedTranscriber(&'static str);

    #[async_trait]
    impl Transcriber for FixedTranscriber {
        async fn transcribe(&self, _media_url: &str) -> Result<Transcript, AiError> {
            Ok(Transcript {
                text: self.0.to_string(),
                language: Some("en".into()),
            })
        }
    }

    #[tokio::test]
    async fn oversized_declared_resource_fails_without_external_calls() {
        let h = Harness::new();
        let raw = message("job-big", "video", "mem://big", Some(200 * 1024 * 1024));

        let outcome = h.processor().process(&raw, CancellationToken::new()).await;

        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(!outcome.retryable);
        assert!(outcome.error.unwrap().contains("200.0MB"));
        assert_eq!(h.blobs.fetch_count(), 0);
        assert_eq!(h.connector.calls(), 0);
        assert_eq!(h.history("job-big"), vec![JobStatus::Processing, JobStatus::Failed]);
        assert!(h.record("job-big").await.result.is_none());
    }

    #[tokio::test]
    async fn pdf_pipeline_counts_pages() {
        let h = Harness::new();
        h.blobs.insert("mem://doc.pdf", PDF);

        let outcome = h
            .processor()
            .process(&message("job-pdf", "pdf", "mem://doc.pdf", None), CancellationToken::new())
            .await;

        assert_eq!(outcome.status, JobStatus::Completed);
        let result = outcome.result.unwrap();
        assert_eq!(result.page_count, Some(2));
        assert_eq!(result.preview_url.as_deref(), Some("/api/attachments/7/stream"));
        assert_eq!(result.file_size_bytes, PDF.len() as u64);

        let record = h.record("job-pdf").await;
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.progress_pct, 100);
        assert_eq!(h.history("job-pdf"), vec![JobStatus::Processing, JobStatus::Completed]);
    }

    #[tokio::test]
    async fn non_pdf_bytes_fail_as_decode_errors() {
        let h = Harness::new();
        h.blobs.insert("mem://fake.pdf", Bytes::from_static(b"PK\x03\x04 zip"));

        let outcome = h
            .processor()
            .process(&message("job-fake", "pdf", "mem://fake.pdf", None), CancellationToken::new())
            .await;

        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(!outcome.retryable);
        let record = h.record("job-fake").await;
        assert_eq!(record.progress_pct, 50);
        assert!(record.error.unwrap().starts_with("pdf processing failed"));
    }

    #[tokio::test]
    async fn text_pipeline_decodes_lossily_and_embeds() {
        let h = Harness::new();
        let mut data = "héllo wörld ".repeat(3).into_bytes();
        data.push(0xff);
        h.blobs.insert("mem://notes.txt", data.clone());

        let embedder = Arc::new(CountingEmbedder::default());
        let cache = Arc::new(MultiTierCache::default());
        let sink = Arc::new(RecordingSink::default());
        let processor = h
            .processor()
            .with_embeddings(Arc::new(EmbeddingService::new(embedder.clone(), cache.clone())))
            .with_embedding_sink(sink.clone());
        let processor = JobProcessor {
            config: processor.config.clone().with_text_preview_chars(7),
            ..processor
        };

        let outcome = processor
            .process(&message("job-txt", "text", "mem://notes.txt", None), CancellationToken::new())
            .await;

        let result = outcome.result.unwrap();
        assert_eq!(result.text_content.as_deref(), Some("héllo w"));
        assert_eq!(result.file_size_bytes, data.len() as u64);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.stored.lock()[0].0, ResourceId::new(7));
        assert_eq!(cache.stats().embedding.size, 1);
    }

    #[tokio::test]
    async fn office_pipeline_points_at_stream_endpoint() {
        let h = Harness::new();
        h.blobs.insert("mem://deck.pptx", Bytes::from_static(b"PK office"));

        let outcome = h
            .processor()
            .process(&message("job-off", "office", "mem://deck.pptx", Some(9)), CancellationToken::new())
            .await;

        let result = outcome.result.unwrap();
        assert_eq!(result.preview_url.as_deref(), Some("/api/attachments/7/stream"));
        assert_eq!(result.page_count, None);
        assert_eq!(result.file_size_bytes, 9);
    }

    #[tokio::test]
    async fn video_pipeline_uploads_transcribes_and_embeds() {
        let h = Harness::new();
        h.blobs.insert("mem://clip.mp4", Bytes::from_static(b"video"));
        h.connector.script("acct-1", Ok(uploaded("acct-1", "resource-7")));

        let embedder = Arc::new(CountingEmbedder::default());
        let sink = Arc::new(RecordingSink::default());
        let processor = h
            .processor()
            .with_transcriber(Arc::new(FixedTranscriber("welcome to the course")))
            .with_embeddings(Arc::new(EmbeddingService::new(
                embedder.clone(),
                Arc::new(MultiTierCache::default()),
            )))
            .with_embedding_sink(sink.clone());

        let outcome = processor
            .process(&message("job-vid", "video", "mem://clip.mp4", None), CancellationToken::new())
            .await;

        let result = outcome.result.unwrap();
        assert_eq!(
            result.preview_url.as_deref(),
            Some("https://cdn.test/acct-1/resource-7.m3u8")
        );
        assert_eq!(
            result.thumbnail_url.as_deref(),
            Some("https://cdn.test/acct-1/resource-7.jpg")
        );
        assert_eq!(result.text_content.as_deref(), Some("welcome to the course"));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.stored.lock().len(), 1);
        assert_eq!(h.connector.calls(), 1);
    }

    #[tokio::test]
    async fn embedding_is_skipped_without_a_sink() {
        let h = Harness::new();
        h.blobs.insert("mem://notes.txt", Bytes::from_static(b"hello"));
        let embedder = Arc::new(CountingEmbedder::default());
        let processor = h.processor().with_embeddings(Arc::new(EmbeddingService::new(
            embedder.clone(),
            Arc::new(MultiTierCache::default()),
        )));

        let outcome = processor
            .process(&message("job-txt", "text", "mem://notes.txt", None), CancellationToken::new())
            .await;

        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn video_fails_over_on_quota() {
        let h = Harness::new();
        h.blobs.insert("mem://clip.mp4", Bytes::from_static(b"video"));
        h.connector.script("acct-1", Err(ProviderError::http(429, "quota")));
        h.connector.script("acct-2", Ok(uploaded("acct-2", "resource-7")));

        let outcome = h
            .processor()
            .process(&message("job-vid", "video", "mem://clip.mp4", None), CancellationToken::new())
            .await;

        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(
            outcome.result.unwrap().preview_url.as_deref(),
            Some("https://cdn.test/acct-2/resource-7.m3u8")
        );
    }

    #[tokio::test]
    async fn video_without_pool_is_fatal() {
        let h = Harness::new();
        let processor = JobProcessor::new(h.store.clone(), h.blobs.clone(), Harness::config());

        let outcome = processor
            .process(&message("job-vid", "video", "mem://clip.mp4", None), CancellationToken::new())
            .await;

        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(!outcome.retryable);
        assert_eq!(h.blobs.fetch_count(), 0);
    }

    #[tokio::test]
    async fn unsupported_kind_fails_before_download() {
        let h = Harness::new();
        let outcome = h
            .processor()
            .process(&message("job-x", "hologram", "mem://x", None), CancellationToken::new())
            .await;

        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(!outcome.retryable);
        assert!(outcome.error.unwrap().contains("unsupported document type: hologram"));
        assert_eq!(h.blobs.fetch_count(), 0);
    }

    #[tokio::test]
    async fn malformed_payload_with_job_id_records_failure() {
        let h = Harness::new();
        let raw = r#"{"jobId":"job-bad","kind":"pdf"}"#;

        let outcome = h.processor().process(raw, CancellationToken::new()).await;

        assert_eq!(outcome.job_id, Some(JobId::parse("job-bad").unwrap()));
        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(!outcome.retryable);
        let record = h.record("job-bad").await;
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.error.unwrap().starts_with("validation failed"));
        assert_eq!(h.blobs.fetch_count(), 0);
    }

    #[tokio::test]
    async fn malformed_payload_fails_existing_queued_record() {
        let h = Harness::new();
        h.store.insert(JobRecord::queued(JobId::parse("job-bad").unwrap()));

        h.processor()
            .process(r#"{"jobId":"job-bad","resourceId":"nope"}"#, CancellationToken::new())
            .await;

        assert_eq!(h.history("job-bad"), vec![JobStatus::Failed]);
        let record = h.record("job-bad").await;
        assert_eq!(record.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn malformed_payload_without_job_id_writes_nothing() {
        let h = Harness::new();
        let outcome = h.processor().process("{not json", CancellationToken::new()).await;
        assert_eq!(outcome.job_id, None);
        assert!(!outcome.retryable);
        assert_eq!(h.blobs.fetch_count(), 0);
    }

    #[tokio::test]
    async fn transient_download_errors_are_retried() {
        let h = Harness::new();
        h.blobs.insert("mem://notes.txt", Bytes::from_static(b"hello"));
        h.blobs.fail_next(BlobError::Transient("reset".into()));
        h.blobs.fail_next(BlobError::Transient("reset".into()));

        let outcome = h
            .processor()
            .process(&message("job-txt", "text", "mem://notes.txt", None), CancellationToken::new())
            .await;

        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(h.blobs.fetch_count(), 3);
    }

    #[tokio::test]
    async fn exhausted_download_retries_are_retryable_failures() {
        let h = Harness::new();
        for _ in 0..3 {
            h.blobs.fail_next(BlobError::Transient("reset".into()));
        }

        let outcome = h
            .processor()
            .process(&message("job-txt", "text", "mem://notes.txt", None), CancellationToken::new())
            .await;

        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(outcome.retryable);
        assert_eq!(h.blobs.fetch_count(), 3);
    }

    #[tokio::test]
    async fn missing_objects_are_not_retried() {
        let h = Harness::new();
        let outcome = h
            .processor()
            .process(&message("job-txt", "text", "mem://gone", None), CancellationToken::new())
            .await;

        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(!outcome.retryable);
        assert_eq!(h.blobs.fetch_count(), 1);
    }

    #[tokio::test]
    async fn downloaded_bytes_over_the_ceiling_fail() {
        let h = Harness::new();
        h.blobs.insert("mem://big", vec![0u8; 64]);
        let processor = h.processor();
        let processor = JobProcessor {
            config: processor.config.clone().with_max_file_size(ByteSize::bytes(32)),
            ..processor
        };

        let outcome = processor
            .process(&message("job-big", "office", "mem://big", None), CancellationToken::new())
            .await;

        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(!outcome.retryable);
        assert!(outcome.error.unwrap().contains("too large"));
    }

    #[tokio::test]
    async fn cancelled_job_is_marked_failed_and_retryable() {
        let h = Harness::new();
        h.blobs.insert("mem://notes.txt", Bytes::from_static(b"hello"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = h
            .processor()
            .process(&message("job-c", "text", "mem://notes.txt", None), cancel)
            .await;

        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(outcome.retryable);
        assert_eq!(h.blobs.fetch_count(), 0);
        assert_eq!(h.record("job-c").await.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn completed_redelivery_is_a_no_op() {
        let h = Harness::new();
        h.blobs.insert("mem://notes.txt", Bytes::from_static(b"hello"));
        let processor = h.processor();
        let raw = message("job-txt", "text", "mem://notes.txt", None);

        let first = processor.process(&raw, CancellationToken::new()).await;
        let writes = h.store.write_count(&JobId::parse("job-txt").unwrap());
        let second = processor.process(&raw, CancellationToken::new()).await;

        assert_eq!(second.status, JobStatus::Completed);
        assert_eq!(second.result, first.result);
        assert_eq!(h.blobs.fetch_count(), 1);
        assert_eq!(h.store.write_count(&JobId::parse("job-txt").unwrap()), writes);
        assert_eq!(processor.stats().completed, 2);
    }

    #[tokio::test]
    async fn failed_job_is_rerun_as_a_new_attempt() {
        let h = Harness::new();
        let processor = h.processor();
        let raw = message("job-txt", "text", "mem://notes.txt", None);

        let first = processor.process(&raw, CancellationToken::new()).await;
        assert_eq!(first.status, JobStatus::Failed);

        h.blobs.insert("mem://notes.txt", Bytes::from_static(b"hello"));
        let second = processor.process(&raw, CancellationToken::new()).await;

        assert_eq!(second.status, JobStatus::Completed);
        let record = h.record("job-txt").await;
        assert_eq!(record.attempt, 2);
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn in_flight_job_is_left_alone() {
        let h = Harness::new();
        let mut record = JobRecord::queued(JobId::parse("job-run").unwrap());
        record.mark_processing("Downloading").unwrap();
        h.store.insert(record);

        let outcome = h
            .processor()
            .process(&message("job-run", "text", "mem://notes.txt", None), CancellationToken::new())
            .await;

        assert_eq!(outcome.status, JobStatus::Processing);
        assert!(outcome.retryable);
        assert_eq!(h.blobs.fetch_count(), 0);
    }

    #[tokio::test]
    async fn stale_processing_record_is_rerun() {
        let h = Harness::new();
        h.blobs.insert("mem://notes.txt", Bytes::from_static(b"hello"));
        let mut record = JobRecord::queued(JobId::parse("job-run").unwrap());
        record.mark_processing("Downloading").unwrap();
        record.updated_at = Utc::now() - chrono::Duration::hours(2);
        h.store.insert(record);

        let outcome = h
            .processor()
            .process(&message("job-run", "text", "mem://notes.txt", None), CancellationToken::new())
            .await;

        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(h.record("job-run").await.attempt, 2);
    }

    #[tokio::test]
    async fn progress_write_failures_do_not_abort_the_job() {
        let h = Harness::new();
        h.blobs.insert("mem://notes.txt", Bytes::from_static(b"hello"));
        h.store.fail_next_write(JobStoreError::Storage("flaky".into()));
        h.store.fail_next_write(JobStoreError::Storage("flaky".into()));

        let outcome = h
            .processor()
            .process(&message("job-txt", "text", "mem://notes.txt", None), CancellationToken::new())
            .await;

        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(h.record("job-txt").await.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn terminal_write_is_retried_once() {
        let h = Harness::new();
        let processor = h.processor();
        // Unsupported kinds claim the job, then write the terminal status.
        let raw = message("job-x", "hologram", "mem://x", None);
        h.store.fail_next_write(JobStoreError::Storage("down".into()));

        let outcome = processor.process(&raw, CancellationToken::new()).await;

        assert_eq!(outcome.status, JobStatus::Failed);
        assert_eq!(h.record("job-x").await.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn lost_terminal_write_is_reported_as_retryable() {
        let h = Harness::new();
        let raw = message("job-x", "hologram", "mem://x", None);
        for _ in 0..2 {
            h.store.fail_next_write(JobStoreError::Storage("down".into()));
        }

        let outcome = h.processor().process(&raw, CancellationToken::new()).await;

        assert!(outcome.retryable);
        assert!(outcome.error.unwrap().contains("status store failure"));
    }

    #[tokio::test]
    async fn failed_claim_leaves_the_job_for_redelivery() {
        let h = Harness::new();
        h.blobs.insert("mem://notes.txt", Bytes::from_static(b"hello"));
        h.store.fail_next_claim(JobStoreError::Storage("down".into()));

        let outcome = h
            .processor()
            .process(&message("job-txt", "text", "mem://notes.txt", None), CancellationToken::new())
            .await;

        assert!(outcome.retryable);
        assert_eq!(h.blobs.fetch_count(), 0);
        assert!(h.store.get(&JobId::parse("job-txt").unwrap()).await.unwrap().is_none());
    }

    /// Yields after every read so concurrent deliveries interleave between
    /// reading a record and claiming it.
    struct YieldingStore(Arc<InMemoryJobStatusStore>);

    #[async_trait]
    impl JobStatusStore for YieldingStore {
        async fn get(&self, job_id: &JobId) -> Result<Option<JobRecord>, JobStoreError> {
            let record = self.0.get(job_id).await;
            tokio::task::yield_now().await;
            record
        }

        async fn upsert(&self, record: &JobRecord) -> Result<(), JobStoreError> {
            self.0.upsert(record).await
        }

        async fn claim(
            &self,
            record: &JobRecord,
            previous: Option<RecordVersion>,
        ) -> Result<bool, JobStoreError> {
            self.0.claim(record, previous).await
        }
    }

    #[tokio::test]
    async fn concurrent_duplicate_deliveries_run_once() {
        let h = Harness::new();
        h.blobs.insert("mem://notes.txt", Bytes::from_static(b"hello"));
        let processor = JobProcessor::new(
            Arc::new(YieldingStore(h.store.clone())),
            h.blobs.clone(),
            Harness::config(),
        );
        let raw = message("job-dup", "text", "mem://notes.txt", None);

        let (a, b) = tokio::join!(
            processor.process(&raw, CancellationToken::new()),
            processor.process(&raw, CancellationToken::new())
        );

        let mut statuses = [a.status, b.status];
        statuses.sort_by_key(JobStatus::rank);
        assert_eq!(statuses, [JobStatus::Processing, JobStatus::Completed]);
        assert!([a, b].iter().all(|o| o.status == JobStatus::Completed || o.retryable));
        assert_eq!(h.blobs.fetch_count(), 1);
        assert_eq!(h.history("job-dup"), vec![JobStatus::Processing, JobStatus::Completed]);
        assert_eq!(h.record("job-dup").await.status, JobStatus::Completed);
    }

    /// Lets a later attempt take the job over right after every claim.
    struct TakeoverStore(Arc<InMemoryJobStatusStore>);

    #[async_trait]
    impl JobStatusStore for TakeoverStore {
        async fn get(&self, job_id: &JobId) -> Result<Option<JobRecord>, JobStoreError> {
            self.0.get(job_id).await
        }

        async fn upsert(&self, record: &JobRecord) -> Result<(), JobStoreError> {
            self.0.upsert(record).await
        }

        async fn claim(
            &self,
            record: &JobRecord,
            previous: Option<RecordVersion>,
        ) -> Result<bool, JobStoreError> {
            let won = self.0.claim(record, previous).await?;
            let mut newer = record.clone();
            newer.requeue();
            newer.mark_processing("Starting").unwrap();
            self.0.upsert(&newer).await?;
            Ok(won)
        }
    }

    #[tokio::test]
    async fn superseded_terminal_write_is_not_retried() {
        let h = Harness::new();
        let processor = JobProcessor::new(
            Arc::new(TakeoverStore(h.store.clone())),
            h.blobs.clone(),
            Harness::config(),
        );

        let outcome = processor
            .process(&message("job-x", "hologram", "mem://x", None), CancellationToken::new())
            .await;

        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(!outcome.retryable);
        assert!(outcome.error.unwrap().contains("stale write refused"));
        let record = h.record("job-x").await;
        assert_eq!(record.attempt, 2);
        assert_eq!(record.status, JobStatus::Processing);
    }

    #[test]
    fn retry_classification() {
        assert!(!JobError::Validation("x".into()).is_retryable());
        assert!(!JobError::Decode("x".into()).is_retryable());
        assert!(JobError::TransientIo("x".into()).is_retryable());
        assert!(JobError::Upload(PoolError::PoolExhausted).is_retryable());
        assert!(!JobError::Upload(PoolError::NoValidAccounts).is_retryable());
        assert!(JobError::Embedding(AiError::Unavailable("x".into())).is_retryable());
        assert!(!JobError::Embedding(AiError::InvalidInput("x".into())).is_retryable());
        assert!(JobError::Store(JobStoreError::Storage("x".into())).is_retryable());
        assert!(!JobError::Store(JobStoreError::Conflict("x".into())).is_retryable());
    }

    #[test]
    fn page_count_ignores_page_tree_nodes() {
        assert_eq!(count_pdf_pages(PDF), 2);
        assert_eq!(count_pdf_pages(b"%PDF-1.4 no markers"), 1);
        assert_eq!(count_pdf_pages(b"/Type /PageLabel /Type\n/Page"), 1);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("añb", 2), "añ");
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("", 3), "");
    }

    fn kind() -> impl Strategy<Value = &'static str> {
        prop_oneof![Just("pdf"), Just("text"), Just("office"), Just("video"), Just("zip")]
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 48, ..ProptestConfig::default() })]

        #[test]
        fn status_sequence_is_always_a_forward_path(
            kind in kind(),
            present in any::<bool>(),
            declared in prop::option::of(0u64..300 * 1024 * 1024),
            transient_failures in 0usize..4,
            quota in any::<bool>(),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .start_paused(true)
                .build()
                .unwrap();

            let history = runtime.block_on(async {
                let h = Harness::new();
                if present {
                    h.blobs.insert("mem://r", PDF);
                }
                for _ in 0..transient_failures {
                    h.blobs.fail_next(BlobError::Transient("reset".into()));
                }
                if quota {
                    h.connector.script("acct-1", Err(ProviderError::http(420, "quota")));
                }
                h.processor()
                    .process(&message("job-p", kind, "mem://r", declared), CancellationToken::new())
                    .await;
                h.history("job-p")
            });

            let completed = history.contains(&JobStatus::Completed);
            let failed = history.contains(&JobStatus::Failed);
            prop_assert!(completed != failed);
            prop_assert_eq!(history.first(), Some(&JobStatus::Processing));
            prop_assert!(history.len() == 2);
        }
    }
}
