//! Core job types and policies.

use std::cmp::Ordering;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mediaflow_core::{DomainError, DomainResult, JobId, ResourceId, UserId};

/// Resource kind, routing the job to its pipeline.
///
/// Unknown kinds are kept (not rejected at parse time) so they can be failed
/// as unsupported with the job id on record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobKind {
    Pdf,
    Text,
    Office,
    Video,
    Unsupported(String),
}

impl JobKind {
    pub fn as_str(&self) -> &str {
        match self {
            JobKind::Pdf => "pdf",
            JobKind::Text => "text",
            JobKind::Office => "office",
            JobKind::Video => "video",
            JobKind::Unsupported(kind) => kind,
        }
    }
}

impl From<String> for JobKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "pdf" => JobKind::Pdf,
            "text" => JobKind::Text,
            "office" => JobKind::Office,
            "video" => JobKind::Video,
            _ => JobKind::Unsupported(value),
        }
    }
}

impl From<JobKind> for String {
    fn from(kind: JobKind) -> Self {
        kind.as_str().to_string()
    }
}

impl core::fmt::Display for JobKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue message consumed by the processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub job_id: JobId,
    pub resource_id: ResourceId,
    pub kind: JobKind,
    pub user_id: UserId,
    pub resource_url: String,
    pub resource_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_size: Option<u64>,
}

impl QueueMessage {
    /// Parse and validate a raw payload.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let message: QueueMessage = serde_json::from_str(raw)
            .map_err(|e| DomainError::validation(format!("malformed job payload: {e}")))?;
        message.validate()?;
        Ok(message)
    }

    fn validate(&self) -> DomainResult<()> {
        if self.resource_url.trim().is_empty() {
            return Err(DomainError::validation("resourceUrl must not be blank"));
        }
        if self.resource_name.trim().is_empty() {
            return Err(DomainError::validation("resourceName must not be blank"));
        }
        Ok(())
    }

    /// Best-effort `jobId` extraction from a payload that failed validation.
    pub fn salvage_job_id(raw: &str) -> Option<JobId> {
        let value: serde_json::Value = serde_json::from_str(raw).ok()?;
        let id = value.get("jobId")?.as_str()?;
        JobId::parse(id).ok()
    }
}

/// Job status. Transitions are strictly forward:
/// `Queued -> Processing -> {Completed | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Position along the forward path; both terminal states share the last rank.
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// What a completed job produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    pub file_size_bytes: u64,
}

/// The part of a stored record a claim compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordVersion {
    pub status: JobStatus,
    pub attempt: u32,
}

/// Job status record, as read by dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress_pct: u8,
    pub stage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ProcessingResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Execution attempt (1 for the first delivery).
    pub attempt: u32,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn queued(job_id: JobId) -> Self {
        Self {
            job_id,
            status: JobStatus::Queued,
            progress_pct: 0,
            stage: "Queued".to_string(),
            result: None,
            error: None,
            attempt: 1,
            updated_at: Utc::now(),
        }
    }

    /// A job rejected before it could be processed (no prior record).
    pub fn rejected(job_id: JobId, error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            stage: "Rejected".to_string(),
            error: Some(error.into()),
            ..Self::queued(job_id)
        }
    }

    pub fn version(&self) -> RecordVersion {
        RecordVersion {
            status: self.status,
            attempt: self.attempt,
        }
    }

    /// Whether writing `self` over `existing` keeps the record moving forward.
    ///
    /// A later attempt always wins. Within one attempt a finished record is
    /// final and the status never moves back.
    pub fn may_replace(&self, existing: &JobRecord) -> bool {
        match self.attempt.cmp(&existing.attempt) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => {
                !existing.status.is_terminal() && self.status.rank() >= existing.status.rank()
            }
        }
    }

    /// Reset a previous execution's record for a fresh attempt.
    pub fn requeue(&mut self) {
        self.status = JobStatus::Queued;
        self.progress_pct = 0;
        self.stage = "Queued".to_string();
        self.result = None;
        self.error = None;
        self.attempt += 1;
        self.updated_at = Utc::now();
    }

    /// Mark job as processing.
    pub fn mark_processing(&mut self, stage: impl Into<String>) -> DomainResult<()> {
        self.transition(JobStatus::Processing)?;
        self.progress_pct = self.progress_pct.max(10);
        self.stage = stage.into();
        Ok(())
    }

    /// Record progress. Never moves the percentage backwards.
    pub fn advance(&mut self, pct: u8, stage: impl Into<String>) -> DomainResult<()> {
        if self.status != JobStatus::Processing {
            return Err(DomainError::invariant(format!(
                "progress update on a {} job",
                self.status.as_str()
            )));
        }
        self.progress_pct = self.progress_pct.max(pct.min(99));
        self.stage = stage.into();
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark job as completed.
    pub fn mark_completed(&mut self, result: ProcessingResult) -> DomainResult<()> {
        self.transition(JobStatus::Completed)?;
        self.progress_pct = 100;
        self.stage = "Completed".to_string();
        self.result = Some(result);
        self.error = None;
        Ok(())
    }

    /// Mark job as failed. Any partial result is dropped; progress and stage
    /// stay as the last step reached.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> DomainResult<()> {
        self.transition(JobStatus::Failed)?;
        self.result = None;
        self.error = Some(error.into());
        Ok(())
    }

    fn transition(&mut self, next: JobStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invalid_transition(self.status, next));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^attempt
    #[default]
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

/// Retry policy for transient failures inside a job (downloads).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt (0 = no retries)
    pub max_retries: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_millis(250), Duration::from_secs(5))
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn exponential(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Delay before retry number `retry` (1-indexed).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => (base_ms * 2_f64.powi((retry - 1) as i32)).min(max_ms),
            BackoffStrategy::Linear => (base_ms * retry as f64).min(max_ms),
        };

        // Deterministic jitter keeps tests reproducible.
        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((retry as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }

    /// Whether another retry is allowed after `retries_done` retries.
    pub fn should_retry(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(kind: &str) -> String {
        format!(
            r#"{{"jobId":"job-1","resourceId":42,"kind":"{kind}","userId":"u-1",
                "resourceUrl":"https://blob/x","resourceName":"x.pdf","resourceSize":1024}}"#
        )
    }

    #[test]
    fn parses_queue_message() {
        let msg = QueueMessage::parse(&raw("pdf")).unwrap();
        assert_eq!(msg.job_id.as_str(), "job-1");
        assert_eq!(msg.resource_id, ResourceId::new(42));
        assert_eq!(msg.kind, JobKind::Pdf);
        assert_eq!(msg.resource_size, Some(1024));
    }

    #[test]
    fn unknown_kind_parses_as_unsupported() {
        let msg = QueueMessage::parse(&raw("hologram")).unwrap();
        assert_eq!(msg.kind, JobKind::Unsupported("hologram".into()));
        assert_eq!(String::from(msg.kind), "hologram");
    }

    #[test]
    fn malformed_payloads_are_validation_errors() {
        for payload in [
            "not json",
            r#"{"jobId":"job-1"}"#,
            r#"{"jobId":"job-1","resourceId":"x","kind":"pdf","userId":"u","resourceUrl":"u","resourceName":"n"}"#,
            r#"{"jobId":" ","resourceId":1,"kind":"pdf","userId":"u","resourceUrl":"u","resourceName":"n"}"#,
            r#"{"jobId":"j","resourceId":1,"kind":"pdf","userId":"u","resourceUrl":" ","resourceName":"n"}"#,
        ] {
            assert!(
                matches!(QueueMessage::parse(payload), Err(DomainError::Validation(_))),
                "{payload}"
            );
        }
    }

    #[test]
    fn salvages_job_id_from_invalid_payloads() {
        assert_eq!(
            QueueMessage::salvage_job_id(r#"{"jobId":"job-9","kind":42}"#),
            Some(JobId::parse("job-9").unwrap())
        );
        assert_eq!(QueueMessage::salvage_job_id(r#"{"jobId":7}"#), None);
        assert_eq!(QueueMessage::salvage_job_id("garbage"), None);
    }

    #[test]
    fn transitions_are_forward_only() {
        use JobStatus::*;
        assert!(Queued.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Queued.can_transition_to(Completed));
        assert!(!Queued.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Processing.can_transition_to(Queued));
    }

    #[test]
    fn job_lifecycle() {
        let mut job = JobRecord::queued(JobId::parse("job-1").unwrap());
        assert_eq!(job.status, JobStatus::Queued);

        job.mark_processing("Starting").unwrap();
        assert_eq!(job.progress_pct, 10);

        job.advance(50, "Halfway").unwrap();
        job.advance(20, "Late report").unwrap();
        assert_eq!(job.progress_pct, 50);
        assert_eq!(job.stage, "Late report");

        job.mark_completed(ProcessingResult {
            file_size_bytes: 3,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(job.progress_pct, 100);
        assert!(job.advance(60, "after the fact").is_err());
        assert!(job.mark_failed("too late").is_err());
    }

    #[test]
    fn skipping_processing_is_rejected() {
        let mut job = JobRecord::queued(JobId::parse("job-1").unwrap());
        assert!(matches!(
            job.mark_completed(ProcessingResult::default()),
            Err(DomainError::InvalidTransition { .. })
        ));
        assert!(job.mark_failed("boom").is_err());
    }

    #[test]
    fn requeue_starts_a_new_attempt() {
        let mut job = JobRecord::queued(JobId::parse("job-1").unwrap());
        job.mark_processing("Starting").unwrap();
        job.advance(40, "Downloading").unwrap();
        job.mark_failed("network").unwrap();

        job.requeue();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempt, 2);
        assert_eq!(job.progress_pct, 0);
        assert!(job.error.is_none());
    }

    #[test]
    fn finished_records_are_only_replaced_by_later_attempts() {
        let mut done = JobRecord::queued(JobId::parse("job-1").unwrap());
        done.mark_processing("Starting").unwrap();
        done.mark_completed(ProcessingResult::default()).unwrap();

        let mut duplicate = JobRecord::queued(JobId::parse("job-1").unwrap());
        duplicate.mark_processing("Starting").unwrap();
        assert!(!duplicate.may_replace(&done));

        let mut rerun = done.clone();
        rerun.requeue();
        rerun.mark_processing("Starting").unwrap();
        assert!(rerun.may_replace(&done));
        assert!(!done.may_replace(&rerun));
    }

    #[test]
    fn progress_may_replace_its_own_attempt() {
        let mut running = JobRecord::queued(JobId::parse("job-1").unwrap());
        running.mark_processing("Starting").unwrap();
        let mut later = running.clone();
        later.advance(50, "Working").unwrap();

        assert!(later.may_replace(&running));
        assert!(running.may_replace(&later));
        assert!(!JobRecord::queued(JobId::parse("job-1").unwrap()).may_replace(&running));
    }

    #[test]
    fn record_serializes_for_dashboards() {
        let mut job = JobRecord::queued(JobId::parse("job-1").unwrap());
        job.mark_processing("Starting").unwrap();
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["jobId"], "job-1");
        assert_eq!(json["status"], "processing");
        assert_eq!(json["progressPct"], 10);
        assert!(json.get("result").is_none());
    }

    #[test]
    fn exponential_backoff_calculates_correctly() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.0,
        };

        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_retry(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_retry(10), Duration::from_secs(10));
    }

    #[test]
    fn linear_and_fixed_backoff() {
        let linear = RetryPolicy {
            strategy: BackoffStrategy::Linear,
            jitter: 0.0,
            ..RetryPolicy::exponential(3, Duration::from_millis(100), Duration::from_secs(1))
        };
        assert_eq!(linear.delay_for_retry(3), Duration::from_millis(300));

        let fixed = RetryPolicy::fixed(3, Duration::from_millis(500));
        assert_eq!(fixed.delay_for_retry(1), fixed.delay_for_retry(3));
    }

    #[test]
    fn should_retry_respects_max_retries() {
        let policy = RetryPolicy::fixed(2, Duration::from_millis(1));
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
        assert!(!RetryPolicy::no_retry().should_retry(0));
    }
}
