//! Job progress broadcaster for real-time job status streaming.
//!
//! The database stays the source of truth; events are a best-effort
//! stream for observers and are dropped when nobody listens.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::db::job_repo::JobStatus;

/// Phase of job processing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Started,
    Enumerated,
    Progress,
    FunctionFailed,
    Completed,
    Failed,
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Started => write!(f, "Started"),
            JobPhase::Enumerated => write!(f, "Enumerated"),
            JobPhase::Progress => write!(f, "Progress"),
            JobPhase::FunctionFailed => write!(f, "Function failed"),
            JobPhase::Completed => write!(f, "Completed"),
            JobPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Totals and progress counters of a job at the time of an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCounters {
    pub total_files: u64,
    pub processed_files: u64,
    pub total_functions: u64,
    pub processed_functions: u64,
}

/// Progress event for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: i64,
    pub phase: JobPhase,
    /// Job status implied by the phase.
    pub status: JobStatus,
    /// Human-readable message describing current activity.
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub counters: JobCounters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    /// Error message (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobProgressEvent {
    pub fn new(job_id: i64, phase: JobPhase, message: &str, counters: JobCounters) -> Self {
        let status = match phase {
            JobPhase::Completed => JobStatus::Completed,
            JobPhase::Failed => JobStatus::Failed,
            _ => JobStatus::Running,
        };

        Self {
            job_id,
            phase,
            status,
            message: message.to_string(),
            timestamp: Utc::now(),
            counters,
            file_path: None,
            function_name: None,
            error: None,
        }
    }

    /// A single function could not be processed; the job continues.
    pub fn function_failed(
        job_id: i64,
        file_path: &str,
        function_name: &str,
        error: &str,
        counters: JobCounters,
    ) -> Self {
        let mut event = Self::new(
            job_id,
            JobPhase::FunctionFailed,
            &format!("Failed to process {} in {}", function_name, file_path),
            counters,
        );
        event.file_path = Some(file_path.to_string());
        event.function_name = Some(function_name.to_string());
        event.error = Some(error.to_string());
        event
    }

    /// The job itself failed.
    pub fn failed(job_id: i64, error: &str, counters: JobCounters) -> Self {
        let mut event = Self::new(job_id, JobPhase::Failed, "Processing failed", counters);
        event.error = Some(error.to_string());
        event
    }
}

/// Broadcasts job progress events for streaming.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new job progress broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    /// Creates a tracker for one job run and announces its start.
    pub fn start_job(&self, job_id: i64, directory: &str) -> JobProgressTracker {
        let tracker = JobProgressTracker::new(job_id, Arc::clone(&self.sender));
        tracker.send(JobProgressEvent::new(
            job_id,
            JobPhase::Started,
            &format!("Indexing {}", directory),
            JobCounters::default(),
        ));
        tracker
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Tracks progress for a single job run.
pub struct JobProgressTracker {
    job_id: i64,
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressTracker {
    pub fn new(job_id: i64, sender: Arc<broadcast::Sender<JobProgressEvent>>) -> Self {
        Self { job_id, sender }
    }

    pub fn job_id(&self) -> i64 {
        self.job_id
    }

    fn send(&self, event: JobProgressEvent) {
        let _ = self.sender.send(event);
    }

    pub fn enumerated(&self, counters: JobCounters) {
        self.send(JobProgressEvent::new(
            self.job_id,
            JobPhase::Enumerated,
            &format!(
                "Found {} functions in {} files",
                counters.total_functions, counters.total_files
            ),
            counters,
        ));
    }

    pub fn progress(&self, counters: JobCounters) {
        self.send(JobProgressEvent::new(
            self.job_id,
            JobPhase::Progress,
            &format!(
                "{}/{} functions processed",
                counters.processed_functions, counters.total_functions
            ),
            counters,
        ));
    }

    pub fn function_failed(
        &self,
        file_path: &str,
        function_name: &str,
        error: &str,
        counters: JobCounters,
    ) {
        self.send(JobProgressEvent::function_failed(
            self.job_id,
            file_path,
            function_name,
            error,
            counters,
        ));
    }

    pub fn completed(&self, counters: JobCounters) {
        self.send(JobProgressEvent::new(
            self.job_id,
            JobPhase::Completed,
            "Processing completed successfully",
            counters,
        ));
    }

    pub fn failed(&self, error: &str, counters: JobCounters) {
        self.send(JobProgressEvent::failed(self.job_id, error, counters));
    }
}
