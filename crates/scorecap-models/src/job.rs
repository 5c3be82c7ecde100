//! Job definitions and lifecycle.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::options::JobOptions;
use crate::source::Source;

/// Number of log lines exposed in the public snapshot.
pub const LOG_TAIL_LINES: usize = 20;

/// Maximum log lines retained per job before the head is dropped.
const LOG_CAPACITY: usize = 400;

/// Unique identifier for a capture job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job lifecycle state. Transitions form a DAG:
/// queued -> running -> done | error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Queued,
    Running,
    Done,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }

    /// Whether the job still occupies the worker (or is waiting for it).
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }
}

/// A capture job and its live progress state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub source: Source,
    pub options: JobOptions,
    /// The directory tree this job exclusively owns.
    pub artifact_dir: PathBuf,
    pub status: JobStatus,
    /// Monotonically non-decreasing progress in [0, 1].
    pub progress: f64,
    pub current_step: String,
    pub message: String,
    /// Bounded append-only log; only the tail is retained.
    log: VecDeque<String>,
    /// Structured result map, replaced wholesale between stages.
    pub result: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(source: Source, options: JobOptions, artifact_dir: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            source,
            options,
            artifact_dir,
            status: JobStatus::Queued,
            progress: 0.0,
            current_step: "queued".to_string(),
            message: String::new(),
            log: VecDeque::new(),
            result: serde_json::Map::new(),
            error_code: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a line to the bounded log.
    pub fn append_log(&mut self, line: impl Into<String>) {
        if self.log.len() >= LOG_CAPACITY {
            self.log.pop_front();
        }
        self.log.push_back(line.into());
        self.updated_at = Utc::now();
    }

    /// The last `LOG_TAIL_LINES` log lines, oldest first.
    pub fn log_tail(&self) -> Vec<String> {
        let skip = self.log.len().saturating_sub(LOG_TAIL_LINES);
        self.log.iter().skip(skip).cloned().collect()
    }

    /// Advance progress; regressions are ignored so the value stays monotone.
    pub fn set_progress(&mut self, progress: f64) {
        let clamped = progress.clamp(0.0, 1.0);
        if clamped > self.progress {
            self.progress = clamped;
        }
        self.updated_at = Utc::now();
    }

    /// Public view of the job.
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            current_step: self.current_step.clone(),
            message: self.message.clone(),
            result: serde_json::Value::Object(self.result.clone()),
            error_code: self.error_code.clone(),
            log_tail: self.log_tail(),
        }
    }
}

/// The public view returned by status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: f64,
    pub current_step: String,
    pub message: String,
    pub result: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub log_tail: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_job() -> Job {
        Job::new(
            Source::local_file("/tmp/in.mp4"),
            JobOptions::default(),
            PathBuf::from("/tmp/jobs/abc"),
        )
    }

    #[test]
    fn test_new_job_defaults() {
        let job = test_job();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0.0);
        assert!(job.log_tail().is_empty());
        assert!(job.status.is_active());
    }

    #[test]
    fn test_progress_is_monotone() {
        let mut job = test_job();
        job.set_progress(0.45);
        job.set_progress(0.20);
        assert_eq!(job.progress, 0.45);
        job.set_progress(2.0);
        assert_eq!(job.progress, 1.0);
    }

    #[test]
    fn test_log_tail_is_bounded() {
        let mut job = test_job();
        for i in 0..500 {
            job.append_log(format!("line {i}"));
        }
        let tail = job.log_tail();
        assert_eq!(tail.len(), LOG_TAIL_LINES);
        assert_eq!(tail.last().unwrap(), "line 499");
        assert_eq!(tail.first().unwrap(), "line 480");
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut job = test_job();
        job.append_log("started");
        job.result
            .insert("images".to_string(), serde_json::json!(["a.png"]));
        let snapshot = job.snapshot();
        assert_eq!(snapshot.status, JobStatus::Queued);
        assert_eq!(snapshot.log_tail, vec!["started".to_string()]);
        assert_eq!(snapshot.result["images"][0], "a.png");
    }
}
