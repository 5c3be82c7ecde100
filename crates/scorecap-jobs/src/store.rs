//! In-memory job store.
//!
//! One mutex guards the id -> Job map. Every operation takes the lock
//! briefly and never holds it across I/O; log appends, state transitions
//! and result replacement are each atomic.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use scorecap_models::{Job, JobId, JobSnapshot, JobStatus};
use tracing::info;

use crate::error::{JobError, JobResult};

pub struct JobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
    root: PathBuf,
}

impl JobStore {
    /// Create a store rooted at the artifact directory, creating it.
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            jobs: Mutex::new(HashMap::new()),
            root,
        })
    }

    /// The artifact root every job directory lives under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn insert(&self, job: Job) {
        let mut jobs = self.jobs.lock().expect("job store poisoned");
        jobs.insert(job.id.clone(), job);
    }

    /// A full clone of the job, for the worker.
    pub fn job(&self, id: &JobId) -> Option<Job> {
        let jobs = self.jobs.lock().expect("job store poisoned");
        jobs.get(id).cloned()
    }

    /// The public snapshot, or NotFound.
    pub fn snapshot(&self, id: &JobId) -> JobResult<JobSnapshot> {
        let jobs = self.jobs.lock().expect("job store poisoned");
        jobs.get(id)
            .map(|job| job.snapshot())
            .ok_or_else(|| JobError::not_found("job not found"))
    }

    /// Append one line to a job's bounded log.
    pub fn log(&self, id: &JobId, message: impl Into<String>) {
        let mut jobs = self.jobs.lock().expect("job store poisoned");
        if let Some(job) = jobs.get_mut(id) {
            job.append_log(message);
        }
    }

    /// Atomically update lifecycle fields. `result` replaces the whole map.
    #[allow(clippy::too_many_arguments)]
    pub fn set_state(
        &self,
        id: &JobId,
        status: JobStatus,
        progress: Option<f64>,
        current_step: Option<&str>,
        message: Option<&str>,
        result: Option<serde_json::Map<String, serde_json::Value>>,
        error_code: Option<&str>,
    ) {
        let mut jobs = self.jobs.lock().expect("job store poisoned");
        let Some(job) = jobs.get_mut(id) else {
            return;
        };
        job.status = status;
        if let Some(progress) = progress {
            job.set_progress(progress);
        }
        if let Some(step) = current_step {
            job.current_step = step.to_string();
        }
        if let Some(message) = message {
            job.message = message.to_string();
        }
        if let Some(result) = result {
            job.result = result;
        }
        if let Some(code) = error_code {
            job.error_code = Some(code.to_string());
        }
    }

    /// Replace the result map wholesale.
    pub fn set_result(&self, id: &JobId, result: serde_json::Map<String, serde_json::Value>) {
        let mut jobs = self.jobs.lock().expect("job store poisoned");
        if let Some(job) = jobs.get_mut(id) {
            job.result = result;
        }
    }

    /// Number of jobs currently queued or running.
    pub fn active_count(&self) -> usize {
        let jobs = self.jobs.lock().expect("job store poisoned");
        jobs.values().filter(|job| job.status.is_active()).count()
    }

    /// Drop every job from the map (cache clear).
    pub fn clear_jobs(&self) -> usize {
        let mut jobs = self.jobs.lock().expect("job store poisoned");
        let count = jobs.len();
        jobs.clear();
        count
    }
}

/// Logging capability handed to pipeline stages: appends to the owning
/// job's bounded log and mirrors to tracing.
pub struct JobLogger {
    store: Arc<JobStore>,
    job_id: JobId,
}

impl JobLogger {
    pub fn new(store: Arc<JobStore>, job_id: JobId) -> Self {
        Self { store, job_id }
    }
}

impl scorecap_media::StageLogger for JobLogger {
    fn log(&self, message: &str) {
        info!(job_id = %self.job_id, "{message}");
        self.store.log(&self.job_id, message);
    }
}
