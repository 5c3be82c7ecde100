//! Single-worker job orchestrator.
//!
//! Job submissions enqueue onto an unbounded FIFO channel consumed by one
//! background task, so at most one pipeline progresses at a time and
//! execution order equals submission order. Request handlers only touch
//! the store; they never block on the pipeline.

use std::sync::Arc;

use scorecap_models::{Job, JobId, JobOptions, JobStatus, Source};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::error::{JobError, JobResult};
use crate::pipeline::{allocate_artifact_dir, run_pipeline};
use crate::store::JobStore;

pub struct Orchestrator {
    store: Arc<JobStore>,
    queue: mpsc::UnboundedSender<JobId>,
}

impl Orchestrator {
    /// Spawn the worker task and return the handle used by the API layer.
    pub fn start(store: Arc<JobStore>) -> Arc<Self> {
        let (queue, mut rx) = mpsc::unbounded_channel::<JobId>();
        let worker_store = Arc::clone(&store);

        tokio::spawn(async move {
            info!("capture worker started");
            while let Some(job_id) = rx.recv().await {
                Self::execute(Arc::clone(&worker_store), job_id).await;
            }
            info!("capture worker stopped");
        });

        Arc::new(Self { store, queue })
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Validate, persist and enqueue a job. Returns immediately.
    pub fn create_job(&self, source: Source, options: JobOptions) -> JobResult<JobId> {
        source.validate().map_err(JobError::InvalidInput)?;
        options
            .validate()
            .map_err(|e| JobError::InvalidInput(e.to_string()))?;
        if let (scorecap_models::SourceKind::File, Some(path)) =
            (source.source_type, source.file_path.as_deref())
        {
            if !std::path::Path::new(path).exists() {
                return Err(JobError::invalid_input("file_path does not exist"));
            }
        }

        let mut job = Job::new(source, options, self.store.root().to_path_buf());
        job.artifact_dir = allocate_artifact_dir(self.store.root(), job.id.as_str())?;
        let job_id = job.id.clone();
        self.store.insert(job);

        self.queue
            .send(job_id.clone())
            .map_err(|_| JobError::Internal("capture worker is gone".to_string()))?;
        info!(job_id = %job_id, "job enqueued");
        Ok(job_id)
    }

    /// The single try/record/stop boundary around a pipeline run.
    async fn execute(store: Arc<JobStore>, job_id: JobId) {
        let Some(job) = store.job(&job_id) else {
            // Cache-clear may have dropped the job while it was queued.
            return;
        };

        match run_pipeline(Arc::clone(&store), job).await {
            Ok(()) => {}
            Err(err) => {
                error!(job_id = %job_id, "job failed: {err}");
                store.log(&job_id, format!("job failed: {err}"));
                store.set_state(
                    &job_id,
                    JobStatus::Error,
                    Some(1.0),
                    Some("failed"),
                    Some(&format!("job failed: {err}")),
                    None,
                    Some("PIPELINE_ERROR"),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scorecap_models::DetectMode;
    use tempfile::TempDir;

    async fn orchestrator() -> (TempDir, Arc<Orchestrator>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JobStore::new(dir.path().join("jobs")).unwrap());
        let orch = Orchestrator::start(store);
        (dir, orch)
    }

    #[tokio::test]
    async fn test_create_rejects_missing_file() {
        let (_dir, orch) = orchestrator().await;
        let err = orch
            .create_job(Source::local_file("/no/such/file.mp4"), JobOptions::default())
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_options() {
        let (dir, orch) = orchestrator().await;
        let video = dir.path().join("in.mp4");
        std::fs::write(&video, b"fake").unwrap();

        let mut options = JobOptions::default();
        options.detect.mode = DetectMode::Manual; // roi missing
        let err = orch
            .create_job(
                Source::local_file(video.to_string_lossy().to_string()),
                options,
            )
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_failing_job_ends_in_error_state() {
        let (dir, orch) = orchestrator().await;
        let video = dir.path().join("in.mp4");
        std::fs::write(&video, b"not actually a video").unwrap();

        let job_id = orch
            .create_job(
                Source::local_file(video.to_string_lossy().to_string()),
                JobOptions::default(),
            )
            .unwrap();

        // Extraction against a junk file must fail and be recorded.
        for _ in 0..200 {
            let snapshot = orch.store().snapshot(&job_id).unwrap();
            if snapshot.status == JobStatus::Error {
                assert_eq!(snapshot.error_code.as_deref(), Some("PIPELINE_ERROR"));
                assert!(snapshot
                    .log_tail
                    .iter()
                    .any(|line| line.contains("job failed")));
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        panic!("job did not reach error state in time");
    }

    #[tokio::test]
    async fn test_artifact_dir_allocated_per_job() {
        let (dir, orch) = orchestrator().await;
        let video = dir.path().join("in.mp4");
        std::fs::write(&video, b"fake").unwrap();

        let job_id = orch
            .create_job(
                Source::local_file(video.to_string_lossy().to_string()),
                JobOptions::default(),
            )
            .unwrap();
        let job = orch.store().job(&job_id).unwrap();
        assert!(job.artifact_dir.is_dir());
        assert!(job.artifact_dir.starts_with(orch.store().root()));
    }
}
