//! Artifact-root maintenance: usage reporting and cache clearing.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use scorecap_media::fs_utils::dir_size_bytes;

use crate::error::{JobError, JobResult};
use crate::store::JobStore;

/// Aggregate usage under the artifact root.
#[derive(Debug, Clone, Serialize)]
pub struct CacheUsage {
    pub total_bytes: u64,
    pub path_count: usize,
}

/// Result of a cache clear.
#[derive(Debug, Clone, Serialize)]
pub struct ClearOutcome {
    pub bytes_reclaimed: u64,
    pub entries_cleared: usize,
    pub jobs_dropped: usize,
    /// Entry name -> reason it was skipped.
    pub skipped: Vec<(String, String)>,
}

/// Walk the artifact root and report total bytes and top-level entries.
pub fn cache_usage(store: &Arc<JobStore>) -> JobResult<CacheUsage> {
    let mut total_bytes = 0u64;
    let mut path_count = 0usize;
    for entry in std::fs::read_dir(store.root())? {
        let entry = entry?;
        total_bytes += dir_size_bytes(entry.path());
        path_count += 1;
    }
    Ok(CacheUsage {
        total_bytes,
        path_count,
    })
}

/// Delete every top-level entry in the artifact root and drop all jobs.
///
/// Rejected with Conflict while any job is queued or running. Entries that
/// fail to delete are reported with their reason rather than aborting the
/// sweep.
pub fn clear_cache(store: &Arc<JobStore>) -> JobResult<ClearOutcome> {
    if store.active_count() > 0 {
        return Err(JobError::conflict(
            "cannot clear cache while a job is queued or running",
        ));
    }

    let mut outcome = ClearOutcome {
        bytes_reclaimed: 0,
        entries_cleared: 0,
        jobs_dropped: 0,
        skipped: Vec::new(),
    };

    for entry in std::fs::read_dir(store.root())? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        let size = dir_size_bytes(&path);

        let removal = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match removal {
            Ok(()) => {
                outcome.bytes_reclaimed += size;
                outcome.entries_cleared += 1;
            }
            Err(err) => {
                warn!("cache clear skipped {name}: {err}");
                outcome.skipped.push((name, err.to_string()));
            }
        }
    }

    outcome.jobs_dropped = store.clear_jobs();
    Ok(outcome)
}
