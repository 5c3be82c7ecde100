//! Application state.

use std::sync::Arc;

use scorecap_jobs::{JobStore, Orchestrator};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<JobStore>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    /// Create the store and start the capture worker.
    pub fn new(config: ApiConfig) -> std::io::Result<Self> {
        let store = Arc::new(JobStore::new(&config.jobs_root)?);
        let orchestrator = Orchestrator::start(Arc::clone(&store));
        Ok(Self {
            config,
            store,
            orchestrator,
        })
    }
}
