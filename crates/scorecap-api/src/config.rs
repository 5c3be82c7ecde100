//! API configuration.

use std::path::PathBuf;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins ("*" for any)
    pub cors_origins: Vec<String>,
    /// Artifact root all job directories live under
    pub jobs_root: PathBuf,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            jobs_root: PathBuf::from("jobs"),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("SCORECAP_API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("SCORECAP_API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8000),
            cors_origins: std::env::var("SCORECAP_CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|_| vec!["*".to_string()]),
            jobs_root: std::env::var("SCORECAP_JOBS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("jobs")),
        }
    }
}
