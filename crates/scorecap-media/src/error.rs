//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during pipeline stages.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("yt-dlp not found in PATH")]
    YtDlpNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Download failed: {message}")]
    DownloadFailed { message: String },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Image decode failed for {path}: {message}")]
    ImageDecode { path: PathBuf, message: String },

    #[error("Image encode failed for {path}: {message}")]
    ImageEncode { path: PathBuf, message: String },

    #[error("Extraction produced no frames: {0}")]
    NoFrames(String),

    #[error("GPU-only upscaling requires an available accelerator: {0}")]
    GpuUnavailable(String),

    #[error("All upscale engines failed: {0}")]
    UpscaleExhausted(String),

    #[error("Export produced no outputs")]
    EmptyExport,

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("PDF assembly failed: {0}")]
    Pdf(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create a download failure error.
    pub fn download_failed(message: impl Into<String>) -> Self {
        Self::DownloadFailed {
            message: message.into(),
        }
    }

    pub fn image_decode(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::ImageDecode {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn image_encode(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::ImageEncode {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
