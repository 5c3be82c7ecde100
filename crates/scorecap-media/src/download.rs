//! Streaming-source acquisition via yt-dlp.
//!
//! Downloads land in a stable cache keyed by a hash prefix of the URL so
//! preview and capture jobs for the same source reuse one file. Two
//! concurrent misses may both download; the orchestrator serializes jobs,
//! so this stays best-effort by design.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::{debug, info};

use crate::command::{resolve_ytdlp_bin, tail_text};
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::ensure_dir;

/// File extensions accepted as a cached video.
const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "mkv", "webm", "mov", "m4v"];

/// Result of resolving a streaming URL to a local file.
#[derive(Debug, Clone)]
pub struct AcquiredSource {
    pub path: PathBuf,
    pub cache_hit: bool,
}

/// Cache key directory for a URL: the first 12 hex chars of its SHA-256.
pub fn cache_key(url: &str) -> String {
    let digest = Sha256::digest(url.trim().as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..12].to_string()
}

/// Find an existing non-empty video file in a cache directory.
fn find_cached_video(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.metadata().map(|m| m.len() > 0).unwrap_or(false)
                && p.extension()
                    .map(|ext| {
                        let ext = ext.to_string_lossy().to_lowercase();
                        VIDEO_EXTENSIONS.contains(&ext.as_str())
                    })
                    .unwrap_or(false)
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

/// Ensure a local video exists for `url`, downloading on a cache miss.
pub async fn acquire_stream_source(
    url: &str,
    downloads_root: impl AsRef<Path>,
) -> MediaResult<AcquiredSource> {
    let cache_dir = downloads_root.as_ref().join(cache_key(url));
    ensure_dir(&cache_dir)?;

    if let Some(existing) = find_cached_video(&cache_dir) {
        info!("download cache hit: {}", existing.display());
        return Ok(AcquiredSource {
            path: existing,
            cache_hit: true,
        });
    }

    let ytdlp = resolve_ytdlp_bin()?;
    let template = cache_dir.join("%(id)s.%(ext)s");
    info!("downloading stream source: {url}");

    let output = Command::new(&ytdlp)
        .args([
            "-f",
            "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best",
            "--no-warnings",
            "-o",
        ])
        .arg(&template)
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!("yt-dlp stderr: {stderr}");
        return Err(MediaError::download_failed(format!(
            "yt-dlp failed: {}",
            tail_text(&stderr, 400)
        )));
    }

    let path = find_cached_video(&cache_dir)
        .ok_or_else(|| MediaError::download_failed("download produced no video file"))?;
    info!("stream download saved: {}", path.display());
    Ok(AcquiredSource {
        path,
        cache_hit: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cache_key_is_stable_and_short() {
        let a = cache_key("https://youtu.be/abc123def45");
        let b = cache_key("https://youtu.be/abc123def45");
        let c = cache_key("https://youtu.be/other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 12);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_download() {
        let root = TempDir::new().unwrap();
        let url = "https://youtu.be/abc123def45";
        let dir = root.path().join(cache_key(url));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("abc123def45.mp4"), b"video-bytes").unwrap();

        let acquired = acquire_stream_source(url, root.path()).await.unwrap();
        assert!(acquired.cache_hit);
        assert!(acquired.path.ends_with("abc123def45.mp4"));
    }

    #[test]
    fn test_find_cached_video_ignores_partials() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("clip.mp4.part"), b"x").unwrap();
        std::fs::write(dir.path().join("empty.mp4"), b"").unwrap();
        assert!(find_cached_video(dir.path()).is_none());

        std::fs::write(dir.path().join("clip.mp4"), b"x").unwrap();
        assert!(find_cached_video(dir.path()).is_some());
    }
}
