//! Frame extraction from the source video.

use std::path::{Path, PathBuf};

use scorecap_models::{ExtractOptions, Source, SourceKind};
use tracing::debug;

use crate::acceleration::{hwaccel_mode_name, runtime_acceleration};
use crate::command::FfmpegCommand;
use crate::download::{acquire_stream_source, AcquiredSource};
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::{clear_matching_files, ensure_dir, list_sorted_files};
use crate::StageLogger;

/// Extraction outcome: the sampled frames plus what produced them.
#[derive(Debug, Clone)]
pub struct ExtractedFrames {
    pub frames: Vec<PathBuf>,
    /// Local path of the resolved source video.
    pub source_video: PathBuf,
    /// The decode hwaccel mode that succeeded.
    pub ffmpeg_mode: String,
}

/// Resolve a source descriptor to a local video file.
///
/// Local files must already exist; streaming URLs go through the download
/// cache under `<downloads_root>`.
pub async fn resolve_source_video(
    source: &Source,
    downloads_root: impl AsRef<Path>,
) -> MediaResult<AcquiredSource> {
    match source.source_type {
        SourceKind::File => {
            let raw = source
                .file_path
                .as_deref()
                .ok_or_else(|| MediaError::internal("file source without file_path"))?;
            let path = PathBuf::from(raw);
            if !path.exists() {
                return Err(MediaError::FileNotFound(path));
            }
            Ok(AcquiredSource {
                path,
                cache_hit: true,
            })
        }
        SourceKind::Youtube => {
            let url = source
                .youtube_url
                .as_deref()
                .ok_or_else(|| MediaError::internal("youtube source without youtube_url"))?;
            acquire_stream_source(url, downloads_root).await
        }
    }
}

/// Sample frames from the source at the configured cadence.
///
/// Tries each decode hwaccel flag set in preference order; a mode is
/// committed only when ffmpeg exits cleanly AND at least one frame landed
/// on disk. Frames are numbered `frame_000001.png` onwards.
pub async fn extract_frames(
    source_video: &Path,
    options: &ExtractOptions,
    frames_dir: &Path,
    logger: &dyn StageLogger,
) -> MediaResult<ExtractedFrames> {
    ensure_dir(frames_dir)?;
    let fps = options.capture_fps();
    logger.log(&format!(
        "capture sensitivity={:?}, sampling fps={fps:.2}",
        options.capture_sensitivity
    ));

    let accel = runtime_acceleration().await;
    let out_pattern = frames_dir.join("frame_%06d.png");
    let mut attempt_errors: Vec<String> = Vec::new();

    for hw_flags in &accel.hwaccel_flag_sets {
        clear_matching_files(frames_dir, "frame_")?;
        let mode = hwaccel_mode_name(hw_flags);
        logger.log(&format!("running ffmpeg extract ({mode})"));

        let mut cmd = FfmpegCommand::new(source_video, &out_pattern)
            .input_args(hw_flags.iter().cloned())
            .video_filter(format!("fps={fps}"));
        if let Some(start) = options.start_sec {
            cmd = cmd.seek_output(start);
        }
        if let Some(end) = options.end_sec {
            cmd = cmd.stop_at(end);
        }

        let run = cmd.run().await;
        let frames = list_sorted_files(frames_dir, "frame_")?;
        match run {
            Ok(()) if !frames.is_empty() => {
                logger.log(&format!("extracted {} frames", frames.len()));
                return Ok(ExtractedFrames {
                    frames,
                    source_video: source_video.to_path_buf(),
                    ffmpeg_mode: mode,
                });
            }
            Ok(()) => {
                attempt_errors.push(format!("{mode}: produced no frames"));
            }
            Err(err) => {
                debug!("ffmpeg extract failed in mode {mode}: {err}");
                attempt_errors.push(format!("{mode}: {err}"));
            }
        }
    }

    let tail_start = attempt_errors.len().saturating_sub(3);
    Err(MediaError::NoFrames(format!(
        "ffmpeg failed after gpu/cpu fallback: {}",
        attempt_errors[tail_start..].join(" | ")
    )))
}

/// Extract a single frame at `sec` for preview purposes.
///
/// Tries each hwaccel flag set crossed with a small ladder of seek offsets
/// and both seek placements, so non-seekable codecs still yield a frame.
pub async fn extract_preview_frame(
    source_video: &Path,
    sec: f64,
    preview_dir: &Path,
) -> MediaResult<PathBuf> {
    ensure_dir(preview_dir)?;
    let out_path = preview_dir.join("preview_frame.png");
    let accel = runtime_acceleration().await;
    let seek_candidates = [sec.max(0.0), (sec + 0.8).max(0.0), (sec + 1.8).max(0.0)];
    let mut attempt_errors: Vec<String> = Vec::new();

    for hw_flags in &accel.hwaccel_flag_sets {
        let mode = hwaccel_mode_name(hw_flags);
        for seek_sec in seek_candidates {
            for seek_before_input in [true, false] {
                let mut cmd = FfmpegCommand::new(source_video, &out_path)
                    .input_args(hw_flags.iter().cloned());
                cmd = if seek_before_input {
                    cmd.seek(seek_sec)
                } else {
                    cmd.seek_output(seek_sec)
                };
                let result = cmd.single_frame().run().await;

                let produced = out_path
                    .metadata()
                    .map(|m| m.len() > 0)
                    .unwrap_or(false);
                match result {
                    Ok(()) if produced => return Ok(out_path),
                    Ok(()) => attempt_errors.push(format!(
                        "{mode} seek={seek_sec:.2}, preseek={seek_before_input}: empty output"
                    )),
                    Err(err) => attempt_errors.push(format!(
                        "{mode} seek={seek_sec:.2}, preseek={seek_before_input}: {err}"
                    )),
                }
                if out_path.exists() {
                    let _ = std::fs::remove_file(&out_path);
                }
            }
        }
    }

    let tail_start = attempt_errors.len().saturating_sub(3);
    Err(MediaError::NoFrames(format!(
        "ffmpeg preview failed after retries: {}",
        attempt_errors[tail_start..].join(" | ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_resolve_local_file_must_exist() {
        let source = Source::local_file("/no/such/video.mp4");
        let err = resolve_source_video(&source, "/tmp").await.unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_resolve_local_file_ok() {
        let dir = TempDir::new().unwrap();
        let video = dir.path().join("in.mp4");
        std::fs::write(&video, b"not really a video").unwrap();

        let source = Source::local_file(video.to_string_lossy().to_string());
        let acquired = resolve_source_video(&source, dir.path()).await.unwrap();
        assert_eq!(acquired.path, video);
        assert!(acquired.cache_hit);
    }
}
