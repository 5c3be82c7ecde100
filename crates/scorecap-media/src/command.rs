//! FFmpeg command builder, runner, and capability discovery.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// Resolve the ffmpeg binary: env override first, then PATH lookup.
pub fn resolve_ffmpeg_bin() -> MediaResult<PathBuf> {
    resolve_tool("ffmpeg", "SCORECAP_FFMPEG_BIN", MediaError::FfmpegNotFound)
}

/// Resolve the ffprobe binary: env override first, then PATH lookup.
pub fn resolve_ffprobe_bin() -> MediaResult<PathBuf> {
    resolve_tool("ffprobe", "SCORECAP_FFPROBE_BIN", MediaError::FfprobeNotFound)
}

/// Resolve the yt-dlp binary from PATH.
pub fn resolve_ytdlp_bin() -> MediaResult<PathBuf> {
    which::which("yt-dlp").map_err(|_| MediaError::YtDlpNotFound)
}

fn resolve_tool(name: &str, env_key: &str, missing: MediaError) -> MediaResult<PathBuf> {
    if let Ok(raw) = std::env::var(env_key) {
        let raw = raw.trim();
        if !raw.is_empty() {
            let path = PathBuf::from(raw);
            if path.is_file() {
                return Ok(path);
            }
            // Non-path override: treat as a command name.
            if let Ok(located) = which::which(raw) {
                return Ok(located);
            }
            return Ok(path);
        }
    }
    which::which(name).map_err(|_| missing)
}

/// Builder for FFmpeg invocations.
///
/// Input args (hwaccel flags, seeks) go before `-i`; output args after.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: PathBuf,
    input_args: Vec<String>,
    output_args: Vec<String>,
    overwrite: bool,
    log_level: String,
}

impl FfmpegCommand {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add an input argument (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add multiple input arguments.
    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an output argument (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Seek before the input.
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(format!("{seconds:.3}"))
    }

    /// Seek after the input (slow but survives non-seekable codecs).
    pub fn seek_output(self, seconds: f64) -> Self {
        self.output_arg("-ss").output_arg(format!("{seconds:.3}"))
    }

    /// Stop writing at this absolute timestamp.
    pub fn stop_at(self, seconds: f64) -> Self {
        self.output_arg("-to").output_arg(format!("{seconds:.3}"))
    }

    /// Set the video filter graph.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Emit a single frame.
    pub fn single_frame(self) -> Self {
        self.output_arg("-frames:v").output_arg("1")
    }

    /// Build the final argv (without the binary).
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.overwrite {
            args.push("-y".to_string());
        }
        args.push("-hide_banner".to_string());
        args.push("-loglevel".to_string());
        args.push(self.log_level.clone());
        args.extend(self.input_args.clone());
        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());
        args.extend(self.output_args.clone());
        args.push(self.output.to_string_lossy().to_string());
        args
    }

    /// Run to completion, capturing stderr.
    ///
    /// Non-zero exit becomes `FfmpegFailed` with the stderr tail attached,
    /// so fallback chains can keep only the short cause text.
    pub async fn run(&self) -> MediaResult<()> {
        let ffmpeg = resolve_ffmpeg_bin()?;
        let args = self.build_args();
        debug!("running ffmpeg {}", args.join(" "));

        let output = Command::new(&ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(MediaError::ffmpeg_failed(
            "FFmpeg exited with non-zero status",
            Some(tail_text(&stderr, 900)),
            output.status.code(),
        ))
    }
}

/// Keep the last `limit` characters of subprocess output.
pub fn tail_text(text: &str, limit: usize) -> String {
    let value = text.trim();
    if value.is_empty() {
        return "unknown error".to_string();
    }
    if value.len() <= limit {
        return value.to_string();
    }
    let start = value
        .char_indices()
        .rev()
        .nth(limit.saturating_sub(1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    value[start..].to_string()
}

/// List hardware acceleration methods advertised by the local ffmpeg.
pub async fn ffmpeg_hwaccels(ffmpeg: &PathBuf) -> Vec<String> {
    let output = Command::new(ffmpeg)
        .args(["-hide_banner", "-loglevel", "error", "-hwaccels"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;

    let output = match output {
        Ok(out) if out.status.success() => out,
        _ => return Vec::new(),
    };

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| line.trim().to_lowercase())
        .filter(|line| !line.is_empty() && !line.contains("hardware acceleration methods"))
        .collect()
}

/// Check whether the local ffmpeg build has a filter.
pub async fn ffmpeg_has_filter(ffmpeg: &PathBuf, filter_name: &str) -> bool {
    let target = filter_name.trim().to_lowercase();
    if target.is_empty() {
        return false;
    }

    let output = Command::new(ffmpeg)
        .args(["-hide_banner", "-filters"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;

    let output = match output {
        Ok(out) if out.status.success() => out,
        _ => return false,
    };

    String::from_utf8_lossy(&output.stdout).lines().any(|raw| {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('-') || line.starts_with("Filters:") {
            return false;
        }
        line.split_whitespace()
            .nth(1)
            .map(|name| name.to_lowercase() == target)
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder_arg_order() {
        let cmd = FfmpegCommand::new("input.mp4", "frame_%06d.png")
            .input_args(["-hwaccel", "cuda"])
            .seek(10.0)
            .video_filter("fps=1");

        let args = cmd.build_args();
        let hw = args.iter().position(|a| a == "-hwaccel").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        let vf = args.iter().position(|a| a == "-vf").unwrap();
        assert!(hw < input, "hwaccel flags must precede -i");
        assert!(input < vf, "filters must follow -i");
        assert!(args.contains(&"10.000".to_string()));
        assert_eq!(args.last().unwrap(), "frame_%06d.png");
    }

    #[test]
    fn test_single_frame_and_window() {
        let args = FfmpegCommand::new("in.mp4", "out.png")
            .seek(2.5)
            .stop_at(4.0)
            .single_frame()
            .build_args();
        assert!(args.contains(&"-frames:v".to_string()));
        assert!(args.contains(&"-to".to_string()));
        assert!(args.contains(&"4.000".to_string()));
    }

    #[test]
    fn test_tail_text() {
        assert_eq!(tail_text("", 10), "unknown error");
        assert_eq!(tail_text("short", 10), "short");
        let long = "x".repeat(2000);
        assert_eq!(tail_text(&long, 900).len(), 900);
    }
}
