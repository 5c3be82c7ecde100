//! GPU-first upscaling with engine fallbacks.
//!
//! Engine order (env-overridable): neural super-resolution runner, ffmpeg
//! GPU scaler, platform HW scaler, then a CPU resize unless the job is
//! gpu-only. A failing engine is recorded and the next one is tried; when
//! every engine fails the collected tails surface as one error.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use image::imageops::FilterType;
use rayon::prelude::*;
use scorecap_models::UpscaleOptions;
use tokio::process::Command;
use tracing::debug;

use crate::acceleration::{runtime_acceleration, NeuralRuntime, ResizeBackend};
use crate::command::{resolve_ffmpeg_bin, tail_text, FfmpegCommand};
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::ensure_dir;
use crate::imgops;
use crate::StageLogger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Engine {
    Neural,
    GpuDirect,
    HwScaler,
    Cpu,
}

impl Engine {
    fn as_str(&self) -> &'static str {
        match self {
            Engine::Neural => "neural",
            Engine::GpuDirect => "gpu",
            Engine::HwScaler => "hw",
            Engine::Cpu => "cpu",
        }
    }
}

fn engine_order(gpu_only: bool) -> Vec<Engine> {
    let pref = std::env::var("SCORECAP_UPSCALE_ENGINE")
        .unwrap_or_else(|_| "auto".to_string())
        .trim()
        .to_lowercase();
    let mut order = match pref.as_str() {
        "neural" => vec![Engine::Neural, Engine::GpuDirect, Engine::HwScaler],
        "gpu" => vec![Engine::GpuDirect, Engine::Neural, Engine::HwScaler],
        "hw" => vec![Engine::HwScaler, Engine::GpuDirect, Engine::Neural],
        _ => vec![Engine::Neural, Engine::GpuDirect, Engine::HwScaler],
    };
    if !gpu_only {
        order.push(Engine::Cpu);
    }
    order
}

fn sharpening_enabled() -> bool {
    match std::env::var("SCORECAP_UPSCALE_SHARPEN") {
        Ok(raw) => !matches!(raw.trim().to_lowercase().as_str(), "0" | "false" | "off" | "no"),
        Err(_) => true,
    }
}

/// Exact output size for a frame at the configured scale.
fn target_size(dims: (u32, u32), scale: f64) -> (u32, u32) {
    let w = ((dims.0 as f64 * scale).round() as u32).max(2);
    let h = ((dims.1 as f64 * scale).round() as u32).max(2);
    (w, h)
}

/// Upscale the stitched pages; pass-through when disabled.
pub async fn upscale_frames(
    frame_paths: &[PathBuf],
    options: &UpscaleOptions,
    workspace: &Path,
    logger: &dyn StageLogger,
) -> MediaResult<Vec<PathBuf>> {
    if frame_paths.is_empty() {
        return Ok(Vec::new());
    }
    if !options.enable {
        logger.log("upscale disabled, using original resolution");
        return Ok(frame_paths.to_vec());
    }

    ensure_dir(workspace)?;
    let scale = options.scale;
    logger.log(&format!("upscale factor: {scale:.1}x"));
    if sharpening_enabled() {
        logger.log("upscale post-process: unsharp enabled");
    }

    let accel = runtime_acceleration().await;
    let mut attempt_errors: Vec<String> = Vec::new();

    for engine in engine_order(options.gpu_only) {
        match engine {
            Engine::Neural => {
                let neural = &accel.neural;
                if !neural.enabled {
                    continue;
                }
                if !neural.available {
                    attempt_errors.push(format!("neural_unavailable({})", neural.reason));
                    continue;
                }
                if options.gpu_only && neural.device == "cpu" && !neural.allow_cpu {
                    attempt_errors.push("neural_cpu_disallowed".to_string());
                    continue;
                }
                logger.log("upscale engine: neural");
                logger.log(&format!("neural runtime device: {}", neural.device));
                match upscale_with_neural(frame_paths, scale, workspace, neural).await {
                    Ok(paths) => return Ok(paths),
                    Err(err) => attempt_errors.push(format!("neural: {err}")),
                }
            }
            Engine::GpuDirect => {
                let backend = match accel.resize_backend {
                    ResizeBackend::Cuda | ResizeBackend::Opencl => accel.resize_backend,
                    _ => continue,
                };
                logger.log(&format!("upscale engine: gpu_{}", backend.as_str()));
                match upscale_with_ffmpeg_backend(frame_paths, scale, workspace, backend).await {
                    Ok(paths) => return Ok(paths),
                    Err(err) => attempt_errors.push(format!("gpu_{}: {err}", backend.as_str())),
                }
            }
            Engine::HwScaler => {
                if accel.resize_backend != ResizeBackend::HwScaler {
                    continue;
                }
                logger.log("upscale engine: hw_scaler");
                match upscale_with_ffmpeg_backend(
                    frame_paths,
                    scale,
                    workspace,
                    ResizeBackend::HwScaler,
                )
                .await
                {
                    Ok(paths) => return Ok(paths),
                    Err(err) => attempt_errors.push(format!("hw_scaler: {err}")),
                }
            }
            Engine::Cpu => {
                logger.log("upscale engine: cpu");
                match upscale_with_cpu(frame_paths, scale, workspace) {
                    Ok(paths) => return Ok(paths),
                    Err(err) => attempt_errors.push(format!("cpu: {err}")),
                }
            }
        }
    }

    if options.gpu_only && attempt_errors.is_empty() {
        return Err(MediaError::GpuUnavailable(
            "no neural runner, GPU scaler or platform scaler is present".to_string(),
        ));
    }
    let tail_start = attempt_errors.len().saturating_sub(4);
    Err(MediaError::UpscaleExhausted(
        attempt_errors[tail_start..].join(" | "),
    ))
}

/// Resize a neural output to the exact target: area-style when shrinking,
/// Lanczos when growing.
fn resize_to_exact(img: &image::RgbImage, target: (u32, u32)) -> image::RgbImage {
    if img.dimensions() == target {
        return img.clone();
    }
    let shrinking = img.width() > target.0 || img.height() > target.1;
    let filter = if shrinking {
        FilterType::Triangle
    } else {
        FilterType::Lanczos3
    };
    imgops::resize_rgb(img, target.0, target.1, filter)
}

fn maybe_sharpen(img: image::RgbImage) -> image::RgbImage {
    if sharpening_enabled() {
        imgops::tone::sharpen_document(&img)
    } else {
        img
    }
}

/// Run the external tiled super-resolution runner over all frames at once.
async fn upscale_with_neural(
    frame_paths: &[PathBuf],
    scale: f64,
    workspace: &Path,
    neural: &NeuralRuntime,
) -> MediaResult<Vec<PathBuf>> {
    let repo = neural
        .repo_path
        .as_ref()
        .ok_or_else(|| MediaError::internal("neural runtime is incomplete"))?;
    let weights = neural
        .weights_path
        .as_ref()
        .ok_or_else(|| MediaError::internal("neural runtime is incomplete"))?;

    let run_id = uuid::Uuid::new_v4().simple().to_string();
    let run_dir = workspace.join(format!("_sr_{}", &run_id[..10]));
    let input_dir = run_dir.join("input");
    let output_dir = run_dir.join("output");
    ensure_dir(&input_dir)?;
    ensure_dir(&output_dir)?;

    // Stage inputs and remember the exact per-frame targets.
    let mut staged: Vec<(usize, String, (u32, u32))> = Vec::new();
    for (idx, path) in frame_paths.iter().enumerate() {
        let img = imgops::load_rgb(path)?;
        let stem = format!("in_{idx:05}");
        imgops::save_png(&img, input_dir.join(format!("{stem}.png")))?;
        staged.push((idx, stem, target_size(img.dimensions(), scale)));
    }
    if staged.is_empty() {
        return Err(MediaError::internal("neural runner received no frames"));
    }

    let result = Command::new(&neural.python_bin)
        .arg(repo.join("run_sr.py"))
        .arg("--input-dir")
        .arg(&input_dir)
        .arg("--output-dir")
        .arg(&output_dir)
        .arg("--weights")
        .arg(weights)
        .arg("--device")
        .arg(&neural.device)
        .arg("--tile-size")
        .arg(neural.tile_size.to_string())
        .arg("--tile-pad")
        .arg(neural.tile_pad.to_string())
        .current_dir(repo)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    let outcome = if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        Err(MediaError::internal(format!(
            "neural inference failed: {}",
            tail_text(&stderr, 900)
        )))
    } else {
        collect_neural_outputs(&staged, &output_dir, workspace)
    };

    let _ = std::fs::remove_dir_all(&run_dir);
    outcome
}

fn collect_neural_outputs(
    staged: &[(usize, String, (u32, u32))],
    output_dir: &Path,
    workspace: &Path,
) -> MediaResult<Vec<PathBuf>> {
    let mut out_paths = Vec::new();
    for (idx, stem, target) in staged {
        let candidate = ["png", "jpg", "jpeg"]
            .iter()
            .map(|ext| output_dir.join(format!("{stem}.{ext}")))
            .find(|p| p.is_file());
        let Some(src) = candidate else {
            debug!("neural runner produced no output for {stem}");
            continue;
        };
        let img = imgops::load_rgb(&src)?;
        let exact = maybe_sharpen(resize_to_exact(&img, *target));
        let out_path = workspace.join(format!("upscaled_{idx:05}.png"));
        imgops::save_png(&exact, &out_path)?;
        out_paths.push(out_path);
    }
    if out_paths.is_empty() {
        return Err(MediaError::internal("neural runner produced no output pages"));
    }
    Ok(out_paths)
}

/// One-frame-at-a-time ffmpeg upload + scale + download.
async fn upscale_with_ffmpeg_backend(
    frame_paths: &[PathBuf],
    scale: f64,
    workspace: &Path,
    backend: ResizeBackend,
) -> MediaResult<Vec<PathBuf>> {
    resolve_ffmpeg_bin()?;
    let mut out_paths = Vec::new();
    for (idx, path) in frame_paths.iter().enumerate() {
        let img = imgops::load_rgb(path)?;
        let (tw, th) = target_size(img.dimensions(), scale);
        let out_path = workspace.join(format!("upscaled_{idx:05}.png"));

        let (device_args, filter) = ffmpeg_scale_graph(backend, tw, th)
            .ok_or_else(|| MediaError::internal("no scaler graph for backend"))?;
        let cmd = FfmpegCommand::new(path, &out_path)
            .input_args(device_args)
            .video_filter(filter)
            .single_frame();
        cmd.run().await.map_err(|err| {
            MediaError::internal(format!("scale failed at frame {idx}: {err}"))
        })?;

        let produced = out_path.metadata().map(|m| m.len() > 0).unwrap_or(false);
        if !produced {
            return Err(MediaError::internal(format!(
                "scale produced no output at frame {idx}"
            )));
        }
        if sharpening_enabled() {
            let sharpened = imgops::tone::sharpen_document(&imgops::load_rgb(&out_path)?);
            imgops::save_png(&sharpened, &out_path)?;
        }
        out_paths.push(out_path);
    }
    if out_paths.is_empty() {
        return Err(MediaError::internal("upscaling produced no output pages"));
    }
    Ok(out_paths)
}

fn ffmpeg_scale_graph(
    backend: ResizeBackend,
    w: u32,
    h: u32,
) -> Option<(Vec<String>, String)> {
    let device = |name: &str| {
        vec![
            "-init_hw_device".to_string(),
            format!("{name}=up"),
            "-filter_hw_device".to_string(),
            "up".to_string(),
        ]
    };
    match backend {
        ResizeBackend::Cuda => Some((
            device("cuda"),
            format!("format=nv12,hwupload,scale_cuda=w={w}:h={h},hwdownload,format=nv12"),
        )),
        ResizeBackend::Opencl => Some((
            device("opencl"),
            format!("format=nv12,hwupload,scale_opencl=w={w}:h={h},hwdownload,format=nv12"),
        )),
        ResizeBackend::HwScaler => match std::env::consts::OS {
            "macos" => Some((
                device("videotoolbox"),
                format!("format=nv12,hwupload,scale_vt=w={w}:h={h},hwdownload,format=nv12"),
            )),
            "linux" => Some((
                device("vaapi"),
                format!("format=nv12,hwupload,scale_vaapi=w={w}:h={h},hwdownload,format=nv12"),
            )),
            _ => None,
        },
        ResizeBackend::Cpu => None,
    }
}

/// Last-resort CPU Lanczos resize, parallel across frames.
fn upscale_with_cpu(
    frame_paths: &[PathBuf],
    scale: f64,
    workspace: &Path,
) -> MediaResult<Vec<PathBuf>> {
    let out_paths: Vec<PathBuf> = frame_paths
        .par_iter()
        .enumerate()
        .map(|(idx, path)| {
            let img = imgops::load_rgb(path)?;
            let (tw, th) = target_size(img.dimensions(), scale);
            let resized = imgops::resize_rgb(&img, tw, th, FilterType::Lanczos3);
            let finished = maybe_sharpen(resized);
            let out_path = workspace.join(format!("upscaled_{idx:05}.png"));
            imgops::save_png(&finished, &out_path)?;
            Ok(out_path)
        })
        .collect::<MediaResult<_>>()?;
    if out_paths.is_empty() {
        return Err(MediaError::internal("upscaling produced no output pages"));
    }
    Ok(out_paths)
}
