//! Runtime acceleration probing.
//!
//! Probed once per process and cached; later calls return the immutable
//! snapshot. Advertised capability alone is never trusted: a GPU resize
//! backend is only selected after a minimal upload -> scale -> download
//! graph actually ran on the local transcoder.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::command::{ffmpeg_has_filter, ffmpeg_hwaccels, resolve_ffmpeg_bin};

/// Resize backend chosen for GPU-side scaling work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeBackend {
    /// ffmpeg CUDA scaler (`scale_cuda`).
    Cuda,
    /// ffmpeg OpenCL scaler (`scale_opencl`).
    Opencl,
    /// Platform scaler (`scale_vt` on macOS, `scale_vaapi` on Linux).
    HwScaler,
    Cpu,
}

impl ResizeBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResizeBackend::Cuda => "cuda",
            ResizeBackend::Opencl => "opencl",
            ResizeBackend::HwScaler => "hw_scaler",
            ResizeBackend::Cpu => "cpu",
        }
    }

    pub fn is_gpu(&self) -> bool {
        !matches!(self, ResizeBackend::Cpu)
    }
}

/// External neural super-resolution runner state.
#[derive(Debug, Clone, Serialize)]
pub struct NeuralRuntime {
    pub enabled: bool,
    pub available: bool,
    /// Machine-readable reason when unavailable ("ok" otherwise).
    pub reason: String,
    pub repo_path: Option<PathBuf>,
    pub weights_path: Option<PathBuf>,
    pub python_bin: String,
    /// Device the runner would execute on: cuda, mps or cpu.
    pub device: String,
    pub allow_cpu: bool,
    pub tile_size: u32,
    pub tile_pad: u32,
}

/// Process-wide acceleration snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeAcceleration {
    pub resize_backend: ResizeBackend,
    /// Video-decode hwaccel flag sets, in preference order. The final entry
    /// is always the empty (CPU) set.
    pub hwaccel_flag_sets: Vec<Vec<String>>,
    /// Human names of the flag sets, parallel to `hwaccel_flag_sets`.
    pub hwaccel_order: Vec<String>,
    pub cpu_name: String,
    pub gpu_name: Option<String>,
    pub neural: NeuralRuntime,
}

impl RuntimeAcceleration {
    /// Public view for the /runtime endpoint.
    pub fn public_info(&self, active_ffmpeg_mode: Option<&str>) -> serde_json::Value {
        let default_mode = self
            .hwaccel_order
            .iter()
            .find(|name| name.as_str() != "cpu")
            .cloned()
            .unwrap_or_else(|| "cpu".to_string());
        let ffmpeg_mode = active_ffmpeg_mode.unwrap_or(&default_mode);
        let uses_gpu =
            ffmpeg_mode != "cpu" || self.resize_backend.is_gpu() || self.neural.available;

        serde_json::json!({
            "overall_mode": if uses_gpu { "gpu" } else { "cpu" },
            "ffmpeg_mode": ffmpeg_mode,
            "resize_backend": self.resize_backend.as_str(),
            "ffmpeg_order": self.hwaccel_order,
            "gpu_name": self.gpu_name,
            "cpu_name": self.cpu_name,
            "neural_available": self.neural.available,
            "neural_device": self.neural.device,
            "neural_reason": self.neural.reason,
        })
    }
}

static ACCELERATION: OnceCell<RuntimeAcceleration> = OnceCell::const_new();

/// The process-wide acceleration snapshot, probing on first call.
pub async fn runtime_acceleration() -> &'static RuntimeAcceleration {
    ACCELERATION
        .get_or_init(|| async {
            let accel = detect_runtime_acceleration().await;
            info!(
                resize = accel.resize_backend.as_str(),
                hwaccel = accel.hwaccel_order.join("/"),
                gpu = accel.gpu_name.as_deref().unwrap_or("unavailable"),
                cpu = %accel.cpu_name,
                neural = accel.neural.available,
                "runtime acceleration detected"
            );
            accel
        })
        .await
}

async fn detect_runtime_acceleration() -> RuntimeAcceleration {
    let ffmpeg = resolve_ffmpeg_bin().ok();

    let (hwaccel_flag_sets, hwaccel_order) = match &ffmpeg {
        Some(bin) => resolve_hwaccel_flag_sets(bin).await,
        None => (vec![Vec::new()], vec!["cpu".to_string()]),
    };

    let resize_backend = match &ffmpeg {
        Some(bin) => select_resize_backend(bin).await,
        None => ResizeBackend::Cpu,
    };

    let gpu_name = detect_gpu_name().await;
    let cpu_name = detect_cpu_name().await;
    let neural = detect_neural_runtime(gpu_name.is_some()).await;

    RuntimeAcceleration {
        resize_backend,
        hwaccel_flag_sets,
        hwaccel_order,
        cpu_name,
        gpu_name,
        neural,
    }
}

/// Platform-preferred decode hwaccel names, most desirable first.
pub fn platform_hwaccel_preference() -> Vec<&'static str> {
    match std::env::consts::OS {
        "macos" => vec!["videotoolbox", "cuda"],
        "windows" => vec!["cuda", "d3d11va", "dxva2", "qsv"],
        "linux" => vec!["cuda", "vaapi", "qsv", "vdpau"],
        _ => vec!["cuda"],
    }
}

/// The decode flags for one hwaccel name.
pub fn hwaccel_flags_for(name: &str) -> Vec<String> {
    let key = name.trim().to_lowercase();
    if key.is_empty() {
        return Vec::new();
    }
    if key == "cuda" {
        return vec![
            "-hwaccel".to_string(),
            "cuda".to_string(),
            "-hwaccel_output_format".to_string(),
            "cuda".to_string(),
        ];
    }
    vec!["-hwaccel".to_string(), key]
}

/// Human name of a flag set ("cpu" for the empty set).
pub fn hwaccel_mode_name(flags: &[String]) -> String {
    if flags.is_empty() {
        return "cpu".to_string();
    }
    flags
        .iter()
        .position(|f| f == "-hwaccel")
        .and_then(|idx| flags.get(idx + 1))
        .cloned()
        .unwrap_or_else(|| "gpu".to_string())
}

async fn resolve_hwaccel_flag_sets(ffmpeg: &PathBuf) -> (Vec<Vec<String>>, Vec<String>) {
    let pref = std::env::var("SCORECAP_HWACCEL")
        .unwrap_or_else(|_| "auto".to_string())
        .trim()
        .to_lowercase();
    if matches!(pref.as_str(), "none" | "off" | "cpu") {
        return (vec![Vec::new()], vec!["cpu".to_string()]);
    }

    let available = ffmpeg_hwaccels(ffmpeg).await;
    let requested: Vec<String> = if !pref.is_empty() && pref != "auto" {
        pref.split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()
    } else {
        platform_hwaccel_preference()
            .into_iter()
            .map(String::from)
            .collect()
    };

    let mut flag_sets: Vec<Vec<String>> = requested
        .iter()
        .filter(|name| available.is_empty() || available.contains(&name.to_lowercase()))
        .map(|name| hwaccel_flags_for(name))
        .filter(|flags| !flags.is_empty())
        .collect();

    // An explicit preference is honored even when discovery found nothing.
    if flag_sets.is_empty() && pref != "auto" && !pref.is_empty() {
        flag_sets = requested
            .iter()
            .map(|name| hwaccel_flags_for(name))
            .filter(|flags| !flags.is_empty())
            .collect();
    }

    flag_sets.push(Vec::new());

    let mut dedup: Vec<Vec<String>> = Vec::new();
    for flags in flag_sets {
        if !dedup.contains(&flags) {
            dedup.push(flags);
        }
    }
    let order = dedup.iter().map(|f| hwaccel_mode_name(f)).collect();
    (dedup, order)
}

async fn select_resize_backend(ffmpeg: &PathBuf) -> ResizeBackend {
    let pref = std::env::var("SCORECAP_GPU_RESIZE")
        .unwrap_or_else(|_| "auto".to_string())
        .trim()
        .to_lowercase();
    if matches!(pref.as_str(), "cpu" | "none" | "off") {
        return ResizeBackend::Cpu;
    }

    let candidates: Vec<ResizeBackend> = match pref.as_str() {
        "cuda" => vec![ResizeBackend::Cuda, ResizeBackend::Opencl],
        "opencl" => vec![ResizeBackend::Opencl, ResizeBackend::Cuda],
        _ => vec![
            ResizeBackend::Cuda,
            ResizeBackend::Opencl,
            ResizeBackend::HwScaler,
        ],
    };

    for backend in candidates {
        if probe_resize_backend(ffmpeg, backend).await {
            return backend;
        }
        debug!(backend = backend.as_str(), "gpu resize probe failed");
    }
    ResizeBackend::Cpu
}

/// The (device init, filter chain) pieces of a backend's probe graph.
fn resize_probe_graph(backend: ResizeBackend) -> Option<(Vec<String>, String, &'static str)> {
    match backend {
        ResizeBackend::Cuda => Some((
            vec![
                "-init_hw_device".to_string(),
                "cuda=gw".to_string(),
                "-filter_hw_device".to_string(),
                "gw".to_string(),
            ],
            "format=nv12,hwupload,scale_cuda=w=256:h=128,hwdownload,format=nv12".to_string(),
            "scale_cuda",
        )),
        ResizeBackend::Opencl => Some((
            vec![
                "-init_hw_device".to_string(),
                "opencl=gw".to_string(),
                "-filter_hw_device".to_string(),
                "gw".to_string(),
            ],
            "format=nv12,hwupload,scale_opencl=w=256:h=128,hwdownload,format=nv12".to_string(),
            "scale_opencl",
        )),
        ResizeBackend::HwScaler => match std::env::consts::OS {
            "macos" => Some((
                vec![
                    "-init_hw_device".to_string(),
                    "videotoolbox=gw".to_string(),
                    "-filter_hw_device".to_string(),
                    "gw".to_string(),
                ],
                "format=nv12,hwupload,scale_vt=w=256:h=128,hwdownload,format=nv12".to_string(),
                "scale_vt",
            )),
            "linux" => Some((
                vec![
                    "-init_hw_device".to_string(),
                    "vaapi=gw".to_string(),
                    "-filter_hw_device".to_string(),
                    "gw".to_string(),
                ],
                "format=nv12,hwupload,scale_vaapi=w=256:h=128,hwdownload,format=nv12".to_string(),
                "scale_vaapi",
            )),
            _ => None,
        },
        ResizeBackend::Cpu => None,
    }
}

/// Run a one-frame synthetic upload + scale + download graph.
async fn probe_resize_backend(ffmpeg: &PathBuf, backend: ResizeBackend) -> bool {
    let Some((device_args, filter, filter_name)) = resize_probe_graph(backend) else {
        return false;
    };
    if !ffmpeg_has_filter(ffmpeg, filter_name).await {
        return false;
    }

    let mut cmd = Command::new(ffmpeg);
    cmd.args(["-hide_banner", "-loglevel", "error", "-y"])
        .args(&device_args)
        .args(["-f", "lavfi", "-i", "color=c=white:s=128x64:d=0.1"])
        .args(["-vf", &filter])
        .args(["-frames:v", "1", "-f", "null", "-"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    match tokio::time::timeout(Duration::from_secs(4), cmd.output()).await {
        Ok(Ok(output)) => output.status.success(),
        _ => false,
    }
}

async fn run_probe_cmd(program: &str, args: &[&str], timeout: Duration) -> Option<String> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let output = tokio::time::timeout(timeout, cmd.output()).await.ok()?.ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

async fn detect_cpu_name() -> String {
    match std::env::consts::OS {
        "linux" => {
            if let Ok(info) = std::fs::read_to_string("/proc/cpuinfo") {
                for line in info.lines() {
                    if line.starts_with("model name") {
                        if let Some((_, value)) = line.split_once(':') {
                            return value.trim().to_string();
                        }
                    }
                }
            }
        }
        "macos" => {
            if let Some(name) = run_probe_cmd(
                "sysctl",
                &["-n", "machdep.cpu.brand_string"],
                Duration::from_secs(2),
            )
            .await
            {
                return name;
            }
        }
        "windows" => {
            if let Some(raw) =
                run_probe_cmd("wmic", &["cpu", "get", "Name"], Duration::from_secs(3)).await
            {
                if let Some(name) = first_non_header_line(&raw, "name") {
                    return name;
                }
            }
        }
        _ => {}
    }
    "Unknown CPU".to_string()
}

async fn detect_gpu_name() -> Option<String> {
    if let Some(raw) = run_probe_cmd(
        "nvidia-smi",
        &["--query-gpu=name", "--format=csv,noheader"],
        Duration::from_millis(2500),
    )
    .await
    {
        let first = raw.lines().next().unwrap_or("").trim();
        if !first.is_empty() {
            return Some(first.to_string());
        }
    }

    match std::env::consts::OS {
        "macos" => Some("Apple GPU".to_string()),
        "windows" => {
            let raw = run_probe_cmd(
                "wmic",
                &["path", "win32_VideoController", "get", "Name"],
                Duration::from_secs(3),
            )
            .await?;
            first_non_header_line(&raw, "name")
        }
        "linux" => {
            let raw = run_probe_cmd("lspci", &[], Duration::from_millis(2500)).await?;
            for line in raw.lines() {
                let low = line.to_lowercase();
                if low.contains("vga compatible controller")
                    || low.contains("3d controller")
                    || low.contains("display controller")
                {
                    let mut parts = line.splitn(3, ':');
                    let name = parts.nth(2).unwrap_or(line).trim();
                    return Some(name.to_string());
                }
            }
            None
        }
        _ => None,
    }
}

fn first_non_header_line(raw: &str, header_contains: &str) -> Option<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .find(|line| !line.to_lowercase().contains(header_contains))
        .map(str::to_string)
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

fn env_u32(name: &str, default: u32, minimum: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<u32>().ok())
        .filter(|value| *value >= minimum)
        .unwrap_or(default)
}

async fn detect_neural_runtime(has_cuda_gpu: bool) -> NeuralRuntime {
    let engine_pref = std::env::var("SCORECAP_UPSCALE_ENGINE")
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    let enabled = env_bool("SCORECAP_SR_ENABLE", false) || engine_pref == "neural";
    let allow_cpu = env_bool("SCORECAP_SR_ALLOW_CPU", false);
    let tile_size = env_u32("SCORECAP_SR_TILE_SIZE", 512, 64);
    let tile_pad = env_u32("SCORECAP_SR_TILE_PAD", 32, 0);
    let python_bin = std::env::var("SCORECAP_SR_PYTHON_BIN")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "python3".to_string());

    let unavailable = |reason: &str, repo: Option<PathBuf>, weights: Option<PathBuf>| NeuralRuntime {
        enabled,
        available: false,
        reason: reason.to_string(),
        repo_path: repo,
        weights_path: weights,
        python_bin: python_bin.clone(),
        device: "none".to_string(),
        allow_cpu,
        tile_size,
        tile_pad,
    };

    if !enabled {
        return unavailable("disabled", None, None);
    }

    let repo_raw = std::env::var("SCORECAP_SR_REPO").unwrap_or_default();
    if repo_raw.trim().is_empty() {
        return unavailable("missing_repo", None, None);
    }
    let repo_path = PathBuf::from(repo_raw.trim());
    if !repo_path.exists() {
        return unavailable("repo_not_found", Some(repo_path), None);
    }

    let weights_raw = std::env::var("SCORECAP_SR_WEIGHTS").unwrap_or_default();
    if weights_raw.trim().is_empty() {
        return unavailable("missing_weights", Some(repo_path), None);
    }
    let weights_path = PathBuf::from(weights_raw.trim());
    if !weights_path.exists() {
        return unavailable("weights_not_found", Some(repo_path), Some(weights_path));
    }

    let device = match std::env::var("SCORECAP_SR_DEVICE") {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().to_lowercase(),
        _ => {
            if has_cuda_gpu {
                "cuda".to_string()
            } else if std::env::consts::OS == "macos" {
                "mps".to_string()
            } else {
                "cpu".to_string()
            }
        }
    };

    if device == "cpu" && !allow_cpu {
        return unavailable("cpu_only_disallowed", Some(repo_path), Some(weights_path));
    }

    NeuralRuntime {
        enabled,
        available: true,
        reason: "ok".to_string(),
        repo_path: Some(repo_path),
        weights_path: Some(weights_path),
        python_bin,
        device,
        allow_cpu,
        tile_size,
        tile_pad,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hwaccel_flags_for() {
        assert_eq!(
            hwaccel_flags_for("cuda"),
            vec!["-hwaccel", "cuda", "-hwaccel_output_format", "cuda"]
        );
        assert_eq!(hwaccel_flags_for("vaapi"), vec!["-hwaccel", "vaapi"]);
        assert!(hwaccel_flags_for("  ").is_empty());
    }

    #[test]
    fn test_hwaccel_mode_name() {
        assert_eq!(hwaccel_mode_name(&[]), "cpu");
        let cuda = hwaccel_flags_for("cuda");
        assert_eq!(hwaccel_mode_name(&cuda), "cuda");
    }

    #[test]
    fn test_platform_preference_ends_with_known_accelerators() {
        let prefs = platform_hwaccel_preference();
        assert!(!prefs.is_empty());
        assert!(prefs.contains(&"cuda") || prefs.contains(&"videotoolbox"));
    }

    #[test]
    fn test_first_non_header_line() {
        let raw = "Name\n\nNVIDIA GeForce RTX 3080\n";
        assert_eq!(
            first_non_header_line(raw, "name").as_deref(),
            Some("NVIDIA GeForce RTX 3080")
        );
    }

    #[tokio::test]
    async fn test_single_init_under_concurrent_readers() {
        // All readers must observe the same snapshot instance.
        let (a, b, c) = tokio::join!(
            runtime_acceleration(),
            runtime_acceleration(),
            runtime_acceleration()
        );
        assert!(std::ptr::eq(a, b));
        assert!(std::ptr::eq(b, c));
        assert_eq!(
            a.hwaccel_order.last().map(String::as_str),
            Some("cpu"),
            "cpu fallback must always be appended"
        );
    }
}
