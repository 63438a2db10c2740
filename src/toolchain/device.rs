//! Training device selection.

use std::process::Command;

/// The device string passed to the trainer plus what was detected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceSelection {
    /// `cpu`, a CUDA index (`0`), or a list (`0,1`).
    pub device: String,
    pub gpu: Option<GpuInfo>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GpuInfo {
    pub name: String,
    pub memory_total_mb: Option<u64>,
    pub driver_version: Option<String>,
}

/// Resolve the device to train on.
///
/// An empty request means auto-select: the first CUDA device if `nvidia-smi`
/// reports one, otherwise `cpu`. Explicit requests are passed through.
pub fn select_device(requested: &str) -> DeviceSelection {
    let requested = requested.trim();
    let wants_gpu = requested.is_empty() || !requested.eq_ignore_ascii_case("cpu");
    let gpu = if wants_gpu { nvidia_gpu() } else { None };

    let device = if requested.is_empty() {
        if gpu.is_some() { "0" } else { "cpu" }.to_string()
    } else {
        requested.to_string()
    };

    DeviceSelection { device, gpu }
}

fn nvidia_gpu() -> Option<GpuInfo> {
    let output = Command::new("nvidia-smi")
        .args([
            "--query-gpu=name,memory.total,driver_version",
            "--format=csv,noheader,nounits",
        ])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))
}

fn parse_nvidia_smi(stdout: &str) -> Option<GpuInfo> {
    let mut parts = stdout.lines().next()?.split(',').map(str::trim);
    let name = parts.next().filter(|n| !n.is_empty())?.to_string();
    let memory_total_mb = parts.next().and_then(|v| v.parse::<u64>().ok());
    let driver_version = parts.next().filter(|v| !v.is_empty()).map(str::to_string);

    Some(GpuInfo {
        name,
        memory_total_mb,
        driver_version,
    })
}
