//! Shared engine types: execution device and job output.

use serde::{Deserialize, Serialize};

/// Execution device the pipeline landed on.
///
/// Selected once at startup from configuration and fixed for the
/// process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cuda,
    Cpu,
}

impl Device {
    pub fn from_use_cpu(use_cpu: bool) -> Self {
        if use_cpu {
            Device::Cpu
        } else {
            Device::Cuda
        }
    }

    pub fn is_cpu(&self) -> bool {
        matches!(self, Device::Cpu)
    }

    pub fn is_cuda(&self) -> bool {
        matches!(self, Device::Cuda)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cuda => "cuda",
            Device::Cpu => "cpu",
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "cuda" => Ok(Device::Cuda),
            "cpu" => Ok(Device::Cpu),
            other => Err(format!("unknown device '{other}'")),
        }
    }
}

/// Output of one completed generation job, owned by the caller once
/// returned.
#[derive(Debug, Clone)]
pub struct InferenceResult {
    /// Encoded video frames
    pub video: Vec<u8>,
    /// Version string of the model that produced the frames
    pub model_version: String,
    /// Clip duration in seconds (frames / fps)
    pub duration_secs: f32,
    /// Wall-clock time spent inside the pipeline invocation
    pub processing_secs: f32,
    /// Device the job ran on
    pub device: Device,
}
