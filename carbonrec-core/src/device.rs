//! Compute device detection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::process::Command;
use tracing::debug;

/// Device the trainer should run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Cuda,
    Mps,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
            Self::Mps => "mps",
        }
    }

    /// Detect the best available device on this machine.
    ///
    /// Apple silicon reports `mps`; otherwise `cuda` when `nvidia-smi -L`
    /// lists at least one GPU; otherwise `cpu`.
    pub async fn detect() -> Self {
        if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
            return Self::Mps;
        }

        let output = Command::new("nvidia-smi").arg("-L").output().await;
        let device = match output {
            Ok(o) if o.status.success() && lists_gpu(&String::from_utf8_lossy(&o.stdout)) => {
                Self::Cuda
            }
            _ => Self::Cpu,
        };
        debug!(device = device.as_str(), "Detected compute device");
        device
    }
}

fn lists_gpu(nvidia_smi_list: &str) -> bool {
    nvidia_smi_list
        .lines()
        .any(|l| l.trim_start().starts_with("GPU "))
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            "mps" => Ok(Self::Mps),
            other => Err(format!("unknown device '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lists_gpu() {
        assert!(lists_gpu(
            "GPU 0: NVIDIA A100-SXM4-40GB (UUID: GPU-5a1c)\n"
        ));
        assert!(!lists_gpu("No devices were found\n"));
        assert!(!lists_gpu(""));
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("CUDA".parse::<Device>().unwrap(), Device::Cuda);
        assert_eq!(Device::Mps.to_string(), "mps");
        assert!("tpu".parse::<Device>().is_err());
    }

    #[tokio::test]
    async fn test_detect_does_not_panic() {
        let device = Device::detect().await;
        assert!(matches!(device, Device::Cpu | Device::Cuda | Device::Mps));
    }
}
