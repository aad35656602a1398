//! Configuration types for the kinema video engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main engine configuration.
///
/// Every field has a serde default so a partial config file or an empty
/// environment yields a runnable engine. The device flag is read once
/// at startup and fixed for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Force CPU execution instead of the accelerator
    #[serde(default = "default_use_cpu")]
    pub use_cpu: bool,

    /// Unix socket the diffusion worker daemon listens on
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Interpreter used to launch the worker daemon
    #[serde(default = "default_worker_command")]
    pub worker_command: String,

    /// Worker daemon entry point
    #[serde(default = "default_worker_script")]
    pub worker_script: PathBuf,

    /// Model identifier the worker loads
    #[serde(default = "default_model_id")]
    pub model_id: String,

    /// Frame decode chunk size passed to the pipeline
    #[serde(default = "default_decode_chunk_size")]
    pub decode_chunk_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            use_cpu: default_use_cpu(),
            socket_path: default_socket_path(),
            worker_command: default_worker_command(),
            worker_script: default_worker_script(),
            model_id: default_model_id(),
            decode_chunk_size: default_decode_chunk_size(),
        }
    }
}

fn default_use_cpu() -> bool {
    std::env::var("USE_CPU").map(|v| v == "1").unwrap_or(false)
}

fn default_socket_path() -> PathBuf {
    if let Ok(from_env) = std::env::var("KINEMA_WORKER_SOCKET") {
        let trimmed = from_env.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    PathBuf::from("/tmp/kinema_svd_worker.sock")
}

fn default_worker_command() -> String {
    "python3".to_string()
}

fn default_worker_script() -> PathBuf {
    PathBuf::from("scripts/svd_worker.py")
}

fn default_model_id() -> String {
    "stabilityai/stable-video-diffusion-img2vid-xt".to_string()
}

fn default_decode_chunk_size() -> usize {
    8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_complete() {
        let config = EngineConfig::default();
        assert_eq!(config.decode_chunk_size, 8);
        assert!(config.model_id.contains("stable-video-diffusion"));
    }

    #[test]
    fn deserializes_from_empty_object() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.worker_command, "python3");
    }
}
