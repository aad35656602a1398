//! Sidecar pipeline: drives the diffusion worker daemon over a Unix
//! socket.
//!
//! The worker owns the model weights and the accelerator; this side
//! owns its lifecycle. Messages are length-prefixed JSON. The worker
//! loads the model once at startup and answers `check` with its load
//! state, so the loader can poll until the pipeline is actually usable.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{PipelineHandle, PipelineLoader, PipelineOutput, VideoPipeline};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::request::InferenceRequest;
use crate::types::Device;

/// Version string reported when the worker does not name one.
pub const MODEL_VERSION: &str = "svd-xt-1.1";

/// How long to wait for the worker process to open its socket.
const SPAWN_WAIT: Duration = Duration::from_secs(10);
/// How long to wait for the worker to finish loading the model.
const LOAD_WAIT: Duration = Duration::from_secs(30 * 60);
/// Poll interval while waiting for the model load.
const LOAD_POLL: Duration = Duration::from_secs(2);

const WRITE_TIMEOUT: Duration = Duration::from_secs(30);
/// Generation on the CPU fallback can take many minutes per clip.
const READ_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Request to the worker daemon.
#[derive(Debug, Serialize)]
struct WorkerRequest<'a> {
    command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_frames: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    motion_bucket_id: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    decode_chunk_size: Option<usize>,
}

impl<'a> WorkerRequest<'a> {
    fn command(command: &'a str) -> Self {
        Self {
            command,
            image_base64: None,
            fps: None,
            num_frames: None,
            motion_bucket_id: None,
            decode_chunk_size: None,
        }
    }
}

/// Response from the worker daemon.
#[derive(Debug, Deserialize)]
struct WorkerResponse {
    status: Option<String>,
    device: Option<String>,
    model_version: Option<String>,
    video_base64: Option<String>,
    error: Option<String>,
}

/// Pipeline implementation backed by the worker daemon.
pub struct SidecarPipeline {
    config: EngineConfig,
    worker_process: Mutex<Option<Child>>,
}

impl SidecarPipeline {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            worker_process: Mutex::new(None),
        }
    }

    fn is_worker_running(&self) -> bool {
        self.config.socket_path.exists() && self.connect().is_ok()
    }

    /// Start the worker process if its socket is not answering.
    fn ensure_worker_running(&self) -> Result<()> {
        if self.is_worker_running() {
            debug!("diffusion worker already running");
            return Ok(());
        }

        info!(script = %self.config.worker_script.display(), "starting diffusion worker");

        let device = Device::from_use_cpu(self.config.use_cpu);
        let child = Command::new(&self.config.worker_command)
            .arg(&self.config.worker_script)
            .arg("--socket")
            .arg(&self.config.socket_path)
            .arg("--model")
            .arg(&self.config.model_id)
            .arg("--device")
            .arg(device.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Inference(format!("failed to start worker: {e}")))?;

        {
            let mut guard = self.worker_process.lock().unwrap();
            *guard = Some(child);
        }

        let deadline = Instant::now() + SPAWN_WAIT;
        while Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(100));
            if self.config.socket_path.exists() && self.connect().is_ok() {
                info!("diffusion worker socket is up");
                return Ok(());
            }
        }

        Err(Error::Inference(format!(
            "worker did not open {} within {}s",
            self.config.socket_path.display(),
            SPAWN_WAIT.as_secs()
        )))
    }

    /// Poll `check` until the worker reports the model loaded.
    ///
    /// Returns the device and model version the worker settled on.
    fn wait_for_model(&self) -> Result<(Device, String)> {
        let deadline = Instant::now() + LOAD_WAIT;
        loop {
            let response = self.call(&WorkerRequest::command("check"))?;
            if let Some(err) = response.error {
                return Err(Error::Inference(format!("worker failed to load: {err}")));
            }
            if response.status.as_deref() == Some("ok") {
                let device = response
                    .device
                    .as_deref()
                    .and_then(|d| d.parse::<Device>().ok())
                    .unwrap_or_else(|| Device::from_use_cpu(self.config.use_cpu));
                let version = response
                    .model_version
                    .unwrap_or_else(|| MODEL_VERSION.to_string());
                info!(%device, model = %version, "diffusion worker ready");
                return Ok((device, version));
            }
            if Instant::now() >= deadline {
                return Err(Error::Inference(format!(
                    "model did not load within {}s",
                    LOAD_WAIT.as_secs()
                )));
            }
            debug!("worker still loading the model");
            std::thread::sleep(LOAD_POLL);
        }
    }

    fn connect(&self) -> Result<UnixStream> {
        let stream = UnixStream::connect(&self.config.socket_path)
            .map_err(|e| Error::Inference(format!("failed to connect to worker: {e}")))?;

        stream.set_read_timeout(Some(READ_TIMEOUT)).ok();
        stream.set_write_timeout(Some(WRITE_TIMEOUT)).ok();

        Ok(stream)
    }

    fn call(&self, request: &WorkerRequest<'_>) -> Result<WorkerResponse> {
        let mut stream = self.connect()?;
        exchange(&mut stream, request)
    }

    fn stop_worker(&self) {
        if let Ok(mut stream) = self.connect() {
            let _ = exchange(&mut stream, &WorkerRequest::command("shutdown"));
        }

        let mut guard = self.worker_process.lock().unwrap();
        if let Some(mut child) = guard.take() {
            let _ = child.kill();
            let _ = child.wait();
        }

        if self.config.socket_path.exists() {
            let _ = std::fs::remove_file(&self.config.socket_path);
        }
    }
}

impl VideoPipeline for SidecarPipeline {
    fn invoke(&self, request: &InferenceRequest) -> Result<PipelineOutput> {
        let worker_request = WorkerRequest {
            command: "generate",
            image_base64: Some(
                base64::engine::general_purpose::STANDARD.encode(&request.image),
            ),
            fps: Some(request.fps),
            num_frames: Some(request.frames),
            motion_bucket_id: Some(request.motion_bucket_id),
            decode_chunk_size: Some(self.config.decode_chunk_size),
        };

        let response = self.call(&worker_request)?;

        if let Some(err) = response.error {
            return Err(Error::Inference(err));
        }

        let video_base64 = response
            .video_base64
            .ok_or_else(|| Error::Inference("worker returned no video".into()))?;

        let video = base64::engine::general_purpose::STANDARD
            .decode(video_base64.as_bytes())
            .map_err(|e| Error::Inference(format!("worker returned malformed video: {e}")))?;

        Ok(PipelineOutput { video })
    }
}

impl Drop for SidecarPipeline {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

/// Send one length-prefixed JSON request and read the reply.
fn exchange(stream: &mut UnixStream, request: &WorkerRequest<'_>) -> Result<WorkerResponse> {
    let request_json = serde_json::to_string(request)
        .map_err(|e| Error::Inference(format!("failed to serialize worker request: {e}")))?;

    let data = request_json.as_bytes();
    let length = (data.len() as u32).to_be_bytes();

    stream
        .write_all(&length)
        .and_then(|_| stream.write_all(data))
        .and_then(|_| stream.flush())
        .map_err(|e| Error::Inference(format!("failed to write to worker: {e}")))?;

    let mut length_buf = [0u8; 4];
    stream
        .read_exact(&mut length_buf)
        .map_err(|e| Error::Inference(format!("failed to read worker response length: {e}")))?;
    let response_len = u32::from_be_bytes(length_buf) as usize;

    let mut response_buf = vec![0u8; response_len];
    stream
        .read_exact(&mut response_buf)
        .map_err(|e| Error::Inference(format!("failed to read worker response: {e}")))?;

    serde_json::from_slice(&response_buf).map_err(|e| {
        Error::Inference(format!(
            "failed to parse worker response: {} - {}",
            e,
            String::from_utf8_lossy(&response_buf)
        ))
    })
}

/// Loads the sidecar pipeline: spawns the worker if needed, waits for
/// the model, and yields the handle.
pub struct SidecarLoader {
    config: EngineConfig,
}

impl SidecarLoader {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

impl PipelineLoader for SidecarLoader {
    fn load(&self) -> Result<PipelineHandle> {
        let pipeline = SidecarPipeline::new(self.config.clone());

        pipeline.ensure_worker_running().map_err(as_load_failure)?;
        let (device, model_version) = pipeline.wait_for_model().map_err(as_load_failure)?;

        Ok(PipelineHandle::new(
            Box::new(pipeline),
            device,
            model_version,
        ))
    }
}

fn as_load_failure(err: Error) -> Error {
    match err {
        Error::Inference(msg) => Error::LoadFailure(msg),
        other => Error::LoadFailure(other.to_string()),
    }
}
