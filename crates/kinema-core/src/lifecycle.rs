//! Pipeline lifecycle: load once, then serve until the process dies.
//!
//! The state tag lives in an `AtomicU8` so the hot paths (`status` and
//! the readiness check in `submit`) never take a lock. The handle is
//! written exactly once, before the tag flips to Ready, so any reader
//! that observes Ready also observes the handle.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::pipeline::{PipelineHandle, PipelineLoader};
use crate::types::Device;

const TAG_LOADING: u8 = 0;
const TAG_READY: u8 = 1;
const TAG_FAILED: u8 = 2;

/// Readiness of the shared pipeline. `Ready` and `Failed` are both
/// terminal; there is no reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Loading,
    Ready,
    Failed,
}

impl LifecycleState {
    fn from_tag(tag: u8) -> Self {
        match tag {
            TAG_READY => LifecycleState::Ready,
            TAG_FAILED => LifecycleState::Failed,
            _ => LifecycleState::Loading,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Loading => "loading",
            LifecycleState::Ready => "ready",
            LifecycleState::Failed => "failed",
        }
    }
}

/// Point-in-time snapshot for health reporting.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleStatus {
    pub state: LifecycleState,
    pub elapsed_secs: f64,
    pub device: Option<Device>,
}

/// Owns the one pipeline handle and drives its load.
pub struct LifecycleManager {
    state: AtomicU8,
    started: Instant,
    handle: OnceLock<PipelineHandle>,
    failure: OnceLock<String>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(TAG_LOADING),
            started: Instant::now(),
            handle: OnceLock::new(),
            failure: OnceLock::new(),
        }
    }

    /// Run the loader and transition to Ready or Failed.
    ///
    /// Called once at process start, on a blocking task off the request
    /// path. Load failure is fatal to the instance: the error is
    /// returned so the caller can terminate rather than serve with no
    /// model.
    pub fn begin_load(&self, loader: &dyn PipelineLoader) -> Result<()> {
        if self.state.load(Ordering::Acquire) != TAG_LOADING {
            return Err(Error::LoadFailure("load was already attempted".into()));
        }

        info!("loading pipeline");
        match loader.load() {
            Ok(handle) => {
                let device = handle.device();
                let model = handle.model_version().to_string();
                if self.handle.set(handle).is_err() {
                    return Err(Error::LoadFailure("pipeline was already loaded".into()));
                }
                self.state.store(TAG_READY, Ordering::Release);
                info!(
                    %device,
                    model = %model,
                    elapsed_secs = self.elapsed_secs() as u64,
                    "pipeline ready"
                );
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                let _ = self.failure.set(message.clone());
                self.state.store(TAG_FAILED, Ordering::Release);
                error!(error = %message, "pipeline load failed");
                Err(Error::LoadFailure(message))
            }
        }
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_tag(self.state.load(Ordering::Acquire))
    }

    /// Seconds since the process began loading.
    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Side-effect-free snapshot; safe to call concurrently at any
    /// time, including mid-load.
    pub fn status(&self) -> LifecycleStatus {
        let state = self.state();
        LifecycleStatus {
            state,
            elapsed_secs: self.elapsed_secs(),
            device: self.handle.get().map(|h| h.device()),
        }
    }

    /// Fail fast with `NotReady` unless the pipeline is usable.
    pub fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            LifecycleState::Ready => Ok(()),
            _ => Err(Error::NotReady {
                elapsed_secs: self.elapsed_secs(),
            }),
        }
    }

    /// The loaded handle, only once Ready.
    pub fn handle(&self) -> Result<&PipelineHandle> {
        self.ensure_ready()?;
        self.handle.get().ok_or(Error::NotReady {
            elapsed_secs: self.elapsed_secs(),
        })
    }

    /// The recorded load failure, if the load failed.
    pub fn failure(&self) -> Option<&str> {
        self.failure.get().map(String::as_str)
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}
