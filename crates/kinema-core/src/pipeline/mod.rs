//! The pipeline capability: the one seam between the orchestration
//! layer and the generative model.
//!
//! The engine never sees model internals. It holds a [`PipelineHandle`]
//! produced by a [`PipelineLoader`] and calls [`VideoPipeline::invoke`]
//! through it, one job at a time.

mod sidecar;

pub use sidecar::{SidecarLoader, SidecarPipeline};

use crate::error::Result;
use crate::request::InferenceRequest;
use crate::types::Device;

/// Raw output of a pipeline invocation.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Encoded video frames
    pub video: Vec<u8>,
}

/// The opaque generation capability.
///
/// `invoke` is blocking and non-reentrant; the executor guarantees it
/// is never called concurrently.
pub trait VideoPipeline: Send + Sync {
    fn invoke(&self, request: &InferenceRequest) -> Result<PipelineOutput>;
}

/// Constructs the pipeline. Called exactly once, at process start, off
/// the request path. Loading may take minutes.
pub trait PipelineLoader: Send + Sync + 'static {
    fn load(&self) -> Result<PipelineHandle>;
}

/// The loaded, ready-to-use pipeline plus the metadata captured at
/// load time. Exactly one exists for the process lifetime.
pub struct PipelineHandle {
    pipeline: Box<dyn VideoPipeline>,
    device: Device,
    model_version: String,
}

impl PipelineHandle {
    pub fn new(
        pipeline: Box<dyn VideoPipeline>,
        device: Device,
        model_version: impl Into<String>,
    ) -> Self {
        Self {
            pipeline,
            device,
            model_version: model_version.into(),
        }
    }

    pub fn invoke(&self, request: &InferenceRequest) -> Result<PipelineOutput> {
        self.pipeline.invoke(request)
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }
}

impl std::fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("device", &self.device)
            .field("model_version", &self.model_version)
            .finish_non_exhaustive()
    }
}
