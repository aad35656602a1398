//! Kinema Core - Orchestration layer for a single-instance video
//! generation pipeline.
//!
//! One heavyweight Stable Video Diffusion instance is shared by every
//! transport. This crate owns the discipline around it:
//!
//! - load-once lifecycle with lock-free readiness checks
//! - strictly serialized, FIFO execution against the pipeline
//! - pure request validation ahead of the queue
//! - the sidecar bridge that actually hosts the model
//!
//! Transports live in `kinema-server` and only ever touch
//! [`LifecycleManager`], [`InferenceExecutor`] and [`request::validate`].

pub mod config;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod pipeline;
pub mod request;
pub mod types;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use executor::InferenceExecutor;
pub use lifecycle::{LifecycleManager, LifecycleState, LifecycleStatus};
pub use pipeline::{
    PipelineHandle, PipelineLoader, PipelineOutput, SidecarLoader, SidecarPipeline, VideoPipeline,
};
pub use request::{validate, InferenceRequest};
pub use types::{Device, InferenceResult};
